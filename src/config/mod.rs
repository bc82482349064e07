//! Configuration models for the resource context.

pub mod cache;

pub use cache::{
    CacheConfig, DEFAULT_SWEEP_INTERVAL_SECS, ENV_AUTO_SWEEP, ENV_EVICTION_FACTOR,
    ENV_SWEEP_INTERVAL,
};
