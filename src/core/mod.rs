//! Core timer scheduling, load caching and instance pooling.

pub mod error;
pub mod scheduler;
pub mod backend;
pub mod load_cache;
pub mod object_pool;
pub mod context;

pub use error::{AppResult, CacheError};
pub use scheduler::{Repeat, Scheduler, TimerHandle};
pub use backend::{AssetBackend, InstanceHost, Reply, Spawn};
pub use load_cache::{FailureCallback, LoadCache, TicketStatus};
pub use object_pool::{DEFAULT_EVICTION_FACTOR, ObjectPool, PoolStats, SweepReport};
pub use context::ResourceContext;
