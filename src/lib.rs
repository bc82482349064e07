//! # Prometheus Resource Cache
//!
//! Tick-driven resource management for interactive hosts: a cooperative
//! timer scheduler, a single-flight load cache in front of an asynchronous
//! asset backend, and an object pool that recycles instances created from
//! loaded templates.
//!
//! Hosts such as game loops, editors or UI frameworks load assets
//! asynchronously and instantiate many short-lived copies of them. This
//! crate keeps both costs down without any hidden threads:
//!
//! - **Timer Scheduler**: delayed, repeating and infinite timers advanced by
//!   an explicit `tick(elapsed)`, safe to mutate from inside a firing task
//! - **Load Cache**: one backend load per key no matter how many consumers
//!   ask, with failures never cached and releases deferred until in-flight
//!   loads settle
//! - **Object Pool**: per-template idle stacks with an O(1) back-reference
//!   table and a high-water-mark eviction sweep
//! - **Resource Context**: the three wired together around one backend and
//!   one placement host, with the periodic sweep scheduled for you
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use prometheus_resource_cache::builders::build_context;
//! use prometheus_resource_cache::config::CacheConfig;
//! use prometheus_resource_cache::infra::{ManualBackend, MemoryHost};
//!
//! let ctx = build_context(&CacheConfig::default(), ManualBackend::immediate(), MemoryHost::new())
//!     .expect("valid config");
//!
//! ctx.pool().acquire("enemy", |id| println!("spawned {id}"));
//! ctx.tick(Duration::from_millis(16)); // delivers the load and hands out the instance
//! assert_eq!(ctx.pool().stats("enemy").map(|s| s.active), Some(1));
//! ```
//!
//! ## Async backends
//!
//! Implement [`infra::AssetSource`] with `async fn`s and wrap it in
//! [`infra::AsyncBackend`] with a [`runtime::TokioSpawner`]. Completions are
//! queued and delivered on the ticking thread by the next `tick`.
//!
//! ```rust,ignore
//! let backend = AsyncBackend::new(BundleSource::open("assets/")?, TokioSpawner::current());
//! let ctx = build_context(&CacheConfig::from_env()?, backend, SceneHost::new(root))?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Timer scheduling, load caching and instance pooling.
pub mod core;
/// Configuration models for the resource context.
pub mod config;
/// Builders to construct a resource context from configuration.
pub mod builders;
/// Infrastructure adapters for asset backends and placement hosts.
pub mod infra;
/// Runtime adapters for async backends.
pub mod runtime;
/// Shared utilities.
pub mod util;
