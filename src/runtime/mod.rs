//! Runtime adapters for async asset backends.

#[cfg(feature = "tokio-runtime")]
pub mod tokio_spawner;

pub use crate::core::Spawn;
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioSpawner;
