//! Infrastructure adapters: asset backends and placement hosts.

pub mod backend;
pub mod host;

pub use backend::{AssetSource, AsyncBackend, ManualBackend};
pub use host::{InstanceId, InstanceState, MemoryHost};
