//! Asset backend implementations.

pub mod memory;
pub mod source;

pub use memory::ManualBackend;
pub use source::{AssetSource, AsyncBackend};
