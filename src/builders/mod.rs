pub mod context_builder;

pub use context_builder::{build_context, build_context_from_env};
