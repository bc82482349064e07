//! Builders to construct a resource context from configuration.

use crate::config::CacheConfig;
use crate::core::{AssetBackend, CacheError, InstanceHost, ResourceContext};

/// Validate `cfg` and build a [`ResourceContext`] over `backend` and `host`.
pub fn build_context<B, H>(
    cfg: &CacheConfig,
    backend: B,
    host: H,
) -> Result<ResourceContext<B, H>, CacheError>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    cfg.validate()?;
    Ok(ResourceContext::new(cfg, backend, host))
}

/// Build a context from `.env` and the process environment.
pub fn build_context_from_env<B, H>(
    backend: B,
    host: H,
) -> Result<ResourceContext<B, H>, CacheError>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    let cfg = CacheConfig::from_env()?;
    Ok(ResourceContext::new(&cfg, backend, host))
}
