//! Explicit context tying the scheduler, load cache and object pool together.
//!
//! Build one per process (or per scene) and hand clones of its parts to the
//! code that needs them. The host drives everything through
//! [`ResourceContext::tick`].

use std::fmt;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::core::{
    AssetBackend, InstanceHost, LoadCache, ObjectPool, Repeat, Scheduler, TimerHandle,
};

/// Scheduler, cache and pool sharing one backend and one host.
pub struct ResourceContext<B, H>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    scheduler: Scheduler,
    cache: LoadCache<B>,
    pool: ObjectPool<B, H>,
    sweep_timer: Option<TimerHandle>,
}

impl<B, H> ResourceContext<B, H>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    /// Create the context. With `auto_sweep` set, a repeating timer sweeps
    /// the pool every `sweep_interval_secs`.
    ///
    /// `config` is not validated here; see
    /// [`build_context`](crate::builders::build_context).
    pub fn new(config: &CacheConfig, backend: B, host: H) -> Self {
        let scheduler = Scheduler::new();
        let cache = LoadCache::new(backend);
        let pool = ObjectPool::new(cache.clone(), host).with_eviction_factor(config.eviction_factor);

        let sweep_timer = config.auto_sweep.then(|| {
            let sweeping = pool.clone();
            scheduler.schedule(config.sweep_interval(), Repeat::Forever, move || {
                sweeping.sweep();
                Ok(())
            })
        });

        tracing::info!(
            sweep_interval_secs = config.sweep_interval_secs,
            eviction_factor = config.eviction_factor,
            auto_sweep = config.auto_sweep,
            "resource context created"
        );
        Self {
            scheduler,
            cache,
            pool,
            sweep_timer,
        }
    }

    /// Deliver queued backend completions, then advance every timer.
    pub fn tick(&self, elapsed: Duration) {
        self.cache.pump();
        self.scheduler.tick(elapsed);
    }

    /// The timer scheduler.
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The load cache.
    pub const fn cache(&self) -> &LoadCache<B> {
        &self.cache
    }

    /// The object pool.
    pub const fn pool(&self) -> &ObjectPool<B, H> {
        &self.pool
    }

    /// Handle of the periodic sweep timer, if one was scheduled.
    pub const fn sweep_timer(&self) -> Option<&TimerHandle> {
        self.sweep_timer.as_ref()
    }

    /// Stop the periodic sweep and destroy every pooled instance.
    pub fn shutdown(&self) {
        if let Some(timer) = &self.sweep_timer {
            self.scheduler.stop(timer);
        }
        self.pool.clear_all();
    }
}

impl<B, H> fmt::Debug for ResourceContext<B, H>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContext")
            .field("cache", &self.cache)
            .field("pool", &self.pool)
            .field("sweep_timer", &self.sweep_timer)
            .finish_non_exhaustive()
    }
}
