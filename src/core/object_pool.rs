//! Per-template object pool with hysteresis eviction.
//!
//! Each resource key owns one pool record: the template, the instances
//! currently handed out (active) and a LIFO stack of parked instances (idle).
//! Records live in an arena and are addressed by index; the back-reference
//! table maps every tracked instance, active or idle, to its record index so
//! release and destroy never scan.
//!
//! Periodic sweeps trim idle instances down to
//! `floor(high_water_mark * eviction_factor)` per record and drop records
//! that end up empty, releasing the load they own. Sweeps are skipped while
//! any template load started by [`ObjectPool::acquire`] is outstanding.
//!
//! Host callbacks are made with the pool lock released, except
//! [`InstanceHost::instantiate`], which must not call back into the pool.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{AssetBackend, CacheError, FailureCallback, InstanceHost, LoadCache};

/// Eviction factor applied when none is configured.
pub const DEFAULT_EVICTION_FACTOR: f64 = 1.2;

/// Counters of one pool record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolStats {
    /// Instances handed out.
    pub active: usize,
    /// Instances parked for reuse.
    pub idle: usize,
    /// Peak concurrent active count since the last sweep.
    pub high_water_mark: usize,
}

/// Outcome of one [`ObjectPool::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SweepReport {
    /// The sweep was skipped because a template load is outstanding.
    pub deferred: bool,
    /// Idle instances destroyed.
    pub evicted: usize,
    /// Keys whose records were removed.
    pub removed_records: Vec<String>,
}

struct PoolRecord<T, I> {
    key: String,
    template: T,
    owns_load: bool,
    eviction_factor: f64,
    high_water_mark: usize,
    active: HashSet<I>,
    idle: Vec<I>,
}

impl<T, I: Eq + std::hash::Hash> PoolRecord<T, I> {
    fn count(&self) -> usize {
        self.active.len() + self.idle.len()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn retained(&self) -> usize {
        (self.high_water_mark as f64 * self.eviction_factor).floor() as usize
    }

    fn evict_count(&self) -> usize {
        self.count().saturating_sub(self.retained())
    }

    fn mark_active(&mut self, instance: I) {
        self.active.insert(instance);
        self.high_water_mark = self.high_water_mark.max(self.active.len());
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active.len(),
            idle: self.idle.len(),
            high_water_mark: self.high_water_mark,
        }
    }
}

struct PoolState<T, I> {
    records: Vec<Option<PoolRecord<T, I>>>,
    free: Vec<usize>,
    by_key: HashMap<String, usize>,
    /// Back-reference table: every tracked instance to its record index.
    owners: HashMap<I, usize>,
    /// Template loads started by `acquire` that have not settled.
    loads_in_flight: usize,
}

impl<T, I> Default for PoolState<T, I> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
            owners: HashMap::new(),
            loads_in_flight: 0,
        }
    }
}

impl<T, I: Eq + std::hash::Hash> PoolState<T, I> {
    fn record_mut(&mut self, index: usize) -> &mut PoolRecord<T, I> {
        match self.records.get_mut(index).and_then(Option::as_mut) {
            Some(record) => record,
            None => panic!("pool bookkeeping corrupted: no record at index {index}"),
        }
    }

    fn insert(&mut self, record: PoolRecord<T, I>) -> usize {
        let key = record.key.clone();
        let index = if let Some(index) = self.free.pop() {
            self.records[index] = Some(record);
            index
        } else {
            self.records.push(Some(record));
            self.records.len() - 1
        };
        self.by_key.insert(key, index);
        index
    }

    /// Unlink a record and every back-reference to its instances.
    fn remove(&mut self, index: usize) -> Option<PoolRecord<T, I>> {
        let record = self.records.get_mut(index)?.take()?;
        self.free.push(index);
        self.by_key.remove(&record.key);
        for instance in record.active.iter().chain(record.idle.iter()) {
            self.owners.remove(instance);
        }
        Some(record)
    }
}

type ReadyCallback<I> = Box<dyn FnOnce(I) + Send>;

/// Object pool over templates fetched through a [`LoadCache`].
///
/// Cloning yields another handle to the same pool.
pub struct ObjectPool<B, H>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    cache: LoadCache<B>,
    host: Arc<H>,
    state: Arc<Mutex<PoolState<B::Handle, H::Instance>>>,
    default_factor: f64,
}

impl<B, H> Clone for ObjectPool<B, H>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            host: Arc::clone(&self.host),
            state: Arc::clone(&self.state),
            default_factor: self.default_factor,
        }
    }
}

impl<B, H> ObjectPool<B, H>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    /// Create a pool that loads templates through `cache` and places
    /// instances with `host`.
    pub fn new(cache: LoadCache<B>, host: H) -> Self {
        Self {
            cache,
            host: Arc::new(host),
            state: Arc::new(Mutex::new(PoolState::default())),
            default_factor: DEFAULT_EVICTION_FACTOR,
        }
    }

    /// Eviction factor for records created by [`ObjectPool::acquire`].
    #[must_use]
    pub fn with_eviction_factor(mut self, factor: f64) -> Self {
        self.default_factor = sanitize_factor("<default>", factor);
        self
    }

    /// The cache templates are loaded through.
    pub const fn cache(&self) -> &LoadCache<B> {
        &self.cache
    }

    /// The placement host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Register a template under `key`.
    ///
    /// With `owns_load` the record releases the cache ticket for `key` when
    /// it is cleared. A key that already has a record is rejected and the
    /// original registration is kept.
    pub fn register_template(
        &self,
        key: &str,
        template: B::Handle,
        owns_load: bool,
        eviction_factor: f64,
    ) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        if state.by_key.contains_key(key) {
            drop(state);
            tracing::error!(key, "duplicate template registration ignored");
            return Err(CacheError::DuplicateTemplate(key.to_string()));
        }
        state.insert(new_record(key, template, owns_load, sanitize_factor(key, eviction_factor)));
        tracing::debug!(key, owns_load, "template registered");
        Ok(())
    }

    /// The template registered under `key`.
    pub fn get_template(&self, key: &str) -> Option<B::Handle> {
        let state = self.state.lock();
        let index = *state.by_key.get(key)?;
        state.records[index].as_ref().map(|r| r.template.clone())
    }

    /// Hand out an instance of `key`, loading the template first if needed.
    /// Load failures are logged and `on_ready` is dropped.
    pub fn acquire<F>(&self, key: &str, on_ready: F)
    where
        F: FnOnce(H::Instance) + Send + 'static,
    {
        self.acquire_or_else(key, on_ready, |_| {});
    }

    /// Like [`ObjectPool::acquire`], reporting failures to `on_failed`.
    ///
    /// An idle instance is reused when available; otherwise a new one is
    /// instantiated from the template. Concurrent acquires of an unloaded
    /// key share one backend load through the cache.
    pub fn acquire_or_else<F, E>(&self, key: &str, on_ready: F, on_failed: E)
    where
        F: FnOnce(H::Instance) + Send + 'static,
        E: FnOnce(CacheError) + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(index) = state.by_key.get(key).copied() {
            let taken = self.take_instance(&mut state, index);
            drop(state);
            deliver(key, taken, on_ready, on_failed);
            return;
        }
        state.loads_in_flight += 1;
        drop(state);

        let on_failed: Arc<Mutex<Option<FailureCallback>>> =
            Arc::new(Mutex::new(Some(Box::new(on_failed))));
        let failed = Arc::clone(&on_failed);
        let loaded = self.clone();
        let rejected = self.clone();
        let owned_key = key.to_string();
        let ready: ReadyCallback<H::Instance> = Box::new(on_ready);

        self.cache.load(
            key,
            move |template| {
                let on_failed = on_failed.lock().take();
                loaded.install_and_take(&owned_key, template, ready, on_failed);
            },
            move |error| {
                rejected.settle_load();
                tracing::error!(%error, "template load failed");
                if let Some(on_failed) = failed.lock().take() {
                    on_failed(error);
                }
            },
            false,
        );
    }

    /// Acquire an instance, hide it, and when `parent` is given place it
    /// under `parent` with the template's layout copied on.
    pub fn acquire_placed<F>(&self, key: &str, parent: Option<H::Parent>, on_ready: F)
    where
        F: FnOnce(H::Instance) + Send + 'static,
        H::Parent: Send + 'static,
    {
        let pool = self.clone();
        let owned_key = key.to_string();
        self.acquire(key, move |instance| {
            pool.host.deactivate(&instance);
            if let Some(parent) = parent {
                pool.host.set_parent(&instance, &parent);
                if let Some(template) = pool.get_template(&owned_key) {
                    pool.host.copy_layout(&instance, &template);
                }
            }
            on_ready(instance);
        });
    }

    fn settle_load(&self) {
        let mut state = self.state.lock();
        state.loads_in_flight = state.loads_in_flight.saturating_sub(1);
    }

    fn install_and_take(
        &self,
        key: &str,
        template: B::Handle,
        on_ready: ReadyCallback<H::Instance>,
        on_failed: Option<FailureCallback>,
    ) {
        let mut state = self.state.lock();
        state.loads_in_flight = state.loads_in_flight.saturating_sub(1);
        let index = if let Some(index) = state.by_key.get(key).copied() {
            // An earlier waiter or a manual registration got here first. The
            // record owns the cache ticket either way.
            state.record_mut(index).owns_load = true;
            index
        } else {
            tracing::debug!(key, "template installed from load");
            state.insert(new_record(key, template, true, self.default_factor))
        };
        let taken = self.take_instance(&mut state, index);
        drop(state);
        deliver(key, taken, on_ready, |e| {
            if let Some(on_failed) = on_failed {
                on_failed(e);
            }
        });
    }

    fn take_instance(
        &self,
        state: &mut PoolState<B::Handle, H::Instance>,
        index: usize,
    ) -> Result<H::Instance, CacheError> {
        let record = state.record_mut(index);
        if let Some(instance) = record.idle.pop() {
            record.mark_active(instance.clone());
            return Ok(instance);
        }
        let instance = self
            .host
            .instantiate(&record.key, &record.template)
            .map_err(|reason| CacheError::Instantiate {
                key: record.key.clone(),
                reason,
            })?;
        record.mark_active(instance.clone());
        state.owners.insert(instance.clone(), index);
        Ok(instance)
    }

    /// Return an instance to its record's idle stack.
    ///
    /// An instance the pool does not track is destroyed. Releasing an
    /// instance that is already idle is ignored.
    pub fn release(&self, instance: H::Instance) {
        let mut state = self.state.lock();
        let Some(index) = state.owners.get(&instance).copied() else {
            drop(state);
            tracing::warn!(?instance, "tried to release an instance not allocated by this pool");
            self.host.destroy(instance);
            return;
        };
        let record = state.record_mut(index);
        if !record.active.remove(&instance) {
            drop(state);
            tracing::warn!(?instance, "instance released twice");
            return;
        }
        record.idle.push(instance.clone());
        drop(state);

        self.host.deactivate(&instance);
        self.host.return_to_root(&instance);
    }

    /// Destroy an instance and stop tracking it. A record left empty is
    /// cleared at once.
    ///
    /// The owning record is found in O(1). An idle instance is then
    /// removed from the record's idle stack by a linear scan, which keeps
    /// the reuse order of the remaining idle instances intact; destroy
    /// is rare next to acquire and release, which stay O(1).
    pub fn destroy(&self, instance: H::Instance) {
        let mut state = self.state.lock();
        let cleared = match state.owners.remove(&instance) {
            None => None,
            Some(index) => {
                let record = state.record_mut(index);
                if !record.active.remove(&instance) {
                    // O(idle): preserves LIFO order of the others.
                    if let Some(pos) = record.idle.iter().position(|i| *i == instance) {
                        record.idle.remove(pos);
                    }
                }
                if record.count() == 0 {
                    state.remove(index)
                } else {
                    None
                }
            }
        };
        drop(state);

        self.host.destroy(instance);
        if let Some(record) = cleared {
            self.teardown(record);
        }
    }

    /// Evict surplus idle instances and drop empty records.
    ///
    /// Does nothing while a template load is outstanding.
    pub fn sweep(&self) -> SweepReport {
        let mut state = self.state.lock();
        if state.loads_in_flight > 0 {
            tracing::debug!(loads = state.loads_in_flight, "sweep deferred");
            return SweepReport {
                deferred: true,
                ..SweepReport::default()
            };
        }

        let mut doomed = Vec::new();
        let PoolState {
            records, owners, ..
        } = &mut *state;
        for record in records.iter_mut().flatten() {
            for _ in 0..record.evict_count() {
                let Some(instance) = record.idle.pop() else {
                    panic!("idle stack of `{}` empty during eviction", record.key);
                };
                owners.remove(&instance);
                doomed.push(instance);
            }
        }

        let empty: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.as_ref().is_some_and(|r| r.count() == 0))
            .map(|(index, _)| index)
            .collect();
        let removed: Vec<_> = empty.into_iter().filter_map(|i| state.remove(i)).collect();

        for record in state.records.iter_mut().flatten() {
            record.high_water_mark = record.active.len();
        }
        drop(state);

        let report = SweepReport {
            deferred: false,
            evicted: doomed.len(),
            removed_records: removed.iter().map(|r| r.key.clone()).collect(),
        };
        for instance in doomed {
            self.host.destroy(instance);
        }
        for record in removed {
            self.teardown(record);
        }
        tracing::info!(
            evicted = report.evicted,
            removed = report.removed_records.len(),
            "pool sweep finished"
        );
        report
    }

    /// Destroy every tracked instance and drop every record, releasing owned
    /// loads. No hysteresis is applied.
    pub fn clear_all(&self) {
        let records: Vec<_> = {
            let mut state = self.state.lock();
            state.by_key.clear();
            state.owners.clear();
            state.free.clear();
            std::mem::take(&mut state.records).into_iter().flatten().collect()
        };
        let count = records.len();
        for record in records {
            self.teardown(record);
        }
        tracing::info!(records = count, "pool cleared");
    }

    fn teardown(&self, record: PoolRecord<B::Handle, H::Instance>) {
        for instance in record.active.into_iter().chain(record.idle) {
            self.host.destroy(instance);
        }
        if record.owns_load {
            self.cache.release(&record.key);
        }
        tracing::debug!(key = %record.key, "pool record cleared");
    }

    /// Counters of the record for `key`.
    pub fn stats(&self, key: &str) -> Option<PoolStats> {
        let state = self.state.lock();
        let index = *state.by_key.get(key)?;
        state.records[index].as_ref().map(PoolRecord::stats)
    }

    /// Key of the record tracking `instance`.
    pub fn owner_of(&self, instance: &H::Instance) -> Option<String> {
        let state = self.state.lock();
        let index = *state.owners.get(instance)?;
        state.records[index].as_ref().map(|r| r.key.clone())
    }

    /// Number of records.
    pub fn record_count(&self) -> usize {
        self.state.lock().by_key.len()
    }

    /// False while a template load started by `acquire` is outstanding.
    pub fn is_sweep_safe(&self) -> bool {
        self.state.lock().loads_in_flight == 0
    }
}

impl<B, H> fmt::Debug for ObjectPool<B, H>
where
    B: AssetBackend,
    H: InstanceHost<Template = B::Handle>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectPool")
            .field("records", &state.by_key.len())
            .field("tracked", &state.owners.len())
            .field("loads_in_flight", &state.loads_in_flight)
            .finish_non_exhaustive()
    }
}

fn new_record<T, I>(key: &str, template: T, owns_load: bool, factor: f64) -> PoolRecord<T, I> {
    PoolRecord {
        key: key.to_string(),
        template,
        owns_load,
        eviction_factor: factor,
        high_water_mark: 0,
        active: HashSet::new(),
        idle: Vec::new(),
    }
}

fn sanitize_factor(key: &str, factor: f64) -> f64 {
    if factor.is_finite() && factor >= 1.0 {
        factor
    } else {
        tracing::warn!(key, factor, "eviction factor must be finite and >= 1, using 1.0");
        1.0
    }
}

fn deliver<I, F, E>(key: &str, taken: Result<I, CacheError>, on_ready: F, on_failed: E)
where
    F: FnOnce(I),
    E: FnOnce(CacheError),
{
    match taken {
        Ok(instance) => on_ready(instance),
        Err(error) => {
            tracing::error!(key, %error, "failed to hand out pooled instance");
            on_failed(error);
        }
    }
}
