//! Seams to the external collaborators: the asset backend that performs the
//! actual loads, and the placement host that owns instantiated objects.
//!
//! Backends answer every request through a [`Reply`]. A reply may be
//! completed synchronously inside the request call or later from any thread;
//! either way the result is queued and only delivered to consumers when the
//! owning [`LoadCache`](crate::core::LoadCache) is pumped.

use std::fmt;
use std::future::Future;
use std::hash::Hash;

type Deliver<T> = Box<dyn FnOnce(Result<T, String>) + Send>;

/// One-shot completion slot for a backend request.
///
/// Dropping a reply without completing it reports a failure, so consumers
/// waiting on the request are always notified.
pub struct Reply<T> {
    deliver: Option<Deliver<T>>,
}

impl<T> Reply<T> {
    pub(crate) fn new<F>(deliver: F) -> Self
    where
        F: FnOnce(Result<T, String>) + Send + 'static,
    {
        Self {
            deliver: Some(Box::new(deliver)),
        }
    }

    /// Complete the request successfully.
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    /// Complete the request with a failure reason.
    pub fn fail(self, reason: impl Into<String>) {
        self.complete(Err(reason.into()));
    }

    /// Complete the request with an explicit result.
    pub fn complete(mut self, result: Result<T, String>) {
        if let Some(deliver) = self.deliver.take() {
            deliver(result);
        }
    }
}

impl<T> Drop for Reply<T> {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Err("request dropped without completion".into()));
        }
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("pending", &self.deliver.is_some())
            .finish()
    }
}

/// Asset backend consumed by the load cache.
///
/// Implementations perform the real I/O. None of these calls may block; the
/// result is handed back through the supplied [`Reply`].
pub trait AssetBackend: Send + Sync + 'static {
    /// Opaque handle to a loaded asset.
    type Handle: Clone + Send + 'static;

    /// Load a single asset by key.
    fn load(&self, key: &str, reply: Reply<Self::Handle>);

    /// Load every asset matching a key or label.
    fn load_all(&self, key: &str, reply: Reply<Vec<Self::Handle>>);

    /// Release a handle previously produced by `load` or `load_all`.
    fn release(&self, handle: Self::Handle);

    /// Total bytes still to download for `keys`.
    fn download_size(&self, keys: &[String], reply: Reply<u64>);

    /// Download the dependencies of `keys` ahead of use.
    fn prefetch(&self, keys: &[String], reply: Reply<()>);
}

/// Host that owns instantiated objects and their placement.
///
/// The object pool calls into the host to create, park and destroy
/// instances. `Instance` is an identity: two equal values must denote the
/// same live object.
pub trait InstanceHost: Send + Sync + 'static {
    /// Template an instance is created from (normally the backend handle).
    type Template: Clone + Send + 'static;
    /// Live instance identity.
    type Instance: Clone + Eq + Hash + fmt::Debug + Send + 'static;
    /// Container an instance can be parented under.
    type Parent;

    /// Create a new, inactive copy of `template` under the pool root.
    fn instantiate(&self, key: &str, template: &Self::Template) -> Result<Self::Instance, String>;

    /// Hide an instance without destroying it.
    fn deactivate(&self, instance: &Self::Instance);

    /// Detach an instance from its current parent and park it under the
    /// pool root.
    fn return_to_root(&self, instance: &Self::Instance);

    /// Permanently destroy an instance.
    fn destroy(&self, instance: Self::Instance);

    /// Parent an instance under `parent`.
    fn set_parent(&self, instance: &Self::Instance, parent: &Self::Parent);

    /// Copy layout and transform properties from `template` onto `instance`.
    fn copy_layout(&self, instance: &Self::Instance, template: &Self::Template);
}

/// Abstraction for spawning backend work on a runtime.
pub trait Spawn {
    /// Spawn an async task that returns a future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
