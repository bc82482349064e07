//! Adapter running an async asset source on a spawner.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{AssetBackend, Reply, Spawn};

/// Asynchronous asset source, e.g. a bundle reader or an HTTP client.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_resource_cache::infra::AssetSource;
///
/// struct DiskSource { root: std::path::PathBuf }
///
/// #[async_trait]
/// impl AssetSource for DiskSource {
///     type Handle = Arc<Vec<u8>>;
///
///     async fn load(&self, key: String) -> Result<Self::Handle, String> {
///         tokio::fs::read(self.root.join(&key)).await.map(Arc::new).map_err(|e| e.to_string())
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait AssetSource: Send + Sync + 'static {
    /// Handle to a loaded asset.
    type Handle: Clone + Send + 'static;

    /// Load a single asset.
    async fn load(&self, key: String) -> Result<Self::Handle, String>;

    /// Load every asset matching a key or label.
    async fn load_all(&self, key: String) -> Result<Vec<Self::Handle>, String>;

    /// Release a handle. Must not block.
    fn release(&self, handle: Self::Handle);

    /// Total bytes still to download for `keys`.
    async fn download_size(&self, keys: Vec<String>) -> Result<u64, String>;

    /// Download the dependencies of `keys`.
    async fn prefetch(&self, keys: Vec<String>) -> Result<(), String>;
}

/// [`AssetBackend`] that spawns each request of an [`AssetSource`] and
/// completes the reply when the future resolves.
pub struct AsyncBackend<S, Sp> {
    source: Arc<S>,
    spawner: Sp,
}

impl<S, Sp> AsyncBackend<S, Sp>
where
    S: AssetSource,
    Sp: Spawn,
{
    /// Create the adapter.
    pub fn new(source: S, spawner: Sp) -> Self {
        Self {
            source: Arc::new(source),
            spawner,
        }
    }

    /// The wrapped source.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }
}

impl<S, Sp> AssetBackend for AsyncBackend<S, Sp>
where
    S: AssetSource,
    Sp: Spawn + Send + Sync + 'static,
{
    type Handle = S::Handle;

    fn load(&self, key: &str, reply: Reply<S::Handle>) {
        let source = Arc::clone(&self.source);
        let key = key.to_string();
        self.spawner.spawn(async move {
            reply.complete(source.load(key).await);
        });
    }

    fn load_all(&self, key: &str, reply: Reply<Vec<S::Handle>>) {
        let source = Arc::clone(&self.source);
        let key = key.to_string();
        self.spawner.spawn(async move {
            reply.complete(source.load_all(key).await);
        });
    }

    fn release(&self, handle: S::Handle) {
        self.source.release(handle);
    }

    fn download_size(&self, keys: &[String], reply: Reply<u64>) {
        let source = Arc::clone(&self.source);
        let keys = keys.to_vec();
        self.spawner.spawn(async move {
            reply.complete(source.download_size(keys).await);
        });
    }

    fn prefetch(&self, keys: &[String], reply: Reply<()>) {
        let source = Arc::clone(&self.source);
        let keys = keys.to_vec();
        self.spawner.spawn(async move {
            reply.complete(source.prefetch(keys).await);
        });
    }
}
