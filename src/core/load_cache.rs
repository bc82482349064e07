//! Single-flight load cache.
//!
//! Every resource key maps to at most one ticket. The first request for a key
//! issues exactly one backend load; requests arriving while it is in flight
//! are queued on the ticket and delivered in registration order when the load
//! settles. A succeeded ticket serves later requests synchronously until it
//! is released. Failed loads are not cached: the next request for the key
//! issues a fresh backend load.
//!
//! Backend completions are queued on a channel and delivered by
//! [`LoadCache::pump`], which the owner calls from its tick so that every
//! consumer callback runs on the owning thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::core::{AssetBackend, CacheError, Reply};

/// Callback receiving the failure of a load.
pub type FailureCallback = Box<dyn FnOnce(CacheError) + Send>;

/// Lifecycle of a load ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TicketStatus {
    /// Backend request is outstanding.
    Pending,
    /// Payload is cached.
    Succeeded,
    /// Last backend request failed; the next load re-issues it.
    Failed,
}

#[derive(Clone)]
enum Payload<H> {
    One(H),
    Many(Vec<H>),
}

impl<H> Payload<H> {
    fn into_handles(self) -> Vec<H> {
        match self {
            Self::One(handle) => vec![handle],
            Self::Many(handles) => handles,
        }
    }
}

enum Consumer<H> {
    One(Box<dyn FnOnce(H) + Send>),
    Many(Box<dyn FnOnce(Vec<H>) + Send>),
}

struct Waiter<H> {
    consumer: Consumer<H>,
    on_failed: FailureCallback,
    auto_release: bool,
}

impl<H: Clone> Waiter<H> {
    fn deliver(self, key: &str, payload: &Payload<H>) {
        match (self.consumer, payload) {
            (Consumer::One(on_complete), Payload::One(handle)) => on_complete(handle.clone()),
            (Consumer::Many(on_complete), Payload::Many(handles)) => {
                on_complete(handles.clone());
            }
            _ => {
                tracing::error!(key, "cached payload kind does not match request");
                (self.on_failed)(CacheError::PayloadMismatch { key: key.into() });
            }
        }
    }
}

struct Ticket<H> {
    status: TicketStatus,
    payload: Option<Payload<H>>,
    waiters: Vec<Waiter<H>>,
    /// Identifies the backend request this ticket is waiting on.
    generation: u64,
    /// Set when the ticket was released while its load was in flight.
    release_on_settle: bool,
}

struct PassThrough<T> {
    on_complete: Box<dyn FnOnce(T) + Send>,
    on_failed: FailureCallback,
}

enum Completion<H> {
    Load {
        key: String,
        generation: u64,
        result: Result<Payload<H>, String>,
    },
    DownloadSize {
        request: u64,
        result: Result<u64, String>,
    },
    Prefetch {
        request: u64,
        result: Result<(), String>,
    },
}

struct CacheState<H> {
    tickets: HashMap<String, Ticket<H>>,
    next_generation: u64,
    next_request: u64,
    sizes: HashMap<u64, PassThrough<u64>>,
    prefetches: HashMap<u64, PassThrough<()>>,
}

impl<H> Default for CacheState<H> {
    fn default() -> Self {
        Self {
            tickets: HashMap::new(),
            next_generation: 0,
            next_request: 0,
            sizes: HashMap::new(),
            prefetches: HashMap::new(),
        }
    }
}

enum Request {
    One,
    Many,
}

/// Single-flight cache in front of an [`AssetBackend`].
///
/// Cloning yields another handle to the same cache.
pub struct LoadCache<B: AssetBackend> {
    backend: Arc<B>,
    state: Arc<Mutex<CacheState<B::Handle>>>,
    tx: Sender<Completion<B::Handle>>,
    rx: Receiver<Completion<B::Handle>>,
}

impl<B: AssetBackend> Clone for LoadCache<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<B: AssetBackend> LoadCache<B> {
    /// Create a cache over `backend`.
    pub fn new(backend: B) -> Self {
        Self::with_shared(Arc::new(backend))
    }

    /// Create a cache over a backend that is shared with other owners.
    pub fn with_shared(backend: Arc<B>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            backend,
            state: Arc::new(Mutex::new(CacheState::default())),
            tx,
            rx,
        }
    }

    /// The backend this cache issues requests to.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Load a single asset.
    ///
    /// A cached result is delivered before this call returns. Otherwise the
    /// consumer joins the in-flight load for `key`, or a new backend request
    /// is issued. With `auto_release` the ticket is released right after an
    /// in-flight load is delivered; a cache hit never releases it.
    pub fn load<F, E>(&self, key: &str, on_complete: F, on_failed: E, auto_release: bool)
    where
        F: FnOnce(B::Handle) + Send + 'static,
        E: FnOnce(CacheError) + Send + 'static,
    {
        let waiter = Waiter {
            consumer: Consumer::One(Box::new(on_complete)),
            on_failed: Box::new(on_failed),
            auto_release,
        };
        self.enqueue(key, waiter, Request::One);
    }

    /// Load every asset matching a key or label, with the same single-flight
    /// and caching rules as [`LoadCache::load`].
    pub fn load_all<F, E>(&self, key: &str, on_complete: F, on_failed: E, auto_release: bool)
    where
        F: FnOnce(Vec<B::Handle>) + Send + 'static,
        E: FnOnce(CacheError) + Send + 'static,
    {
        let waiter = Waiter {
            consumer: Consumer::Many(Box::new(on_complete)),
            on_failed: Box::new(on_failed),
            auto_release,
        };
        self.enqueue(key, waiter, Request::Many);
    }

    fn enqueue(&self, key: &str, waiter: Waiter<B::Handle>, request: Request) {
        let mut state = self.state.lock();
        if let Some(ticket) = state.tickets.get_mut(key) {
            match ticket.status {
                TicketStatus::Succeeded => {
                    if let Some(payload) = ticket.payload.clone() {
                        drop(state);
                        tracing::trace!(key, "load served from cache");
                        waiter.deliver(key, &payload);
                        return;
                    }
                }
                TicketStatus::Pending => {
                    ticket.waiters.push(waiter);
                    tracing::trace!(key, waiters = ticket.waiters.len(), "joined in-flight load");
                    return;
                }
                TicketStatus::Failed => {}
            }
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        state.tickets.insert(
            key.to_string(),
            Ticket {
                status: TicketStatus::Pending,
                payload: None,
                waiters: vec![waiter],
                generation,
                release_on_settle: false,
            },
        );
        drop(state);

        tracing::debug!(key, generation, "issuing backend load");
        let tx = self.tx.clone();
        let owned = key.to_string();
        match request {
            Request::One => self.backend.load(
                key,
                Reply::new(move |result: Result<B::Handle, String>| {
                    send_completion(
                        &tx,
                        Completion::Load {
                            key: owned,
                            generation,
                            result: result.map(Payload::One),
                        },
                    );
                }),
            ),
            Request::Many => self.backend.load_all(
                key,
                Reply::new(move |result: Result<Vec<B::Handle>, String>| {
                    send_completion(
                        &tx,
                        Completion::Load {
                            key: owned,
                            generation,
                            result: result.map(Payload::Many),
                        },
                    );
                }),
            ),
        }
    }

    /// Remove the ticket for `key` and release its payload.
    ///
    /// A ticket whose load is still in flight is released once it settles,
    /// after its consumers have been notified. No-op for unknown keys.
    pub fn release(&self, key: &str) {
        let mut state = self.state.lock();
        match state.tickets.get_mut(key) {
            None => return,
            Some(ticket) if ticket.status == TicketStatus::Pending => {
                ticket.release_on_settle = true;
                tracing::debug!(key, "release deferred until load settles");
                return;
            }
            Some(_) => {}
        }
        let ticket = state.tickets.remove(key);
        drop(state);
        self.release_payload(key, ticket);
    }

    /// Release the ticket for `key` only if it still belongs to the load
    /// identified by `generation`. A consumer may have released and
    /// re-requested the key while being delivered to.
    fn release_generation(&self, key: &str, generation: u64) {
        let mut state = self.state.lock();
        let current = state
            .tickets
            .get(key)
            .is_some_and(|t| t.generation == generation && t.status == TicketStatus::Succeeded);
        if !current {
            tracing::trace!(key, generation, "auto-release skipped, ticket replaced");
            return;
        }
        let ticket = state.tickets.remove(key);
        drop(state);
        self.release_payload(key, ticket);
    }

    fn release_payload(&self, key: &str, ticket: Option<Ticket<B::Handle>>) {
        if let Some(payload) = ticket.and_then(|t| t.payload) {
            for handle in payload.into_handles() {
                self.backend.release(handle);
            }
        }
        tracing::info!(key, "load released");
    }

    /// Query the total download size of `keys`. Bypasses the ticket table.
    pub fn download_size<F, E>(&self, keys: &[String], on_complete: F, on_failed: E)
    where
        F: FnOnce(u64) + Send + 'static,
        E: FnOnce(CacheError) + Send + 'static,
    {
        let request = {
            let mut state = self.state.lock();
            let request = state.next_request;
            state.next_request += 1;
            state.sizes.insert(
                request,
                PassThrough {
                    on_complete: Box::new(on_complete),
                    on_failed: Box::new(on_failed),
                },
            );
            request
        };
        let tx = self.tx.clone();
        self.backend.download_size(
            keys,
            Reply::new(move |result| {
                send_completion(&tx, Completion::DownloadSize { request, result });
            }),
        );
    }

    /// Download the dependencies of `keys` ahead of use. Bypasses the ticket
    /// table.
    pub fn prefetch<F, E>(&self, keys: &[String], on_complete: F, on_failed: E)
    where
        F: FnOnce() + Send + 'static,
        E: FnOnce(CacheError) + Send + 'static,
    {
        let request = {
            let mut state = self.state.lock();
            let request = state.next_request;
            state.next_request += 1;
            state.prefetches.insert(
                request,
                PassThrough {
                    on_complete: Box::new(move |()| on_complete()),
                    on_failed: Box::new(on_failed),
                },
            );
            request
        };
        let tx = self.tx.clone();
        self.backend.prefetch(
            keys,
            Reply::new(move |result| {
                send_completion(&tx, Completion::Prefetch { request, result });
            }),
        );
    }

    /// Deliver every queued backend completion. Returns how many were
    /// processed.
    pub fn pump(&self) -> usize {
        let mut processed = 0;
        while let Ok(completion) = self.rx.try_recv() {
            processed += 1;
            match completion {
                Completion::Load {
                    key,
                    generation,
                    result,
                } => self.settle(&key, generation, result),
                Completion::DownloadSize { request, result } => {
                    let pending = self.state.lock().sizes.remove(&request);
                    Self::finish_pass_through(pending, "download size", result);
                }
                Completion::Prefetch { request, result } => {
                    let pending = self.state.lock().prefetches.remove(&request);
                    Self::finish_pass_through(pending, "prefetch", result);
                }
            }
        }
        processed
    }

    fn settle(&self, key: &str, generation: u64, result: Result<Payload<B::Handle>, String>) {
        let mut state = self.state.lock();
        let Some(ticket) = state
            .tickets
            .get_mut(key)
            .filter(|t| t.generation == generation && t.status == TicketStatus::Pending)
        else {
            drop(state);
            tracing::debug!(key, generation, "dropping stale load completion");
            if let Ok(payload) = result {
                for handle in payload.into_handles() {
                    self.backend.release(handle);
                }
            }
            return;
        };

        let waiters = std::mem::take(&mut ticket.waiters);
        match result {
            Ok(payload) => {
                ticket.status = TicketStatus::Succeeded;
                ticket.payload = Some(payload.clone());
                let release = ticket.release_on_settle || waiters.iter().any(|w| w.auto_release);
                drop(state);

                tracing::debug!(key, consumers = waiters.len(), "load succeeded");
                for waiter in waiters {
                    waiter.deliver(key, &payload);
                }
                if release {
                    self.release_generation(key, generation);
                }
            }
            Err(reason) => {
                ticket.status = TicketStatus::Failed;
                if ticket.release_on_settle {
                    state.tickets.remove(key);
                }
                drop(state);

                tracing::error!(key, %reason, "load failed");
                let error = CacheError::load_failed(key, reason);
                for waiter in waiters {
                    (waiter.on_failed)(error.clone());
                }
            }
        }
    }

    fn finish_pass_through<T>(
        pending: Option<PassThrough<T>>,
        operation: &str,
        result: Result<T, String>,
    ) {
        let Some(pending) = pending else {
            return;
        };
        match result {
            Ok(value) => (pending.on_complete)(value),
            Err(reason) => {
                tracing::warn!(operation, %reason, "backend request failed");
                (pending.on_failed)(CacheError::Backend(reason));
            }
        }
    }

    /// Status of the ticket for `key`, if one exists.
    pub fn ticket_status(&self, key: &str) -> Option<TicketStatus> {
        self.state.lock().tickets.get(key).map(|t| t.status)
    }

    /// Number of tickets held.
    pub fn len(&self) -> usize {
        self.state.lock().tickets.len()
    }

    /// Whether no tickets are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Queue a completion for `pump`. Once every cache handle is gone the
/// completion is dropped along with any payload it carries.
fn send_completion<H>(tx: &Sender<Completion<H>>, completion: Completion<H>) {
    if let Err(err) = tx.send(completion) {
        let what = match err.into_inner() {
            Completion::Load { key, generation, .. } => format!("load `{key}` (generation {generation})"),
            Completion::DownloadSize { request, .. } => format!("download size #{request}"),
            Completion::Prefetch { request, .. } => format!("prefetch #{request}"),
        };
        tracing::debug!(completion = %what, "cache dropped before backend completion was delivered");
    }
}

impl<B: AssetBackend> fmt::Debug for LoadCache<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCache")
            .field("tickets", &self.len())
            .field("queued", &self.rx.len())
            .finish_non_exhaustive()
    }
}
