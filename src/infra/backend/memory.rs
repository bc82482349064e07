//! In-memory backend whose requests are completed by the caller.
//!
//! Useful for development, tests and tools that drive loads by hand. In
//! immediate mode every load succeeds synchronously with the key as handle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{AssetBackend, Reply};

#[derive(Default)]
struct ManualState {
    immediate: bool,
    failing: HashSet<String>,
    loads: HashMap<String, VecDeque<Reply<String>>>,
    load_alls: HashMap<String, VecDeque<Reply<Vec<String>>>>,
    requests: HashMap<String, usize>,
    released: Vec<String>,
    download_size: u64,
}

/// Backend with string handles that holds every request until it is
/// resolved or rejected explicitly.
///
/// Cloning yields another handle to the same backend.
#[derive(Clone, Default)]
pub struct ManualBackend {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualBackend {
    /// Create a backend that parks every load until resolved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that resolves loads synchronously, using the key as
    /// the handle (`load_all` yields a single-element list).
    pub fn immediate() -> Self {
        let backend = Self::default();
        backend.inner.lock().immediate = true;
        backend
    }

    /// In immediate mode, fail every load of `key`.
    pub fn fail_on(&self, key: impl Into<String>) {
        self.inner.lock().failing.insert(key.into());
    }

    /// Set the size reported by `download_size`.
    pub fn set_download_size(&self, bytes: u64) {
        self.inner.lock().download_size = bytes;
    }

    /// Complete the oldest parked single load of `key`. Returns false when
    /// nothing was waiting.
    pub fn resolve(&self, key: &str, handle: impl Into<String>) -> bool {
        let reply = self.inner.lock().loads.get_mut(key).and_then(VecDeque::pop_front);
        reply.map(|r| r.succeed(handle.into())).is_some()
    }

    /// Complete the oldest parked `load_all` of `key`.
    pub fn resolve_all(&self, key: &str, handles: Vec<String>) -> bool {
        let reply = self
            .inner
            .lock()
            .load_alls
            .get_mut(key)
            .and_then(VecDeque::pop_front);
        reply.map(|r| r.succeed(handles)).is_some()
    }

    /// Fail the oldest parked request of either kind for `key`.
    pub fn reject(&self, key: &str, reason: &str) -> bool {
        let (single, all) = {
            let mut state = self.inner.lock();
            let single = state.loads.get_mut(key).and_then(VecDeque::pop_front);
            let all = if single.is_none() {
                state.load_alls.get_mut(key).and_then(VecDeque::pop_front)
            } else {
                None
            };
            (single, all)
        };
        if let Some(reply) = single {
            reply.fail(reason);
            return true;
        }
        all.map(|r| r.fail(reason)).is_some()
    }

    /// Number of backend loads issued for `key` so far.
    pub fn load_requests(&self, key: &str) -> usize {
        self.inner.lock().requests.get(key).copied().unwrap_or(0)
    }

    /// Number of parked requests across all keys.
    pub fn parked(&self) -> usize {
        let state = self.inner.lock();
        state.loads.values().map(VecDeque::len).sum::<usize>()
            + state.load_alls.values().map(VecDeque::len).sum::<usize>()
    }

    /// Handles released so far, in release order.
    pub fn released(&self) -> Vec<String> {
        self.inner.lock().released.clone()
    }
}

impl AssetBackend for ManualBackend {
    type Handle = String;

    fn load(&self, key: &str, reply: Reply<String>) {
        let mut state = self.inner.lock();
        *state.requests.entry(key.to_string()).or_default() += 1;
        if state.immediate {
            let fail = state.failing.contains(key);
            drop(state);
            if fail {
                reply.fail(format!("{key} unavailable"));
            } else {
                reply.succeed(key.to_string());
            }
            return;
        }
        state.loads.entry(key.to_string()).or_default().push_back(reply);
    }

    fn load_all(&self, key: &str, reply: Reply<Vec<String>>) {
        let mut state = self.inner.lock();
        *state.requests.entry(key.to_string()).or_default() += 1;
        if state.immediate {
            let fail = state.failing.contains(key);
            drop(state);
            if fail {
                reply.fail(format!("{key} unavailable"));
            } else {
                reply.succeed(vec![key.to_string()]);
            }
            return;
        }
        state
            .load_alls
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
    }

    fn release(&self, handle: String) {
        self.inner.lock().released.push(handle);
    }

    fn download_size(&self, _keys: &[String], reply: Reply<u64>) {
        let bytes = self.inner.lock().download_size;
        reply.succeed(bytes);
    }

    fn prefetch(&self, _keys: &[String], reply: Reply<()>) {
        reply.succeed(());
    }
}
