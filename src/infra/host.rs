//! In-memory placement host.
//!
//! Tracks instances as plain records instead of scene objects. Serves
//! headless tools and servers that pool logical objects, and tests.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::InstanceHost;

/// Identity of an instance created by [`MemoryHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of one live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceState {
    /// Name given at instantiation (the template key).
    pub name: String,
    /// Template the instance was copied from.
    pub template: String,
    /// Visible flag.
    pub active: bool,
    /// Current parent; `None` means parked under the pool root.
    pub parent: Option<String>,
    /// Template whose layout was last copied onto this instance.
    pub layout_from: Option<String>,
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    live: HashMap<InstanceId, InstanceState>,
    destroyed: Vec<InstanceId>,
    broken: HashSet<String>,
}

/// [`InstanceHost`] keeping instances in memory, with string templates and
/// string parents.
///
/// Cloning yields another handle to the same host.
#[derive(Clone, Default)]
pub struct MemoryHost {
    inner: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every instantiation of `key` fail.
    pub fn break_template(&self, key: impl Into<String>) {
        self.inner.lock().broken.insert(key.into());
    }

    /// Create an instance the pool never saw.
    pub fn spawn_unmanaged(&self, name: &str) -> InstanceId {
        let mut state = self.inner.lock();
        let id = InstanceId(state.next_id);
        state.next_id += 1;
        state.live.insert(
            id,
            InstanceState {
                name: name.to_string(),
                template: name.to_string(),
                active: true,
                parent: None,
                layout_from: None,
            },
        );
        id
    }

    /// Whether `id` has been created and not destroyed.
    pub fn is_live(&self, id: InstanceId) -> bool {
        self.inner.lock().live.contains_key(&id)
    }

    /// Snapshot of a live instance.
    pub fn state(&self, id: InstanceId) -> Option<InstanceState> {
        self.inner.lock().live.get(&id).cloned()
    }

    /// Number of live instances.
    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Instances destroyed so far, in order.
    pub fn destroyed(&self) -> Vec<InstanceId> {
        self.inner.lock().destroyed.clone()
    }

    /// Total instances ever created.
    pub fn created_count(&self) -> u64 {
        self.inner.lock().next_id
    }

    /// Mark an instance visible, as a consumer would after placing it.
    pub fn activate(&self, id: InstanceId) {
        if let Some(s) = self.inner.lock().live.get_mut(&id) {
            s.active = true;
        }
    }
}

impl InstanceHost for MemoryHost {
    type Template = String;
    type Instance = InstanceId;
    type Parent = String;

    fn instantiate(&self, key: &str, template: &String) -> Result<InstanceId, String> {
        let mut state = self.inner.lock();
        if state.broken.contains(key) {
            return Err(format!("template `{key}` cannot be instantiated"));
        }
        let id = InstanceId(state.next_id);
        state.next_id += 1;
        state.live.insert(
            id,
            InstanceState {
                name: key.to_string(),
                template: template.clone(),
                active: false,
                parent: None,
                layout_from: None,
            },
        );
        Ok(id)
    }

    fn deactivate(&self, instance: &InstanceId) {
        if let Some(s) = self.inner.lock().live.get_mut(instance) {
            s.active = false;
        }
    }

    fn return_to_root(&self, instance: &InstanceId) {
        if let Some(s) = self.inner.lock().live.get_mut(instance) {
            s.parent = None;
        }
    }

    fn destroy(&self, instance: InstanceId) {
        let mut state = self.inner.lock();
        if state.live.remove(&instance).is_some() {
            state.destroyed.push(instance);
        }
    }

    fn set_parent(&self, instance: &InstanceId, parent: &String) {
        if let Some(s) = self.inner.lock().live.get_mut(instance) {
            s.parent = Some(parent.clone());
        }
    }

    fn copy_layout(&self, instance: &InstanceId, template: &String) {
        if let Some(s) = self.inner.lock().live.get_mut(instance) {
            s.layout_from = Some(template.clone());
        }
    }
}
