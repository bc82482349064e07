//! Cooperative timer scheduler driven by an external tick.
//!
//! The scheduler never creates its own thread or clock. The host calls
//! [`Scheduler::tick`] once per frame with the elapsed time; every attached
//! timer is advanced and the due ones fire in the order they were scheduled.
//!
//! Timer tasks run with no scheduler lock held, so a task may stop or restart
//! its own handle, stop a sibling, or schedule new timers. Timers attached
//! during a tick are not advanced until the next tick.
//!
//! ```
//! use std::time::Duration;
//! use prometheus_resource_cache::core::{Repeat, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let handle = scheduler.schedule(Duration::from_secs(1), Repeat::Forever, || Ok(()));
//! scheduler.tick(Duration::from_secs(1));
//! assert!(scheduler.is_scheduled(&handle));
//! scheduler.stop(&handle);
//! assert!(!scheduler.is_scheduled(&handle));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::ops::Bound;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::AppResult;

static NEXT_SCHEDULER: AtomicU64 = AtomicU64::new(0);

type Task = Box<dyn FnMut() -> AppResult<()> + Send>;
type UpdateListener = Box<dyn FnMut(Duration) + Send>;

/// How many times a timer fires before it detaches itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Repeat {
    /// Fire once, then detach.
    #[default]
    Once,
    /// Fire exactly `n` times, one delay apart, then detach.
    Times(NonZeroU32),
    /// Fire every delay until stopped.
    Forever,
}

impl Repeat {
    /// Build a finite repeat policy; `0` is treated as [`Repeat::Once`].
    pub fn times(n: u32) -> Self {
        NonZeroU32::new(n).map_or(Self::Once, Self::Times)
    }

    fn count(self) -> u32 {
        match self {
            Self::Times(n) => n.get(),
            Self::Once | Self::Forever => 1,
        }
    }
}

struct Timer {
    id: u64,
    /// Identity of the scheduler that created the timer.
    owner: u64,
    delay: Duration,
    repeat: Repeat,
    residual: Duration,
    residual_repeats: u32,
    /// Taken out while the task runs.
    task: Option<Task>,
    /// Position in the active set; `None` when detached.
    slot: Option<u64>,
    /// Bumped by every restart so a tick can tell the timer was re-armed
    /// from inside its own task.
    epoch: u64,
}

impl Timer {
    fn reset(&mut self) {
        self.residual = self.delay;
        self.residual_repeats = self.repeat.count();
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Apply the repeat policy after a fire. Returns true when the timer
    /// should detach.
    fn after_fire(&mut self) -> bool {
        match self.repeat {
            Repeat::Once => true,
            Repeat::Times(_) => {
                self.residual_repeats = self.residual_repeats.saturating_sub(1);
                if self.residual_repeats == 0 {
                    true
                } else {
                    self.residual = self.delay;
                    false
                }
            }
            Repeat::Forever => {
                self.residual = self.delay;
                false
            }
        }
    }
}

/// Handle to a scheduled timer, usable for [`Scheduler::stop`] and
/// [`Scheduler::restart`]. A detached timer lives as long as a handle to it.
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    timer: Arc<Mutex<Timer>>,
}

impl TimerHandle {
    /// Scheduler-unique identifier of this timer.
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for TimerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerHandle {}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").field("id", &self.id).finish()
    }
}

struct SchedulerState {
    /// Process-unique scheduler identity.
    owner: u64,
    next_id: u64,
    next_slot: u64,
    /// Attached timers ordered by attach sequence.
    active: BTreeMap<u64, Arc<Mutex<Timer>>>,
    listeners: Vec<UpdateListener>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            owner: NEXT_SCHEDULER.fetch_add(1, Ordering::Relaxed),
            next_id: 0,
            next_slot: 0,
            active: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }
}

impl SchedulerState {
    fn attach(&mut self, timer: &Arc<Mutex<Timer>>, guard: &mut Timer) {
        let slot = self.next_slot;
        self.next_slot += 1;
        guard.slot = Some(slot);
        self.active.insert(slot, Arc::clone(timer));
    }
}

/// Single-threaded cooperative timer scheduler.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone, Default)]
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and attach a timer that fires `task` after `delay` according
    /// to `repeat`.
    pub fn schedule<F>(&self, delay: Duration, repeat: Repeat, task: F) -> TimerHandle
    where
        F: FnMut() -> AppResult<()> + Send + 'static,
    {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let timer = Arc::new(Mutex::new(Timer {
            id,
            owner: state.owner,
            delay,
            repeat,
            residual: delay,
            residual_repeats: repeat.count(),
            task: Some(Box::new(task)),
            slot: None,
            epoch: 0,
        }));
        {
            let mut guard = timer.lock();
            state.attach(&timer, &mut guard);
        }
        tracing::debug!(timer = id, ?delay, ?repeat, "timer scheduled");
        TimerHandle { id, timer }
    }

    /// One-shot timer.
    pub fn wait<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnMut() -> AppResult<()> + Send + 'static,
    {
        self.schedule(delay, Repeat::Once, task)
    }

    /// Timer that fires `times` times, one `delay` apart.
    pub fn wait_times<F>(&self, delay: Duration, times: u32, task: F) -> TimerHandle
    where
        F: FnMut() -> AppResult<()> + Send + 'static,
    {
        self.schedule(delay, Repeat::times(times), task)
    }

    /// Timer that fires every `delay` until stopped.
    pub fn repeat<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnMut() -> AppResult<()> + Send + 'static,
    {
        self.schedule(delay, Repeat::Forever, task)
    }

    /// Detach a timer. No-op when it is already detached.
    pub fn stop(&self, handle: &TimerHandle) {
        let mut state = self.state.lock();
        let mut timer = handle.timer.lock();
        if timer.owner != state.owner {
            tracing::debug!(timer = handle.id, "stop ignored for timer of another scheduler");
            return;
        }
        if let Some(slot) = timer.slot.take() {
            state.active.remove(&slot);
            tracing::debug!(timer = handle.id, "timer stopped");
        }
    }

    /// Reset residual time and repeats to their original values and
    /// re-attach the timer at the end of the active set if it was detached.
    pub fn restart(&self, handle: &TimerHandle) {
        let mut state = self.state.lock();
        let mut timer = handle.timer.lock();
        if timer.owner != state.owner {
            tracing::debug!(timer = handle.id, "restart ignored for timer of another scheduler");
            return;
        }
        timer.reset();
        if timer.slot.is_none() {
            state.attach(&handle.timer, &mut timer);
        }
        tracing::debug!(timer = handle.id, "timer restarted");
    }

    /// Whether the timer is currently attached.
    pub fn is_scheduled(&self, handle: &TimerHandle) -> bool {
        let owner = self.state.lock().owner;
        let timer = handle.timer.lock();
        timer.owner == owner && timer.slot.is_some()
    }

    /// Number of attached timers.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Register a listener invoked with the elapsed time at the start of
    /// every tick, before timers advance.
    pub fn on_update<F>(&self, listener: F)
    where
        F: FnMut(Duration) + Send + 'static,
    {
        self.state.lock().listeners.push(Box::new(listener));
    }

    /// Advance every attached timer by `elapsed` and fire the due ones.
    pub fn tick(&self, elapsed: Duration) {
        self.notify_listeners(elapsed);

        let limit = self.state.lock().next_slot;
        let mut cursor: Option<u64> = None;
        loop {
            // Look the successor up after the previous task ran, so timers
            // it detached are skipped and ones it attached (slot >= limit)
            // wait for the next tick.
            let next = {
                let state = self.state.lock();
                let lower = cursor.map_or(Bound::Unbounded, Bound::Excluded);
                state
                    .active
                    .range((lower, Bound::Excluded(limit)))
                    .next()
                    .map(|(slot, timer)| (*slot, Arc::clone(timer)))
            };
            let Some((slot, timer)) = next else {
                break;
            };
            cursor = Some(slot);
            self.advance(&timer, elapsed);
        }
    }

    fn notify_listeners(&self, elapsed: Duration) {
        let mut listeners = std::mem::take(&mut self.state.lock().listeners);
        if listeners.is_empty() {
            return;
        }
        for listener in &mut listeners {
            listener(elapsed);
        }
        let mut state = self.state.lock();
        listeners.append(&mut state.listeners);
        state.listeners = listeners;
    }

    fn advance(&self, timer: &Arc<Mutex<Timer>>, elapsed: Duration) {
        let (id, epoch, mut task) = {
            let mut guard = timer.lock();
            guard.residual = guard.residual.saturating_sub(elapsed);
            if !guard.residual.is_zero() {
                return;
            }
            // `None` means the task is already running further up the stack.
            let Some(task) = guard.task.take() else {
                return;
            };
            (guard.id, guard.epoch, task)
        };

        run_task(id, &mut task);

        let mut state = self.state.lock();
        let mut guard = timer.lock();
        guard.task = Some(task);
        if guard.epoch != epoch {
            return;
        }
        if guard.after_fire() {
            if let Some(slot) = guard.slot.take() {
                state.active.remove(&slot);
                tracing::trace!(timer = id, "timer expired");
            }
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("active", &self.active_count())
            .finish()
    }
}

/// Run a timer task, logging errors and panics instead of propagating them.
fn run_task(id: u64, task: &mut Task) {
    match catch_unwind(AssertUnwindSafe(|| task())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(timer = id, "timer task failed: {e:#}"),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());
            tracing::error!(timer = id, "timer task panicked: {msg}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting(count: &Arc<AtomicUsize>) -> impl FnMut() -> AppResult<()> + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const D: Duration = Duration::from_millis(100);

    #[test]
    fn test_one_shot_fires_once_and_detaches() {
        let scheduler = Scheduler::new();
        let fired = counter();
        let handle = scheduler.wait(D, counting(&fired));

        scheduler.tick(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        scheduler.tick(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(&handle));

        scheduler.tick(D);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finite_repeat_fires_at_each_delay() {
        let scheduler = Scheduler::new();
        let fired = counter();
        let handle = scheduler.wait_times(D, 3, counting(&fired));

        let mut fire_ticks = Vec::new();
        for tick in 1..=10 {
            let before = fired.load(Ordering::SeqCst);
            scheduler.tick(Duration::from_millis(50));
            if fired.load(Ordering::SeqCst) > before {
                fire_ticks.push(tick);
            }
        }
        assert_eq!(fire_ticks, vec![2, 4, 6]);
        assert!(!scheduler.is_scheduled(&handle));
    }

    #[test]
    fn test_forever_runs_until_stopped() {
        let scheduler = Scheduler::new();
        let fired = counter();
        let handle = scheduler.repeat(D, counting(&fired));

        for _ in 0..20 {
            scheduler.tick(D);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 20);
        assert!(scheduler.is_scheduled(&handle));

        scheduler.stop(&handle);
        scheduler.tick(D);
        assert_eq!(fired.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let scheduler = Scheduler::new();
        let handle = scheduler.wait(D, || Ok(()));
        scheduler.stop(&handle);
        scheduler.stop(&handle);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_restart_reattaches_detached_timer() {
        let scheduler = Scheduler::new();
        let fired = counter();
        let handle = scheduler.wait(D, counting(&fired));
        scheduler.tick(D);
        assert!(!scheduler.is_scheduled(&handle));

        scheduler.restart(&handle);
        assert!(scheduler.is_scheduled(&handle));
        scheduler.tick(Duration::from_millis(99));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        scheduler.tick(Duration::from_millis(1));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_restart_running_timer_resets_residual() {
        let scheduler = Scheduler::new();
        let fired = counter();
        let handle = scheduler.wait(D, counting(&fired));
        scheduler.tick(Duration::from_millis(80));
        scheduler.restart(&handle);
        scheduler.tick(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        scheduler.tick(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_same_tick_fires_in_schedule_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            scheduler.wait(D, move || {
                order.lock().push(i);
                Ok(())
            });
        }
        scheduler.tick(D);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_self_stop_does_not_affect_siblings() {
        let scheduler = Scheduler::new();
        let before = counter();
        let after = counter();
        let own_fires = counter();

        scheduler.repeat(D, counting(&before));
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        let handle = {
            let scheduler = scheduler.clone();
            let slot = Arc::clone(&slot);
            let own_fires = Arc::clone(&own_fires);
            scheduler.clone().repeat(D, move || {
                own_fires.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = slot.lock().as_ref() {
                    scheduler.stop(me);
                }
                Ok(())
            })
        };
        *slot.lock() = Some(handle.clone());
        scheduler.repeat(D, counting(&after));

        scheduler.tick(D);
        scheduler.tick(D);
        assert_eq!(before.load(Ordering::SeqCst), 2);
        assert_eq!(after.load(Ordering::SeqCst), 2);
        assert_eq!(own_fires.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(&handle));
    }

    #[test]
    fn test_stopping_sibling_skips_it_in_same_tick() {
        let scheduler = Scheduler::new();
        let victim_fires = counter();
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        {
            let scheduler = scheduler.clone();
            let slot = Arc::clone(&slot);
            scheduler.clone().wait(D, move || {
                if let Some(victim) = slot.lock().as_ref() {
                    scheduler.stop(victim);
                }
                Ok(())
            });
        }
        let victim = scheduler.wait(D, counting(&victim_fires));
        *slot.lock() = Some(victim);

        scheduler.tick(D);
        assert_eq!(victim_fires.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_timer_scheduled_inside_tick_waits_for_next_tick() {
        let scheduler = Scheduler::new();
        let inner = counter();
        {
            let scheduler = scheduler.clone();
            let inner = Arc::clone(&inner);
            scheduler.clone().wait(D, move || {
                scheduler.wait(Duration::ZERO, counting(&inner));
                Ok(())
            });
        }
        scheduler.tick(D);
        assert_eq!(inner.load(Ordering::SeqCst), 0);
        scheduler.tick(Duration::ZERO);
        assert_eq!(inner.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_task_does_not_abort_tick() {
        let scheduler = Scheduler::new();
        let fired = counter();
        scheduler.wait(D, || Err(anyhow::anyhow!("boom")));
        scheduler.wait(D, || panic!("task panic"));
        scheduler.wait(D, counting(&fired));

        scheduler.tick(D);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_update_listeners_see_every_tick() {
        let scheduler = Scheduler::new();
        let total = Arc::new(Mutex::new(Duration::ZERO));
        {
            let total = Arc::clone(&total);
            scheduler.on_update(move |elapsed| *total.lock() += elapsed);
        }
        scheduler.tick(D);
        scheduler.tick(D);
        assert_eq!(*total.lock(), Duration::from_millis(200));
    }

    #[test]
    fn test_repeat_times_zero_is_one_shot() {
        assert_eq!(Repeat::times(0), Repeat::Once);
        assert_eq!(Repeat::default(), Repeat::Once);
    }

    #[test]
    fn test_foreign_handle_is_ignored() {
        let a = Scheduler::new();
        let b = Scheduler::new();
        let a_fired = counter();
        let b_fired = counter();
        let a_timer = a.repeat(D, counting(&a_fired));
        let b_timer = b.wait(D, counting(&b_fired));

        a.stop(&b_timer);
        assert_eq!(a.active_count(), 1);
        assert!(a.is_scheduled(&a_timer));
        assert!(!a.is_scheduled(&b_timer));
        assert!(b.is_scheduled(&b_timer));

        for _ in 0..5 {
            a.tick(D);
            b.tick(D);
        }
        assert_eq!(a_fired.load(Ordering::SeqCst), 5);
        assert_eq!(b_fired.load(Ordering::SeqCst), 1);
        assert_eq!(b.active_count(), 0);

        // Restarting through the wrong scheduler must not adopt the timer.
        a.restart(&b_timer);
        assert_eq!(a.active_count(), 1);
        assert!(!b.is_scheduled(&b_timer));
    }
}
