//! Software timers driven by a delta list.
//!
//! The manager keeps countdowns in a list sorted by expiration where each
//! element stores the *delta* to its predecessor (the head stores the delta
//! to "now"). Advancing time therefore only ever decrements the head.
//!
//! Callbacks are re-entrant with respect to the manager: an expiring
//! timer's callback may start or stop timers on the same manager.
//! Attachments made while a tick is in progress are parked on a separate
//! arrival list and merged into the delta list when the tick completes, so
//! a callback never mutates the list being walked.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::clock;

struct TimerCore {
    callback: Box<dyn Fn() + Send + Sync>,
    running: AtomicBool,
}

struct Entry {
    /// Delta to the predecessor element (head: delta to "now").
    count: u32,
    timer: Arc<TimerCore>,
}

struct Inner {
    active: VecDeque<Entry>,
    pending_attach: VecDeque<Entry>,
    in_tick: bool,
    /// Elapsed-time mark of the last completed tick.
    time_mark: u32,
    /// Elapsed-time sample taken at the start of the current tick.
    time_now: u32,
}

/// Manages a set of software [`Timer`]s for one driving event loop.
///
/// Cheap to clone; clones share the same timer set. The list is intended
/// to be mutated from the driving loop's thread (attach/detach from other
/// threads must be serialized externally).
#[derive(Clone)]
pub struct TimerManager {
    inner: Arc<StdMutex<Inner>>,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StdMutex::new(Inner {
                active: VecDeque::new(),
                pending_attach: VecDeque::new(),
                in_tick: false,
                time_mark: 0,
                time_now: 0,
            })),
        }
    }

    /// Establish "now" as the timing baseline. Called once when the driving
    /// loop starts, before the first [`process_timers`](Self::process_timers).
    pub fn start_manager(&self) {
        let now = clock::milliseconds();
        let mut inner = self.inner.lock().unwrap();
        inner.time_mark = now;
        inner.time_now = now;
    }

    /// Advance the delta list by the time elapsed since the previous call
    /// and fire every timer whose countdown reaches zero.
    pub fn process_timers(&self) {
        let now = clock::milliseconds();
        let delta = {
            let mut inner = self.inner.lock().unwrap();
            inner.time_now = now;
            clock::delta_milliseconds(inner.time_mark, now)
        };
        log::trace!("timer tick: delta={delta} now={now}");
        self.tick(delta);
        self.inner.lock().unwrap().time_mark = now;
    }

    fn tick(&self, mut msec: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_tick = true;

        while msec > 0 {
            let Some(head_count) = inner.active.front().map(|e| e.count) else {
                break;
            };

            // Only the head absorbs elapsed time.
            let decrement = msec.min(head_count);
            inner.active.front_mut().unwrap().count -= decrement;
            msec -= decrement;

            // Fire every countdown that has reached zero. The lock is
            // dropped around the callback so it can start/stop timers.
            while inner.active.front().map_or(false, |e| e.count == 0) {
                let entry = inner.active.pop_front().unwrap();
                entry.timer.running.store(false, Ordering::Release);
                drop(inner);
                (entry.timer.callback)();
                inner = self.inner.lock().unwrap();
            }
        }

        // Tick complete: the freshly arrived attachments become live.
        let fresh = std::mem::take(&mut inner.pending_attach);
        for entry in fresh {
            Self::add_to_active(&mut inner, entry);
        }
        inner.in_tick = false;
    }

    /// True when at least one countdown is live.
    pub fn are_active_timers(&self) -> bool {
        !self.inner.lock().unwrap().active.is_empty()
    }

    /// Register `timer` to fire `duration_ms` from now. Equivalent to
    /// [`Timer::start`].
    pub fn attach(&self, timer: &Timer, duration_ms: u32) {
        let counts = self.msec_to_counts(duration_ms);
        self.attach_with_counts(&timer.core, counts);
    }

    /// Cancel `timer`. Returns false when the timer was not attached.
    /// Equivalent to [`Timer::stop`]. Safe to call from an expiring
    /// timer's callback.
    pub fn detach(&self, timer: &Timer) -> bool {
        self.detach_core(&timer.core)
    }

    /// Convert a duration to an absolute countdown, compensating for the
    /// time that already passed since the current tick's baseline.
    fn msec_to_counts(&self, duration_ms: u32) -> u32 {
        let time_now = self.inner.lock().unwrap().time_now;
        duration_ms.wrapping_add(clock::delta_milliseconds(time_now, clock::milliseconds()))
    }

    fn attach_with_counts(&self, core: &Arc<TimerCore>, counts: u32) {
        let mut inner = self.inner.lock().unwrap();
        core.running.store(true, Ordering::Release);
        let entry = Entry {
            count: counts,
            timer: Arc::clone(core),
        };
        if inner.in_tick {
            inner.pending_attach.push_back(entry);
        } else {
            Self::add_to_active(&mut inner, entry);
        }
    }

    /// Insert into the delta-sorted active list, adjusting the counts of
    /// the new element and its successor so every element stays relative
    /// to its predecessor.
    fn add_to_active(inner: &mut Inner, mut entry: Entry) {
        let mut idx = 0;
        while idx < inner.active.len() {
            let cur_count = inner.active[idx].count;
            if entry.count < cur_count {
                inner.active[idx].count -= entry.count;
                inner.active.insert(idx, entry);
                return;
            }
            entry.count -= cur_count;
            if entry.count == 0 {
                inner.active.insert(idx + 1, entry);
                return;
            }
            idx += 1;
        }
        inner.active.push_back(entry);
    }

    fn detach_core(&self, core: &Arc<TimerCore>) -> bool {
        let mut inner = self.inner.lock().unwrap();

        // The arrival list first: a timer started during the current tick
        // lives there.
        if let Some(pos) = inner
            .pending_attach
            .iter()
            .position(|e| Arc::ptr_eq(&e.timer, core))
        {
            inner.pending_attach.remove(pos);
            core.running.store(false, Ordering::Release);
            return true;
        }

        if let Some(pos) = inner
            .active
            .iter()
            .position(|e| Arc::ptr_eq(&e.timer, core))
        {
            let count = inner.active[pos].count;
            inner.active.remove(pos);
            // Preserve the delta invariant: the successor absorbs the
            // removed element's remaining time.
            if let Some(successor) = inner.active.get_mut(pos) {
                successor.count += count;
            }
            core.running.store(false, Ordering::Release);
            return true;
        }

        false
    }

    #[cfg(test)]
    fn active_counts(&self) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap()
            .active
            .iter()
            .map(|e| e.count)
            .collect()
    }

    #[cfg(test)]
    fn tick_for_test(&self, msec: u32) {
        self.tick(msec);
    }
}

/// A restartable one-shot countdown bound to a [`TimerManager`].
///
/// The callback runs on the manager's driving thread. Restarting from
/// inside the callback gives periodic behavior. Dropping the handle stops
/// the countdown.
pub struct Timer {
    core: Arc<TimerCore>,
    manager: TimerManager,
}

impl Timer {
    pub fn new(manager: &TimerManager, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            core: Arc::new(TimerCore {
                callback: Box::new(callback),
                running: AtomicBool::new(false),
            }),
            manager: manager.clone(),
        }
    }

    /// Arm the countdown to fire `duration_ms` from now. An already-armed
    /// timer is restarted.
    pub fn start(&self, duration_ms: u32) {
        self.manager.detach_core(&self.core);
        let counts = self.manager.msec_to_counts(duration_ms);
        self.manager.attach_with_counts(&self.core, counts);
    }

    /// Disarm the countdown. Returns false when it was not armed.
    pub fn stop(&self) -> bool {
        self.manager.detach_core(&self.core)
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.manager.detach_core(&self.core);
    }
}
