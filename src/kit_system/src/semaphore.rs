//! Counting semaphore.
use std::sync::{Condvar, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::signalable::Signalable;
use crate::sim_tick;

/// A counting semaphore.
///
/// [`signal`](Signalable::signal) never blocks and saturates at the counter
/// maximum. [`wait`](Semaphore::wait) blocks while the count is zero.
///
/// On a sim thread the blocking operations cooperate with the tick
/// simulator: `timed_wait` counts down its budget one simulated tick at a
/// time, and `wait` excuses the thread from the tick protocol while it is
/// blocked.
pub struct Semaphore {
    count: StdMutex<u32>,
    cv: Condvar,
}

impl Semaphore {
    /// Create a semaphore with the given initial count. An initial count of
    /// zero makes an immediate `wait()` block.
    pub const fn new(initial_count: u32) -> Self {
        Self {
            count: StdMutex::new(initial_count),
            cv: Condvar::new(),
        }
    }

    /// Block until the semaphore is signaled, then take one count.
    pub fn wait(&self) {
        if sim_tick::using_sim_ticks() {
            sim_tick::application_wait(|| self.wait_in_real_time());
        } else {
            self.wait_in_real_time();
        }
    }

    /// Take one count if available. Never blocks.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// As [`wait`](Self::wait), bounded by `timeout_ms` milliseconds.
    /// Returns `false` on timeout. On a sim thread the bound counts
    /// simulated milliseconds.
    pub fn timed_wait(&self, timeout_ms: u32) -> bool {
        if !sim_tick::using_sim_ticks() {
            return self.timed_wait_in_real_time(timeout_ms);
        }

        // Wait, one simulated tick at a time, for the semaphore to be
        // signaled.
        let mut remaining = timeout_ms;
        let mut mark = sim_tick::current();
        while remaining > 0 {
            if self.try_wait() {
                return true;
            }

            sim_tick::wait_for_tick();

            let now = sim_tick::current();
            let delta = now.wrapping_sub(mark) as u32;
            mark = now;
            remaining = remaining.saturating_sub(delta.max(1));
        }
        false
    }

    fn wait_in_real_time(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    fn timed_wait_in_real_time(&self, timeout_ms: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _timeout) = self.cv.wait_timeout(count, deadline - now).unwrap();
            count = next;
        }
        *count -= 1;
        true
    }
}

impl Signalable for Semaphore {
    fn signal(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_add(1);
        self.cv.notify_one();
    }

    fn su_signal(&self) {
        // The hosted backend has no distinct supervisor context.
        self.signal();
    }
}
