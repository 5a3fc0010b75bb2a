//! The event loop: a cooperative, single-threaded dispatcher.
//!
//! An [`EventLoop`] is a [`Runnable`]: give it to a
//! [`Thread`](crate::thread::Thread) and the thread blocks until an event
//! occurs. Three kinds of event are supported:
//!
//! 1. The loop's own semaphore is signaled (distinct from the thread's
//!    sync semaphore, which the loop never touches).
//! 2. An event flag is signaled.
//! 3. A software timer expires.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::clock;
use crate::global_lock;
use crate::semaphore::Semaphore;
use crate::signalable::Signalable;
use crate::thread::Runnable;
use crate::timer::TimerManager;
use crate::watchdog::WatchedEventLoop;

/// Default wait timeout, which is also the resolution of the software-timer
/// tick source.
pub const DEFAULT_TIMEOUT_MS: u32 = 1;

/// A consumer of event flags.
///
/// Each consumer declares a mask of the flag bits it handles;
/// [`notified`](Self::notified) runs in the loop's thread with the active
/// subset of those bits. The callback must not block indefinitely.
pub trait EventFlag: Send + Sync {
    /// Which of the loop's 32 event flags this consumer processes. At
    /// least one bit should be set.
    fn event_flags_mask(&self) -> u32;

    /// One or more of the consumer's flags were signaled. `active_events`
    /// is `snapshot & mask`, never zero.
    fn notified(&self, active_events: u32);
}

/// Event-driven execution model for a thread.
///
/// The loop repeatedly waits on its semaphore with a timeout equal to the
/// timer tick resolution, dispatches any pending event flags to the
/// consumers registered at construction, advances the timer manager, and
/// kicks the optional watchdog.
///
/// Everything a producer needs ([`signal_event`](Self::signal_event),
/// [`Signalable`]) takes `&self`, so the loop is shared as an
/// `Arc<EventLoop>` between its thread and any producers.
pub struct EventLoop {
    /// The loop's own semaphore. The thread sync semaphore is NOT used.
    sema: Semaphore,
    /// Current state of all 32 event flags.
    events: AtomicU32,
    /// Consumers, fixed at construction, notified in registration order.
    consumers: Vec<Arc<dyn EventFlag>>,
    timers: TimerManager,
    /// Wait timeout and timer resolution, in ms. Never zero.
    timeout: u32,
    /// Elapsed-time mark of the start of the previous wait/process pass.
    last_wake: AtomicU32,
    run: AtomicBool,
    watchdog: Option<Arc<dyn WatchedEventLoop>>,
}

impl EventLoop {
    /// An event loop with the default tick resolution and no event-flag
    /// consumers.
    pub fn new() -> Self {
        Self::with_consumers(DEFAULT_TIMEOUT_MS, Vec::new())
    }

    /// An event loop waking at least every `timeout_ms` milliseconds,
    /// dispatching flags to `consumers`. A zero timeout is a fatal error.
    pub fn with_consumers(timeout_ms: u32, consumers: Vec<Arc<dyn EventFlag>>) -> Self {
        crate::kit_assert!(timeout_ms > 0, "EventLoop: timeout must be non-zero");
        Self {
            sema: Semaphore::new(0),
            events: AtomicU32::new(0),
            consumers,
            timers: TimerManager::new(),
            timeout: timeout_ms,
            last_wake: AtomicU32::new(0),
            run: AtomicBool::new(true),
            watchdog: None,
        }
    }

    /// As [`with_consumers`](Self::with_consumers), supervised by a
    /// watchdog collaborator.
    pub fn with_watchdog(
        timeout_ms: u32,
        consumers: Vec<Arc<dyn EventFlag>>,
        watchdog: Arc<dyn WatchedEventLoop>,
    ) -> Self {
        let mut this = Self::with_consumers(timeout_ms, consumers);
        this.watchdog = Some(watchdog);
        this
    }

    /// The timing source for software timers owned by this loop.
    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    /// The loop's tick resolution in milliseconds.
    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    /// Initialize the loop. Types embedding an `EventLoop` and providing
    /// their own `entry` must call this once before their main loop.
    pub fn start_loop(&self) {
        self.timers.start_manager();
        if let Some(watchdog) = &self.watchdog {
            watchdog.start_watcher(self);
        }
    }

    /// Tear the loop down. Embedding types must call this once after their
    /// main loop exits.
    pub fn stop_loop(&self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.stop_watcher();
        }
    }

    /// Wait for and process the next batch of events.
    ///
    /// Returns `false` once [`please_stop`](Runnable::please_stop) has been
    /// called; wrap in a loop. With `skip_wait` the wait is omitted and
    /// pending flags/timers are processed immediately; embedding types use
    /// this to interleave their own event sources fairly.
    pub fn wait_and_process_events(&self, skip_wait: bool) -> bool {
        if !self.run_flag() {
            return false;
        }

        // Skip the wait if it has been a long time since the last pass, so
        // a long-running callback cannot starve the timers.
        let mut skip_wait = skip_wait;
        let now = clock::milliseconds();
        if clock::delta_milliseconds(self.last_wake.load(Ordering::Relaxed), now) > self.timeout {
            skip_wait = true;
        }
        self.last_wake.store(now, Ordering::Relaxed);

        if !skip_wait {
            self.sema.timed_wait(self.timeout);
        }

        // A lot can happen while waiting; re-check the stop request.
        if !self.run_flag() {
            return false;
        }

        // Consume the event flags atomically: snapshot and clear.
        let events = {
            let _cs = global_lock::acquire();
            self.events.swap(0, Ordering::AcqRel)
        };

        if events != 0 {
            for consumer in &self.consumers {
                let active = events & consumer.event_flags_mask();
                if active != 0 {
                    consumer.notified(active);
                }
            }
        }

        self.timers.process_timers();

        if let Some(watchdog) = &self.watchdog {
            watchdog.monitor_wdog();
        }

        true
    }

    fn run_flag(&self) -> bool {
        let _cs = global_lock::acquire();
        self.run.load(Ordering::Acquire)
    }

    /// Signal a single event flag by bit index (0 to 31). Thread context
    /// only.
    pub fn signal_event(&self, event_number: u8) {
        crate::kit_assert!(event_number < 32, "EventLoop: event number out of range");
        self.signal_multiple_events(1u32 << event_number);
    }

    /// Signal one event flag per set bit in `events`. Thread context only.
    pub fn signal_multiple_events(&self, events: u32) {
        {
            let _cs = global_lock::acquire();
            self.events.fetch_or(events, Ordering::AcqRel);
        }
        self.sema.signal();
    }

    /// As [`signal_event`](Self::signal_event), callable from ISR and
    /// supervisor contexts.
    pub fn su_signal_event(&self, event_number: u8) {
        crate::kit_assert!(event_number < 32, "EventLoop: event number out of range");
        self.su_signal_multiple_events(1u32 << event_number);
    }

    /// As [`signal_multiple_events`](Self::signal_multiple_events),
    /// callable from ISR and supervisor contexts.
    pub fn su_signal_multiple_events(&self, events: u32) {
        self.events.fetch_or(events, Ordering::AcqRel);
        self.sema.su_signal();
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Runnable for EventLoop {
    fn entry(&self) {
        self.start_loop();
        while self.wait_and_process_events(false) {}
        self.stop_loop();
    }

    /// Latch the stop request and wake the loop. A loop stopped before its
    /// thread ever ran exits immediately on entry.
    fn please_stop(&self) {
        log::trace!("EventLoop: stop requested");
        {
            let _cs = global_lock::acquire();
            self.run.store(false, Ordering::Release);
        }
        self.sema.signal();
    }
}

impl Signalable for EventLoop {
    fn signal(&self) {
        self.sema.signal();
    }

    fn su_signal(&self) {
        self.sema.su_signal();
    }
}
