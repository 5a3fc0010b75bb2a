//! The simulated-tick engine.
//!
//! When the process is switched into simulated-time mode ([`enable`]),
//! threads created with `allow_sim_ticks` become *sim threads*: their view
//! of elapsed time ([`crate::clock`]) is a virtual millisecond counter that
//! only advances when a test driver calls [`advance`]. Threads that never
//! opt in (the test driver itself, real-time pumps) keep running on the
//! wall clock.
//!
//! Protocol: a sim thread parks at a *cooperation point* whenever it has
//! nothing to do until more time passes ([`wait_for_tick`]). The driver
//! waits until every sim thread is parked (or excused inside an
//! application-level blocking wait), bumps the virtual counter by one,
//! releases every parked thread exactly once, and waits for them all to
//! park again. Repeating this `n` times is `advance(n)`.
//!
//! A sim thread is released at most once per tick because each participant
//! records the last generation it consumed; the shared condvar can wake it
//! spuriously without effect.
use once_cell::sync::Lazy;
use slab::Slab;
use std::{
    cell::Cell,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

/// How long [`advance`] waits, in real time, for all sim threads to reach a
/// cooperation point before concluding the test has a runaway thread.
const QUIESCE_GUARD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParticipantState {
    /// Executing between cooperation points.
    Running,
    /// Parked in [`wait_for_tick`].
    AtTickPoint,
    /// Blocked in an application-level wait; excused from tick handshakes.
    Away,
}

#[derive(Debug)]
struct Participant {
    state: ParticipantState,
    /// The most recent generation this thread has consumed a tick for.
    seen_generation: u64,
}

#[derive(Debug)]
struct Inner {
    participants: Slab<Participant>,
    generation: u64,
}

struct SimState {
    inner: Mutex<Inner>,
    /// Signaled by participants whenever their state changes; the driver
    /// waits on this for quiescence.
    driver_cv: Condvar,
    /// Signaled by the driver when a new generation is published.
    tick_cv: Condvar,
    /// Lock-free mirror of `Inner::generation` for clock reads.
    ticks: AtomicU64,
}

static STATE: Lazy<SimState> = Lazy::new(|| SimState {
    inner: Mutex::new(Inner {
        participants: Slab::new(),
        generation: 0,
    }),
    driver_cv: Condvar::new(),
    tick_cv: Condvar::new(),
    ticks: AtomicU64::new(0),
});

thread_local! {
    static SIM_KEY: Cell<Option<usize>> = Cell::new(None);
}

impl Inner {
    fn all_quiescent(&self) -> bool {
        self.participants.iter().all(|(_, p)| match p.state {
            ParticipantState::Away => true,
            ParticipantState::AtTickPoint => p.seen_generation == self.generation,
            ParticipantState::Running => false,
        })
    }
}

/// Whether the process runs in simulated-time mode. The original kit
/// selects this at link time; here it is a one-way runtime switch.
static ENABLED: AtomicBool = AtomicBool::new(false);

/// Switch the process into simulated-time mode.
///
/// One-way; must be called (usually first thing in a test driver) before
/// any thread that opts into sim ticks is created. Without this call,
/// threads created with `allow_sim_ticks` simply run on the wall clock.
pub fn enable() {
    ENABLED.store(true, Ordering::Release);
}

/// True when [`enable`] has been called.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Returns true when the calling thread participates in simulated time.
pub fn using_sim_ticks() -> bool {
    SIM_KEY.with(|k| k.get().is_some())
}

/// Returns true when at least one sim thread exists.
pub fn is_active() -> bool {
    !STATE.inner.lock().unwrap().participants.is_empty()
}

/// The current simulated time in milliseconds.
pub fn current() -> u64 {
    STATE.ticks.load(Ordering::Acquire)
}

/// Advance simulated time by `num_ticks` milliseconds.
///
/// Must be called from a non-sim thread (a sim thread advancing its own
/// clock would deadlock). Returns `true` immediately when no sim threads
/// exist. Returns `false` when the sim threads fail to reach a cooperation
/// point within a real-time guard interval, which indicates a spinning sim
/// thread (a test bug).
pub fn advance(num_ticks: u32) -> bool {
    crate::kit_assert!(
        !using_sim_ticks(),
        "SimTick::advance() called from a sim thread"
    );

    let s = &*STATE;
    for _ in 0..num_ticks {
        let mut g = s.inner.lock().unwrap();
        if g.participants.is_empty() {
            return true;
        }

        // Wait for every sim thread to finish the previous tick.
        let deadline = Instant::now() + QUIESCE_GUARD;
        while !g.all_quiescent() {
            let now = Instant::now();
            if now >= deadline {
                log::error!("SimTick::advance(): sim threads failed to quiesce");
                return false;
            }
            let (g2, _) = s.driver_cv.wait_timeout(g, deadline - now).unwrap();
            g = g2;
            if g.participants.is_empty() {
                return true;
            }
        }

        // Publish the new tick and release every parked thread once.
        g.generation += 1;
        s.ticks.store(g.generation, Ordering::Release);
        log::trace!("sim tick {}", g.generation);
        s.tick_cv.notify_all();

        // Wait for every released thread to consume the tick and park again
        // (or become excused, or exit).
        while !g.all_quiescent() {
            let now = Instant::now();
            if now >= deadline {
                log::error!("SimTick::advance(): sim threads failed to re-quiesce");
                return false;
            }
            let (g2, _) = s.driver_cv.wait_timeout(g, deadline - now).unwrap();
            g = g2;
            if g.participants.is_empty() {
                break;
            }
        }
    }
    true
}

/// Returns the number of registered sim threads.
pub fn participant_count() -> usize {
    STATE.inner.lock().unwrap().participants.len()
}

/// Register the calling thread as a sim-tick participant. No-op unless the
/// process is in simulated-time mode.
///
/// Called by the thread trampoline before the runnable's entry point.
pub(crate) fn thread_init() {
    if !is_enabled() {
        return;
    }
    let s = &*STATE;
    let mut g = s.inner.lock().unwrap();
    let generation = g.generation;
    let key = g.participants.insert(Participant {
        state: ParticipantState::Running,
        seen_generation: generation,
    });
    SIM_KEY.with(|k| k.set(Some(key)));
    log::trace!("sim participant {key} registered");
}

/// Deregister the calling thread. Called by the trampoline on exit.
pub(crate) fn thread_exit() {
    if let Some(key) = SIM_KEY.with(|k| k.take()) {
        let s = &*STATE;
        let mut g = s.inner.lock().unwrap();
        g.participants.try_remove(key);
        log::trace!("sim participant {key} deregistered");
        s.driver_cv.notify_all();
    }
}

/// Park the calling sim thread until the driver grants it the next tick.
///
/// This is the cooperation point of the protocol; one call consumes exactly
/// one simulated millisecond. Calling from a non-sim thread is a contract
/// violation.
pub(crate) fn wait_for_tick() {
    let key = SIM_KEY.with(|k| k.get());
    let Some(key) = key else {
        crate::kit_assert!(false, "wait_for_tick() called from a non-sim thread");
        unreachable!();
    };

    let s = &*STATE;
    let mut g = s.inner.lock().unwrap();
    g.participants[key].state = ParticipantState::AtTickPoint;
    s.driver_cv.notify_all();
    loop {
        let generation = g.generation;
        let p = &mut g.participants[key];
        if generation > p.seen_generation {
            p.seen_generation = generation;
            break;
        }
        g = s.tick_cv.wait(g).unwrap();
    }
    g.participants[key].state = ParticipantState::Running;
}

/// Excuse the calling thread from tick handshakes while `f` blocks.
///
/// Wraps application-level blocking waits (`Semaphore::wait`) so the driver
/// does not stall waiting for a thread that is legitimately asleep. On a
/// non-sim thread this is just `f()`.
pub(crate) fn application_wait<R>(f: impl FnOnce() -> R) -> R {
    let key = SIM_KEY.with(|k| k.get());
    let Some(key) = key else {
        return f();
    };

    let s = &*STATE;
    {
        let mut g = s.inner.lock().unwrap();
        g.participants[key].state = ParticipantState::Away;
        s.driver_cv.notify_all();
    }
    let result = f();
    {
        let mut g = s.inner.lock().unwrap();
        g.participants[key].state = ParticipantState::Running;
    }
    result
}
