//! Deterministic execution under the tick simulator.
//!
//! No real time passes between `advance` steps, so every firing pattern is
//! asserted exactly; jitter would be a bug, not noise.
#![cfg(not(feature = "baremetal"))]
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kit_system::event_loop::{EventFlag, EventLoop};
use kit_system::semaphore::Semaphore;
use kit_system::thread::{Runnable, Thread, ThreadConfig};
use kit_system::timer::{Timer, TimerManager};
use kit_system::{api, clock, sim_tick};

// The tick engine is process-wide; tests must not overlap.
static TEST_GUARD: Mutex<()> = Mutex::new(());

const START_EVENT: u8 = 0;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
    sim_tick::enable();
    api::initialize();
}

fn sim_config() -> ThreadConfig {
    ThreadConfig {
        allow_sim_ticks: true,
        ..ThreadConfig::default()
    }
}

struct TimerStats {
    attach_time: AtomicU32,
    fires: Mutex<Vec<u32>>,
}

/// A timer that re-arms itself from its own callback and records every
/// firing time (in simulated ms).
fn make_periodic_timer(
    timers: &TimerManager,
    duration: u32,
) -> (Arc<Mutex<Option<Timer>>>, Arc<TimerStats>) {
    let stats = Arc::new(TimerStats {
        attach_time: AtomicU32::new(0),
        fires: Mutex::new(Vec::new()),
    });
    let slot: Arc<Mutex<Option<Timer>>> = Arc::new(Mutex::new(None));
    let stats2 = Arc::clone(&stats);
    let slot2 = Arc::clone(&slot);
    let timer = Timer::new(timers, move || {
        stats2.fires.lock().unwrap().push(clock::milliseconds());
        if let Some(timer) = slot2.lock().unwrap().as_ref() {
            timer.start(duration);
        }
    });
    *slot.lock().unwrap() = Some(timer);
    (slot, stats)
}

struct StartEntry {
    duration: u32,
    slot: Arc<Mutex<Option<Timer>>>,
    stats: Arc<TimerStats>,
}

/// Starts this loop's timers when the start event arrives, so attachment
/// happens on the loop's own thread at a known simulated time.
struct StartConsumer {
    entries: Mutex<Vec<StartEntry>>,
}

impl EventFlag for StartConsumer {
    fn event_flags_mask(&self) -> u32 {
        1 << START_EVENT
    }

    fn notified(&self, _active_events: u32) {
        for entry in self.entries.lock().unwrap().iter() {
            entry
                .stats
                .attach_time
                .store(clock::milliseconds(), Ordering::SeqCst);
            if let Some(timer) = entry.slot.lock().unwrap().as_ref() {
                timer.start(entry.duration);
            }
        }
    }
}

struct Fixture {
    event_loop: Arc<EventLoop>,
    thread: Arc<Thread>,
    stats: Vec<(u32, Arc<TimerStats>)>,
}

fn drain_sim_threads() {
    let mut rounds = 0;
    while sim_tick::participant_count() > 0 {
        assert!(sim_tick::advance(5), "sim threads failed to wind down");
        rounds += 1;
        assert!(rounds < 1_000, "sim threads never exited");
    }
}

#[test]
fn three_event_loops_fire_timers_without_jitter() {
    let _g = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
    init();

    // Per-loop timer durations, in simulated ms.
    let duration_sets: [(u32, u32); 3] = [(10, 23), (11, 47), (60, 125)];

    let mut fixtures = Vec::new();
    for (index, &(d1, d2)) in duration_sets.iter().enumerate() {
        let consumer = Arc::new(StartConsumer {
            entries: Mutex::new(Vec::new()),
        });
        let event_loop = Arc::new(EventLoop::with_consumers(
            1,
            vec![Arc::clone(&consumer) as Arc<dyn EventFlag>],
        ));

        let mut stats = Vec::new();
        for duration in [d1, d2] {
            let (slot, timer_stats) = make_periodic_timer(event_loop.timers(), duration);
            consumer.entries.lock().unwrap().push(StartEntry {
                duration,
                slot,
                stats: Arc::clone(&timer_stats),
            });
            stats.push((duration, timer_stats));
        }

        let thread = Thread::create_with(
            Arc::clone(&event_loop) as _,
            &format!("sim-loop-{index}"),
            sim_config(),
        )
        .unwrap();
        fixtures.push(Fixture {
            event_loop,
            thread,
            stats,
        });
    }

    // Wait (in real time) for all three loops to join the sim engine, then
    // let them settle at a cooperation point.
    let deadline = Instant::now() + Duration::from_secs(10);
    while sim_tick::participant_count() < 3 {
        assert!(Instant::now() < deadline, "loops never registered");
        std::thread::yield_now();
    }
    assert!(sim_tick::advance(2));

    // Release the start event while every loop is parked, then run the
    // whole scenario in virtual time.
    let base = sim_tick::current();
    for fixture in &fixtures {
        fixture.event_loop.signal_event(START_EVENT);
    }
    assert!(sim_tick::advance(2_000));
    let horizon = base + 2_000;
    assert_eq!(sim_tick::current(), horizon);

    // Every loop armed its timers on the same virtual tick.
    let attach_times: Vec<u32> = fixtures
        .iter()
        .flat_map(|f| f.stats.iter())
        .map(|(_, s)| s.attach_time.load(Ordering::SeqCst))
        .collect();
    assert!(attach_times.windows(2).all(|w| w[0] == w[1]));
    let attach = attach_times[0];

    // Exact, jitter-free firing tables.
    for fixture in &fixtures {
        for (duration, stats) in &fixture.stats {
            let fires = stats.fires.lock().unwrap().clone();
            let expected = (horizon as u32 - attach) / duration;
            assert_eq!(
                fires.len() as u32,
                expected,
                "timer with period {duration} fired {} times, expected {expected}",
                fires.len()
            );
            assert_eq!(fires[0], attach + duration);
            for pair in fires.windows(2) {
                assert_eq!(pair[1] - pair[0], *duration);
            }
        }
    }

    // Wind down: parked loops need ticks to observe the stop request.
    for fixture in &fixtures {
        fixture.event_loop.please_stop();
    }
    drain_sim_threads();
    for fixture in fixtures {
        Thread::destroy(fixture.thread, 5_000);
    }
}

struct SimWaiter {
    sema: Semaphore,
    outcome: Mutex<Option<(bool, u64, u64)>>,
}

impl Runnable for SimWaiter {
    fn entry(&self) {
        // An unsignaled timed wait must consume exactly its budget of
        // simulated ticks, and sleep() exactly its duration.
        let start = clock::milliseconds_ex();
        let signaled = self.sema.timed_wait(50);
        let after_wait = clock::milliseconds_ex();
        api::sleep(25);
        let after_sleep = clock::milliseconds_ex();
        *self.outcome.lock().unwrap() =
            Some((signaled, after_wait - start, after_sleep - after_wait));
    }
}

#[test]
fn timed_wait_and_sleep_consume_exact_tick_budgets() {
    let _g = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
    init();

    let waiter = Arc::new(SimWaiter {
        sema: Semaphore::new(0),
        outcome: Mutex::new(None),
    });
    let thread = Thread::create_with(Arc::clone(&waiter) as _, "sim-waiter", sim_config()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while sim_tick::participant_count() < 1 {
        assert!(Instant::now() < deadline, "waiter never registered");
        std::thread::yield_now();
    }

    drain_sim_threads();
    Thread::destroy(thread, 5_000);

    let outcome = waiter.outcome.lock().unwrap().take();
    assert_eq!(outcome, Some((false, 50, 25)));
}
