//! A small host demo: one event-driven thread pumping two software timers,
//! an event-flag consumer, and a periodic scheduler.
//!
//! Run with `RUST_LOG=info` (or `trace` to watch the loop internals).
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use kit_system::event_loop::{EventFlag, EventLoop};
use kit_system::periodic_scheduler::{Interval, PeriodicScheduler};
use kit_system::thread::{Thread, ThreadConfig};
use kit_system::timer::Timer;
use kit_system::{api, clock};

const BUTTON_EVENT: u8 = 0;

struct ButtonConsumer {
    presses: AtomicU32,
}

impl EventFlag for ButtonConsumer {
    fn event_flags_mask(&self) -> u32 {
        1 << BUTTON_EVENT
    }

    fn notified(&self, _active_events: u32) {
        let n = self.presses.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("button event #{n} at t={} ms", clock::milliseconds());
    }
}

fn main() {
    env_logger::init();
    api::initialize();

    let button = Arc::new(ButtonConsumer {
        presses: AtomicU32::new(0),
    });
    let event_loop = Arc::new(EventLoop::with_consumers(1, vec![Arc::clone(&button) as _]));
    let thread = Thread::create_with(
        Arc::clone(&event_loop) as _,
        "event-pump",
        ThreadConfig {
            allow_sim_ticks: false,
            ..ThreadConfig::default()
        },
    )
    .expect("failed to create the event-pump thread");

    // A repeating 250 ms heartbeat timer.
    let heartbeat: Arc<Mutex<Option<Timer>>> = Arc::new(Mutex::new(None));
    let heartbeat2 = Arc::clone(&heartbeat);
    let timer = Timer::new(event_loop.timers(), move || {
        log::info!("heartbeat at t={} ms", clock::milliseconds());
        if let Some(t) = heartbeat2.lock().unwrap().as_ref() {
            t.start(250);
        }
    });
    timer.start(250);
    *heartbeat.lock().unwrap() = Some(timer);

    // A one-shot timer.
    let one_shot = Timer::new(event_loop.timers(), || {
        log::info!("one-shot fired at t={} ms", clock::milliseconds());
    });
    one_shot.start(600);

    // The main thread acts as the "application": it feeds button events and
    // drives a periodic scheduler table.
    let mut scheduler = PeriodicScheduler::new(vec![
        Interval::new(100, |now, boundary| {
            log::debug!("fast interval: now={now} boundary={boundary}");
        }),
        Interval::new(500, |now, boundary| {
            log::info!("slow interval: now={now} boundary={boundary}");
        }),
    ])
    .with_slippage_reporter(|index, now, missed| {
        log::warn!("interval {index} slipped: now={now} missed boundary {missed}");
    });

    scheduler.begin_loop();
    for step in 0..20 {
        api::sleep(100);
        scheduler.execute_scheduler();
        if step % 7 == 0 {
            event_loop.signal_event(BUTTON_EVENT);
        }
    }
    scheduler.end_loop();

    log::info!(
        "shutting down after {} button events",
        button.presses.load(Ordering::SeqCst)
    );
    Thread::destroy(thread, 100);
}
