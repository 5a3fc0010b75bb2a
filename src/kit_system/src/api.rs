//! Process-wide system services: initialization, sleep, scheduling.
use std::sync::Once;
use std::time::Duration;

use crate::clock;
use crate::sim_tick;
use crate::startup::{self, InitLevel};
use crate::thread;

/// Initialize the kit.
///
/// Drains the startup-hook registry in level order (TEST_INFRA → SYSTEM →
/// MIDDLEWARE → APPLICATION). The built-in SYSTEM hooks zero the elapsed
/// time counters and adopt the calling native thread into the
/// active-thread registry, so call this from the application's main thread
/// before using any other kit service.
pub fn initialize() {
    static BUILTIN_HOOKS: Once = Once::new();
    BUILTIN_HOOKS.call_once(|| {
        startup::register_startup_hook(InitLevel::System, |_| clock::reset_origin());
        startup::register_startup_hook(InitLevel::System, |_| thread::adopt_main_thread());
    });

    log::debug!("initializing kit subsystems");
    startup::notify_startup_clients();
}

/// Yield the calling thread for at least `milliseconds`.
///
/// On a sim thread the delay consumes simulated ticks one at a time; the
/// call returns once the tick driver has advanced far enough.
pub fn sleep(milliseconds: u32) {
    if sim_tick::using_sim_ticks() {
        for _ in 0..milliseconds {
            sim_tick::wait_for_tick();
        }
    } else {
        sleep_in_real_time(milliseconds);
    }
}

/// Yield the calling thread for at least `milliseconds` of wall-clock
/// time, even on a sim thread. Code that calls this cannot be simulated.
pub fn sleep_in_real_time(milliseconds: u32) {
    std::thread::sleep(Duration::from_millis(u64::from(milliseconds)));
}

/// Hand control to the platform scheduler, where that is meaningful. On
/// hosted platforms scheduling is always running and this does nothing.
pub fn enable_scheduling() {
    log::trace!("enable_scheduling(): no-op on a hosted platform");
}

/// True once the platform scheduler is running. Always true on hosted
/// platforms.
pub fn is_scheduling_enabled() -> bool {
    true
}
