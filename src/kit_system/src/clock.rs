//! Elapsed time since system start, with millisecond precision.
//!
//! Two synchronized views share one timing source: the 32-bit API rolls
//! over after 49.7 days, the 64-bit (`_ex`) API after 584 million years.
//! The low 32 bits of the extended view always agree with the 32-bit view.
//!
//! Deltas use unsigned wrap arithmetic, so a single rollover between two
//! samples does not need special casing as long as the measured interval is
//! below 2^31 ms.
//!
//! On a sim thread (see [`crate::sim_tick`]) the non-`_in_real_time`
//! queries report simulated time. Application code should prefer them;
//! calling the `_in_real_time` variants makes that code impossible to run
//! under the tick simulator.
use once_cell::sync::Lazy;
use spin::Mutex as SpinMutex;
use std::time::Instant;

use crate::sim_tick;

/// The real-time reference captured at process start and re-zeroed by the
/// SYSTEM-level startup hook.
static ORIGIN: Lazy<SpinMutex<Instant>> = Lazy::new(|| SpinMutex::new(Instant::now()));

/// Re-zero elapsed time. Registered as a SYSTEM startup hook by
/// [`crate::api::initialize`].
pub(crate) fn reset_origin() {
    *ORIGIN.lock() = Instant::now();
}

/// Elapsed milliseconds since start (32-bit view).
pub fn milliseconds() -> u32 {
    milliseconds_ex() as u32
}

/// Elapsed milliseconds since start (64-bit view).
pub fn milliseconds_ex() -> u64 {
    if sim_tick::using_sim_ticks() {
        sim_tick::current()
    } else {
        milliseconds_ex_in_real_time()
    }
}

/// Elapsed seconds since start (32-bit view).
pub fn seconds() -> u32 {
    milliseconds() / 1000
}

/// Elapsed seconds since start (64-bit view).
pub fn seconds_ex() -> u64 {
    milliseconds_ex() / 1000
}

/// As [`milliseconds`], but always real time, even on a sim thread.
pub fn milliseconds_in_real_time() -> u32 {
    milliseconds_ex_in_real_time() as u32
}

/// As [`milliseconds_ex`], but always real time, even on a sim thread.
pub fn milliseconds_ex_in_real_time() -> u64 {
    let origin = *ORIGIN.lock();
    origin.elapsed().as_millis() as u64
}

/// `end - start` with wrap arithmetic.
pub fn delta_milliseconds(start: u32, end: u32) -> u32 {
    end.wrapping_sub(start)
}

/// Milliseconds elapsed since `start`, measured against "now".
pub fn delta_milliseconds_since(start: u32) -> u32 {
    delta_milliseconds(start, milliseconds())
}

/// `end - start` with wrap arithmetic (64-bit view).
pub fn delta_milliseconds_ex(start: u64, end: u64) -> u64 {
    end.wrapping_sub(start)
}

/// Has `duration` elapsed since `marker`, as observed at `now`?
pub fn expired_milliseconds(marker: u32, duration: u32, now: u32) -> bool {
    delta_milliseconds(marker, now) >= duration
}

/// Has `duration` elapsed since `marker`, as observed right now?
pub fn expired_milliseconds_since(marker: u32, duration: u32) -> bool {
    expired_milliseconds(marker, duration, milliseconds())
}

/// Has `duration` elapsed since `marker`, as observed at `now` (64-bit)?
pub fn expired_milliseconds_ex(marker: u64, duration: u64, now: u64) -> bool {
    delta_milliseconds_ex(marker, now) >= duration
}
