//! Thread-priority mapping for POSIX targets.
//!
//! The portable hint range is mapped linearly into
//! `[sched_get_priority_min, sched_get_priority_max]` for `SCHED_OTHER`.
//! Most desktop systems only honor the hint under `SCHED_RR`/`SCHED_FIFO`,
//! which need elevated privileges, so failures are logged and ignored.
use std::os::unix::thread::JoinHandleExt;
use std::thread::JoinHandle;

use super::{PRIORITY_HIGHEST, PRIORITY_LOWEST};

pub(super) fn apply(handle: &JoinHandle<()>, priority: i32) {
    let policy = libc::SCHED_OTHER;

    // Safety: plain libc queries/updates on a live pthread handle.
    unsafe {
        let plat_min = libc::sched_get_priority_min(policy);
        let plat_max = libc::sched_get_priority_max(policy);
        if plat_min < 0 || plat_max < 0 || plat_max < plat_min {
            log::trace!("sched_get_priority_min/max unavailable; priority hint ignored");
            return;
        }

        let hint = priority.clamp(PRIORITY_LOWEST, PRIORITY_HIGHEST) as i64;
        let span = (plat_max - plat_min) as i64;
        let mapped = plat_min as i64 + span * hint / (PRIORITY_HIGHEST as i64);

        let param = libc::sched_param {
            sched_priority: mapped as libc::c_int,
        };
        let rc = libc::pthread_setschedparam(handle.as_pthread_t(), policy, &param);
        if rc != 0 {
            log::trace!("pthread_setschedparam() returned {rc}; priority hint ignored");
        }
    }
}
