//! Thread-priority mapping for Win32 targets.
use std::os::windows::io::AsRawHandle;
use std::thread::JoinHandle;

use winapi::um::processthreadsapi::SetThreadPriority;
use winapi::um::winbase::{
    THREAD_PRIORITY_ABOVE_NORMAL, THREAD_PRIORITY_BELOW_NORMAL, THREAD_PRIORITY_HIGHEST,
    THREAD_PRIORITY_LOWEST, THREAD_PRIORITY_NORMAL,
};

use super::{PRIORITY_HIGHEST, PRIORITY_LOWEST};

pub(super) fn apply(handle: &JoinHandle<()>, priority: i32) {
    // Bucket the portable hint range into the five native classes.
    let native = match priority.clamp(PRIORITY_LOWEST, PRIORITY_HIGHEST) {
        0..=5 => THREAD_PRIORITY_LOWEST,
        6..=12 => THREAD_PRIORITY_BELOW_NORMAL,
        13..=18 => THREAD_PRIORITY_NORMAL,
        19..=25 => THREAD_PRIORITY_ABOVE_NORMAL,
        _ => THREAD_PRIORITY_HIGHEST,
    };

    // Safety: the raw handle is valid for the lifetime of `handle`.
    let ok = unsafe { SetThreadPriority(handle.as_raw_handle() as _, native as i32) };
    if ok == 0 {
        log::trace!("SetThreadPriority() failed; priority hint ignored");
    }
}
