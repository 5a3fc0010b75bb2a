//! Fallback for targets without a native priority API.
use std::thread::JoinHandle;

pub(super) fn apply(_handle: &JoinHandle<()>, _priority: i32) {}
