//! Recursive mutual exclusion.
use std::sync::{Condvar, Mutex as StdMutex};
use std::thread::ThreadId;

/// A recursive mutex.
///
/// The owning thread may call [`lock`](Mutex::lock) repeatedly; each call
/// increments a depth counter and the lock is released when
/// [`unlock`](Mutex::unlock) has been called the same number of times.
/// Prefer [`ScopeLock`] over manual `lock`/`unlock` pairs.
pub struct Mutex {
    inner: StdMutex<Owner>,
    cv: Condvar,
}

struct Owner {
    thread: Option<ThreadId>,
    depth: u32,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            inner: StdMutex::new(Owner {
                thread: None,
                depth: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Block until the calling thread owns the mutex.
    pub fn lock(&self) {
        let me = std::thread::current().id();
        let mut owner = self.inner.lock().unwrap();
        if owner.thread == Some(me) {
            owner.depth += 1;
            return;
        }
        while owner.thread.is_some() {
            owner = self.cv.wait(owner).unwrap();
        }
        owner.thread = Some(me);
        owner.depth = 1;
    }

    /// Release one level of ownership. Unlocking a mutex the calling thread
    /// does not own is a fatal error.
    pub fn unlock(&self) {
        let me = std::thread::current().id();
        let mut owner = self.inner.lock().unwrap();
        crate::kit_assert!(
            owner.thread == Some(me) && owner.depth > 0,
            "Mutex::unlock() by a non-owning thread"
        );
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            self.cv.notify_one();
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of a [`Mutex`]: acquires on construction, releases on
/// drop, on every exit path.
pub struct ScopeLock<'a> {
    mutex: &'a Mutex,
}

impl<'a> ScopeLock<'a> {
    pub fn new(mutex: &'a Mutex) -> Self {
        mutex.lock();
        Self { mutex }
    }
}

impl Drop for ScopeLock<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
