//! Threads and the active-thread registry.
use once_cell::sync::Lazy;
use slab::Slab;
use spin::Mutex as SpinMutex;
use std::{
    cell::RefCell,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex as StdMutex, Weak},
    thread as std_thread,
};

use crate::semaphore::Semaphore;
use crate::signalable::Signalable;
use crate::sim_tick;

#[cfg(unix)]
#[path = "thread/priority_unix.rs"]
mod priority;
#[cfg(windows)]
#[path = "thread/priority_windows.rs"]
mod priority;
#[cfg(not(any(unix, windows)))]
#[path = "thread/priority_unsupported.rs"]
mod priority;

/// Highest scheduling-priority hint. The hint range is mapped onto whatever
/// the platform scheduler offers; see [`ThreadConfig::priority`].
pub const PRIORITY_HIGHEST: i32 = 31;
/// Default scheduling-priority hint.
pub const PRIORITY_NORMAL: i32 = 15;
/// Lowest scheduling-priority hint.
pub const PRIORITY_LOWEST: i32 = 0;

/// The body of a thread.
///
/// The runnable is shared between the application and the thread executing
/// it (the thread never owns it exclusively), so its methods take `&self`
/// and any mutable state lives behind interior mutability.
pub trait Runnable: Send + Sync {
    /// The thread's entry function. The thread ends when this returns.
    fn entry(&self);

    /// Cooperative stop request. The default does nothing; runnables with a
    /// main loop should latch a flag their `entry` observes.
    fn please_stop(&self) {}
}

/// Visitor verdict for [`Thread::traverse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traverse {
    Continue,
    Abort,
}

/// Creation options for [`Thread::create_with`].
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    /// Scheduling hint in `PRIORITY_LOWEST..=PRIORITY_HIGHEST`, mapped
    /// linearly onto the platform's native range. Best effort: a platform
    /// that refuses the request (e.g. POSIX `SCHED_OTHER` without
    /// privileges) leaves the thread at its default priority.
    pub priority: i32,
    /// Stack size in bytes; 0 selects the platform default. Caller-supplied
    /// stack memory is not supported on hosted backends.
    pub stack_size: usize,
    /// Whether this thread participates in simulated time.
    pub allow_sim_ticks: bool,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            priority: PRIORITY_NORMAL,
            stack_size: 0,
            allow_sim_ticks: true,
        }
    }
}

/// One active runnable.
///
/// A `Thread` is created with [`Thread::create`], runs its
/// [`Runnable::entry`], and deregisters itself when the entry returns. At
/// most one `Thread` exists per live OS thread; the native thread that
/// calls [`initialize`](crate::api::initialize) is adopted into the
/// registry so [`Thread::try_get_current`] works there too.
pub struct Thread {
    name: String,
    runnable: Arc<dyn Runnable>,
    /// The per-thread synchronization semaphore used by
    /// `Thread::wait`/`signal`. Distinct from any semaphore the runnable
    /// itself creates.
    sync_sema: Semaphore,
    /// Signaled once when the runnable's entry has returned.
    done_sema: Semaphore,
    active: AtomicBool,
    allow_sim_ticks: bool,
    registry_key: SpinMutex<Option<usize>>,
    join: StdMutex<Option<std_thread::JoinHandle<()>>>,
}

static REGISTRY: Lazy<StdMutex<Slab<Weak<Thread>>>> = Lazy::new(|| StdMutex::new(Slab::new()));

thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = RefCell::new(None);
}

// The one-and-only-thread rule of the bare-metal execution model.
#[cfg(feature = "baremetal")]
static THREAD_CREATED: AtomicBool = AtomicBool::new(false);

impl Thread {
    /// Create and start a thread with default options.
    pub fn create(runnable: Arc<dyn Runnable>, name: &str) -> io::Result<Arc<Thread>> {
        Self::create_with(runnable, name, ThreadConfig::default())
    }

    /// Create and start a thread.
    ///
    /// Returns an error when the OS refuses to create the thread. On a
    /// `baremetal` build the second call is a fatal error: that execution
    /// model has exactly one thread.
    pub fn create_with(
        runnable: Arc<dyn Runnable>,
        name: &str,
        config: ThreadConfig,
    ) -> io::Result<Arc<Thread>> {
        #[cfg(feature = "baremetal")]
        if THREAD_CREATED.swap(true, Ordering::SeqCst) {
            crate::fatal::fatal_error(format_args!(
                "Thread::create(): only one thread is allowed on a bare-metal target \
                 (attempted to create '{name}')"
            ));
        }

        log::trace!(
            "creating thread '{name}' (priority={}, stack={}, sim={})",
            config.priority,
            config.stack_size,
            config.allow_sim_ticks
        );

        let thread = Arc::new(Thread {
            name: name.to_string(),
            runnable,
            sync_sema: Semaphore::new(0),
            done_sema: Semaphore::new(0),
            active: AtomicBool::new(true),
            allow_sim_ticks: config.allow_sim_ticks,
            registry_key: SpinMutex::new(None),
            join: StdMutex::new(None),
        });

        let mut builder = std_thread::Builder::new().name(name.to_string());
        if config.stack_size > 0 {
            builder = builder.stack_size(config.stack_size);
        }

        let trampoline_thread = Arc::clone(&thread);
        let handle = builder.spawn(move || launch_runnable(trampoline_thread))?;
        priority::apply(&handle, config.priority);
        *thread.join.lock().unwrap() = Some(handle);
        Ok(thread)
    }

    /// Ask the thread's runnable to stop and wait up to `grace_ms` for the
    /// entry function to return.
    ///
    /// A thread that is still running after the grace period is detached
    /// and an error is logged; it is never forcibly killed.
    pub fn destroy(thread: Arc<Thread>, grace_ms: u32) {
        if thread.is_active() {
            thread.runnable.please_stop();
            if grace_ms > 0 && !thread.done_sema.timed_wait(grace_ms) {
                log::error!(
                    "thread '{}' did not stop within {grace_ms} ms; detaching",
                    thread.name
                );
                return;
            }
        }
        if let Some(handle) = thread.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// The thread executing the caller, if it is a kit thread.
    pub fn try_get_current() -> Option<Arc<Thread>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// The thread executing the caller. Fatal when called from a thread the
    /// kit does not know about.
    pub fn get_current() -> Arc<Thread> {
        match Self::try_get_current() {
            Some(thread) => thread,
            None => crate::fatal::fatal_error(format_args!(
                "Thread::get_current() called from an unknown thread"
            )),
        }
    }

    /// Block the current thread on its own sync semaphore.
    pub fn wait() {
        Self::get_current().sync_sema.wait();
    }

    /// Consume a pending signal on the current thread, if any.
    pub fn try_wait() -> bool {
        Self::get_current().sync_sema.try_wait()
    }

    /// As [`Thread::wait`], bounded by `timeout_ms`. Returns `false` on
    /// timeout.
    pub fn timed_wait(timeout_ms: u32) -> bool {
        Self::get_current().sync_sema.timed_wait(timeout_ms)
    }

    /// Visit every thread in the active-thread registry.
    ///
    /// The visitor must not create or destroy threads.
    pub fn traverse(mut visitor: impl FnMut(&Arc<Thread>) -> Traverse) {
        let registry = REGISTRY.lock().unwrap();
        for (_, weak) in registry.iter() {
            if let Some(thread) = weak.upgrade() {
                if visitor(&thread) == Traverse::Abort {
                    break;
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the runnable's entry function has not returned.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether this thread participates in simulated time.
    pub fn allows_sim_ticks(&self) -> bool {
        self.allow_sim_ticks
    }
}

impl Signalable for Thread {
    fn signal(&self) {
        self.sync_sema.signal();
    }

    fn su_signal(&self) {
        self.sync_sema.su_signal();
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .field("allow_sim_ticks", &self.allow_sim_ticks)
            .finish()
    }
}

/// Trampoline executed on the new OS thread: publish the thread-local
/// current-thread pointer, opt into simulated time, register in the
/// active-thread registry, run the entry function, then tear it all down.
fn launch_runnable(thread: Arc<Thread>) {
    CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(&thread)));
    if thread.allow_sim_ticks {
        sim_tick::thread_init();
    }
    let key = REGISTRY.lock().unwrap().insert(Arc::downgrade(&thread));
    *thread.registry_key.lock() = Some(key);

    log::debug!("thread '{}' running", thread.name);
    let result = catch_unwind(AssertUnwindSafe(|| thread.runnable.entry()));
    log::debug!("thread '{}' exiting", thread.name);

    thread.active.store(false, Ordering::Release);
    if let Some(key) = thread.registry_key.lock().take() {
        REGISTRY.lock().unwrap().try_remove(key);
    }
    if thread.allow_sim_ticks {
        sim_tick::thread_exit();
    }
    CURRENT.with(|current| *current.borrow_mut() = None);
    thread.done_sema.signal();

    if let Err(payload) = result {
        // A panic escaping a runnable is fatal for the thread; registry
        // state has been torn down, so let it propagate.
        log::error!("thread '{}' panicked in its runnable", thread.name);
        std::panic::resume_unwind(payload);
    }
}

/// Adopt the native thread that is running `initialize()` into the
/// registry so `try_get_current` works on it. Registered as a SYSTEM
/// startup hook.
pub(crate) fn adopt_main_thread() {
    if Thread::try_get_current().is_some() {
        return;
    }

    struct MainRunnable;
    impl Runnable for MainRunnable {
        // Never called: the native thread is already running.
        fn entry(&self) {}
    }

    let thread = Arc::new(Thread {
        name: "main".to_string(),
        runnable: Arc::new(MainRunnable),
        sync_sema: Semaphore::new(0),
        done_sema: Semaphore::new(0),
        active: AtomicBool::new(true),
        allow_sim_ticks: false,
        registry_key: SpinMutex::new(None),
        join: StdMutex::new(None),
    });
    let key = REGISTRY.lock().unwrap().insert(Arc::downgrade(&thread));
    *thread.registry_key.lock() = Some(key);
    CURRENT.with(|current| *current.borrow_mut() = Some(thread));
    log::debug!("native thread adopted as 'main'");
}

// These tests create several threads, which the baremetal model forbids.
#[cfg(all(test, not(feature = "baremetal")))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingRunnable {
        runs: AtomicU32,
    }

    impl Runnable for CountingRunnable {
        fn entry(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn entry_runs_once_and_thread_deactivates() {
        let runnable = Arc::new(CountingRunnable {
            runs: AtomicU32::new(0),
        });
        let thread = Thread::create_with(
            Arc::clone(&runnable) as _,
            "one-shot",
            ThreadConfig {
                allow_sim_ticks: false,
                ..ThreadConfig::default()
            },
        )
        .unwrap();
        Thread::destroy(thread, 1_000);
        assert_eq!(runnable.runs.load(Ordering::SeqCst), 1);
    }

    struct WaitingRunnable {
        stop: AtomicBool,
        observed_name: StdMutex<Option<String>>,
    }

    impl Runnable for WaitingRunnable {
        fn entry(&self) {
            let me = Thread::get_current();
            *self.observed_name.lock().unwrap() = Some(me.name().to_string());
            while !self.stop.load(Ordering::Acquire) {
                Thread::timed_wait(1_000);
            }
        }

        fn please_stop(&self) {
            self.stop.store(true, Ordering::Release);
        }
    }

    #[test]
    fn current_thread_and_signal() {
        let runnable = Arc::new(WaitingRunnable {
            stop: AtomicBool::new(false),
            observed_name: StdMutex::new(None),
        });
        let thread = Thread::create_with(
            Arc::clone(&runnable) as _,
            "waiter",
            ThreadConfig {
                allow_sim_ticks: false,
                ..ThreadConfig::default()
            },
        )
        .unwrap();
        assert!(thread.is_active());

        runnable.stop.store(true, Ordering::Release);
        thread.signal();
        Thread::destroy(Arc::clone(&thread), 2_000);

        assert!(!thread.is_active());
        assert_eq!(
            runnable.observed_name.lock().unwrap().as_deref(),
            Some("waiter")
        );
    }

    #[test]
    fn traverse_sees_running_thread() {
        let runnable = Arc::new(WaitingRunnable {
            stop: AtomicBool::new(false),
            observed_name: StdMutex::new(None),
        });
        let thread = Thread::create_with(
            Arc::clone(&runnable) as _,
            "traversee",
            ThreadConfig {
                allow_sim_ticks: false,
                ..ThreadConfig::default()
            },
        )
        .unwrap();

        // Wait until the trampoline has registered the thread.
        while thread.registry_key.lock().is_none() {
            std_thread::yield_now();
        }

        let mut found = false;
        Thread::traverse(|t| {
            if t.name() == "traversee" {
                found = true;
                Traverse::Abort
            } else {
                Traverse::Continue
            }
        });
        assert!(found);

        runnable.stop.store(true, Ordering::Release);
        thread.signal();
        Thread::destroy(thread, 2_000);
    }

    #[test]
    fn non_kit_thread_has_no_current() {
        assert!(Thread::try_get_current().is_none());
    }
}
