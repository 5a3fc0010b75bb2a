//! Ordered initialization callbacks.
//!
//! Library subsystems register hooks that run when
//! [`initialize`](crate::api::initialize) is called. Hooks run in level
//! order, lowest first; within a level the order is unspecified. A hook
//! registered while draining is still picked up, as long as its level has
//! not already passed.
//!
//! Registration is an explicit API call (there is no pre-`main` in Rust);
//! application code should not normally register hooks at all.
use once_cell::sync::Lazy;
use std::sync::Mutex;

/// Initialization levels, processed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InitLevel {
    /// Initialized first.
    TestInfra = 0,
    System = 1,
    Middleware = 2,
    /// Initialized last.
    Application = 3,
}

const LEVELS: [InitLevel; 4] = [
    InitLevel::TestInfra,
    InitLevel::System,
    InitLevel::Middleware,
    InitLevel::Application,
];

type Hook = Box<dyn FnMut(InitLevel) + Send>;

static REGISTRY: Lazy<Mutex<[Vec<Hook>; 4]>> =
    Lazy::new(|| Mutex::new([Vec::new(), Vec::new(), Vec::new(), Vec::new()]));

/// Register a startup hook for the given level.
pub fn register_startup_hook(level: InitLevel, hook: impl FnMut(InitLevel) + Send + 'static) {
    REGISTRY.lock().unwrap()[level as usize].push(Box::new(hook));
}

/// Drain and invoke all registered hooks, lowest level first.
///
/// Intended to be called only by [`initialize`](crate::api::initialize).
pub(crate) fn notify_startup_clients() {
    loop {
        // Take the next hook from the lowest non-empty level. Re-scanning
        // from the bottom each time lets a hook register another hook at
        // its own (or a later) level and still have it run.
        let next = {
            let mut registry = REGISTRY.lock().unwrap();
            LEVELS.iter().find_map(|&level| {
                let hooks = &mut registry[level as usize];
                if hooks.is_empty() {
                    None
                } else {
                    Some((level, hooks.remove(0)))
                }
            })
        };
        match next {
            Some((level, mut hook)) => hook(level),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // The registry is process-wide; these tests must not overlap.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn levels_drain_in_order() {
        let _g = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let trace = Arc::new(Mutex::new(Vec::new()));
        let seq = Arc::new(AtomicUsize::new(0));
        for &level in [
            InitLevel::Application,
            InitLevel::System,
            InitLevel::TestInfra,
            InitLevel::Middleware,
        ]
        .iter()
        {
            let trace = Arc::clone(&trace);
            let seq = Arc::clone(&seq);
            register_startup_hook(level, move |l| {
                trace
                    .lock()
                    .unwrap()
                    .push((seq.fetch_add(1, Ordering::Relaxed), l));
            });
        }

        notify_startup_clients();

        let trace = trace.lock().unwrap();
        assert_eq!(trace.len(), 4);
        let levels: Vec<_> = trace.iter().map(|&(_, l)| l).collect();
        assert_eq!(
            levels,
            vec![
                InitLevel::TestInfra,
                InitLevel::System,
                InitLevel::Middleware,
                InitLevel::Application
            ]
        );
    }

    #[test]
    fn hook_registered_while_draining_still_runs() {
        let _g = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        register_startup_hook(InitLevel::System, move |_| {
            let ran3 = Arc::clone(&ran2);
            register_startup_hook(InitLevel::Application, move |_| {
                ran3.fetch_add(1, Ordering::Relaxed);
            });
        });

        notify_startup_clients();
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }
}
