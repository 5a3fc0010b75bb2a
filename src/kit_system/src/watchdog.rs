//! Watchdog supervision hooks for event loops.
use crate::event_loop::EventLoop;

/// Supervisor interface an [`EventLoop`] reports to.
///
/// The loop knows nothing about the watchdog's implementation; it only
/// promises to call [`start_watcher`](Self::start_watcher) when the loop
/// starts, [`monitor_wdog`](Self::monitor_wdog) once per wake, and
/// [`stop_watcher`](Self::stop_watcher) when the loop ends. Absence of a
/// watchdog is the default.
pub trait WatchedEventLoop: Send + Sync {
    /// The watched loop has started executing.
    fn start_watcher(&self, event_loop: &EventLoop);

    /// The watched loop is shutting down.
    fn stop_watcher(&self);

    /// Liveness check-in, called once per loop wake.
    fn monitor_wdog(&self);

    /// True when this watcher's thread supervises the other watched
    /// threads.
    fn is_supervisor_thread(&self) -> bool;
}
