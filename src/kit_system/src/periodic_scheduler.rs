//! Periodic callback scheduling with slippage detection.
//!
//! Drives N independent intervals from within an event-driven thread. The
//! scheduler guarantees a bounded callback frequency: when processing falls
//! behind, missed intervals are dropped (and reported), never queued.
use crate::clock;

/// Callback invoked when an interval boundary passes. Arguments are the
/// current tick and the boundary that was crossed, both in ms.
pub type IntervalCallback = Box<dyn FnMut(u64, u64) + Send>;

/// Reports a missed interval: `(interval_index, current_tick,
/// missed_boundary)`.
pub type SlippageReporter = Box<dyn FnMut(usize, u64, u64) + Send>;

/// Hook invoked at the start/end of the owning thread's processing loop.
pub type ProcessingHook = Box<dyn FnMut(u64) + Send>;

/// One periodic interval.
pub struct Interval {
    duration_ms: u64,
    time_marker: u64,
    callback: IntervalCallback,
}

impl Interval {
    pub fn new(duration_ms: u64, callback: impl FnMut(u64, u64) + Send + 'static) -> Self {
        Self {
            duration_ms,
            time_marker: 0,
            callback: Box::new(callback),
        }
    }
}

/// Drives a table of [`Interval`]s, typically from an idle hook or a timer
/// of an event loop.
///
/// On the first [`execute_scheduler`](Self::execute_scheduler) call, every
/// interval's marker is rounded down to the nearest boundary of its
/// duration, so callbacks land on stable wall-clock multiples.
pub struct PeriodicScheduler {
    intervals: Vec<Interval>,
    report_slippage: Option<SlippageReporter>,
    begin_processing: Option<ProcessingHook>,
    end_processing: Option<ProcessingHook>,
    now: Box<dyn Fn() -> u64 + Send>,
    first_execution: bool,
}

impl PeriodicScheduler {
    /// A scheduler over `intervals`, timed by
    /// [`clock::milliseconds_ex`].
    pub fn new(intervals: Vec<Interval>) -> Self {
        Self {
            intervals,
            report_slippage: None,
            begin_processing: None,
            end_processing: None,
            now: Box::new(clock::milliseconds_ex),
            first_execution: true,
        }
    }

    /// Report missed boundaries to `reporter` instead of dropping them
    /// silently.
    pub fn with_slippage_reporter(
        mut self,
        reporter: impl FnMut(usize, u64, u64) + Send + 'static,
    ) -> Self {
        self.report_slippage = Some(Box::new(reporter));
        self
    }

    /// Install hooks called by [`begin_loop`](Self::begin_loop) and
    /// [`end_loop`](Self::end_loop).
    pub fn with_processing_hooks(
        mut self,
        begin: impl FnMut(u64) + Send + 'static,
        end: impl FnMut(u64) + Send + 'static,
    ) -> Self {
        self.begin_processing = Some(Box::new(begin));
        self.end_processing = Some(Box::new(end));
        self
    }

    /// Replace the timing source. Primarily a test seam.
    pub fn with_now_func(mut self, now: impl Fn() -> u64 + Send + 'static) -> Self {
        self.now = Box::new(now);
        self
    }

    /// Invoke the begin-of-processing hook, if any.
    pub fn begin_loop(&mut self) {
        if let Some(begin) = &mut self.begin_processing {
            begin((self.now)());
        }
    }

    /// Invoke the end-of-processing hook, if any.
    pub fn end_loop(&mut self) {
        if let Some(end) = &mut self.end_processing {
            end((self.now)());
        }
    }

    /// Run one scheduling pass. Returns true when at least one interval
    /// fired.
    pub fn execute_scheduler(&mut self) -> bool {
        let mut at_least_one = false;

        for (index, interval) in self.intervals.iter_mut().enumerate() {
            let current_tick = (self.now)();

            // Initialize the marker on the very first pass.
            if self.first_execution {
                set_time_marker(interval, current_tick);
            }

            if clock::expired_milliseconds_ex(
                interval.time_marker,
                interval.duration_ms,
                current_tick,
            ) {
                at_least_one = true;
                interval.time_marker += interval.duration_ms;
                (interval.callback)(current_tick, interval.time_marker);

                // Still behind after the callback: the interval slipped.
                if clock::expired_milliseconds_ex(
                    interval.time_marker,
                    interval.duration_ms,
                    current_tick,
                ) {
                    if let Some(report) = &mut self.report_slippage {
                        report(index, current_tick, interval.time_marker);
                    }

                    // Re-sync to the most recent boundary, dropping the
                    // missed intervals instead of stacking a backlog.
                    set_time_marker(interval, current_tick);
                }
            }
        }

        self.first_execution = false;
        at_least_one
    }
}

/// Round the marker down to the nearest interval boundary.
fn set_time_marker(interval: &mut Interval, current_tick: u64) {
    if interval.duration_ms == 0 {
        interval.time_marker = current_tick;
        return;
    }
    interval.time_marker = (current_tick / interval.duration_ms) * interval.duration_ms;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    fn manual_clock() -> (Arc<AtomicU64>, impl Fn() -> u64 + Send + 'static) {
        let time = Arc::new(AtomicU64::new(0));
        let time2 = Arc::clone(&time);
        (time, move || time2.load(Ordering::SeqCst))
    }

    #[test]
    fn markers_round_down_to_interval_boundary() {
        let (time, now) = manual_clock();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired2 = Arc::clone(&fired);

        let mut sched = PeriodicScheduler::new(vec![Interval::new(10, move |now, boundary| {
            fired2.lock().unwrap().push((now, boundary));
        })])
        .with_now_func(now);

        // First pass at t=25: the marker rounds down to the 20 boundary;
        // only 5 ms of the interval have passed, so nothing fires yet.
        time.store(25, Ordering::SeqCst);
        assert!(!sched.execute_scheduler());
        assert!(fired.lock().unwrap().is_empty());

        // The 20→30 boundary passes at t=30.
        time.store(29, Ordering::SeqCst);
        assert!(!sched.execute_scheduler());
        time.store(30, Ordering::SeqCst);
        assert!(sched.execute_scheduler());
        assert_eq!(*fired.lock().unwrap(), vec![(30, 30)]);

        time.store(40, Ordering::SeqCst);
        assert!(sched.execute_scheduler());
        assert_eq!(fired.lock().unwrap().len(), 2);
        assert_eq!(fired.lock().unwrap()[1], (40, 40));
    }

    #[test]
    fn slippage_is_reported_and_backlog_dropped() {
        let (time, now) = manual_clock();
        let fires = Arc::new(AtomicU64::new(0));
        let fires2 = Arc::clone(&fires);
        let slips = Arc::new(Mutex::new(Vec::new()));
        let slips2 = Arc::clone(&slips);

        let mut sched = PeriodicScheduler::new(vec![Interval::new(10, move |_, _| {
            fires2.fetch_add(1, Ordering::SeqCst);
        })])
        .with_slippage_reporter(move |index, now, missed| {
            slips2.lock().unwrap().push((index, now, missed));
        })
        .with_now_func(now);

        // First pass at t=10 establishes the marker at the 10 boundary.
        time.store(10, Ordering::SeqCst);
        assert!(!sched.execute_scheduler());
        time.store(20, Ordering::SeqCst);
        assert!(sched.execute_scheduler());
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        // Fall 40 ms behind: one fire, one slippage report, and the marker
        // resyncs to the latest boundary instead of firing four times.
        time.store(60, Ordering::SeqCst);
        assert!(sched.execute_scheduler());
        assert_eq!(fires.load(Ordering::SeqCst), 2);
        {
            let slips = slips.lock().unwrap();
            assert_eq!(slips.len(), 1);
            assert_eq!(slips[0], (0, 60, 30));
        }

        // After resync, the next boundary is 70.
        time.store(69, Ordering::SeqCst);
        assert!(!sched.execute_scheduler());
        time.store(70, Ordering::SeqCst);
        assert!(sched.execute_scheduler());
        assert_eq!(fires.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_duration_interval_does_not_divide_by_zero() {
        let (time, now) = manual_clock();
        let fires = Arc::new(AtomicU64::new(0));
        let fires2 = Arc::clone(&fires);

        let mut sched = PeriodicScheduler::new(vec![Interval::new(0, move |_, _| {
            fires2.fetch_add(1, Ordering::SeqCst);
        })])
        .with_now_func(now);

        time.store(5, Ordering::SeqCst);
        // duration 0 expires immediately every pass.
        assert!(sched.execute_scheduler());
        assert!(sched.execute_scheduler());
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn processing_hooks_see_current_time() {
        let (time, now) = manual_clock();
        let marks = Arc::new(Mutex::new(Vec::new()));
        let begin_marks = Arc::clone(&marks);
        let end_marks = Arc::clone(&marks);

        let mut sched = PeriodicScheduler::new(Vec::new())
            .with_processing_hooks(
                move |t| begin_marks.lock().unwrap().push(("begin", t)),
                move |t| end_marks.lock().unwrap().push(("end", t)),
            )
            .with_now_func(now);

        time.store(7, Ordering::SeqCst);
        sched.begin_loop();
        time.store(9, Ordering::SeqCst);
        sched.end_loop();
        assert_eq!(*marks.lock().unwrap(), vec![("begin", 7), ("end", 9)]);
    }
}
