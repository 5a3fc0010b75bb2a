//! A portable operating-system abstraction layer plus a small set of
//! systems services built on top of it.
//!
//! The core is four subsystems, in dependency order:
//!
//! 1. **OSAL primitives**: [`thread`], [`semaphore`], [`mutex`],
//!    [`global_lock`], and the [`signalable`] wake-one-waiter interface.
//! 2. **Elapsed time**: [`clock`], a monotonic millisecond source with a
//!    pluggable simulated-tick mode ([`sim_tick`]) that lets tests advance
//!    virtual time deterministically.
//! 3. **Software timers**: [`timer`], a delta-list of countdowns driven
//!    off the elapsed-time source.
//! 4. **Event loop**: [`event_loop`], a single-threaded cooperative
//!    dispatcher composing the above with bitmask event flags and an
//!    optional [`watchdog`] collaborator. [`periodic_scheduler`] layers
//!    multi-interval periodic callbacks on top.
//!
//! The reference backend targets hosted platforms through `std`; the
//! `baremetal` cargo feature enforces the single-thread execution model of
//! MCU targets.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kit_system::{api, event_loop::EventLoop, thread::Thread, timer::Timer};
//!
//! api::initialize();
//!
//! let event_loop = Arc::new(EventLoop::new());
//! let thread = Thread::create(Arc::clone(&event_loop) as _, "events").unwrap();
//!
//! let heartbeat = Timer::new(event_loop.timers(), || log::info!("beat"));
//! heartbeat.start(250);
//!
//! api::sleep(1_000);
//! Thread::destroy(thread, 50);
//! ```
#![deny(unsafe_op_in_unsafe_fn)]

pub mod api;
pub mod clock;
pub mod event_loop;
pub mod fatal;
pub mod global_lock;
pub mod mutex;
pub mod periodic_scheduler;
pub mod semaphore;
pub mod signalable;
pub mod sim_tick;
pub mod startup;
pub mod thread;
pub mod timer;
pub mod watchdog;

pub use event_loop::{EventFlag, EventLoop, DEFAULT_TIMEOUT_MS};
pub use mutex::{Mutex, ScopeLock};
pub use periodic_scheduler::{Interval, PeriodicScheduler};
pub use semaphore::Semaphore;
pub use signalable::Signalable;
pub use startup::InitLevel;
pub use thread::{Runnable, Thread, ThreadConfig, Traverse};
pub use timer::{Timer, TimerManager};
pub use watchdog::WatchedEventLoop;
