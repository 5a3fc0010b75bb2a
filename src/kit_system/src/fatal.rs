//! Fatal-error escalation.
//!
//! Broken preconditions (a zero event-loop timeout, a second bare-metal
//! thread) are not recoverable errors; they are routed here. The installed
//! handler must diverge. The default handler logs the message and panics,
//! which is the appropriate behavior on a hosted platform; embedded ports
//! install a handler that halts the target instead.
use core::fmt;

/// A diverging fatal-error handler.
pub type FatalHandler = fn(fmt::Arguments<'_>) -> !;

static HANDLER: spin::Mutex<FatalHandler> = spin::Mutex::new(default_handler);

fn default_handler(args: fmt::Arguments<'_>) -> ! {
    log::error!("FATAL: {args}");
    panic!("fatal error: {args}");
}

/// Replace the process-wide fatal-error handler.
pub fn set_fatal_handler(handler: FatalHandler) {
    *HANDLER.lock() = handler;
}

/// Escalate an unrecoverable condition. Never returns.
pub fn fatal_error(args: fmt::Arguments<'_>) -> ! {
    let handler = *HANDLER.lock();
    handler(args)
}

/// Assert a precondition, escalating through [`fatal_error`] on failure.
///
/// Compiled out when the `disable-asserts` feature is enabled.
#[cfg(not(feature = "disable-asserts"))]
#[macro_export]
macro_rules! kit_assert {
    ($cond:expr) => {
        if !$cond {
            $crate::fatal::fatal_error(::core::format_args!(
                "assertion failed: {} ({}:{})",
                ::core::stringify!($cond),
                ::core::file!(),
                ::core::line!()
            ));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal::fatal_error(::core::format_args!($($arg)+));
        }
    };
}

/// Assert a precondition, escalating through [`fatal_error`] on failure.
#[cfg(feature = "disable-asserts")]
#[macro_export]
macro_rules! kit_assert {
    ($cond:expr) => {
        let _ = || $cond;
    };
    ($cond:expr, $($arg:tt)+) => {
        let _ = || $cond;
    };
}
