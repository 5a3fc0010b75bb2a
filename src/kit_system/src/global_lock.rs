//! The global critical section.
//!
//! A process-wide, non-recursive lock for very short sections that must be
//! consistent with respect to ISR-like producers. On a hosted platform it is
//! a spinlock; bare-metal ports map the same contract onto IRQ
//! disable/enable.
//!
//! Contract: sections must be short, must not nest, and must not call any
//! OSAL method that can block. Re-entering from the same thread deadlocks.
use spin::Mutex as SpinMutex;

static GLOBAL: SpinMutex<()> = SpinMutex::new(());

/// RAII guard for the global critical section. The section ends when the
/// guard drops.
pub struct GlobalLockGuard {
    _guard: spin::MutexGuard<'static, ()>,
}

/// Enter the global critical section.
pub fn acquire() -> GlobalLockGuard {
    GlobalLockGuard {
        _guard: GLOBAL.lock(),
    }
}
