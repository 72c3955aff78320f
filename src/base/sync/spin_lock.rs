//! Provides the spin-lock implementation.

use core::sync::atomic::{AtomicBool, Ordering};
use crate::base::irq::{pop_off, push_off};


/// A spin lock object works like the C type, it only provides the lock
/// semantic but does not manage any data.
///
/// Acquiring disables interrupts on the current hart (nested via
/// `push_off`/`pop_off`), so a lock taken in thread context can never
/// deadlock against an interrupt handler taking the same lock.
#[repr(C)]
pub struct SpinLockPure {
    lock: AtomicBool,
}

impl SpinLockPure {
    #[inline]
    pub const fn new() -> Self {
        Self {
            lock: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) {
        push_off();
        while self.lock.compare_exchange_weak(
            false, true, Ordering::AcqRel, Ordering::Relaxed).is_err() {
            core::hint::spin_loop();
        }
    }

    #[inline]
    pub fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
        pop_off();
    }

    #[inline]
    pub fn lock_guard(&self) -> SpinLockPureGuard {
        self.lock();
        SpinLockPureGuard {
            lock: self
        }
    }
}

pub struct SpinLockPureGuard<'a> {
    lock: &'a SpinLockPure,
}

impl<'a> Drop for SpinLockPureGuard<'a> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
