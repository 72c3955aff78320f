//! Long-term lock that yields the CPU while waiting.
//!
//! Inode I/O holds the lock across block copies and possible scheduling, so
//! a spin lock would both waste the hart and deadlock with interrupts kept
//! off. Contenders sleep on the lock's address and are woken on release.
//!
//! Callers must not hold a spin lock while acquiring a sleep lock.

use core::cell::UnsafeCell;
use super::SpinLockPure;
use crate::proc;


pub struct SleepLock {
    lk: SpinLockPure,
    locked: UnsafeCell<bool>,
    /// Pid of the holder, for diagnostics.
    pid: UnsafeCell<i32>,
}

// The inner cells are only touched under `lk`.
unsafe impl Sync for SleepLock {}

impl SleepLock {
    pub const fn new() -> Self {
        Self {
            lk: SpinLockPure::new(),
            locked: UnsafeCell::new(false),
            pid: UnsafeCell::new(0),
        }
    }

    pub fn acquire(&self) {
        self.lk.lock();
        unsafe {
            while *self.locked.get() {
                proc::sleep(self as *const _ as usize, &self.lk);
            }
            *self.locked.get() = true;
            *self.pid.get() = proc::current_pid();
        }
        self.lk.unlock();
    }

    pub fn release(&self) {
        self.lk.lock();
        unsafe {
            *self.locked.get() = false;
            *self.pid.get() = 0;
        }
        proc::wakeup(self as *const _ as usize);
        self.lk.unlock();
    }

    /// Check if the lock is held by the calling process.
    pub fn holding(&self) -> bool {
        self.lk.lock();
        let held = unsafe {
            *self.locked.get() && *self.pid.get() == proc::current_pid()
        };
        self.lk.unlock();
        held
    }
}
