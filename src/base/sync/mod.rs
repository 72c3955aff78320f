mod sleep_lock;
mod spin_lock;

pub use sleep_lock::SleepLock;
pub use spin_lock::{SpinLockPure, SpinLockPureGuard};
