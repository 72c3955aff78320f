//! Write transactions.
//!
//! Every file-system write happens inside a `begin_op`/`end_op` bracket. A
//! transaction may touch at most [`MAXOPBLOCKS`] blocks, and the layer
//! admits only as many concurrent transactions as fit the total budget
//! [`LOGSIZE`]; callers over the budget sleep until running transactions
//! retire. The RAM-backed store commits in place, so retiring a
//! transaction is pure bookkeeping; the budget and the serialization are
//! what the callers rely on.

use crate::base::sync::SpinLockPure;
use crate::constant::{LOGSIZE, MAXOPBLOCKS};
use crate::proc;


struct Log {
    lock: SpinLockPure,
    /// Transactions currently inside a bracket.
    outstanding: usize,
}

static mut LOG: Log = Log {
    lock: SpinLockPure::new(),
    outstanding: 0,
};

/// Called at the start of each file-system write operation; blocks until
/// the transaction fits the block budget.
pub fn begin_op() {
    let log = unsafe { &mut *core::ptr::addr_of_mut!(LOG) };

    log.lock.lock();
    while (log.outstanding + 1) * MAXOPBLOCKS > LOGSIZE {
        proc::sleep(log as *const Log as usize, &log.lock);
    }
    log.outstanding += 1;
    log.lock.unlock();
}

/// Called at the end of each file-system write operation.
pub fn end_op() {
    let log = unsafe { &mut *core::ptr::addr_of_mut!(LOG) };

    log.lock.lock();
    assert!(log.outstanding > 0, "end_op without begin_op");
    log.outstanding -= 1;
    proc::wakeup(log as *const Log as usize);
    log.lock.unlock();
}
