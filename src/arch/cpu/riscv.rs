//! CPU registers operations and data definitions of the RISC-V platform.

use core::arch::asm;

//////////////////// Status bit fields ////////////////////

/// Previous privilege mode mask of `mstatus`.
pub const MSTATUS_MPP_MASK: usize = 3 << 11;
/// Previous privilege: Supervisor.
pub const MSTATUS_MPP_S: usize = 1 << 11;

/// Previous privilege mode of `sstatus` (0 = user).
pub const SSTATUS_SPP: usize = 1 << 8;
/// Supervisor previous interrupt enable.
pub const SSTATUS_SPIE: usize = 1 << 5;
/// Supervisor interrupt enable.
pub const SSTATUS_SIE: usize = 1 << 1;

/// Supervisor external interrupt enable.
pub const SIE_SEIE: usize = 1 << 9;
/// Supervisor timer interrupt enable.
pub const SIE_STIE: usize = 1 << 5;
/// Supervisor software interrupt enable.
pub const SIE_SSIE: usize = 1 << 1;

/// `menvcfg` bit enabling the sstc extension (`stimecmp`).
pub const MENVCFG_STCE: usize = 1 << 63;
/// `mcounteren` bit exposing the `time` counter to S-mode.
pub const MCOUNTEREN_TM: usize = 1 << 1;

/// Interrupt flag of the `scause` register.
pub const SCAUSE_INTERRUPT: usize = 1 << 63;

////////////////// Supervisor CSRs R/W ////////////////////

pub fn sstatus_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, sstatus", out(reg) rval);
        rval
    }
}

pub fn sstatus_write(val: usize) {
    unsafe {
        asm!("csrw sstatus, {}", in(reg) val);
    }
}

/// Enable device interrupts on the current hart.
#[inline]
pub fn sstatus_sti() {
    sstatus_write(sstatus_read() | SSTATUS_SIE);
}

/// Disable device interrupts on the current hart.
#[inline]
pub fn sstatus_cli() {
    sstatus_write(sstatus_read() & !SSTATUS_SIE);
}

pub fn sie_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, sie", out(reg) rval);
        rval
    }
}

pub fn sie_write(val: usize) {
    unsafe {
        asm!("csrw sie, {}", in(reg) val);
    }
}

pub fn sscratch_write(val: usize) {
    unsafe {
        asm!("csrw sscratch, {}", in(reg) val);
    }
}

pub fn sepc_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, sepc", out(reg) rval);
        rval
    }
}

pub fn sepc_write(val: usize) {
    unsafe {
        asm!("csrw sepc, {}", in(reg) val);
    }
}

pub fn scause_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, scause", out(reg) rval);
        rval
    }
}

pub fn stval_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, stval", out(reg) rval);
        rval
    }
}

pub fn stvec_write(val: usize) {
    unsafe {
        asm!("csrw stvec, {}", in(reg) val);
    }
}

pub fn satp_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, satp", out(reg) rval);
        rval
    }
}

pub fn satp_write(val: usize) {
    unsafe {
        asm!("csrw satp, {}", in(reg) val);
    }
}

/// Take a hammer to the page tables and synchronize all of them. This
/// essentially flushes the entire TLB.
pub fn satp_fense() {
    unsafe {
        asm!("sfence.vma zero, zero");
    }
}

/// Supervisor timer compare register (sstc extension, CSR `0x14d`). Writing
/// it also clears the pending supervisor timer interrupt.
pub fn stimecmp_write(val: usize) {
    unsafe {
        asm!("csrw 0x14d, {}", in(reg) val);
    }
}

/// Read the `time` counter (requires `mcounteren.TM`).
pub fn time_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, time", out(reg) rval);
        rval
    }
}

//////////////////// Machine CSRs R/W /////////////////////

pub fn mstatus_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, mstatus", out(reg) rval);
        rval
    }
}

pub fn mstatus_write(val: usize) {
    unsafe {
        asm!("csrw mstatus, {}", in(reg) val);
    }
}

pub fn mepc_write(val: usize) {
    unsafe {
        asm!("csrw mepc, {}", in(reg) val);
    }
}

pub fn medeleg_write(val: usize) {
    unsafe {
        asm!("csrw medeleg, {}", in(reg) val);
    }
}

pub fn mideleg_write(val: usize) {
    unsafe {
        asm!("csrw mideleg, {}", in(reg) val);
    }
}

pub fn pmpaddr0_write(val: usize) {
    unsafe {
        asm!("csrw pmpaddr0, {}", in(reg) val);
    }
}

pub fn pmpcfg0_write(val: usize) {
    unsafe {
        asm!("csrw pmpcfg0, {}", in(reg) val);
    }
}

/// Machine environment configuration register (CSR `0x30a`).
pub fn menvcfg_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, 0x30a", out(reg) rval);
        rval
    }
}

pub fn menvcfg_write(val: usize) {
    unsafe {
        asm!("csrw 0x30a, {}", in(reg) val);
    }
}

pub fn mcounteren_read() -> usize {
    unsafe {
        let rval;
        asm!("csrr {}, mcounteren", out(reg) rval);
        rval
    }
}

pub fn mcounteren_write(val: usize) {
    unsafe {
        asm!("csrw mcounteren, {}", in(reg) val);
    }
}

///////////////////// Thread pointer //////////////////////

/// Read `tp`, which the boot path loads with the hart id.
pub fn tp_read() -> usize {
    unsafe {
        let rval;
        asm!("mv {}, tp", out(reg) rval);
        rval
    }
}

pub fn tp_write(val: usize) {
    unsafe {
        asm!("mv tp, {}", in(reg) val);
    }
}

/// Id of the current hart. Only meaningful while interrupts are disabled or
/// the caller is pinned; a timer interrupt may migrate the thread otherwise.
#[inline(always)]
pub fn cpu_id() -> usize {
    tp_read()
}
