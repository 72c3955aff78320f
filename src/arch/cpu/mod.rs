mod riscv;

pub use riscv::*;


/// If the IRQ is disabled, return `true`, otherwise return `false`.
#[inline(always)]
pub fn is_irq_disabled() -> bool {
    (sstatus_read() & SSTATUS_SIE) == 0
}
