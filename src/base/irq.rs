//! CPU interrupt mask handling.
//!
//! Besides the plain enable/disable operations this module keeps a per-hart
//! nesting counter so that spin locks can stack: interrupts are re-enabled
//! only when the outermost lock is released, and only if they were enabled
//! before the first one was taken.

use crate::arch::cpu;
use crate::constant::MAX_CPUS;


/// Enable the IRQ of current CPU core.
#[inline(always)]
pub fn local_irq_enable() {
    cpu::sstatus_sti();
}

/// Disable the IRQ of current CPU core.
#[inline(always)]
pub fn local_irq_disable() {
    cpu::sstatus_cli();
}

/// Check if the current CPU's IRQ is disabled.
#[inline(always)]
pub fn is_irq_disabled() -> bool {
    cpu::is_irq_disabled()
}


#[derive(Copy, Clone)]
struct IrqNest {
    /// Depth of `push_off` nesting.
    noff: i32,
    /// Were interrupts enabled before the outermost `push_off`?
    intena: bool,
}

static mut IRQ_NEST: [IrqNest; MAX_CPUS] = [IrqNest { noff: 0, intena: false }; MAX_CPUS];

/// Disable interrupts and remember the previous state. Safe to nest.
pub fn push_off() {
    let old = !is_irq_disabled();
    local_irq_disable();

    // Interrupts are off now, so the hart cannot migrate under us.
    let nest = unsafe { &mut IRQ_NEST[cpu_slot()] };
    if nest.noff == 0 {
        nest.intena = old;
    }
    nest.noff += 1;
}

/// Undo one `push_off`; re-enable interrupts when the nesting unwinds to the
/// state the first `push_off` found.
pub fn pop_off() {
    assert!(is_irq_disabled(), "pop_off: interruptible");

    let nest = unsafe { &mut IRQ_NEST[cpu_slot()] };
    nest.noff -= 1;
    assert!(nest.noff >= 0, "pop_off: not pushed");

    if nest.noff == 0 && nest.intena {
        local_irq_enable();
    }
}

/// Save the remembered pre-lock interrupt state; the scheduler preserves it
/// across a context switch, where a different thread's `pop_off` will
/// consume it.
pub fn intena_save() -> bool {
    debug_assert!(is_irq_disabled());
    unsafe { IRQ_NEST[cpu_slot()].intena }
}

/// Restore a state saved by [`intena_save`].
pub fn intena_restore(intena: bool) {
    debug_assert!(is_irq_disabled());
    unsafe {
        IRQ_NEST[cpu_slot()].intena = intena;
    }
}

#[inline(always)]
fn cpu_slot() -> usize {
    let id = cpu::cpu_id();
    debug_assert!(id < MAX_CPUS);
    id
}
