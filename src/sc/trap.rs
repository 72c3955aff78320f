//! Handle traps in Supervisor mode.
//!
//! Traps from user mode arrive through the trampoline at [`usertrap`];
//! traps taken while already in the kernel arrive through `kernelvec` at
//! [`kerneltrap`]. Device interrupts and the timer are classified by
//! [`devintr`] on both paths; page faults and syscalls only ever come from
//! user mode.

use crate::arch::cpu;
use crate::asm;
use crate::base::irq;
use crate::base::sync::SpinLockPure;
use crate::constant::{BOOT_CLOCK_INTERVAL, CLOCK_HZ, PAGE_SIZE, TRAMPOLINE, TRAPFRAME};
use crate::driver::{of, plic, uart, virtio};
use crate::mm::{self, vma};
use crate::proc;
use crate::sc::syscall;


/// Supervisor external interrupt (PLIC).
const SCAUSE_S_EXTERNAL: usize = cpu::SCAUSE_INTERRUPT | 9;
/// Supervisor timer interrupt.
const SCAUSE_S_TIMER: usize = cpu::SCAUSE_INTERRUPT | 5;
/// Environment call from U-mode.
const SCAUSE_ECALL_U: usize = 8;
/// Load page fault.
const SCAUSE_LOAD_PAGE_FAULT: usize = 13;
/// Store/AMO page fault.
const SCAUSE_STORE_PAGE_FAULT: usize = 15;

static TICKS_LOCK: SpinLockPure = SpinLockPure::new();
static mut TICKS: usize = 0;

extern "C" {
    fn kernelvec();
    fn uservec();
    fn userret();
}

/// Route this hart's traps to the kernel vector.
pub fn init_hart() {
    cpu::stvec_write(kernelvec as usize);
}

/// Scheduler clock ticks since boot.
pub fn ticks() -> usize {
    let _guard = TICKS_LOCK.lock_guard();
    unsafe { TICKS }
}

#[no_mangle]
/// Handle an interrupt, exception, or system call from user space. Called
/// from the trampoline, on the process kernel stack, with interrupts off.
extern "C"
fn usertrap() {
    if cpu::sstatus_read() & cpu::SSTATUS_SPP != 0 {
        panic!("usertrap: not from user mode");
    }

    // We are in the kernel now, so traps go to kernelvec.
    cpu::stvec_write(kernelvec as usize);

    let p = proc::myproc();
    debug_assert!(!p.is_null());
    let p = unsafe { &mut *p };

    // Save the user program counter.
    p.trapframe().epc = cpu::sepc_read();

    let scause = cpu::scause_read();
    let mut which_dev = 0;

    match scause {
        SCAUSE_ECALL_U => {
            // System call.
            if proc::killed(p) {
                proc::exit(-1);
            }

            // sepc points to the ecall instruction; return to the next one.
            p.trapframe().epc += 4;

            // An interrupt would clobber sepc, scause and sstatus, so
            // enable only now that we are done with those registers.
            irq::local_irq_enable();

            syscall::syscall(p);
        }
        SCAUSE_LOAD_PAGE_FAULT | SCAUSE_STORE_PAGE_FAULT => {
            let stval = cpu::stval_read();
            let is_store = scause == SCAUSE_STORE_PAGE_FAULT;
            if vma::handle_page_fault(p, stval, is_store).is_err() {
                proc::setkilled(p);
            }
        }
        _ => {
            which_dev = devintr();
            if which_dev == 0 {
                warn!("usertrap: unexpected scause {:#x} pid={} sepc={:#x} stval={:#x}",
                    scause, p.pid, cpu::sepc_read(), cpu::stval_read());
                proc::setkilled(p);
            }
        }
    }

    if proc::killed(p) {
        proc::exit(-1);
    }

    // Give up the CPU if this was a timer interrupt.
    if which_dev == 2 {
        proc::yield_cpu();
    }

    usertrap_ret();
}

/// Return to user space through the trampoline. Also the first-ever entry
/// to user mode of a fresh process, via `forkret`.
pub fn usertrap_ret() -> ! {
    let p = unsafe { &mut *proc::myproc() };

    // We are about to switch the trap destination back to uservec; no
    // interrupts until we are in user space again.
    irq::local_irq_disable();

    let tramp_base = asm::trampoline_start();
    cpu::stvec_write(TRAMPOLINE + (uservec as usize - tramp_base));

    // Stage what uservec needs for the next trap into the kernel.
    let kstack = p.kstack;
    let tf = p.trapframe();
    tf.kernel_satp = cpu::satp_read();
    tf.kernel_sp = kstack + PAGE_SIZE;
    tf.kernel_trap = usertrap as usize;
    tf.kernel_hartid = cpu::tp_read();

    // Set up the sret state: user mode, interrupts on, resume at the saved
    // user pc.
    let mut sstatus = cpu::sstatus_read();
    sstatus &= !cpu::SSTATUS_SPP;
    sstatus |= cpu::SSTATUS_SPIE;
    cpu::sstatus_write(sstatus);
    cpu::sepc_write(tf.epc);

    let table = unsafe { &*p.pagetable.unwrap() };
    let satp = mm::build_satp(table.get_mode(), 0, table.get_addr() as u64);

    let tramp_userret = TRAMPOLINE + (userret as usize - tramp_base);
    let userret_fn: extern "C" fn(usize, usize) -> ! =
        unsafe { core::mem::transmute(tramp_userret) };
    userret_fn(TRAPFRAME, satp)
}

#[no_mangle]
/// Interrupts and exceptions from kernel code come here via kernelvec, on
/// whatever the current kernel stack is.
extern "C"
fn kerneltrap() {
    let sepc = cpu::sepc_read();
    let sstatus = cpu::sstatus_read();
    let scause = cpu::scause_read();

    if sstatus & cpu::SSTATUS_SPP == 0 {
        panic!("kerneltrap: not from supervisor mode");
    }
    if !irq::is_irq_disabled() {
        panic!("kerneltrap: interrupts enabled");
    }

    let which_dev = devintr();
    if which_dev == 0 {
        // A fault in kernel mode is a kernel bug; there is nothing to kill.
        panic!("kerneltrap: scause {:#x} sepc {:#x} stval {:#x}",
            scause, sepc, cpu::stval_read());
    }

    // Give up the CPU if this was a timer interrupt and a process is
    // running on this hart.
    if which_dev == 2 && !proc::myproc().is_null() {
        proc::yield_cpu();
    }

    // The yield may have caused traps on another process; restore the
    // registers kernelvec's sret depends on.
    cpu::sepc_write(sepc);
    cpu::sstatus_write(sstatus);
}

/// Advance the tick counter (boot hart only) and program the next timer
/// interrupt.
fn clockintr() {
    if cpu::cpu_id() == 0 {
        TICKS_LOCK.lock();
        unsafe {
            TICKS += 1;
        }
        proc::wakeup(unsafe { core::ptr::addr_of!(TICKS) } as usize);
        TICKS_LOCK.unlock();
    }

    // Writing stimecmp also clears the pending interrupt.
    let timebase = of::platform().timebase_freq as usize;
    let interval = if timebase > 0 { timebase / CLOCK_HZ } else { BOOT_CLOCK_INTERVAL };
    cpu::stimecmp_write(cpu::time_read() + interval);
}

/// Classify a trap cause: 2 for the timer, 1 for a device interrupt
/// dispatched through the PLIC, 0 for anything else.
fn devintr() -> i32 {
    match cpu::scause_read() {
        SCAUSE_S_EXTERNAL => {
            // Ask the PLIC which device is interrupting; the irq numbers
            // come from the device tree.
            let irq_no = plic::claim();
            let p = of::platform();

            if irq_no != 0 {
                if irq_no == p.uart_irq {
                    uart::intr();
                } else if irq_no == p.virtio_irq {
                    virtio::disk_intr();
                } else {
                    warn!("unexpected interrupt irq={}", irq_no);
                }

                // The PLIC allows each device to raise at most one
                // interrupt at a time; mark it serviced.
                plic::complete(irq_no);
            }
            1
        }
        SCAUSE_S_TIMER => {
            clockintr();
            2
        }
        _ => 0,
    }
}
