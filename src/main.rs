#![no_main]
#![no_std]

#[macro_use]
extern crate log;

mod asm;
#[macro_use]
mod macros;

mod arch;
mod base;
mod constant;
mod driver;
mod fs;
mod logk;
mod mm;
mod proc;
mod sc;
mod util;

use core::arch::asm;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::cpu;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println_k!("{}", info);
    abort();
}

#[no_mangle]
extern "C"
fn abort() -> ! {
    loop {
        unsafe {
            asm!("wfi");
        }
    }
}

/// Physical address of the device tree blob deposited by the firmware.
/// Written once by the boot hart while still in machine mode.
static mut DTB_PA: usize = 0;

/// Set once the boot hart has finished the global kernel setup; the other
/// harts spin on this before touching any shared state.
static STARTED: AtomicBool = AtomicBool::new(false);

#[no_mangle]
/// Do initialization on the machine mode (CPU mode #3), then drop to the
/// supervisor mode via `mret`. Every hart comes through here; the dtb pointer
/// is recorded by the boot hart only.
extern "C"
fn m_init(hart_id: usize, dtb: *const u8) -> ! {
    if hart_id == 0 {
        let uart = driver::uart::Uart::default();
        uart.init_default();
        unsafe {
            DTB_PA = dtb as usize;
        }
    }

    // Set the previous privilege to S so that `mret` lands in `kmain`.
    cpu::mstatus_write(
        (cpu::mstatus_read() & !cpu::MSTATUS_MPP_MASK) | cpu::MSTATUS_MPP_S);
    cpu::mepc_write(kmain as usize);

    // Address translation stays off until the kernel builds its own table.
    cpu::satp_write(0);

    // Hand all exceptions and interrupts down to S-mode.
    cpu::medeleg_write(0xffff);
    cpu::mideleg_write(0xffff);
    cpu::sie_write(cpu::sie_read() | cpu::SIE_SEIE | cpu::SIE_STIE | cpu::SIE_SSIE);

    // Open the whole physical address range to S-mode.
    cpu::pmpaddr0_write(0x3f_ffff_ffff_ffffusize);
    cpu::pmpcfg0_write(0xf);

    // Enable the sstc extension so the supervisor owns its timer, and
    // schedule a first tick. The interval is retuned from the device tree
    // data once it has been parsed.
    cpu::menvcfg_write(cpu::menvcfg_read() | cpu::MENVCFG_STCE);
    cpu::mcounteren_write(cpu::mcounteren_read() | cpu::MCOUNTEREN_TM);
    cpu::stimecmp_write(cpu::time_read() + constant::BOOT_CLOCK_INTERVAL);

    // Each hart keeps its own id in `tp` for `cpu_id()`.
    cpu::tp_write(hart_id);

    unsafe {
        asm!("mret", options(noreturn));
    }
}

#[no_mangle]
/// Supervisor mode entry. The boot hart discovers the platform, brings up
/// every subsystem and runs the in-kernel test suite; the other harts wait
/// for it and then join scheduling.
extern "C"
fn kmain() -> ! {
    if cpu::cpu_id() == 0 {
        println_k!();
        println_k!("minos kernel booting");

        driver::of::dtb_init(unsafe { DTB_PA });
        driver::uart::init();
        logk::init();
        driver::of::log_platform();

        mm::init();
        mm::kvm_init();
        mm::kvm_init_hart();
        proc::init();
        sc::trap::init_hart();
        driver::plic::init();
        driver::plic::init_hart();
        fs::init();
        driver::virtio::init();

        proc::kernel_test::run_all();
        proc::user_init();

        STARTED.store(true, Ordering::Release);
    } else {
        while !STARTED.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        info!("hart {} starting", cpu::cpu_id());
        mm::kvm_init_hart();
        sc::trap::init_hart();
        driver::plic::init_hart();
    }

    proc::scheduler()
}
