//! Platform discovery from the flattened device tree.
//!
//! The firmware deposits a device tree blob in memory and hands its address
//! to the kernel entry. [`dtb_init`] parses it exactly once at boot into the
//! [`Platform`] descriptor; after that the descriptor is immutable for the
//! lifetime of the kernel and every subsystem reads it through
//! [`platform`].

pub(crate) mod fdt;

use static_assertions as sa;
use core::sync::atomic::{AtomicBool, Ordering};
use crate::constant::MAX_CPUS;


/// One `cpu@…` node of the device tree.
#[derive(Copy, Clone)]
pub struct CpuNode {
    /// Hart id, from the node's `reg` property.
    pub reg: u64,
    /// Device-tree internal handle used to cross-reference the node.
    pub phandle: u32,
}

/// Everything the kernel needs to know about the machine it runs on.
///
/// All fields are written by the parser and read-only afterwards.
pub struct Platform {
    /// UART MMIO base and interrupt number.
    pub uart_base: u64,
    pub uart_irq: u32,
    /// virtio-mmio window base and interrupt number.
    pub virtio_base: u64,
    pub virtio_irq: u32,
    /// Interrupt controller MMIO base.
    pub plic_base: u64,
    /// Main memory range.
    pub mem_base: u64,
    pub mem_size: u64,
    /// Frequency the `time` counter ticks at.
    pub timebase_freq: u32,
    cpus: [CpuNode; MAX_CPUS],
    cpu_count: usize,
}

sa::const_assert!(MAX_CPUS <= 64);

impl Platform {
    pub const fn empty() -> Self {
        Self {
            uart_base: 0,
            uart_irq: 0,
            virtio_base: 0,
            virtio_irq: 0,
            plic_base: 0,
            mem_base: 0,
            mem_size: 0,
            timebase_freq: 0,
            cpus: [CpuNode { reg: 0, phandle: 0 }; MAX_CPUS],
            cpu_count: 0,
        }
    }

    /// The discovered CPUs, in device tree order.
    #[inline]
    pub fn cpus(&self) -> &[CpuNode] {
        &self.cpus[..self.cpu_count]
    }

    /// Open a new CPU slot for the parser to fill.
    pub(crate) fn push_cpu(&mut self) -> &mut CpuNode {
        if self.cpu_count >= MAX_CPUS {
            panic!("too many CPUs in device tree");
        }
        let slot = &mut self.cpus[self.cpu_count];
        self.cpu_count += 1;
        slot
    }
}

static mut PLATFORM: Platform = Platform::empty();
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Parse the device tree blob at `dtb_pa` into the global descriptor.
///
/// Runs exactly once, on the boot hart, before any other hart touches the
/// descriptor. Panics on a malformed blob, see [`fdt`].
pub fn dtb_init(dtb_pa: usize) {
    if dtb_pa == 0 {
        panic!("DTB address not set");
    }
    assert!(!INITIALIZED.load(Ordering::Relaxed), "dtb_init called twice");

    unsafe {
        fdt::parse(dtb_pa, &mut *core::ptr::addr_of_mut!(PLATFORM));

        // The rest of the kernel consumes these unconditionally; a tree
        // without them describes a machine we cannot run on.
        let p = &*core::ptr::addr_of!(PLATFORM);
        if p.uart_base == 0 || p.plic_base == 0 || p.mem_size == 0 {
            panic!("device tree is missing uart, plic or memory");
        }
    }
    INITIALIZED.store(true, Ordering::Release);
}

/// The platform descriptor. Only valid after [`dtb_init`].
pub fn platform() -> &'static Platform {
    assert!(INITIALIZED.load(Ordering::Acquire), "platform read before dtb_init");
    unsafe { &*core::ptr::addr_of!(PLATFORM) }
}

/// Print what the device tree told us.
pub fn log_platform() {
    let p = platform();
    info!("platform: uart @{:#x} irq {}", p.uart_base, p.uart_irq);
    info!("platform: virtio @{:#x} irq {}", p.virtio_base, p.virtio_irq);
    info!("platform: plic @{:#x}", p.plic_base);
    info!("platform: memory @{:#x} size {:#x}", p.mem_base, p.mem_size);
    info!("platform: timebase {} Hz, {} cpu(s)", p.timebase_freq, p.cpus().len());
    for (i, cpu) in p.cpus().iter().enumerate() {
        info!("platform: cpu#{} reg {} phandle {}", i, cpu.reg, cpu.phandle);
    }
}
