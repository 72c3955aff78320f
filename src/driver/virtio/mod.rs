//! virtio-mmio device discovery and interrupt acknowledge.
//!
//! The block data path of this kernel is RAM-backed, so only the discovery
//! and interrupt surface of the transport is driven here: probe the device
//! the tree points at, and acknowledge anything it raises.

use crate::driver::of;

const MAGIC_VALUE: usize = 0x000;
const VERSION: usize = 0x004;
const DEVICE_ID: usize = 0x008;
const VENDOR_ID: usize = 0x00c;
const INTERRUPT_STATUS: usize = 0x060;
const INTERRUPT_ACK: usize = 0x064;

/// "virt" in little-endian.
const VIRTIO_MAGIC: u32 = 0x7472_6976;


#[inline]
fn reg(offset: usize) -> *mut u32 {
    (of::platform().virtio_base as usize + offset) as *mut u32
}

/// Probe the virtio-mmio window the device tree advertised.
pub fn init() {
    if of::platform().virtio_base == 0 {
        warn!("virtio: no window in the device tree");
        return;
    }
    unsafe {
        let magic = reg(MAGIC_VALUE).read_volatile();
        if magic != VIRTIO_MAGIC {
            warn!("virtio: no device at {:#x} (magic {:#x})",
                of::platform().virtio_base, magic);
            return;
        }
        info!("virtio: version {} device {} vendor {:#x} at {:#x}",
            reg(VERSION).read_volatile(),
            reg(DEVICE_ID).read_volatile(),
            reg(VENDOR_ID).read_volatile(),
            of::platform().virtio_base);
    }
}

/// Device interrupt: acknowledge whatever is pending.
pub fn disk_intr() {
    unsafe {
        let status = reg(INTERRUPT_STATUS).read_volatile();
        reg(INTERRUPT_ACK).write_volatile(status & 0x3);
    }
    debug!("virtio: interrupt acknowledged");
}
