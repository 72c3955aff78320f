//! Kernel-wide configuration constants and the fixed points of the address
//! space layout.

/// Order of page-size.
pub const PAGE_ORDER: usize = 12;
/// Page size.
pub const PAGE_SIZE: usize = 1 << PAGE_ORDER;

/// Maximum number of harts the kernel supports.
pub const MAX_CPUS: usize = 8;
/// Maximum number of processes.
pub const NPROC: usize = 16;
/// Open files per process.
pub const NOFILE: usize = 16;
/// Open files per system.
pub const NFILE: usize = 100;
/// Maximum number of in-memory inodes.
pub const NINODE: usize = 50;
/// Maximum major device number.
pub const NDEV: usize = 10;
/// Virtual memory areas per process.
pub const MAX_VMAS: usize = 16;

/// Maximum data blocks a single transaction may touch.
pub const MAXOPBLOCKS: usize = 10;
/// Total block budget of the transaction layer.
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;
/// File system block size. Blocks are drawn from the frame allocator, so a
/// block is exactly one page.
pub const BSIZE: usize = PAGE_SIZE;
/// Direct blocks per inode; bounds a file at `NDIRECT * BSIZE` bytes.
pub const NDIRECT: usize = 32;
/// Maximum length of a file name.
pub const DIRSIZ: usize = 14;
/// Inode number of the root directory.
pub const ROOTINO: u32 = 1;

/// Console device major number.
pub const CONSOLE: u16 = 1;

/// One beyond the highest usable virtual address. Sv39 leaves 39 bits of
/// virtual address; the kernel stays out of the top half to avoid dealing
/// with sign-extended addresses, hence one bit less.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + PAGE_ORDER - 1);

/// The trampoline page is remapped at the highest page in every address
/// space, kernel and user alike.
pub const TRAMPOLINE: usize = MAXVA - PAGE_SIZE;
/// Per-process trap frame page, just under the trampoline.
pub const TRAPFRAME: usize = TRAMPOLINE - PAGE_SIZE;

/// Start of DRAM on the QEMU virt machine; the kernel is linked there.
pub const KERNBASE: usize = 0x8000_0000;

/// Timer interval used before the device tree supplies the timebase
/// frequency (about a tenth of a second at the virt machine's 10 MHz).
pub const BOOT_CLOCK_INTERVAL: usize = 1_000_000;
/// Scheduler ticks per second once the timebase is known.
pub const CLOCK_HZ: usize = 10;
