//! The file table: reference-counted file objects spanning inodes, pipes
//! and devices.
//!
//! A [`File`] is shared by descriptors and by memory mappings alike; the
//! reference count says how many of either point at the object. One spin
//! lock covers slot allocation and every count manipulation; it is always
//! released before the variant teardown, which may block.

use core::ptr::addr_of_mut;

use crate::base::sync::SpinLockPure;
use crate::constant::{BSIZE, MAXOPBLOCKS, NDEV, NFILE};
use crate::fs::inode::{self, Inode, InodeType, Stat};
use crate::fs::log;
use crate::fs::pipe::{self, Pipe};
use crate::proc;


pub const O_RDONLY: u32 = 0x000;
pub const O_WRONLY: u32 = 0x001;
pub const O_RDWR: u32 = 0x002;
pub const O_CREATE: u32 = 0x200;
pub const O_TRUNC: u32 = 0x400;

/// What a file object is backed by.
pub enum FileType {
    None,
    Pipe { pipe: *mut Pipe },
    Inode { ip: *mut Inode, off: u32 },
    Device { ip: *mut Inode, major: u16 },
}

pub struct File {
    pub typ: FileType,
    pub readable: bool,
    pub writable: bool,
    /// Descriptors plus memory mappings referencing this object; the slot
    /// is free at 0. Guarded by the table lock.
    ref_: u32,
}

impl File {
    const fn empty() -> Self {
        Self {
            typ: FileType::None,
            readable: false,
            writable: false,
            ref_: 0,
        }
    }

    /// The inode behind the file, if any.
    pub fn inode(&self) -> Option<*mut Inode> {
        match self.typ {
            FileType::Inode { ip, .. } | FileType::Device { ip, .. } => Some(ip),
            _ => None,
        }
    }
}

/// Device switch entry: read and write functions of a character device.
pub type DevRw = fn(bool, usize, usize) -> Result<usize, ()>;

struct Ftable {
    lock: SpinLockPure,
    files: [File; NFILE],
}

static mut FTABLE: Ftable = Ftable {
    lock: SpinLockPure::new(),
    files: [const { File::empty() }; NFILE],
};

static mut DEVSW: [Option<(DevRw, DevRw)>; NDEV] = [None; NDEV];

#[inline]
fn ftable() -> &'static mut Ftable {
    unsafe { &mut *addr_of_mut!(FTABLE) }
}

/// Register the read/write entry points of a device major number.
pub fn devsw_register(major: u16, read: DevRw, write: DevRw) {
    assert!((major as usize) < NDEV);
    unsafe {
        (*addr_of_mut!(DEVSW))[major as usize] = Some((read, write));
    }
}

/// Create the `console` device node so it can be opened by name.
pub fn console_node_init() {
    log::begin_op();
    let ip = inode::create(b"console", InodeType::Device, crate::constant::CONSOLE)
        .expect("console node");
    inode::iunlock(ip);
    inode::iput(ip);
    log::end_op();
}

/// Allocate a file structure. Returns `None` if the table is full.
pub fn file_alloc() -> Option<*mut File> {
    let ft = ftable();
    ft.lock.lock();
    for f in ft.files.iter_mut() {
        if f.ref_ == 0 {
            f.ref_ = 1;
            let ret = f as *mut File;
            ft.lock.unlock();
            return Some(ret);
        }
    }
    ft.lock.unlock();
    None
}

/// Increment ref count for file `f`.
pub fn file_dup(f: *mut File) -> *mut File {
    let ft = ftable();
    ft.lock.lock();
    unsafe {
        if (*f).ref_ < 1 {
            panic!("file_dup");
        }
        (*f).ref_ += 1;
    }
    ft.lock.unlock();
    f
}

/// Current reference count of `f`; diagnostics and invariant checks.
pub fn file_ref_count(f: *mut File) -> u32 {
    let ft = ftable();
    ft.lock.lock();
    let r = unsafe { (*f).ref_ };
    ft.lock.unlock();
    r
}

/// Close file `f`: decrement the ref count, tear the object down when it
/// reaches 0.
pub fn file_close(f: *mut File) {
    let ft = ftable();
    ft.lock.lock();

    let (ff, writable) = unsafe {
        if (*f).ref_ < 1 {
            panic!("file_close");
        }
        (*f).ref_ -= 1;
        if (*f).ref_ > 0 {
            ft.lock.unlock();
            return;
        }
        // Snapshot the object and free the slot before the teardown, which
        // must not run under the table lock.
        let writable = (*f).writable;
        (*f).readable = false;
        (*f).writable = false;
        (core::mem::replace(&mut (*f).typ, FileType::None), writable)
    };
    ft.lock.unlock();

    match ff {
        FileType::Pipe { pipe: pi } => {
            pipe::pipe_close(pi, writable);
        }
        FileType::Inode { ip, .. } | FileType::Device { ip, .. } => {
            log::begin_op();
            inode::iput(ip);
            log::end_op();
        }
        FileType::None => {}
    }
}

/// Get metadata about file `f`; `addr` is a user virtual address pointing
/// at a [`Stat`].
pub fn file_stat(f: *mut File, addr: usize) -> Result<(), ()> {
    let file = unsafe { &*f };
    match file.typ {
        FileType::Inode { ip, .. } | FileType::Device { ip, .. } => {
            let mut st = Stat { dev: 0, ino: 0, ty: 0, nlink: 0, size: 0 };
            inode::ilock(ip);
            inode::stati(ip, &mut st);
            inode::iunlock(ip);
            proc::either_copyout(true, addr,
                &st as *const Stat as *const u8, core::mem::size_of::<Stat>())
        }
        _ => Err(()),
    }
}

/// Read from file `f` into `addr` (user virtual address when `user_dst`).
/// Inode reads advance the file offset.
pub fn file_read(f: *mut File, user_dst: bool, addr: usize, n: usize) -> Result<usize, ()> {
    let file = unsafe { &mut *f };
    if !file.readable {
        return Err(());
    }

    match &mut file.typ {
        FileType::Pipe { pipe } => pipe::pipe_read(*pipe, user_dst, addr, n),
        FileType::Device { major, .. } => {
            let devsw = unsafe { &*core::ptr::addr_of!(DEVSW) };
            let (read, _) = devsw.get(*major as usize).copied().flatten().ok_or(())?;
            read(user_dst, addr, n)
        }
        FileType::Inode { ip, off } => {
            inode::ilock(*ip);
            let r = inode::readi(*ip, user_dst, addr, *off, n as u32);
            if let Ok(count) = r {
                *off += count as u32;
            }
            inode::iunlock(*ip);
            r
        }
        FileType::None => panic!("file_read"),
    }
}

/// Chunk size keeping a single inode write inside the transaction budget:
/// i-node, indirect block, allocation blocks, and 2 blocks of slop for
/// non-aligned writes, halved for the data/metadata split.
const WRITE_MAX: usize = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;

/// Write to file `f` from `addr` (user virtual address when `user_src`).
/// Inode writes advance the file offset and are chunked so every
/// transaction respects the block budget.
pub fn file_write(f: *mut File, user_src: bool, addr: usize, n: usize) -> Result<usize, ()> {
    let file = unsafe { &mut *f };
    if !file.writable {
        return Err(());
    }

    match &mut file.typ {
        FileType::Pipe { pipe } => pipe::pipe_write(*pipe, user_src, addr, n),
        FileType::Device { major, .. } => {
            let devsw = unsafe { &*core::ptr::addr_of!(DEVSW) };
            let (_, write) = devsw.get(*major as usize).copied().flatten().ok_or(())?;
            write(user_src, addr, n)
        }
        FileType::Inode { ip, off } => {
            let mut i = 0usize;
            while i < n {
                let n1 = (n - i).min(WRITE_MAX);

                log::begin_op();
                inode::ilock(*ip);
                let r = inode::writei(*ip, user_src, addr + i, *off, n1 as u32);
                if let Ok(count) = r {
                    *off += count as u32;
                }
                inode::iunlock(*ip);
                log::end_op();

                match r {
                    Ok(count) if count == n1 => i += count,
                    _ => break,
                }
            }
            if i == n { Ok(n) } else { Err(()) }
        }
        FileType::None => panic!("file_write"),
    }
}

/// Write at an explicit `offset` without touching the file's own offset;
/// inode files only. Positioned writes and descriptor-relative reads on
/// the same file must not disturb each other.
pub fn file_write_at(
    f: *mut File,
    user_src: bool,
    addr: usize,
    n: usize,
    offset: usize) -> Result<usize, ()> {
    let file = unsafe { &mut *f };
    if !file.writable {
        return Err(());
    }

    match &mut file.typ {
        FileType::Inode { ip, .. } => {
            let mut i = 0usize;
            while i < n {
                let n1 = (n - i).min(WRITE_MAX);

                log::begin_op();
                inode::ilock(*ip);
                let r = inode::writei(*ip, user_src, addr + i, (offset + i) as u32, n1 as u32);
                inode::iunlock(*ip);
                log::end_op();

                match r {
                    Ok(count) if count == n1 => i += count,
                    _ => break,
                }
            }
            if i == n { Ok(n) } else { Err(()) }
        }
        _ => panic!("file_write_at: called with a non-inode file"),
    }
}

/// Open (or with `O_CREATE` create) the named file and allocate a file
/// object for it.
pub fn file_open(path: &[u8], omode: u32) -> Result<*mut File, ()> {
    log::begin_op();

    let ip = if omode & O_CREATE != 0 {
        inode::create(path, InodeType::File, 0)
    } else {
        let ip = inode::namei(path);
        if let Some(ip) = ip {
            inode::ilock(ip);
            if unsafe { (*ip).ty } == InodeType::Dir && omode != O_RDONLY {
                inode::iunlock(ip);
                inode::iput(ip);
                None
            } else {
                Some(ip)
            }
        } else {
            None
        }
    };
    let Some(ip) = ip else {
        log::end_op();
        return Err(());
    };

    let ty = unsafe { (*ip).ty };
    let major = unsafe { (*ip).major };
    if ty == InodeType::Device && major as usize >= NDEV {
        inode::iunlock(ip);
        inode::iput(ip);
        log::end_op();
        return Err(());
    }

    let Some(f) = file_alloc() else {
        inode::iunlock(ip);
        inode::iput(ip);
        log::end_op();
        return Err(());
    };
    unsafe {
        (*f).typ = if ty == InodeType::Device {
            FileType::Device { ip, major }
        } else {
            FileType::Inode { ip, off: 0 }
        };
        (*f).readable = omode & O_WRONLY == 0;
        (*f).writable = omode & O_WRONLY != 0 || omode & O_RDWR != 0;
    }

    if omode & O_TRUNC != 0 && ty == InodeType::File {
        inode::itrunc(ip);
    }

    inode::iunlock(ip);
    log::end_op();

    Ok(f)
}
