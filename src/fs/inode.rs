//! RAM-backed inodes.
//!
//! Inodes are the kernel's view of file contents. This kernel carries no
//! disk file system: an inode's data lives in block frames drawn from the
//! frame allocator (one page per block), up to [`NDIRECT`] blocks per file.
//! The root directory is a flat table of [`Dirent`] entries in inode 1.
//!
//! Locking follows the usual two-level scheme: the table spin lock guards
//! slot allocation and the in-memory reference counts; each inode's sleep
//! lock guards its type, size and block list across I/O. Callers must not
//! hold a spin lock while taking an inode lock.

use core::ptr::addr_of_mut;

use crate::base::sync::{SleepLock, SpinLockPure};
use crate::constant::{BSIZE, DIRSIZ, NDIRECT, NINODE, ROOTINO};
use crate::mm::page;
use crate::proc;


#[repr(i16)]
#[derive(Copy, Clone)]
#[derive(Eq, PartialEq)]
pub enum InodeType {
    Free = 0,
    Dir = 1,
    File = 2,
    Device = 3,
}

/// In-memory inode. `ref_` is guarded by the table lock; everything below
/// `ty` by the sleep lock.
pub struct Inode {
    pub lock: SleepLock,
    inum: u32,
    ref_: i32,
    pub ty: InodeType,
    pub major: u16,
    pub nlink: i16,
    pub size: u32,
    blocks: [usize; NDIRECT],
}

impl Inode {
    const fn empty() -> Self {
        Self {
            lock: SleepLock::new(),
            inum: 0,
            ref_: 0,
            ty: InodeType::Free,
            major: 0,
            nlink: 0,
            size: 0,
            blocks: [0; NDIRECT],
        }
    }
}

/// File metadata as reported to user space.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Stat {
    pub dev: i32,
    pub ino: u32,
    pub ty: i16,
    pub nlink: i16,
    pub size: u64,
}

/// One root directory entry.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Dirent {
    pub inum: u16,
    pub name: [u8; DIRSIZ],
}

struct Itable {
    lock: SpinLockPure,
    inodes: [Inode; NINODE],
}

static mut ITABLE: Itable = Itable {
    lock: SpinLockPure::new(),
    inodes: [const { Inode::empty() }; NINODE],
};

#[inline]
fn itable() -> &'static mut Itable {
    unsafe { &mut *addr_of_mut!(ITABLE) }
}

/// Number the slots and create the root directory.
pub fn init() {
    let it = itable();
    it.lock.lock();
    for (i, ip) in it.inodes.iter_mut().enumerate() {
        ip.inum = i as u32 + 1;
    }
    let root = &mut it.inodes[(ROOTINO - 1) as usize];
    root.ty = InodeType::Dir;
    root.nlink = 1;
    // The root is never released.
    root.ref_ = 1;
    it.lock.unlock();
}

/// The root directory inode (no reference taken).
pub fn root() -> *mut Inode {
    unsafe { addr_of_mut!(ITABLE.inodes[(ROOTINO - 1) as usize]) }
}

/// Allocate a fresh inode of the given type, referenced once.
pub fn ialloc(ty: InodeType, major: u16) -> Option<*mut Inode> {
    let it = itable();
    it.lock.lock();
    for ip in it.inodes.iter_mut() {
        if ip.ty == InodeType::Free && ip.ref_ == 0 {
            ip.ty = ty;
            ip.major = major;
            ip.nlink = 1;
            ip.size = 0;
            ip.ref_ = 1;
            let ret = ip as *mut Inode;
            it.lock.unlock();
            return Some(ret);
        }
    }
    it.lock.unlock();
    warn!("ialloc: no free inodes");
    None
}

/// Take a reference on the inode with the given number.
fn iget(inum: u32) -> *mut Inode {
    assert!(inum >= 1 && inum <= NINODE as u32, "iget: bad inum {}", inum);
    let it = itable();
    it.lock.lock();
    let ip = &mut it.inodes[(inum - 1) as usize];
    ip.ref_ += 1;
    let ret = ip as *mut Inode;
    it.lock.unlock();
    ret
}

/// Add a reference to `ip`.
pub fn idup(ip: *mut Inode) -> *mut Inode {
    let it = itable();
    it.lock.lock();
    unsafe {
        (*ip).ref_ += 1;
    }
    it.lock.unlock();
    ip
}

/// Drop a reference to `ip`. The data stays: the directory entry keeps the
/// file reachable (this file system has no unlink).
pub fn iput(ip: *mut Inode) {
    let it = itable();
    it.lock.lock();
    unsafe {
        if (*ip).ref_ < 1 {
            panic!("iput: inode {} ref underflow", (*ip).inum);
        }
        (*ip).ref_ -= 1;
    }
    it.lock.unlock();
}

/// Lock the inode for I/O.
pub fn ilock(ip: *mut Inode) {
    unsafe {
        debug_assert!((*ip).ref_ >= 1);
        (*ip).lock.acquire();
    }
}

pub fn iunlock(ip: *mut Inode) {
    unsafe {
        (*ip).lock.release();
    }
}

/// Discard the inode's contents. Caller holds the inode lock.
pub fn itrunc(ip: *mut Inode) {
    let ip = unsafe { &mut *ip };
    for b in ip.blocks.iter_mut() {
        if *b != 0 {
            page::put_page(*b);
            *b = 0;
        }
    }
    ip.size = 0;
}

/// Block address of block `bn`, allocating it when `grow` is set. 0 means
/// a hole (read) or exhaustion (write).
fn bmap(ip: &mut Inode, bn: usize, grow: bool) -> usize {
    if bn >= NDIRECT {
        return 0;
    }
    if ip.blocks[bn] == 0 && grow {
        ip.blocks[bn] = page::alloc_zeroed_page();
    }
    ip.blocks[bn]
}

/// Read up to `n` bytes at `off` into `dst` (a user virtual address when
/// `user_dst`, a kernel address otherwise). Returns the count actually
/// read; short at end of file. Caller holds the inode lock.
pub fn readi(ip: *mut Inode, user_dst: bool, dst: usize, off: u32, n: u32) -> Result<usize, ()> {
    let ip = unsafe { &mut *ip };

    let off = off as usize;
    let mut n = n as usize;
    if off > ip.size as usize {
        return Ok(0);
    }
    if off + n > ip.size as usize {
        n = ip.size as usize - off;
    }

    let mut tot = 0usize;
    while tot < n {
        let pos = off + tot;
        let m = n - tot;
        let m = m.min(BSIZE - pos % BSIZE);
        let block = bmap(ip, pos / BSIZE, false);
        if block == 0 {
            // Hole: the bytes read as zero.
            let zero = 0u8;
            for i in 0..m {
                proc::either_copyout(user_dst, dst + tot + i, &zero as *const u8, 1)?;
            }
        } else {
            proc::either_copyout(
                user_dst, dst + tot, (block + pos % BSIZE) as *const u8, m)?;
        }
        tot += m;
    }

    Ok(tot)
}

/// Write `n` bytes at `off` from `src`, growing the file as needed (up to
/// `NDIRECT * BSIZE` bytes). Returns the count written; short when block
/// frames run out. Caller holds the inode lock.
pub fn writei(ip: *mut Inode, user_src: bool, src: usize, off: u32, n: u32) -> Result<usize, ()> {
    let ip = unsafe { &mut *ip };

    let off = off as usize;
    let n = n as usize;
    if off > ip.size as usize || off + n > NDIRECT * BSIZE {
        return Err(());
    }

    let mut tot = 0usize;
    while tot < n {
        let pos = off + tot;
        let m = (n - tot).min(BSIZE - pos % BSIZE);
        let block = bmap(ip, pos / BSIZE, true);
        if block == 0 {
            break;
        }
        proc::either_copyin((block + pos % BSIZE) as *mut u8, user_src, src + tot, m)?;
        tot += m;
    }

    if off + tot > ip.size as usize {
        ip.size = (off + tot) as u32;
    }

    if tot == n { Ok(tot) } else { Err(()) }
}

/// Fill `st` from the inode. Caller holds the inode lock.
pub fn stati(ip: *mut Inode, st: &mut Stat) {
    let ip = unsafe { &*ip };
    st.dev = 0;
    st.ino = ip.inum;
    st.ty = ip.ty as i16;
    st.nlink = ip.nlink;
    st.size = ip.size as u64;
}


//////////////////// Root directory ///////////////////////

fn name_matches(entry: &Dirent, name: &[u8]) -> bool {
    if name.len() > DIRSIZ {
        return false;
    }
    // Stored names are zero-padded to DIRSIZ.
    entry.name.iter()
        .zip(name.iter().chain(core::iter::repeat(&0u8)))
        .all(|(a, b)| a == b)
}

/// Look `name` up in the directory `dp` (locked by the caller); the result
/// carries a new reference.
pub fn dir_lookup(dp: *mut Inode, name: &[u8]) -> Option<*mut Inode> {
    let size = unsafe { (*dp).size } as usize;
    debug_assert!(unsafe { (*dp).ty } == InodeType::Dir);

    let mut off = 0usize;
    let mut entry = Dirent { inum: 0, name: [0; DIRSIZ] };
    while off < size {
        readi(dp, false, &mut entry as *mut Dirent as usize,
            off as u32, core::mem::size_of::<Dirent>() as u32).ok()?;
        if entry.inum != 0 && name_matches(&entry, name) {
            return Some(iget(entry.inum as u32));
        }
        off += core::mem::size_of::<Dirent>();
    }
    None
}

/// Append a directory entry to `dp` (locked by the caller).
pub fn dir_link(dp: *mut Inode, name: &[u8], inum: u32) -> Result<(), ()> {
    if name.is_empty() || name.len() > DIRSIZ {
        return Err(());
    }

    let mut entry = Dirent { inum: inum as u16, name: [0; DIRSIZ] };
    entry.name[..name.len()].copy_from_slice(name);

    let off = unsafe { (*dp).size };
    writei(dp, false, &entry as *const Dirent as usize,
        off, core::mem::size_of::<Dirent>() as u32)?;
    Ok(())
}

/// Resolve a path. Paths are flat: everything lives in the root directory,
/// a leading '/' is ignored.
pub fn namei(path: &[u8]) -> Option<*mut Inode> {
    let name = if path.first() == Some(&b'/') { &path[1..] } else { path };
    if name.is_empty() {
        return Some(idup(root()));
    }

    let dp = root();
    ilock(dp);
    let found = dir_lookup(dp, name);
    iunlock(dp);
    found
}

/// Look the path up, creating the file when missing. The returned inode is
/// locked and referenced. Must be called inside a transaction.
pub fn create(path: &[u8], ty: InodeType, major: u16) -> Option<*mut Inode> {
    let name = if path.first() == Some(&b'/') { &path[1..] } else { path };
    if name.is_empty() {
        return None;
    }

    let dp = root();
    ilock(dp);

    if let Some(ip) = dir_lookup(dp, name) {
        iunlock(dp);
        ilock(ip);
        if unsafe { (*ip).ty } == ty || ty == InodeType::File {
            return Some(ip);
        }
        iunlock(ip);
        iput(ip);
        return None;
    }

    let Some(ip) = ialloc(ty, major) else {
        iunlock(dp);
        return None;
    };
    if dir_link(dp, name, unsafe { (*ip).inum }).is_err() {
        iunlock(dp);
        iput(ip);
        return None;
    }
    iunlock(dp);

    ilock(ip);
    Some(ip)
}
