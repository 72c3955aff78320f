//! Virtual memory areas: file-backed mappings, demand paging and
//! copy-on-write.
//!
//! Each process carries a fixed table of [`Vma`] records describing its
//! mmap regions. `mmap` only ever writes this table; no page-table entry
//! exists until the first access faults, and `handle_page_fault` decides
//! between materializing a page from the file (lazy miss) and resolving a
//! copy-on-write share established by `vma_copy` at fork time.
//!
//! A (process, page) pair moves through these states:
//!
//! | State | PTE | refcount |
//! | ----- | --- | -------- |
//! | absent | none | - |
//! | private, writable | present, W set | 1 |
//! | COW shared | present, W clear | ≥ 2 |
//! | private, read-only | present, W clear | 1 |
//!
//! Fork demotes `private, writable` to `COW shared` on both sides; a write
//! fault promotes back, copying only while the frame is still shared.

use core::ptr::copy_nonoverlapping;

use crate::arch::cpu;
use crate::constant::{MAXVA, MAX_VMAS, PAGE_ORDER, PAGE_SIZE};
use crate::fs::file::{self, File};
use crate::fs::inode;
use crate::fs::log;
use crate::mm::mmu::EntryBits;
use crate::mm::page;
use crate::proc::Process;
use crate::util::align::align_down;

pub const PROT_NONE: u32 = 0;
pub const PROT_READ: u32 = 1;
pub const PROT_WRITE: u32 = 2;

pub const MAP_SHARED: u32 = 1;
pub const MAP_PRIVATE: u32 = 2;

/// One contiguous file-backed region of a process address space.
#[derive(Copy, Clone)]
pub struct Vma {
    pub used: bool,
    /// Page-aligned first user virtual address.
    pub addr_begin: usize,
    /// Page-aligned byte count; shrinks under munmap trims.
    pub length: usize,
    pub prot: u32,
    pub flags: u32,
    /// Page-aligned file offset the region starts at.
    pub offset: usize,
    /// Owning reference into the file table.
    pub mapped_file: *mut File,
}

impl Vma {
    pub const fn empty() -> Self {
        Self {
            used: false,
            addr_begin: 0,
            length: 0,
            prot: 0,
            flags: 0,
            offset: 0,
            mapped_file: core::ptr::null_mut(),
        }
    }

    /// Check if the region covers `va`.
    #[inline]
    pub fn contains(&self, va: usize) -> bool {
        self.used && self.addr_begin <= va && va < self.addr_begin + self.length
    }
}

/// PTE permission bits a fault materializes for `prot`.
#[inline]
fn prot_to_bits(prot: u32) -> u32 {
    let mut bits = EntryBits::User.val();
    if prot & PROT_READ != 0 {
        bits |= EntryBits::Read.val();
    }
    if prot & PROT_WRITE != 0 {
        bits |= EntryBits::Write.val();
    }
    bits
}

/// Map a file region into the process address space.
///
/// The placement ignores the caller's hint: the new region lands directly
/// below the lowest existing one, starting under the two reserved top pages.
/// Nothing is materialized; the first fault on each page does that.
pub fn mmap(
    p: &mut Process,
    length: usize,
    prot: u32,
    flags: u32,
    f: *mut File,
    offset: usize) -> Result<usize, ()> {
    if length == 0 || length % PAGE_SIZE != 0 {
        return Err(());
    }

    let file = unsafe { &*f };
    // A shared writable mapping writes through to the file, so the file
    // itself must be writable.
    if !file.writable && (flags & MAP_SHARED != 0) && (prot & PROT_WRITE != 0) {
        return Err(());
    }
    // Demand paging reads file bytes through the inode layer.
    if file.inode().is_none() {
        return Err(());
    }

    let Some(idx) = p.vmas.iter().position(|v| !v.used) else {
        return Err(());
    };

    // Place the region directly below the lowest mapped one; the first
    // region starts just under the trap frame page. No gap is inserted:
    // `length` is a nonzero page multiple, so regions stay disjoint.
    let mut lowest = MAXVA - 2 * PAGE_SIZE;
    for (i, v) in p.vmas.iter().enumerate() {
        if i != idx && v.used && v.addr_begin < lowest {
            lowest = v.addr_begin;
        }
    }
    let addr_begin = lowest - length;

    p.vmas[idx] = Vma {
        used: true,
        addr_begin,
        length,
        prot,
        flags,
        offset,
        mapped_file: f,
    };

    // The mapping holds its own reference so closing the descriptor does
    // not tear the file down under the region.
    file::file_dup(f);

    debug!("mmap: pid {} vma {} at {:#x}, {} page(s)",
        p.pid, idx, addr_begin, length / PAGE_SIZE);

    Ok(addr_begin)
}

/// Remove `[addr, addr+length)` from the region that covers it.
///
/// Only trims that leave no hole are allowed: from the low end, from the
/// high end, or the whole region. A SHARED region writes the affected range
/// back to the file first.
pub fn munmap(p: &mut Process, addr: usize, length: usize) -> Result<(), ()> {
    if length == 0 {
        return Ok(());
    }

    let start_pg = align_down(addr, PAGE_ORDER);
    let last_pg = align_down(addr + length - 1, PAGE_ORDER);

    let Some(idx) = p.vmas.iter().position(|v| {
        v.contains(start_pg) && last_pg < v.addr_begin + v.length
    }) else {
        return Err(());
    };

    // Reject anything that would leave a hole in the middle.
    let v = p.vmas[idx];
    if addr != v.addr_begin && addr + length != v.addr_begin + v.length {
        return Err(());
    }

    let table = unsafe { &mut *p.pagetable.unwrap() };

    if v.flags & MAP_SHARED != 0 {
        // Flush the affected range through the inode inside one
        // transaction. Only materialized pages carry bytes to flush, and
        // the write-back never grows the file.
        let f = unsafe { &*v.mapped_file };
        let ip = f.inode().unwrap();

        log::begin_op();
        inode::ilock(ip);
        let size = unsafe { (*ip).size } as usize;
        let mut va = start_pg;
        while va <= last_pg {
            if let Some((pa, _)) = table.walk(va) {
                let file_off = v.offset + (va - v.addr_begin);
                if file_off < size {
                    let n = PAGE_SIZE.min(size - file_off);
                    let _ = inode::writei(ip, false, pa, file_off as u32, n as u32);
                }
            }
            va += PAGE_SIZE;
        }
        inode::iunlock(ip);
        log::end_op();
    }

    // Drop the page-table state. Pages that never faulted in have no PTE
    // and need no work; materialized frames lose one reference.
    let mut va = start_pg;
    while va <= last_pg {
        if let Some(pa) = table.unmap(va) {
            page::put_page(pa);
            debug!("munmap: pid {} vma {} drop {:#x}", p.pid, idx, va);
        } else {
            debug!("munmap: pid {} vma {} lazy {:#x}", p.pid, idx, va);
        }

        let v = &mut p.vmas[idx];
        // Trimming the first page slides the region start (and the file
        // offset with it); trimming from the high end only shrinks.
        if va == v.addr_begin {
            v.addr_begin += PAGE_SIZE;
            v.offset += PAGE_SIZE;
        }
        v.length -= PAGE_SIZE;

        va += PAGE_SIZE;
    }
    cpu::satp_fense();

    let v = &mut p.vmas[idx];
    if v.length == 0 {
        let f = v.mapped_file;
        *v = Vma::empty();
        file::file_close(f);
    }

    Ok(())
}

/// Unmap every used region; the process exit path.
pub fn unmap_all(p: &mut Process) {
    for i in 0..MAX_VMAS {
        if p.vmas[i].used {
            let (addr, len) = (p.vmas[i].addr_begin, p.vmas[i].length);
            munmap(p, addr, len).expect("unmap_all");
        }
    }
}

/// Service a load (`is_store == false`) or store page fault at `stval`.
///
/// `Err` means the fault cannot be satisfied (no region covers the
/// address, the region forbids the access, or memory is exhausted) and the
/// caller must kill the process.
pub fn handle_page_fault(p: &mut Process, stval: usize, is_store: bool) -> Result<(), ()> {
    let fault_va = align_down(stval, PAGE_ORDER);

    let Some(idx) = p.vmas.iter().position(|v| v.contains(fault_va)) else {
        warn!("page fault: pid {} addr {:#x} outside any mapping", p.pid, stval);
        return Err(());
    };
    let v = p.vmas[idx];

    // The permission check is against the region, not the page table: a
    // COW page is mapped read-only precisely when the region says writable.
    if v.prot == PROT_NONE {
        warn!("page fault: pid {} access to PROT_NONE mapping", p.pid);
        return Err(());
    }
    if !is_store && v.prot & PROT_READ == 0 {
        warn!("page fault: pid {} read of non-readable mapping", p.pid);
        return Err(());
    }
    if is_store && v.prot & PROT_WRITE == 0 {
        warn!("page fault: pid {} write to non-writable mapping", p.pid);
        return Err(());
    }

    let bits = prot_to_bits(v.prot);
    let table = unsafe { &mut *p.pagetable.unwrap() };

    match table.walk(fault_va) {
        Some((pa, pte_bits))
            if v.prot & PROT_WRITE != 0 && pte_bits & EntryBits::Write.val() == 0 => {
            // Copy-on-write resolution.
            if page::page_ref_count(pa) == 1 {
                // The last sibling released the frame; write access can be
                // restored in place.
                debug!("fault: pid {} cow {:#x} flip W on {:#x}", p.pid, fault_va, pa);
                table.unmap(fault_va);
                table.map(fault_va, pa, bits, 0);
            } else {
                let new_pa = page::alloc_page();
                if new_pa == 0 {
                    warn!("fault: pid {} out of memory on cow copy", p.pid);
                    return Err(());
                }
                debug!("fault: pid {} cow {:#x} copy {:#x} -> {:#x}",
                    p.pid, fault_va, pa, new_pa);
                unsafe {
                    copy_nonoverlapping(pa as *const u8, new_pa as *mut u8, PAGE_SIZE);
                }
                table.unmap(fault_va);
                page::put_page(pa);
                table.map(fault_va, new_pa, bits, 0);
            }
        }
        Some(_) => {
            // Present with the access already permitted: nothing this
            // handler can fix.
            warn!("page fault: pid {} spurious fault at {:#x}", p.pid, stval);
            return Err(());
        }
        None => {
            // First touch: materialize the page from the file.
            let pa = page::alloc_zeroed_page();
            if pa == 0 {
                warn!("fault: pid {} out of memory on demand page", p.pid);
                return Err(());
            }

            let f = unsafe { &*v.mapped_file };
            let ip = f.inode().unwrap();
            let file_off = v.offset + (fault_va - v.addr_begin);

            inode::ilock(ip);
            // A short (or empty) read leaves the tail zeroed.
            let _ = inode::readi(ip, false, pa, file_off as u32, PAGE_SIZE as u32);
            inode::iunlock(ip);

            table.map(fault_va, pa, bits, 0);
            debug!("fault: pid {} lazy {:#x} -> {:#x}", p.pid, fault_va, pa);
        }
    }

    cpu::satp_fense();
    Ok(())
}

/// Duplicate the parent's regions into the child at fork.
///
/// Region records are copied slot for slot and the mapped files gain a
/// reference. Every materialized parent page is shared into the child with
/// write permission cleared **on both sides**, so whichever process writes
/// first faults into the COW path above. Lazy pages stay lazy in both.
pub fn vma_copy(p: &mut Process, np: &mut Process) {
    let parent = unsafe { &mut *p.pagetable.unwrap() };
    let child = unsafe { &mut *np.pagetable.unwrap() };

    for i in 0..MAX_VMAS {
        if !p.vmas[i].used {
            continue;
        }
        let v = p.vmas[i];
        np.vmas[i] = v;
        file::file_dup(v.mapped_file);

        // Write permission is cleared unconditionally, whatever `prot`
        // says; the region record keeps the real permission.
        let shared_bits = EntryBits::User.val()
            | if v.prot & PROT_READ != 0 { EntryBits::Read.val() } else { 0 };

        let mut va = v.addr_begin;
        while va < v.addr_begin + v.length {
            if let Some((pa, _)) = parent.walk(va) {
                page::page_ref_inc(pa);
                child.map(va, pa, shared_bits, 0);
                // Demote the parent's entry too; the refcount==1 fast path
                // in the fault handler relies on the parent faulting as
                // well.
                parent.unmap(va);
                parent.map(va, pa, shared_bits, 0);
                debug!("vma_copy: pid {} -> {} share {:#x}", p.pid, np.pid, va);
            }
            va += PAGE_SIZE;
        }
    }

    cpu::satp_fense();
}
