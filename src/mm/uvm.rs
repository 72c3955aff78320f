//! Per-process address spaces.
//!
//! A user image is laid out from virtual address 0 up to the sbrk
//! high-water mark `sz`, with mmap regions growing down from just under the
//! two reserved top pages. The trampoline and the process trap frame occupy
//! the two highest pages of every address space and never overlap a
//! mapping.

use core::ptr::copy_nonoverlapping;

use crate::asm;
use crate::constant::{TRAMPOLINE, TRAPFRAME};
use crate::mm::mmu::{self, EntryBits, Table};
use crate::mm::{page, PAGE_SIZE};


/// Create an address space holding only the trampoline and the given trap
/// frame page. Returns `None` when memory is exhausted.
pub fn create(trapframe_pa: usize) -> Option<*mut dyn Table> {
    let root_pa = page::alloc_zeroed_page();
    if root_pa == 0 {
        return None;
    }
    let root = unsafe { mmu::build_table_from_addr(root_pa) };
    let table = unsafe { &mut *root };

    // Neither page carries the U bit: they are touched only in S-mode (the
    // trampoline runs with the user table installed but at S privilege).
    table.map(TRAMPOLINE, asm::trampoline_start(), EntryBits::ReadExecute.val(), 0);
    table.map(TRAPFRAME, trapframe_pa, EntryBits::ReadWrite.val(), 0);

    Some(root)
}

/// Unmap `npages` pages starting at `va`; with `put`, drop the frame
/// references as well. Panics if a page in the range was never mapped;
/// callers track materialization themselves.
pub fn unmap_range(table: &mut dyn Table, va: usize, npages: usize, put: bool) {
    debug_assert!(va % PAGE_SIZE == 0);

    for i in 0..npages {
        match table.unmap(va + i * PAGE_SIZE) {
            Some(pa) => {
                if put {
                    page::put_page(pa);
                }
            }
            None => panic!("unmap_range: {:#x} not mapped", va + i * PAGE_SIZE),
        }
    }
}

/// Eagerly duplicate the `[0, sz)` image of `old` into `new` for fork.
/// mmap regions above `sz` are deliberately not copied here; `vma_copy`
/// shares those frames copy-on-write.
pub fn copy(old: &dyn Table, new: &mut dyn Table, sz: usize) -> Result<(), ()> {
    let mut va = 0usize;
    while va < sz {
        let (pa, bits) = old.walk(va).expect("uvm copy: page not present");

        let mem = page::alloc_page();
        if mem == 0 {
            // Undo the part already copied.
            unmap_range(new, 0, va / PAGE_SIZE, true);
            return Err(());
        }
        unsafe {
            copy_nonoverlapping(pa as *const u8, mem as *mut u8, PAGE_SIZE);
        }
        new.map(va, mem, bits, 0);

        va += PAGE_SIZE;
    }

    Ok(())
}

/// Tear down an address space: drop the reserved top pages (the trampoline
/// is kernel text and the trap frame is owned by the process struct, so
/// neither loses a frame reference here), release the `[0, sz)` image and
/// free the table pages. Every mmap region must already be unmapped.
pub fn free(table: &mut dyn Table, sz: usize) {
    let _ = table.unmap(TRAMPOLINE);
    let _ = table.unmap(TRAPFRAME);
    if sz > 0 {
        unmap_range(table, 0, sz.div_ceil(PAGE_SIZE), true);
    }
    unsafe {
        table.destroy();
    }
}

/// Copy `len` bytes from kernel `src` to `dst_va` in the given address
/// space. Fails if any destination page is missing or not user-writable.
pub fn copyout(table: &dyn Table, dst_va: usize, src: *const u8, len: usize) -> Result<(), ()> {
    let mut copied = 0usize;
    while copied < len {
        let va = dst_va + copied;
        let va0 = va & !(PAGE_SIZE - 1);
        let (pa, bits) = table.walk(va0).ok_or(())?;
        if bits & EntryBits::User.val() == 0 || bits & EntryBits::Write.val() == 0 {
            return Err(());
        }

        let n = (PAGE_SIZE - (va - va0)).min(len - copied);
        unsafe {
            copy_nonoverlapping(src.add(copied), (pa + (va - va0)) as *mut u8, n);
        }
        copied += n;
    }
    Ok(())
}

/// Copy `len` bytes from `src_va` in the given address space to kernel
/// `dst`.
pub fn copyin(table: &dyn Table, dst: *mut u8, src_va: usize, len: usize) -> Result<(), ()> {
    let mut copied = 0usize;
    while copied < len {
        let va = src_va + copied;
        let va0 = va & !(PAGE_SIZE - 1);
        let (pa, bits) = table.walk(va0).ok_or(())?;
        if bits & EntryBits::User.val() == 0 {
            return Err(());
        }

        let n = (PAGE_SIZE - (va - va0)).min(len - copied);
        unsafe {
            copy_nonoverlapping((pa + (va - va0)) as *const u8, dst.add(copied), n);
        }
        copied += n;
    }
    Ok(())
}

/// Copy a NUL-terminated string out of the address space, at most
/// `dst.len()` bytes including the terminator. Returns the string length.
pub fn copyin_str(table: &dyn Table, dst: &mut [u8], src_va: usize) -> Result<usize, ()> {
    for i in 0..dst.len() {
        let mut byte = 0u8;
        copyin(table, &mut byte as *mut u8, src_va + i, 1)?;
        dst[i] = byte;
        if byte == 0 {
            return Ok(i);
        }
    }
    Err(())
}
