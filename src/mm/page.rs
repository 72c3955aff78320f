//! Page-frame allocation with ownership-style reference counts.
//!
//! The *physical memory* between the end of the kernel image and the end of
//! DRAM is carved into 4KiB **frames**. Each frame has an associated
//! [`Page`] struct object kept in a table at the bottom of the managed
//! range; free frames are chained through their `Page` objects.
//!
//! Every allocated frame carries a reference count: the number of page-table
//! entries (across all processes) that map it, or 1 for frames the kernel
//! holds internally. [`alloc_page`] hands out a frame with the count at 1;
//! copy-on-write sharing bumps it with [`page_ref_inc`]; [`put_page`] drops
//! a reference and returns the frame to the free list when the count hits 0.
//!
//! ## Allocation API
//!
//! | API | Description |
//! | --- | ----------- |
//! | alloc_page() | Allocate a single frame, refcount 1 |
//! | alloc_zeroed_page() | Same, and zero the memory |
//! | page_ref_inc(pa) | Add a reference to an allocated frame |
//! | page_ref_count(pa) | Current reference count |
//! | put_page(pa) | Drop a reference, free the frame at 0 |
//!
//! ## Calling Convention
//!
//! All functions **must** be called with the frame pool covered by an
//! identity mapping (the kernel table guarantees this).

use static_assertions as sa;
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::base::sync::SpinLockPure;
use crate::constant::{PAGE_ORDER, PAGE_SIZE};
use crate::util::align::{align_up, get_order};


/// Per-frame metadata.
#[repr(C)]
pub struct Page {
    /// Free-list link; only meaningful while the frame is free.
    next: *mut Page,
    /// Number of references keeping the frame alive.
    ref_count: AtomicU32,
}

// The metadata table is sized from this; keep it a power-of-two fraction of
// a frame.
sa::const_assert_eq!(size_of::<Page>(), 16);

struct FrameArea {
    free_list: *mut Page,
    free_pages: usize,
    max_pages: usize,
}

static FRAME_LOCK: SpinLockPure = SpinLockPure::new();
static mut FRAMES: FrameArea = FrameArea {
    free_list: null_mut(),
    free_pages: 0,
    max_pages: 0,
};
/// `Page` object array base address.
static mut PAGE_OBJ_BASE: usize = 0;
/// First frame handed out by the allocator.
static mut ALLOC_START: usize = 0;


/// Initialize the frame allocator over `[heap_base, mem_end)`.
///
/// **Note**: After this call the managed range must not change.
pub fn init(heap_base: usize, mem_end: usize) {
    assert!(heap_base < mem_end, "no memory left for the frame pool");

    unsafe {
        // Split the range into the metadata table and the frame pool:
        // every frame costs `PAGE_SIZE + size_of::<Page>()` bytes.
        let page_start = align_up(heap_base, get_order(size_of::<Page>()));
        let count = (mem_end - page_start) / (PAGE_SIZE + size_of::<Page>());
        let alloc_start = align_up(page_start + count * size_of::<Page>(), PAGE_ORDER);
        let count = (mem_end - alloc_start) / PAGE_SIZE;

        PAGE_OBJ_BASE = page_start;
        ALLOC_START = alloc_start;

        let base = page_start as *mut Page;
        let mut head = null_mut();
        // Chain backwards so the list starts at the lowest frame.
        for i in (0..count).rev() {
            let page = base.add(i);
            (*page).next = head;
            (*page).ref_count = AtomicU32::new(0);
            head = page;
        }

        let frames = &mut *core::ptr::addr_of_mut!(FRAMES);
        frames.free_list = head;
        frames.free_pages = count;
        frames.max_pages = count;
    }

    info!("page: {} frames at {:#x}", free_pages_count(), unsafe { ALLOC_START });
}

/// Allocate a single frame with its reference count at 1.
///
/// **Note**: This function returns the **physical memory address** which is
/// aligned to the *page size* (4KiB), or 0 when the pool is exhausted.
pub fn alloc_page() -> usize {
    let guard = FRAME_LOCK.lock_guard();
    unsafe {
        let frames = &mut *core::ptr::addr_of_mut!(FRAMES);
        let page = frames.free_list;
        if page.is_null() {
            return 0;
        }
        frames.free_list = (*page).next;
        frames.free_pages -= 1;
        drop(guard);

        (*page).next = null_mut();
        (*page).ref_count.store(1, Ordering::Relaxed);
        page_to_address(page)
    }
}

/// Allocate and zero a frame. See [`alloc_page`].
pub fn alloc_zeroed_page() -> usize {
    let ret = alloc_page();
    if ret != 0 {
        let big_ptr = ret as *mut u64;
        unsafe {
            // Force sd (store doubleword) instructions rather than sb;
            // 4096 % 8 == 0 so there is no remainder to handle.
            big_ptr.write_bytes(0, PAGE_SIZE / 8);
        }
    }

    ret
}

/// Add a reference to an allocated frame.
pub fn page_ref_inc(pa: usize) {
    let page = address_to_page(pa);
    unsafe {
        (*page).ref_count.fetch_add(1, Ordering::AcqRel);
    }
}

/// Current reference count of an allocated frame.
pub fn page_ref_count(pa: usize) -> u32 {
    let page = address_to_page(pa);
    unsafe { (*page).ref_count.load(Ordering::Acquire) }
}

/// Drop one reference; the frame returns to the free list when the count
/// reaches 0. Panics if the count is already 0.
pub fn put_page(pa: usize) {
    let page = address_to_page(pa);
    unsafe {
        let old = (*page).ref_count.fetch_sub(1, Ordering::AcqRel);
        if old == 0 {
            panic!("put_page: frame {:#x} ref underflow", pa);
        }
        if old == 1 {
            let guard = FRAME_LOCK.lock_guard();
            let frames = &mut *core::ptr::addr_of_mut!(FRAMES);
            (*page).next = frames.free_list;
            frames.free_list = page;
            frames.free_pages += 1;
            drop(guard);
        }
    }
}

/// Number of free frames; used by the boot log and the invariant tests.
pub fn free_pages_count() -> usize {
    let _guard = FRAME_LOCK.lock_guard();
    unsafe { (*core::ptr::addr_of!(FRAMES)).free_pages }
}


////////////////////// Inner Impl ///////////////////////////

fn page_to_address(page: *const Page) -> usize {
    unsafe {
        let index = page.offset_from(PAGE_OBJ_BASE as *const Page) as usize;
        ALLOC_START + index * PAGE_SIZE
    }
}

fn address_to_page(addr: usize) -> *mut Page {
    debug_assert!(addr.trailing_zeros() >= PAGE_ORDER as u32);
    unsafe {
        let frames = &*core::ptr::addr_of!(FRAMES);
        assert!(addr >= ALLOC_START
            && addr < ALLOC_START + frames.max_pages * PAGE_SIZE,
            "frame {:#x} outside the managed pool", addr);

        let index = (addr - ALLOC_START) / PAGE_SIZE;
        (PAGE_OBJ_BASE as *mut Page).add(index)
    }
}
