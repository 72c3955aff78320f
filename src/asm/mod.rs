mod boot_asm;
mod trap_asm;
mod trampoline_asm;
mod sched_asm;

/// Symbols provided by the linker script (`kernel.ld`).
pub(crate) mod mem_v {
    extern "C" {
        /// First free byte after the kernel image; the frame allocator
        /// hands out memory from here up to the end of DRAM.
        pub static _heap_start: u8;
        /// End of the kernel text (everything below is mapped R+X).
        pub static _text_end: u8;
        /// Start of the page-aligned trampoline section.
        pub static _trampoline_start: u8;
        /// First user program image, assembled into the kernel.
        pub static _user_init_start: u8;
        pub static _user_init_end: u8;
    }
}

/// Address of the linker symbol `_heap_start`.
#[inline]
pub fn heap_start() -> usize {
    unsafe { &mem_v::_heap_start as *const u8 as usize }
}

/// Address of the linker symbol `_text_end`.
#[inline]
pub fn text_end() -> usize {
    unsafe { &mem_v::_text_end as *const u8 as usize }
}

/// Address of the trampoline page in the kernel image.
#[inline]
pub fn trampoline_start() -> usize {
    unsafe { &mem_v::_trampoline_start as *const u8 as usize }
}

/// The embedded first user program.
#[inline]
pub fn user_init_code() -> &'static [u8] {
    unsafe {
        let start = &mem_v::_user_init_start as *const u8;
        let end = &mem_v::_user_init_end as *const u8;
        core::slice::from_raw_parts(start, end.offset_from(start) as usize)
    }
}
