//! User/kernel crossing: the per-process trap frame, the trap dispatcher
//! and the syscall layer.
//!
//! The trap frame is one page per process, mapped just under the
//! trampoline in the process address space. While the process runs in user
//! mode its virtual address sits in `sscratch`; the trampoline saves the
//! register file into it on entry and reloads it on the way out. The
//! leading fields stage everything `uservec` needs before it can touch
//! kernel memory: the kernel page table, the kernel stack and the handler
//! address. To make the asm offsets easy everything is a usize (8 bytes).

use static_assertions as sa;
pub(crate) mod syscall;
pub(crate) mod trap;


#[repr(C)]
#[derive(Copy, Clone)]
pub struct TrapFrame {
    // 0
    pub kernel_satp: usize,
    // 8
    pub kernel_sp: usize,
    // 16
    pub kernel_trap: usize,
    // 24
    pub epc: usize,
    // 32
    pub kernel_hartid: usize,
    // 40
    pub ra: usize,
    // 48
    pub sp: usize,
    // 56
    pub gp: usize,
    // 64
    pub tp: usize,
    // 72
    pub t0: usize,
    // 80
    pub t1: usize,
    // 88
    pub t2: usize,
    // 96
    pub s0: usize,
    // 104
    pub s1: usize,
    // 112
    pub a0: usize,
    // 120
    pub a1: usize,
    // 128
    pub a2: usize,
    // 136
    pub a3: usize,
    // 144
    pub a4: usize,
    // 152
    pub a5: usize,
    // 160
    pub a6: usize,
    // 168
    pub a7: usize,
    // 176
    pub s2: usize,
    // 184
    pub s3: usize,
    // 192
    pub s4: usize,
    // 200
    pub s5: usize,
    // 208
    pub s6: usize,
    // 216
    pub s7: usize,
    // 224
    pub s8: usize,
    // 232
    pub s9: usize,
    // 240
    pub s10: usize,
    // 248
    pub s11: usize,
    // 256
    pub t3: usize,
    // 264
    pub t4: usize,
    // 272
    pub t5: usize,
    // 280
    pub t6: usize,
}

// The trampoline hard-codes these offsets.
sa::const_assert_eq!(core::mem::size_of::<TrapFrame>(), 288);
