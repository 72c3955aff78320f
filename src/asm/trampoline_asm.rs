//! User/kernel crossing code.
//!
//! This section occupies exactly one page (the linker script checks) and is
//! mapped at the same virtual address, the highest page, in both the
//! kernel and every user address space, so the `satp` switch below does not
//! pull the rug out from under the executing instructions.
//!
//! `sscratch` holds the user-space virtual address of the trap frame while a
//! process runs in user mode. The field offsets match `sc::TrapFrame`.

use core::arch::global_asm;

global_asm!(r#"
.section .trampsec
.global trampoline
trampoline:
.align 4

.global uservec
uservec:
    # Trap entry from user mode: swap a0 and sscratch so that a0 holds
    # the trap frame address.
    csrrw a0, sscratch, a0

    sd ra, 40(a0)
    sd sp, 48(a0)
    sd gp, 56(a0)
    sd tp, 64(a0)
    sd t0, 72(a0)
    sd t1, 80(a0)
    sd t2, 88(a0)
    sd s0, 96(a0)
    sd s1, 104(a0)
    sd a1, 120(a0)
    sd a2, 128(a0)
    sd a3, 136(a0)
    sd a4, 144(a0)
    sd a5, 152(a0)
    sd a6, 160(a0)
    sd a7, 168(a0)
    sd s2, 176(a0)
    sd s3, 184(a0)
    sd s4, 192(a0)
    sd s5, 200(a0)
    sd s6, 208(a0)
    sd s7, 216(a0)
    sd s8, 224(a0)
    sd s9, 232(a0)
    sd s10, 240(a0)
    sd s11, 248(a0)
    sd t3, 256(a0)
    sd t4, 264(a0)
    sd t5, 272(a0)
    sd t6, 280(a0)

    # Save the user a0 that was parked in sscratch.
    csrr t0, sscratch
    sd t0, 112(a0)

    # Kernel stack, hart id, handler address and kernel page table were
    # staged in the trap frame by usertrap_ret.
    ld sp, 8(a0)
    ld tp, 32(a0)
    ld t0, 16(a0)
    ld t1, 0(a0)

    csrw satp, t1
    sfence.vma zero, zero

    jr t0

.global userret
userret:
    # userret(trapframe_va, satp): return to user mode.
    csrw satp, a1
    sfence.vma zero, zero

    # Park the saved user a0 in sscratch for the final swap.
    ld t0, 112(a0)
    csrw sscratch, t0

    ld ra, 40(a0)
    ld sp, 48(a0)
    ld gp, 56(a0)
    ld tp, 64(a0)
    ld t0, 72(a0)
    ld t1, 80(a0)
    ld t2, 88(a0)
    ld s0, 96(a0)
    ld s1, 104(a0)
    ld a1, 120(a0)
    ld a2, 128(a0)
    ld a3, 136(a0)
    ld a4, 144(a0)
    ld a5, 152(a0)
    ld a6, 160(a0)
    ld a7, 168(a0)
    ld s2, 176(a0)
    ld s3, 184(a0)
    ld s4, 192(a0)
    ld s5, 200(a0)
    ld s6, 208(a0)
    ld s7, 216(a0)
    ld s8, 224(a0)
    ld s9, 232(a0)
    ld s10, 240(a0)
    ld s11, 248(a0)
    ld t3, 256(a0)
    ld t4, 264(a0)
    ld t5, 272(a0)
    ld t6, 280(a0)

    # Restore user a0 and stash the trap frame address back in sscratch.
    csrrw a0, sscratch, a0

    sret
"#);
