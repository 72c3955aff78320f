//! Process lifetime and scheduling.
//!
//! A fixed table of processes, scheduled round-robin with one scheduler
//! loop per hart. The single table lock protects process states, the sleep
//! channels and pid assignment; context switches happen through `swtch`
//! while holding it, exactly one level deep.

pub(crate) mod kernel_test;

use static_assertions as sa;
use core::ptr::{addr_of_mut, null_mut};

use crate::arch::cpu;
use crate::base::irq;
use crate::base::sync::SpinLockPure;
use crate::constant::{MAX_CPUS, MAX_VMAS, NOFILE, NPROC, PAGE_SIZE};
use crate::fs::file::{self, File};
use crate::mm::mmu::{EntryBits, Table};
use crate::mm::vma::{self, Vma};
use crate::mm::{page, uvm};
use crate::sc::trap;
use crate::sc::TrapFrame;


/// Saved registers of a kernel context switch; the layout is known to
/// `swtch` in `asm/sched_asm.rs`.
#[repr(C)]
pub struct Context {
    // 0
    pub ra: usize,
    // 8
    pub sp: usize,
    // 16 .. 104
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

sa::const_assert_eq!(core::mem::size_of::<Context>(), 14 * 8);

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            ra: 0, sp: 0,
            s0: 0, s1: 0, s2: 0, s3: 0, s4: 0, s5: 0,
            s6: 0, s7: 0, s8: 0, s9: 0, s10: 0, s11: 0,
        }
    }
}

#[derive(Copy, Clone)]
#[derive(Eq, PartialEq)]
pub enum ProcState {
    Unused,
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// Per-process state.
pub struct Process {
    // Guarded by the table lock:
    pub state: ProcState,
    /// Channel the process sleeps on, 0 when awake.
    pub chan: usize,
    pub killed: bool,
    pub xstate: i32,
    pub pid: i32,
    pub parent: *mut Process,

    // Private to the process:
    /// Bottom of the kernel stack page.
    pub kstack: usize,
    /// sbrk high-water mark; fork copies `[0, sz)` eagerly.
    pub sz: usize,
    pub pagetable: Option<*mut dyn Table>,
    pub trapframe: *mut TrapFrame,
    pub context: Context,
    pub ofile: [*mut File; NOFILE],
    pub vmas: [Vma; MAX_VMAS],
    pub name: [u8; 16],
}

impl Process {
    const fn empty() -> Self {
        Self {
            state: ProcState::Unused,
            chan: 0,
            killed: false,
            xstate: 0,
            pid: 0,
            parent: null_mut(),
            kstack: 0,
            sz: 0,
            pagetable: None,
            trapframe: null_mut(),
            context: Context::zeroed(),
            ofile: [null_mut(); NOFILE],
            vmas: [Vma::empty(); MAX_VMAS],
            name: [0; 16],
        }
    }

    #[inline]
    pub fn trapframe(&mut self) -> &mut TrapFrame {
        unsafe { &mut *self.trapframe }
    }

    pub fn set_name(&mut self, name: &[u8]) {
        let n = name.len().min(self.name.len() - 1);
        self.name[..n].copy_from_slice(&name[..n]);
        self.name[n] = 0;
    }

    /// Allocate the lowest free descriptor slot for `f`.
    pub fn fd_alloc(&mut self, f: *mut File) -> Option<usize> {
        for (fd, slot) in self.ofile.iter_mut().enumerate() {
            if slot.is_null() {
                *slot = f;
                return Some(fd);
            }
        }
        None
    }
}

struct Cpu {
    /// Process running on this hart, or null while in the scheduler.
    proc: *mut Process,
    /// Scheduler context to switch back into.
    context: Context,
}

static mut CPUS: [Cpu; MAX_CPUS] =
    [const { Cpu { proc: null_mut(), context: Context::zeroed() } }; MAX_CPUS];

static PTABLE_LOCK: SpinLockPure = SpinLockPure::new();
static mut PROCS: [Process; NPROC] = [const { Process::empty() }; NPROC];
static mut NEXT_PID: i32 = 1;

extern "C" {
    fn swtch(old: *mut Context, new: *const Context);
}

pub fn init() {
    info!("proc: {} slots", NPROC);
}

#[inline]
fn procs() -> &'static mut [Process; NPROC] {
    unsafe { &mut *addr_of_mut!(PROCS) }
}

/// This hart's scheduler state. Interrupts must be disabled.
fn my_cpu() -> &'static mut Cpu {
    debug_assert!(irq::is_irq_disabled());
    unsafe { &mut (*addr_of_mut!(CPUS))[cpu::cpu_id()] }
}

/// The process running on this hart, or null in early boot and in the
/// scheduler loop.
pub fn myproc() -> *mut Process {
    irq::push_off();
    let p = my_cpu().proc;
    irq::pop_off();
    p
}

/// Pid of the current process; 0 outside process context.
pub fn current_pid() -> i32 {
    let p = myproc();
    if p.is_null() { 0 } else { unsafe { (*p).pid } }
}

/// Killed flag of the current process; false outside process context.
pub fn current_killed() -> bool {
    let p = myproc();
    !p.is_null() && killed(p)
}

/// Grab an unused slot and equip it with a trap frame page, an address
/// space and a kernel stack. The new process starts life in `forkret`.
pub fn alloc_proc() -> Option<*mut Process> {
    PTABLE_LOCK.lock();
    let Some(p) = procs().iter_mut().find(|p| p.state == ProcState::Unused) else {
        PTABLE_LOCK.unlock();
        return None;
    };
    p.state = ProcState::Used;
    unsafe {
        p.pid = NEXT_PID;
        NEXT_PID += 1;
    }
    PTABLE_LOCK.unlock();

    let tf = page::alloc_zeroed_page();
    if tf == 0 {
        free_proc(p);
        return None;
    }
    p.trapframe = tf as *mut TrapFrame;

    let Some(table) = uvm::create(tf) else {
        free_proc(p);
        return None;
    };
    p.pagetable = Some(table);

    if p.kstack == 0 {
        let kstack = page::alloc_page();
        if kstack == 0 {
            free_proc(p);
            return None;
        }
        p.kstack = kstack;
    }

    p.context = Context::zeroed();
    p.context.ra = forkret as usize;
    p.context.sp = p.kstack + PAGE_SIZE;

    Some(p)
}

/// Return a process slot to the pool: tear down whatever alloc_proc (and
/// life since) attached. Open descriptors must already be closed; mmap
/// regions are released here if the exit path has not done it. The kernel
/// stack is kept for reuse.
pub fn free_proc(p: &mut Process) {
    if p.pagetable.is_some() {
        vma::unmap_all(p);
    }
    if !p.trapframe.is_null() {
        page::put_page(p.trapframe as usize);
        p.trapframe = null_mut();
    }
    if let Some(table) = p.pagetable.take() {
        uvm::free(unsafe { &mut *table }, p.sz);
    }
    p.sz = 0;
    p.pid = 0;
    p.parent = null_mut();
    p.chan = 0;
    p.killed = false;
    p.xstate = 0;
    p.name[0] = 0;
    p.state = ProcState::Unused;
}

/// Set up the first user process: one page of code embedded in the kernel
/// image, entered at virtual address 0.
pub fn user_init() {
    let p = unsafe { &mut *alloc_proc().expect("user_init: no process slot") };

    let code = crate::asm::user_init_code();
    assert!(code.len() <= PAGE_SIZE, "user init code too large");
    let frame = page::alloc_zeroed_page();
    assert!(frame != 0, "user_init: out of memory");
    unsafe {
        core::ptr::copy_nonoverlapping(code.as_ptr(), frame as *mut u8, code.len());
    }

    let table = unsafe { &mut *p.pagetable.unwrap() };
    table.map(0,
        frame,
        EntryBits::Read.val() | EntryBits::Write.val()
            | EntryBits::Execute.val() | EntryBits::User.val(),
        0);
    p.sz = PAGE_SIZE;

    p.trapframe().epc = 0;
    p.trapframe().sp = PAGE_SIZE;
    p.set_name(b"init");

    PTABLE_LOCK.lock();
    p.state = ProcState::Runnable;
    PTABLE_LOCK.unlock();
}

/// Create a child: eager copy of the image below `sz`, shared trap frame
/// contents, duplicated descriptors, and copy-on-write mmap regions.
pub fn fork() -> Result<i32, ()> {
    let p = unsafe { &mut *myproc() };

    let np = alloc_proc().ok_or(())?;
    let np = unsafe { &mut *np };

    let parent_table = unsafe { &*p.pagetable.unwrap() };
    let child_table = unsafe { &mut *np.pagetable.unwrap() };
    if uvm::copy(parent_table, child_table, p.sz).is_err() {
        free_proc(np);
        return Err(());
    }
    np.sz = p.sz;

    *np.trapframe() = *p.trapframe();
    // fork returns 0 in the child.
    np.trapframe().a0 = 0;

    for (i, f) in p.ofile.iter().enumerate() {
        if !f.is_null() {
            np.ofile[i] = file::file_dup(*f);
        }
    }

    vma::vma_copy(p, np);

    np.name = p.name;
    np.parent = p;
    let pid = np.pid;

    PTABLE_LOCK.lock();
    np.state = ProcState::Runnable;
    PTABLE_LOCK.unlock();

    Ok(pid)
}

/// Terminate the current process; does not return. SHARED mmap regions are
/// written back as they are unmapped.
pub fn exit(status: i32) -> ! {
    let p = unsafe { &mut *myproc() };

    for f in p.ofile.iter_mut() {
        if !f.is_null() {
            file::file_close(*f);
            *f = null_mut();
        }
    }

    vma::unmap_all(p);

    let p_ptr: *mut Process = p;
    PTABLE_LOCK.lock();

    // Orphan the children; nobody will reap them until the slot cycles.
    for child in procs().iter_mut() {
        if child.parent == p_ptr {
            child.parent = null_mut();
        }
    }

    // The parent may be blocked in wait().
    wakeup_locked(p.parent as usize);

    p.xstate = status;
    p.state = ProcState::Zombie;

    sched();
    panic!("zombie exit");
}

/// Wait for a child to exit; returns its pid, copying the exit status to
/// `addr` when nonzero.
pub fn wait(addr: usize) -> Result<i32, ()> {
    let p = unsafe { &mut *myproc() };
    let p_ptr: *mut Process = p;

    PTABLE_LOCK.lock();
    loop {
        let mut have_kids = false;
        for child in procs().iter_mut() {
            if child.parent != p_ptr {
                continue;
            }
            have_kids = true;
            if child.state == ProcState::Zombie {
                let pid = child.pid;
                if addr != 0 {
                    let table = unsafe { &*p.pagetable.unwrap() };
                    let xstate = child.xstate;
                    if uvm::copyout(table, addr,
                        &xstate as *const i32 as *const u8,
                        core::mem::size_of::<i32>()).is_err() {
                        PTABLE_LOCK.unlock();
                        return Err(());
                    }
                }
                free_proc(child);
                PTABLE_LOCK.unlock();
                return Ok(pid);
            }
        }

        if !have_kids || p.killed {
            PTABLE_LOCK.unlock();
            return Err(());
        }

        // Sleep on our own struct address until an exit wakes us.
        sleep(p_ptr as usize, &PTABLE_LOCK);
    }
}

/// Mark the process with `pid` killed; it will exit on its next trap
/// boundary.
pub fn kill(pid: i32) -> Result<(), ()> {
    PTABLE_LOCK.lock();
    for p in procs().iter_mut() {
        if p.pid == pid && p.state != ProcState::Unused {
            p.killed = true;
            if p.state == ProcState::Sleeping {
                p.state = ProcState::Runnable;
            }
            PTABLE_LOCK.unlock();
            return Ok(());
        }
    }
    PTABLE_LOCK.unlock();
    Err(())
}

pub fn setkilled(p: *mut Process) {
    PTABLE_LOCK.lock();
    unsafe {
        (*p).killed = true;
    }
    PTABLE_LOCK.unlock();
}

pub fn killed(p: *mut Process) -> bool {
    PTABLE_LOCK.lock();
    let k = unsafe { (*p).killed };
    PTABLE_LOCK.unlock();
    k
}

/// Switch to the scheduler. Caller holds the table lock and nothing else;
/// the remembered interrupt state is preserved across the switch for the
/// thread that eventually resumes here.
fn sched() {
    debug_assert!(irq::is_irq_disabled());

    let c = my_cpu();
    let p = c.proc;
    debug_assert!(!p.is_null());
    debug_assert!(unsafe { (*p).state } != ProcState::Running);

    let intena = irq::intena_save();
    unsafe {
        swtch(&mut (*p).context, &c.context);
    }
    irq::intena_restore(intena);
}

/// Give up the CPU for one scheduling round.
pub fn yield_cpu() {
    let p = unsafe { &mut *myproc() };
    PTABLE_LOCK.lock();
    p.state = ProcState::Runnable;
    sched();
    PTABLE_LOCK.unlock();
}

/// First return path of a new process: release the table lock the
/// scheduler handed over and drop to user mode.
fn forkret() -> ! {
    PTABLE_LOCK.unlock();
    trap::usertrap_ret()
}

/// Atomically release `lk` and sleep on `chan`; re-acquires `lk` before
/// returning.
pub fn sleep(chan: usize, lk: &SpinLockPure) {
    let p = myproc();
    assert!(!p.is_null(), "sleep outside process context");
    let p = unsafe { &mut *p };

    // Take the table lock first so no wakeup can slip between dropping
    // `lk` and going to sleep.
    let same = core::ptr::eq(lk, &PTABLE_LOCK);
    if !same {
        PTABLE_LOCK.lock();
        lk.unlock();
    }

    p.chan = chan;
    p.state = ProcState::Sleeping;
    sched();
    p.chan = 0;

    if !same {
        PTABLE_LOCK.unlock();
        lk.lock();
    }
}

/// Wake every process sleeping on `chan`.
pub fn wakeup(chan: usize) {
    PTABLE_LOCK.lock();
    wakeup_locked(chan);
    PTABLE_LOCK.unlock();
}

fn wakeup_locked(chan: usize) {
    if chan == 0 {
        return;
    }
    let me = unsafe { (*addr_of_mut!(CPUS))[cpu::cpu_id()].proc };
    for p in procs().iter_mut() {
        if p as *mut Process != me
            && p.state == ProcState::Sleeping && p.chan == chan {
            p.state = ProcState::Runnable;
        }
    }
}

/// Per-hart scheduler loop; never returns.
pub fn scheduler() -> ! {
    let c = my_cpu();

    loop {
        // Let pending interrupts in between sweeps so a fully idle system
        // still takes timer and device interrupts.
        irq::local_irq_enable();

        PTABLE_LOCK.lock();
        for p in procs().iter_mut() {
            if p.state == ProcState::Runnable {
                p.state = ProcState::Running;
                c.proc = p;
                unsafe {
                    swtch(&mut c.context, &p.context);
                }
                c.proc = null_mut();
            }
        }
        PTABLE_LOCK.unlock();
    }
}

/// Copy to either a user virtual address of the current process or a
/// kernel address, depending on `user_dst`.
pub fn either_copyout(user_dst: bool, dst: usize, src: *const u8, len: usize) -> Result<(), ()> {
    if user_dst {
        let p = myproc();
        if p.is_null() {
            return Err(());
        }
        let table = unsafe { &*(*p).pagetable.unwrap() };
        uvm::copyout(table, dst, src, len)
    } else {
        unsafe {
            core::ptr::copy_nonoverlapping(src, dst as *mut u8, len);
        }
        Ok(())
    }
}

/// Copy from either a user virtual address of the current process or a
/// kernel address, depending on `user_src`.
pub fn either_copyin(dst: *mut u8, user_src: bool, src: usize, len: usize) -> Result<(), ()> {
    if user_src {
        let p = myproc();
        if p.is_null() {
            return Err(());
        }
        let table = unsafe { &*(*p).pagetable.unwrap() };
        uvm::copyin(table, dst, src, len)
    } else {
        unsafe {
            core::ptr::copy_nonoverlapping(src as *const u8, dst, len);
        }
        Ok(())
    }
}
