//! System call numbers, argument fetch and dispatch.
//!
//! Arguments arrive in the trap frame registers `a0..a5`, the call number
//! in `a7`; the result goes back through `a0`, with `usize::MAX` (-1)
//! signalling failure.

use crate::fs::file::{self, File};
use crate::fs::pipe;
use crate::mm::vma;
use crate::proc::{self, Process};


pub const SYS_FORK: usize = 1;
pub const SYS_EXIT: usize = 2;
pub const SYS_WAIT: usize = 3;
pub const SYS_PIPE: usize = 4;
pub const SYS_READ: usize = 5;
pub const SYS_KILL: usize = 6;
pub const SYS_FSTAT: usize = 8;
pub const SYS_DUP: usize = 10;
pub const SYS_GETPID: usize = 11;
pub const SYS_OPEN: usize = 15;
pub const SYS_WRITE: usize = 16;
pub const SYS_CLOSE: usize = 21;
pub const SYS_MMAP: usize = 22;
pub const SYS_MUNMAP: usize = 23;

const MAXPATH: usize = 128;

/// Fetch the n-th syscall argument as a raw register value.
fn arg_raw(p: &mut Process, n: usize) -> usize {
    let tf = p.trapframe();
    match n {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => panic!("arg_raw"),
    }
}

/// Fetch the n-th argument as an open file of the calling process.
fn arg_file(p: &mut Process, n: usize) -> Result<(usize, *mut File), ()> {
    let fd = arg_raw(p, n);
    let f = *p.ofile.get(fd).ok_or(())?;
    if f.is_null() {
        return Err(());
    }
    Ok((fd, f))
}

/// Fetch the n-th argument as a NUL-terminated user string.
fn arg_str<'a>(p: &mut Process, n: usize, buf: &'a mut [u8]) -> Result<&'a [u8], ()> {
    let va = arg_raw(p, n);
    let table = unsafe { &*p.pagetable.unwrap() };
    let len = crate::mm::uvm::copyin_str(table, buf, va)?;
    Ok(&buf[..len])
}

/// Dispatch the system call named by `a7`.
pub fn syscall(p: &mut Process) {
    let num = p.trapframe().a7;

    let ret: Result<usize, ()> = match num {
        SYS_FORK => sys_fork(p),
        SYS_EXIT => sys_exit(p),
        SYS_WAIT => sys_wait(p),
        SYS_PIPE => sys_pipe(p),
        SYS_READ => sys_read(p),
        SYS_KILL => sys_kill(p),
        SYS_FSTAT => sys_fstat(p),
        SYS_DUP => sys_dup(p),
        SYS_GETPID => Ok(p.pid as usize),
        SYS_OPEN => sys_open(p),
        SYS_WRITE => sys_write(p),
        SYS_CLOSE => sys_close(p),
        SYS_MMAP => sys_mmap(p),
        SYS_MUNMAP => sys_munmap(p),
        _ => {
            warn!("unknown syscall {} pid={}", num, p.pid);
            Err(())
        }
    };

    p.trapframe().a0 = ret.unwrap_or(usize::MAX);
}

fn sys_fork(_p: &mut Process) -> Result<usize, ()> {
    proc::fork().map(|pid| pid as usize)
}

fn sys_exit(p: &mut Process) -> Result<usize, ()> {
    let status = arg_raw(p, 0) as i32;
    proc::exit(status)
}

fn sys_wait(p: &mut Process) -> Result<usize, ()> {
    let addr = arg_raw(p, 0);
    proc::wait(addr).map(|pid| pid as usize)
}

fn sys_pipe(p: &mut Process) -> Result<usize, ()> {
    let fd_array = arg_raw(p, 0);

    let (f0, f1) = pipe::pipe_alloc()?;
    let Some(fd0) = p.fd_alloc(f0) else {
        file::file_close(f0);
        file::file_close(f1);
        return Err(());
    };
    let Some(fd1) = p.fd_alloc(f1) else {
        p.ofile[fd0] = core::ptr::null_mut();
        file::file_close(f0);
        file::file_close(f1);
        return Err(());
    };

    let fds = [fd0 as i32, fd1 as i32];
    let table = unsafe { &*p.pagetable.unwrap() };
    if crate::mm::uvm::copyout(table, fd_array,
        fds.as_ptr() as *const u8, core::mem::size_of_val(&fds)).is_err() {
        p.ofile[fd0] = core::ptr::null_mut();
        p.ofile[fd1] = core::ptr::null_mut();
        file::file_close(f0);
        file::file_close(f1);
        return Err(());
    }
    Ok(0)
}

fn sys_read(p: &mut Process) -> Result<usize, ()> {
    let (_, f) = arg_file(p, 0)?;
    let addr = arg_raw(p, 1);
    let n = arg_raw(p, 2);
    file::file_read(f, true, addr, n)
}

fn sys_write(p: &mut Process) -> Result<usize, ()> {
    let (_, f) = arg_file(p, 0)?;
    let addr = arg_raw(p, 1);
    let n = arg_raw(p, 2);
    file::file_write(f, true, addr, n)
}

fn sys_kill(p: &mut Process) -> Result<usize, ()> {
    let pid = arg_raw(p, 0) as i32;
    proc::kill(pid).map(|_| 0)
}

fn sys_fstat(p: &mut Process) -> Result<usize, ()> {
    let (_, f) = arg_file(p, 0)?;
    let addr = arg_raw(p, 1);
    file::file_stat(f, addr).map(|_| 0)
}

fn sys_dup(p: &mut Process) -> Result<usize, ()> {
    let (_, f) = arg_file(p, 0)?;
    let fd = p.fd_alloc(f).ok_or(())?;
    file::file_dup(f);
    Ok(fd)
}

fn sys_open(p: &mut Process) -> Result<usize, ()> {
    let mut buf = [0u8; MAXPATH];
    let omode = arg_raw(p, 1) as u32;
    let path = arg_str(p, 0, &mut buf)?;

    let f = file::file_open(path, omode)?;
    let Some(fd) = p.fd_alloc(f) else {
        file::file_close(f);
        return Err(());
    };
    Ok(fd)
}

fn sys_close(p: &mut Process) -> Result<usize, ()> {
    let (fd, f) = arg_file(p, 0)?;
    p.ofile[fd] = core::ptr::null_mut();
    file::file_close(f);
    Ok(0)
}

/// `mmap(addr, length, prot, flags, fd, offset)`; `addr` is a hint and
/// ignored, the kernel chooses the placement.
fn sys_mmap(p: &mut Process) -> Result<usize, ()> {
    let length = arg_raw(p, 1);
    let prot = arg_raw(p, 2) as u32;
    let flags = arg_raw(p, 3) as u32;
    let (_, f) = arg_file(p, 4)?;
    let offset = arg_raw(p, 5);

    vma::mmap(p, length, prot, flags, f, offset)
}

fn sys_munmap(p: &mut Process) -> Result<usize, ()> {
    let addr = arg_raw(p, 0);
    let length = arg_raw(p, 1);
    vma::munmap(p, addr, length).map(|_| 0)
}
