//! Pipes: a bounded byte channel between two file objects.

use static_assertions as sa;
use crate::base::sync::SpinLockPure;
use crate::fs::file::{self, FileType};
use crate::mm::page;
use crate::proc;

const PIPE_SIZE: usize = 512;

pub struct Pipe {
    lock: SpinLockPure,
    data: [u8; PIPE_SIZE],
    /// Bytes read so far.
    nread: usize,
    /// Bytes written so far.
    nwrite: usize,
    readopen: bool,
    writeopen: bool,
}

/// Allocate a pipe and its two file objects (read end, write end). The
/// pipe struct lives in a frame of its own.
pub fn pipe_alloc() -> Result<(*mut file::File, *mut file::File), ()> {
    let Some(f0) = file::file_alloc() else {
        return Err(());
    };
    let Some(f1) = file::file_alloc() else {
        file::file_close(f0);
        return Err(());
    };

    let pa = page::alloc_page();
    if pa == 0 {
        file::file_close(f0);
        file::file_close(f1);
        return Err(());
    }
    sa::const_assert!(core::mem::size_of::<Pipe>() <= crate::constant::PAGE_SIZE);

    let pi = pa as *mut Pipe;
    unsafe {
        pi.write(Pipe {
            lock: SpinLockPure::new(),
            data: [0; PIPE_SIZE],
            nread: 0,
            nwrite: 0,
            readopen: true,
            writeopen: true,
        });

        (*f0).typ = FileType::Pipe { pipe: pi };
        (*f0).readable = true;
        (*f0).writable = false;
        (*f1).typ = FileType::Pipe { pipe: pi };
        (*f1).readable = false;
        (*f1).writable = true;
    }

    Ok((f0, f1))
}

/// Drop one end; the frame goes back once both ends are gone.
pub fn pipe_close(pi: *mut Pipe, writable: bool) {
    let pipe = unsafe { &mut *pi };

    pipe.lock.lock();
    if writable {
        pipe.writeopen = false;
        proc::wakeup(core::ptr::addr_of!(pipe.nread) as usize);
    } else {
        pipe.readopen = false;
        proc::wakeup(core::ptr::addr_of!(pipe.nwrite) as usize);
    }
    let dead = !pipe.readopen && !pipe.writeopen;
    pipe.lock.unlock();

    if dead {
        page::put_page(pi as usize);
    }
}

/// Write up to `n` bytes; blocks while the buffer is full and a reader
/// remains. Fails once the read side is closed or the writer is killed.
pub fn pipe_write(pi: *mut Pipe, user_src: bool, addr: usize, n: usize) -> Result<usize, ()> {
    let pipe = unsafe { &mut *pi };

    let mut written = 0usize;
    pipe.lock.lock();
    while written < n {
        if !pipe.readopen || proc::current_killed() {
            pipe.lock.unlock();
            return Err(());
        }
        if pipe.nwrite == pipe.nread + PIPE_SIZE {
            proc::wakeup(core::ptr::addr_of!(pipe.nread) as usize);
            proc::sleep(core::ptr::addr_of!(pipe.nwrite) as usize, &pipe.lock);
            continue;
        }

        let mut byte = 0u8;
        if proc::either_copyin(&mut byte as *mut u8, user_src, addr + written, 1).is_err() {
            break;
        }
        let slot = pipe.nwrite % PIPE_SIZE;
        pipe.data[slot] = byte;
        pipe.nwrite += 1;
        written += 1;
    }
    proc::wakeup(core::ptr::addr_of!(pipe.nread) as usize);
    pipe.lock.unlock();

    Ok(written)
}

/// Read up to `n` bytes; blocks while the pipe is empty and a writer
/// remains.
pub fn pipe_read(pi: *mut Pipe, user_dst: bool, addr: usize, n: usize) -> Result<usize, ()> {
    let pipe = unsafe { &mut *pi };

    pipe.lock.lock();
    while pipe.nread == pipe.nwrite && pipe.writeopen {
        if proc::current_killed() {
            pipe.lock.unlock();
            return Err(());
        }
        proc::sleep(core::ptr::addr_of!(pipe.nread) as usize, &pipe.lock);
    }

    let mut copied = 0usize;
    while copied < n && pipe.nread != pipe.nwrite {
        let slot = pipe.nread % PIPE_SIZE;
        let byte = pipe.data[slot];
        if proc::either_copyout(user_dst, addr + copied, &byte as *const u8, 1).is_err() {
            break;
        }
        pipe.nread += 1;
        copied += 1;
    }
    proc::wakeup(core::ptr::addr_of!(pipe.nwrite) as usize);
    pipe.lock.unlock();

    Ok(copied)
}
