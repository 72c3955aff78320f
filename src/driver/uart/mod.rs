//! NS16550A UART driver, plus the console device built on top of it.
//!
//! Until the device tree has been parsed the driver talks to the QEMU virt
//! default address; afterwards it uses whatever base the `serial`/`uart`
//! node advertised.

use core::fmt::{Result, Write};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::base::sync::SpinLockPure;
use crate::constant::CONSOLE;
use crate::driver::of;
use crate::fs::file;
use crate::proc;

const UART_ADDRESS: usize = 0x10000000;
const LINE_STATUS_REGISTER: usize = 0x5;
const LINE_CONTROL_REGISTER: usize = 0x3;
const FIFO_CONTROL_REGISTER: usize = 0x2;
const INTERRUPT_ENABLE_REGISTER: usize = 0x1;

const LINE_STATUS_DATA_READY: u8 = 0x1;

/// Base address the console uses; rewritten once by [`init`].
static CONSOLE_BASE: AtomicUsize = AtomicUsize::new(UART_ADDRESS);

#[derive(Copy, Clone)]
/// Struct representing a NS16550A UART peripheral
pub struct Uart {
    /// Base address of the peripheral
    address: usize,
}

#[derive(Copy, Clone)]
/// Word length
pub enum WordLength {
    FIVE = 0,
    SIX = 1,
    SEVEN = 2,
    EIGHT = 3,
}

#[derive(Copy, Clone)]
/// Number of stop bits
pub enum StopBits {
    ONE = 0,
    TWO = 1,
}

#[derive(Copy, Clone)]
/// Parity bits
pub enum ParityBit {
    DISABLE = 0,
    ENABLE = 1,
}

#[derive(Copy, Clone)]
/// Divisor latch access bit
pub enum DLAB {
    CLEAR = 0,
    SET = 1,
}

impl Uart {
    pub const fn new(address: usize) -> Self {
        Uart {
            address
        }
    }

    /// Init the UART peripheral with default parameters:
    /// - `WordLength`: 8bits
    /// - `StopBits`: 1bit
    /// - `ParityBit`: Disable
    /// - `Divisor`: 592
    /// - `FIFO`: Enable
    /// - `ReceiverInterrupts`: Enable
    pub fn init_default(&self) {
        // The formula given in the NS16550A specification for calculating
        // the divisor is:
        //   divisor = ceil( clock_hz / (baud_sps x 16) )
        // With the 22.729 MHz reference clock and 2400 baud that is 592.
        self.init(WordLength::EIGHT, StopBits::ONE, ParityBit::DISABLE, 592);
    }

    /// Init UART peripheral with the given parameters.
    pub fn init(
        &self,
        word_length: WordLength,
        stop_bits: StopBits,
        parity_bit: ParityBit,
        divisor: u16) {
        self.set_lcr(word_length, stop_bits, parity_bit, DLAB::SET);
        self.set_fcr();
        self.set_ier();

        // The divisor register is two bytes (16 bits), so we need to split
        // the value into two bytes: address 0 writes the least bits and
        // address 1 writes the most bits.
        let divisor_least: u8 = (divisor & 0xff) as u8;
        let divisor_most: u8 = (divisor >> 8) as u8;
        let ptr = self.address as *mut u8;
        unsafe {
            ptr.write_volatile(divisor_least);
            ptr.add(1).write_volatile(divisor_most);
        }

        // Clear divisor latch accessor bit.
        self.set_lcr(word_length, stop_bits, parity_bit, DLAB::CLEAR);
    }

    /// Sets the line control register with the given parameters.
    fn set_lcr(
        &self,
        word_length: WordLength,
        stop_bits: StopBits,
        parity_bit: ParityBit,
        dlab: DLAB) {
        let ptr = (self.address + LINE_CONTROL_REGISTER) as *mut u8;
        unsafe {
            ptr.write_volatile(
                word_length as u8
                    | ((stop_bits as u8) << 2)
                    | ((parity_bit as u8) << 3)
                    | ((dlab as u8) << 7),
            );
        }
    }

    /// Sets the FIFO control register. FIFO is always enabled (fcr\[0]).
    fn set_fcr(&self) {
        let ptr = (self.address + FIFO_CONTROL_REGISTER) as *mut u8;
        unsafe {
            ptr.write_volatile(1);
        }
    }

    /// Sets the interrupt enable register. Receiver interrupts are always
    /// enabled (ier\[0]).
    fn set_ier(&self) {
        let ptr = (self.address + INTERRUPT_ENABLE_REGISTER) as *mut u8;
        unsafe {
            ptr.write_volatile(1);
        }
    }

    /// Check if data ready bit is set.
    pub fn data_ready(&self) -> bool {
        let ptr = (self.address + LINE_STATUS_REGISTER) as *mut u8;
        unsafe {
            (ptr.read_volatile() & LINE_STATUS_DATA_READY) != 0
        }
    }

    /// If data ready is set, returns the value read in the receiver buffer
    /// register. Otherwise returns `None`.
    pub fn get(&self) -> Option<u8> {
        if self.data_ready() {
            let ptr = self.address as *mut u8;
            Some(unsafe { ptr.read_volatile() })
        } else {
            None
        }
    }

    pub fn put(&self, c: u8) {
        let ptr = self.address as *mut u8;
        unsafe { ptr.write_volatile(c); }
    }
}

impl Default for Uart {
    fn default() -> Self {
        Uart::new(CONSOLE_BASE.load(Ordering::Relaxed))
    }
}

impl Write for Uart {
    fn write_str(&mut self, s: &str) -> Result {
        s.bytes().for_each(|c| self.put(c));
        Ok(())
    }
}


//////////////////// Console device ///////////////////////

const INPUT_BUF_SIZE: usize = 128;

/// Raw console input buffer fed by the receive interrupt.
struct Console {
    lock: SpinLockPure,
    buf: [u8; INPUT_BUF_SIZE],
    /// Read index.
    r: usize,
    /// Write index.
    w: usize,
}

static mut CONS: Console = Console {
    lock: SpinLockPure::new(),
    buf: [0; INPUT_BUF_SIZE],
    r: 0,
    w: 0,
};

/// Re-point the driver at the device-tree UART base and wire the console
/// into the device switch table.
pub fn init() {
    let base = of::platform().uart_base as usize;
    if base != CONSOLE_BASE.load(Ordering::Relaxed) {
        CONSOLE_BASE.store(base, Ordering::Relaxed);
        Uart::default().init_default();
    }

    file::devsw_register(CONSOLE, console_read, console_write);
}

/// Device-switch write entry: push `n` bytes from `src` out the UART.
fn console_write(user_src: bool, src: usize, n: usize) -> core::result::Result<usize, ()> {
    let uart = Uart::default();
    for i in 0..n {
        let mut c = 0u8;
        proc::either_copyin(&mut c as *mut u8, user_src, src + i, 1)?;
        uart.put(c);
    }
    Ok(n)
}

/// Device-switch read entry: block until input is available, then copy up
/// to `n` buffered bytes to `dst`.
fn console_read(user_dst: bool, dst: usize, n: usize) -> core::result::Result<usize, ()> {
    let cons = unsafe { &mut *core::ptr::addr_of_mut!(CONS) };

    cons.lock.lock();
    let mut copied = 0usize;
    while copied < n {
        while cons.r == cons.w {
            if proc::current_killed() {
                cons.lock.unlock();
                return Err(());
            }
            proc::sleep(core::ptr::addr_of!(cons.r) as usize, &cons.lock);
        }

        let c = cons.buf[cons.r % INPUT_BUF_SIZE];
        cons.r += 1;
        if proc::either_copyout(user_dst, dst + copied, &c as *const u8, 1).is_err() {
            break;
        }
        copied += 1;

        if c == b'\n' {
            // A line satisfies the read.
            break;
        }
    }
    cons.lock.unlock();

    Ok(copied)
}

/// Receive interrupt: drain the FIFO into the input buffer, echoing.
pub fn intr() {
    let uart = Uart::default();
    let cons = unsafe { &mut *core::ptr::addr_of_mut!(CONS) };

    while let Some(c) = uart.get() {
        let c = if c == b'\r' { b'\n' } else { c };
        uart.put(c);

        cons.lock.lock();
        if cons.w - cons.r < INPUT_BUF_SIZE {
            cons.buf[cons.w % INPUT_BUF_SIZE] = c;
            cons.w += 1;
            proc::wakeup(core::ptr::addr_of!(cons.r) as usize);
        }
        cons.lock.unlock();
    }
}
