//! Provides primitive operations for working with the CPUs I/O ports

use core::arch::asm;
use core::ops;

pub mod com;

/// A CPU I/O port number.
#[derive(Debug, Eq, PartialEq, Copy, Clone, PartialOrd, Ord, Hash)]
pub struct PortNumber(pub u16);

impl ops::Add<u16> for PortNumber {
    type Output = PortNumber;

    fn add(self, offset: u16) -> PortNumber {
        PortNumber(self.0 + offset)
    }
}

// unsafe primitives

#[inline]
pub unsafe fn outb(port: PortNumber, data: u8) {
    asm!("out dx, al", in("dx") port.0, in("al") data, options(nomem, nostack, preserves_flags));
}

#[inline]
pub unsafe fn inb(port: PortNumber) -> u8 {
    let data: u8;
    asm!("in al, dx", out("al") data, in("dx") port.0, options(nomem, nostack, preserves_flags));
    data
}

/// Unused port that is safe to write to. The write takes long enough for
/// slow devices like the PIC to settle.
pub const POST_PORT: PortNumber = PortNumber(0x80);

#[inline]
pub unsafe fn io_wait() {
    outb(POST_PORT, 0);
}

/// Byte-wide port access. Device drivers are written against this trait so that
/// the sequence of port writes can be checked without real hardware.
pub trait PortIo {
    unsafe fn read_u8(&mut self, port: PortNumber) -> u8;

    unsafe fn write_u8(&mut self, port: PortNumber, data: u8);

    /// Give the device some time to process the previous command.
    unsafe fn wait(&mut self) {}
}

/// Port access via the `in` and `out` instructions.
#[derive(Debug, Default, Copy, Clone)]
pub struct CpuPorts;

impl PortIo for CpuPorts {
    #[inline]
    unsafe fn read_u8(&mut self, port: PortNumber) -> u8 {
        inb(port)
    }

    #[inline]
    unsafe fn write_u8(&mut self, port: PortNumber, data: u8) {
        outb(port, data)
    }

    #[inline]
    unsafe fn wait(&mut self) {
        io_wait()
    }
}
