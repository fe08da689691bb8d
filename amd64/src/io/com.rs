//! Provides an interface to the serial COM ports.

use core::fmt;

use super::{CpuPorts, PortIo, PortNumber};

/// The usual address of the COM1 port.
pub const COM1_ADDR: PortNumber = PortNumber(0x3F8);

const DATA: u16 = 0;
const LINE_STATUS: u16 = 5;

const LINE_STATUS_THR_EMPTY: u8 = 0x20;

/// A serial port identified by its base port number.
#[derive(Debug, Eq, PartialEq)]
pub struct SerialPort<P = CpuPorts> {
    base: PortNumber,
    ports: P,
}

impl SerialPort<CpuPorts> {
    /// Creates a new handle to a serial port.
    ///
    /// The caller must make sure that writing to this port can do no harm (e.g. writing to COM1)
    /// and that no other handle writes to the same port concurrently.
    pub const unsafe fn new(base: PortNumber) -> SerialPort<CpuPorts> {
        SerialPort { base, ports: CpuPorts }
    }
}

impl<P: PortIo> SerialPort<P> {
    pub unsafe fn with_ports(base: PortNumber, ports: P) -> SerialPort<P> {
        SerialPort { base, ports }
    }

    #[inline]
    pub fn write_byte(&mut self, data: u8) {
        unsafe {
            // bounded spin, a missing UART must not hang the kernel
            for _ in 0..10_000 {
                if self.ports.read_u8(self.base + LINE_STATUS) & LINE_STATUS_THR_EMPTY != 0 {
                    break;
                }
            }
            self.ports.write_u8(self.base + DATA, data);
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        for &b in data {
            if b == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(b);
        }
    }
}

impl<P: PortIo> fmt::Write for SerialPort<P> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}
