//! The two cascaded 8259 programmable interrupt controllers.

use core::fmt;

use amd64::io::{PortIo, PortNumber};

pub const PIC1_CMD: PortNumber = PortNumber(0x0020);
pub const PIC1_DATA: PortNumber = PortNumber(0x0021);
pub const PIC2_CMD: PortNumber = PortNumber(0x00A0);
pub const PIC2_DATA: PortNumber = PortNumber(0x00A1);

/// ICW4
pub const ICW1_ICW4: u8 = 0x01;
/// Initialization
pub const ICW1_INIT: u8 = 0x10;

/// 8086/88 (MCS-80/85) mode
pub const ICW4_8086: u8 = 0x01;

/// End of interrupt command.
pub const EOI: u8 = 0x20;

/// Number of lines served by both controllers together.
pub const PIC_LINES: u8 = 16;

/// Master line the slave is cascaded on.
const CASCADE_LINE: u8 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PicError {
    /// Vector bases must lie above the exception range and be multiples of 8.
    InvalidBase(u8),
    /// Both controllers would deliver on the same vectors.
    OverlappingBases(u8, u8),
    /// There are only 16 lines.
    InvalidLine(u8),
}

impl fmt::Display for PicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PicError::InvalidBase(b) => write!(f, "invalid PIC vector base {:#04x}", b),
            PicError::OverlappingBases(m, s) => write!(f, "PIC vector bases {:#04x} and {:#04x} overlap", m, s),
            PicError::InvalidLine(l) => write!(f, "invalid IRQ line {}", l),
        }
    }
}

/// Both PICs behind a port bus, together with the vector bases they were programmed with.
pub struct ChainedPics<P> {
    bus: P,
    master_base: u8,
    slave_base: u8,
}

impl<P: PortIo> ChainedPics<P> {
    /// Wrap the controllers in their power-on state, which delivers IRQs on the BIOS
    /// vectors 0x08 and 0x70. Call `remap` before enabling interrupts.
    pub const fn new(bus: P) -> ChainedPics<P> {
        ChainedPics {
            bus,
            master_base: 0x08,
            slave_base: 0x70,
        }
    }

    pub fn master_base(&self) -> u8 {
        self.master_base
    }

    pub fn slave_base(&self) -> u8 {
        self.slave_base
    }

    pub fn bus(&self) -> &P {
        &self.bus
    }

    /// Reinitialize the PICs in cascade mode, mapping them to the given interrupt vector offsets.
    /// The line masks that were active before are restored afterwards.
    pub fn remap(&mut self, master_base: u8, slave_base: u8) -> Result<(), PicError> {
        for &base in &[master_base, slave_base] {
            if base < 32 || base % 8 != 0 {
                return Err(PicError::InvalidBase(base));
            }
        }
        // both are 8 aligned windows of 8 vectors
        if master_base == slave_base {
            return Err(PicError::OverlappingBases(master_base, slave_base));
        }

        let (master_mask, slave_mask) = self.masks();
        unsafe {
            // ICW1: start initialization in cascade mode
            self.command(PIC1_CMD, ICW1_INIT | ICW1_ICW4);
            self.command(PIC2_CMD, ICW1_INIT | ICW1_ICW4);
            // ICW2: write new offsets
            self.command(PIC1_DATA, master_base);
            self.command(PIC2_DATA, slave_base);
            // ICW3: setup master/slave connection
            self.command(PIC1_DATA, 1 << CASCADE_LINE);
            self.command(PIC2_DATA, CASCADE_LINE);
            // ICW4: tell PICs that they're in 8086 mode
            self.command(PIC1_DATA, ICW4_8086);
            self.command(PIC2_DATA, ICW4_8086);
        }
        self.set_masks(master_mask, slave_mask);

        self.master_base = master_base;
        self.slave_base = slave_base;
        debug!("[PIC] remapped to {:#04x}/{:#04x}, masks {:#04x}/{:#04x}", master_base, slave_base, master_mask, slave_mask);
        Ok(())
    }

    unsafe fn command(&mut self, port: PortNumber, data: u8) {
        self.bus.write_u8(port, data);
        self.bus.wait();
    }

    /// Return the IRQ masks for PIC1 and PIC2.
    pub fn masks(&mut self) -> (u8, u8) {
        unsafe { (self.bus.read_u8(PIC1_DATA), self.bus.read_u8(PIC2_DATA)) }
    }

    /// Set the IRQ masks for PIC1 and PIC2.
    pub fn set_masks(&mut self, master_mask: u8, slave_mask: u8) {
        unsafe {
            self.bus.write_u8(PIC1_DATA, master_mask);
            self.bus.write_u8(PIC2_DATA, slave_mask);
        }
    }

    /// Suppress delivery of `line`.
    pub fn mask(&mut self, line: u8) -> Result<(), PicError> {
        self.update_mask(line, |mask, bit| mask | bit)
    }

    /// Allow delivery of `line`.
    pub fn unmask(&mut self, line: u8) -> Result<(), PicError> {
        self.update_mask(line, |mask, bit| mask & !bit)
    }

    fn update_mask<F: FnOnce(u8, u8) -> u8>(&mut self, line: u8, f: F) -> Result<(), PicError> {
        if line >= PIC_LINES {
            return Err(PicError::InvalidLine(line));
        }
        let port = if line < 8 { PIC1_DATA } else { PIC2_DATA };
        unsafe {
            let mask = self.bus.read_u8(port);
            self.bus.write_u8(port, f(mask, 1 << (line % 8)));
        }
        Ok(())
    }

    /// Notify PICs that the interrupt was handled.
    pub fn send_eoi(&mut self, line: u8) {
        unsafe {
            if line >= 8 {
                // IRQs >= 8 went through both PICs.
                self.bus.write_u8(PIC2_CMD, EOI);
            }
            self.bus.write_u8(PIC1_CMD, EOI);
        }
    }

    /// The IRQ line delivered on `vector`, if any.
    pub fn handles_vector(&self, vector: u8) -> Option<u8> {
        let master_offset = vector.wrapping_sub(self.master_base);
        let slave_offset = vector.wrapping_sub(self.slave_base);
        if master_offset < 8 {
            Some(master_offset)
        } else if slave_offset < 8 {
            Some(slave_offset + 8)
        } else {
            None
        }
    }
}
