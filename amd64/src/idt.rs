use core::arch::asm;
use core::fmt;
use core::mem;
use core::ops;

use crate::gdt::DescriptorTablePointer;
use crate::segments::{Ring, Selector};

/// Number of vectors of the interrupt descriptor table.
pub const IDT_ENTRIES: usize = 256;

/// Interrupt descriptor table
#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; IDT_ENTRIES]
}

// sanity check that everything adds up in terms of size
assert_eq_size!(Idt, [u8; 4096]);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IdtError {
    /// The vector has no present gate.
    MissingEntry(u8),
    /// The requested interrupt stack slot is not in 0 to 7.
    InvalidStackIndex(u8),
}

impl fmt::Display for IdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IdtError::MissingEntry(v) => write!(f, "vector {:#04x} has no present gate", v),
            IdtError::InvalidStackIndex(i) => write!(f, "interrupt stack index {} out of range", i),
        }
    }
}

impl Idt {
    pub const fn new() -> Idt {
        Idt {
            entries: [IdtEntry::empty(); IDT_ENTRIES]
        }
    }

    /// Install a present ring 0 gate for `vector`.
    ///
    /// `stack_index` 0 keeps the current stack, 1 to 7 switch to the TSS interrupt stack of that slot.
    pub fn install(&mut self, vector: u8, handler_address: usize, selector: Selector, stack_index: u8, attributes: GateAttributes) -> Result<(), IdtError> {
        if stack_index > 7 {
            return Err(IdtError::InvalidStackIndex(stack_index));
        }
        let entry = &mut self.entries[vector as usize];
        *entry = IdtEntry::empty();
        entry.set_handler_address(handler_address);
        entry.set_selector(selector);
        entry.set_stack_index(stack_index);
        entry.set_gate_type(attributes.gate_type);
        entry.set_descriptor_privilege(attributes.privilege);
        entry.set_present(true);
        Ok(())
    }

    /// Check that every vector has a present gate with a handler.
    pub fn validate(&self) -> Result<(), IdtError> {
        match self.entries.iter().position(|e| !e.present() || e.handler_address() == 0) {
            Some(vector) => Err(IdtError::MissingEntry(vector as u8)),
            None => Ok(()),
        }
    }

    /// Load this IDT for the current CPU. Refuses to load a table with missing vectors.
    pub unsafe fn load(&'static self) -> Result<(), IdtError> {
        self.validate()?;
        let idtr = DescriptorTablePointer {
            limit: (mem::size_of::<Idt>() - 1) as u16,
            base: self as *const Idt as u64,
        };
        asm!("lidt [{}]", in(reg) &idtr, options(readonly, nostack, preserves_flags));
        log::debug!("[IDT] loaded {} gates from {:p}", IDT_ENTRIES, self);
        Ok(())
    }
}

impl ops::Index<u8> for Idt {
    type Output = IdtEntry;

    fn index(&self, idx: u8) -> &IdtEntry {
        &self.entries[idx as usize]
    }
}

impl ops::IndexMut<u8> for Idt {
    fn index_mut(&mut self, idx: u8) -> &mut IdtEntry {
        &mut self.entries[idx as usize]
    }
}

/// An entry in the interrupt descriptor table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C, packed)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    /// `[MBZ:5][IST:3]`
    ist: u8,
    /// `[P:1][DPL:2][MBZ:1][Type:4]`
    type_attr: u8,
    offset_middle: u16,
    offset_high: u32,
    reserved: u32,
}

// sanity check that everything adds up in terms of size
assert_eq_size!(IdtEntry, [u64; 2]);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GateType(u8);

impl GateType {
    pub const INTERRUPT_GATE: GateType = GateType(0x0E);
    pub const TRAP_GATE: GateType = GateType(0x0F);
}

/// Type and privilege of a gate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GateAttributes {
    pub gate_type: GateType,
    pub privilege: Ring,
}

impl GateAttributes {
    /// Ring 0 interrupt gate (`0x8E` once present). Clears IF on entry.
    pub const INTERRUPT: GateAttributes = GateAttributes { gate_type: GateType::INTERRUPT_GATE, privilege: Ring::RING0 };
    /// Ring 0 trap gate (`0x8F` once present). Leaves IF untouched.
    pub const TRAP: GateAttributes = GateAttributes { gate_type: GateType::TRAP_GATE, privilege: Ring::RING0 };
}

impl IdtEntry {
    const DPL_MASK: u8 = 0b0110_0000;
    const TYPE_MASK: u8 = 0b0000_1111;
    const PRESENT_MASK: u8 = 0b1000_0000;
    const IST_MASK: u8 = 0b0000_0111;

    /// Create a new non-present, DPL 0 and empty interrupt gate with the invalid selector 0.
    pub const fn empty() -> IdtEntry {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: GateType::INTERRUPT_GATE.0,
            offset_middle: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    /// Return whether this entry is present.
    pub fn present(&self) -> bool {
        self.type_attr & Self::PRESENT_MASK != 0
    }

    /// Set the present bit of the entry.
    pub fn set_present(&mut self, value: bool) {
        if value {
            self.type_attr |= Self::PRESENT_MASK;
        } else {
            self.type_attr &= !Self::PRESENT_MASK;
        }
    }

    /// The raw type and attribute byte, e.g. `0x8E` for a present interrupt gate.
    pub fn type_attr(&self) -> u8 {
        self.type_attr
    }

    pub fn handler_address(&self) -> usize {
        (self.offset_low as usize) |
            ((self.offset_middle as usize) << 16) |
            ((self.offset_high as usize) << 32)
    }

    pub fn set_handler_address(&mut self, addr: usize) {
        self.offset_low = (addr & 0xFFFF) as u16;
        self.offset_middle = ((addr >> 16) & 0xFFFF) as u16;
        self.offset_high = ((addr >> 32) & 0xFFFF_FFFF) as u32;
    }

    /// Offset in the GDT that determines the segment used for this gate.
    pub fn selector(&self) -> Selector {
        Selector(self.selector)
    }

    pub fn set_selector(&mut self, selector: Selector) {
        self.selector = selector.0
    }

    /// The TSS interrupt stack slot used by this gate, 0 if the stack is not switched.
    pub fn stack_index(&self) -> u8 {
        self.ist & Self::IST_MASK
    }

    pub fn set_stack_index(&mut self, index: u8) {
        self.ist = index & Self::IST_MASK;
    }

    pub fn gate_type(&self) -> GateType {
        GateType(self.type_attr & Self::TYPE_MASK)
    }

    pub fn set_gate_type(&mut self, gate_type: GateType) {
        self.type_attr = (self.type_attr & !Self::TYPE_MASK) | gate_type.0
    }

    /// The privilege level required to call this gate.
    pub fn descriptor_privilege(&self) -> Ring {
        match Ring::new((self.type_attr & Self::DPL_MASK) >> 5) {
            Some(ring) => ring,
            None => unreachable!("two bit field"),
        }
    }

    pub fn set_descriptor_privilege(&mut self, descriptor_privilege: Ring) {
        self.type_attr = (self.type_attr & !Self::DPL_MASK) | ((descriptor_privilege.number() << 5) & Self::DPL_MASK)
    }
}
