//! Decoding of the fault cause registers and error codes.
//!
//! Handlers never look at raw error code bits, they get a `FaultContext` or a
//! `SelectorErrorCode` instead.

use core::fmt;

use amd64::{PhysAddr, VirtAddr};

use crate::frame::TrapFrame;

bitflags! {
    /// The error code the CPU pushes for a page fault.
    pub struct PageFaultError: u64 {
        /// The page was present, the access violated its protection.
        const PROTECTION_VIOLATION = 1 << 0;
        const WRITE = 1 << 1;
        const USER_MODE = 1 << 2;
        /// A reserved bit was set in one of the paging structures.
        const RESERVED_BIT = 1 << 3;
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// Everything known about a page fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FaultContext {
    /// The linear address that could not be accessed.
    pub address: VirtAddr,
    /// The top-level page table that was active.
    pub page_table: PhysAddr,
    pub error: PageFaultError,
    pub rip: u64,
}

impl FaultContext {
    pub fn new(address: VirtAddr, page_table: PhysAddr, error_code: u64, rip: u64) -> FaultContext {
        FaultContext {
            address,
            page_table,
            error: PageFaultError::from_bits_truncate(error_code),
            rip,
        }
    }

    /// Read the fault address and page table base of the fault described by `frame`.
    /// Only meaningful inside the page fault handler, before anything else can fault.
    pub fn capture(frame: &TrapFrame) -> FaultContext {
        FaultContext::new(
            VirtAddr(amd64::cpu::read_cr2()),
            amd64::cpu::read_cr3(),
            frame.error_code,
            frame.rip,
        )
    }

    /// Faults on pages that are not present may be resolvable by demand paging.
    pub fn is_not_present(&self) -> bool {
        !self.error.contains(PageFaultError::PROTECTION_VIOLATION)
    }
}

impl fmt::Display for FaultContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "faulting address: {:#018x}", self.address.0)?;
        writeln!(f, "page table (CR3): {:#018x}", self.page_table.0)?;
        writeln!(f, "error code:       {:#x}", self.error.bits())?;
        let e = self.error;
        writeln!(f, "  {}", if e.contains(PageFaultError::PROTECTION_VIOLATION) { "protection violation" } else { "page not present" })?;
        writeln!(f, "  {} access", if e.contains(PageFaultError::WRITE) { "write" } else { "read" })?;
        writeln!(f, "  {} mode", if e.contains(PageFaultError::USER_MODE) { "user" } else { "kernel" })?;
        if e.contains(PageFaultError::RESERVED_BIT) {
            writeln!(f, "  reserved bit set in a paging structure")?;
        }
        if e.contains(PageFaultError::INSTRUCTION_FETCH) {
            writeln!(f, "  instruction fetch")?;
        }
        write!(f, "instruction:      {:#018x}", self.rip)
    }
}

/// Descriptor table named by a selector error code.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DescriptorTable {
    Gdt,
    Idt,
    Ldt,
}

/// Error code of faults caused by a segment selector, e.g. general protection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SelectorErrorCode {
    /// The fault was caused by an event external to the program.
    pub external: bool,
    pub table: DescriptorTable,
    pub index: u16,
}

impl SelectorErrorCode {
    /// Decode `error_code`. Zero means the fault was not related to a selector.
    pub fn decode(error_code: u64) -> Option<SelectorErrorCode> {
        if error_code == 0 {
            return None;
        }
        let table = match (error_code >> 1) & 0b11 {
            0b00 => DescriptorTable::Gdt,
            0b10 => DescriptorTable::Ldt,
            _ => DescriptorTable::Idt,
        };
        Some(SelectorErrorCode {
            external: error_code & 1 != 0,
            table,
            index: ((error_code >> 3) & 0x1FFF) as u16,
        })
    }
}

impl fmt::Display for SelectorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} selector index {:#x}{}", self.table, self.index, if self.external { " (external)" } else { "" })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_fault_bits() {
        let ctx = FaultContext::new(VirtAddr(0xDEAD_B000), PhysAddr(0x1000), 0b10110, 0x10_0000);
        assert!(ctx.is_not_present());
        assert!(ctx.error.contains(PageFaultError::WRITE | PageFaultError::USER_MODE | PageFaultError::INSTRUCTION_FETCH));
        assert!(!ctx.error.contains(PageFaultError::RESERVED_BIT));

        let report = format!("{}", ctx);
        assert!(report.contains("page not present"), "report = {}", report);
        assert!(report.contains("write access"), "report = {}", report);
        assert!(report.contains("user mode"), "report = {}", report);
        assert!(report.contains("instruction fetch"), "report = {}", report);
        assert!(report.contains("0x00000000deadb000"), "report = {}", report);
    }

    #[test]
    fn protection_violation_is_not_demand() {
        let ctx = FaultContext::new(VirtAddr(0x1000), PhysAddr(0), 0b011, 0);
        assert!(!ctx.is_not_present());
        assert!(format!("{}", ctx).contains("protection violation"));
    }

    #[test]
    fn selector_error_decoding() {
        assert_eq!(SelectorErrorCode::decode(0), None);
        // IDT vector 0x0D, external
        let code = (0x0D << 3) | 0b011;
        assert_eq!(SelectorErrorCode::decode(code), Some(SelectorErrorCode { external: true, table: DescriptorTable::Idt, index: 0x0D }));
        assert_eq!(SelectorErrorCode::decode(0x18).map(|s| s.table), Some(DescriptorTable::Gdt));
        assert_eq!(SelectorErrorCode::decode(0x1C).map(|s| (s.table, s.index)), Some((DescriptorTable::Ldt, 3)));
    }
}
