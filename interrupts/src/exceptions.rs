//! The CPU-defined exception vectors 0 to 31.

/// An exception vector.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Exception(pub u8);

impl Exception {
    pub const DIVIDE_ERROR: Exception = Exception(0);
    pub const DEBUG: Exception = Exception(1);
    pub const NMI: Exception = Exception(2);
    pub const BREAKPOINT: Exception = Exception(3);
    pub const OVERFLOW: Exception = Exception(4);
    pub const BOUND_RANGE: Exception = Exception(5);
    pub const INVALID_OPCODE: Exception = Exception(6);
    pub const DEVICE_NOT_AVAILABLE: Exception = Exception(7);
    pub const DOUBLE_FAULT: Exception = Exception(8);
    pub const INVALID_TSS: Exception = Exception(10);
    pub const SEGMENT_NOT_PRESENT: Exception = Exception(11);
    pub const STACK_FAULT: Exception = Exception(12);
    pub const GENERAL_PROTECTION: Exception = Exception(13);
    pub const PAGE_FAULT: Exception = Exception(14);
    pub const X87_FLOATING_POINT: Exception = Exception(16);
    pub const ALIGNMENT_CHECK: Exception = Exception(17);
    pub const MACHINE_CHECK: Exception = Exception(18);
    pub const SIMD_FLOATING_POINT: Exception = Exception(19);
    pub const VIRTUALIZATION: Exception = Exception(20);
    pub const CONTROL_PROTECTION: Exception = Exception(21);
    pub const HYPERVISOR_INJECTION: Exception = Exception(28);
    pub const VMM_COMMUNICATION: Exception = Exception(29);
    pub const SECURITY: Exception = Exception(30);

    /// Number of vectors reserved for exceptions.
    pub const COUNT: u8 = 32;

    pub fn from_vector(vector: u8) -> Option<Exception> {
        if vector < Self::COUNT {
            Some(Exception(vector))
        } else {
            None
        }
    }

    pub fn vector(&self) -> u8 {
        self.0
    }

    /// Whether the CPU pushes an error code for this exception.
    pub fn has_error_code(&self) -> bool {
        matches!(self.0, 8 | 10..=14 | 17 | 21 | 29 | 30)
    }

    pub fn name(&self) -> &'static str {
        match self.0 {
            0 => "Divide Error",
            1 => "Debug",
            2 => "Non-Maskable Interrupt",
            3 => "Breakpoint",
            4 => "Overflow",
            5 => "Bound Range Exceeded",
            6 => "Invalid Opcode",
            7 => "Device Not Available",
            8 => "Double Fault",
            9 => "Coprocessor Segment Overrun",
            10 => "Invalid TSS",
            11 => "Segment Not Present",
            12 => "Stack-Segment Fault",
            13 => "General Protection Fault",
            14 => "Page Fault",
            16 => "x87 Floating-Point Exception",
            17 => "Alignment Check",
            18 => "Machine Check",
            19 => "SIMD Floating-Point Exception",
            20 => "Virtualization Exception",
            21 => "Control Protection Exception",
            28 => "Hypervisor Injection Exception",
            29 => "VMM Communication Exception",
            30 => "Security Exception",
            _ => "Reserved",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_code_vectors() {
        let with_code: std::vec::Vec<u8> = (0..32).filter(|&v| Exception(v).has_error_code()).collect();
        assert_eq!(with_code, vec![8, 10, 11, 12, 13, 14, 17, 21, 29, 30]);
    }

    #[test]
    fn range() {
        assert_eq!(Exception::from_vector(31).map(|e| e.name()), Some("Reserved"));
        assert_eq!(Exception::from_vector(32), None);
        assert_eq!(Exception::PAGE_FAULT.name(), "Page Fault");
    }
}
