use core::fmt;

/// Register state saved by the trap entry code, lowest address first.
///
/// The entry stub pushes a zero error code for vectors where the CPU does not
/// provide one, so the layout is the same for every vector.
#[derive(Debug, Clone, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rbp: u64,
    pub vector: u64,
    pub error_code: u64,
    // pushed by the CPU
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

assert_eq_size!(TrapFrame, [u64; 22]);

impl TrapFrame {
    pub fn vector(&self) -> u8 {
        self.vector as u8
    }
}

impl fmt::Display for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RIP={:016x} CS={:04x} RFLAGS={:016x}", self.rip, self.cs, self.rflags)?;
        writeln!(f, "RSP={:016x} SS={:04x} ERR={:016x}", self.rsp, self.ss, self.error_code)?;
        writeln!(f, "RAX={:016x} RBX={:016x} RCX={:016x} RDX={:016x}", self.rax, self.rbx, self.rcx, self.rdx)?;
        writeln!(f, "RSI={:016x} RDI={:016x} RBP={:016x} R8 ={:016x}", self.rsi, self.rdi, self.rbp, self.r8)?;
        writeln!(f, "R9 ={:016x} R10={:016x} R11={:016x} R12={:016x}", self.r9, self.r10, self.r11, self.r12)?;
        write!(f, "R13={:016x} R14={:016x} R15={:016x}", self.r13, self.r14, self.r15)
    }
}
