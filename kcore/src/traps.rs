//! Trap entry: one assembly stub per vector, the IDT pointing at them and the glue
//! between the captured frame and the dispatcher.

use core::arch::global_asm;
use core::fmt;

use amd64::cpu;
use amd64::gdt::KERNEL_CODE_SELECTOR;
use amd64::idt::{GateAttributes, Idt, IdtError, IDT_ENTRIES};
use amd64::io::CpuPorts;
use interrupts::exceptions::Exception;
use interrupts::fault::SelectorErrorCode;
use interrupts::irq::{IrqHandler, RegisterError};
use interrupts::pic::PicError;
use interrupts::{dispatch_exception, Dispatcher, ExceptionPolicy, Outcome, TrapFrame};
use spin::{Mutex, Once};

use crate::config::{DOUBLE_FAULT_IST, GENERAL_PROTECTION_IST, PAGE_FAULT_IST, PIC_MASTER_BASE, PIC_SLAVE_BASE};
use crate::memory;

/// Distance between two entry stubs.
const STUB_SIZE: usize = 16;

// Every stub pushes a zero error code unless the CPU provides one, then the vector number,
// and jumps to the common part, which completes the `TrapFrame`.
global_asm!(
    ".section .text",
    ".p2align 4",
    ".global trap_stubs",
    "trap_stubs:",
    ".set trap_vector, 0",
    ".rept 256",
    ".p2align 4",
    ".if (trap_vector == 8) || ((trap_vector >= 10) && (trap_vector <= 14)) || (trap_vector == 17) || (trap_vector == 21) || (trap_vector == 29) || (trap_vector == 30)",
    ".else",
    "pushq $0",
    ".endif",
    "pushq $trap_vector",
    "jmp trap_common",
    ".set trap_vector, trap_vector + 1",
    ".endr",
    "",
    "trap_common:",
    "pushq %rbp",
    "pushq %r15",
    "pushq %r14",
    "pushq %r13",
    "pushq %r12",
    "pushq %r11",
    "pushq %r10",
    "pushq %r9",
    "pushq %r8",
    "pushq %rdi",
    "pushq %rsi",
    "pushq %rdx",
    "pushq %rcx",
    "pushq %rbx",
    "pushq %rax",
    "movq %rsp, %rdi",
    "cld",
    "call {entry}",
    "popq %rax",
    "popq %rbx",
    "popq %rcx",
    "popq %rdx",
    "popq %rsi",
    "popq %rdi",
    "popq %r8",
    "popq %r9",
    "popq %r10",
    "popq %r11",
    "popq %r12",
    "popq %r13",
    "popq %r14",
    "popq %r15",
    "popq %rbp",
    // vector and error code
    "addq $16, %rsp",
    "iretq",
    entry = sym trap_entry,
    options(att_syntax)
);

extern "C" {
    fn trap_stubs();
}

static IDT: Once<Idt> = Once::new();

static DISPATCHER: Mutex<Dispatcher<CpuPorts>> = Mutex::new(Dispatcher::new(CpuPorts));

/// Called by `trap_common` with interrupts disabled.
extern "C" fn trap_entry(frame: &TrapFrame) {
    let mut policy = KernelPolicy;
    let outcome = match Exception::from_vector(frame.vector()) {
        // exceptions can hit while an IRQ handler runs under the dispatcher lock
        Some(exception) => dispatch_exception(exception, frame, &mut policy),
        None => match DISPATCHER.try_lock() {
            Some(mut dispatcher) => dispatcher.dispatch(frame, &mut policy),
            None => {
                error!("[TRAP] vector {:#04x} arrived while dispatching", frame.vector());
                Outcome::Halt
            }
        },
    };
    if outcome == Outcome::Halt {
        error!("[TRAP] halting");
        cpu::halt_forever();
    }
}

/// IST slot of the gate for `vector`, 0 for the current stack.
fn stack_index(vector: u8) -> u8 {
    match Exception::from_vector(vector) {
        Some(Exception::DOUBLE_FAULT) => DOUBLE_FAULT_IST,
        Some(Exception::PAGE_FAULT) => PAGE_FAULT_IST,
        Some(Exception::GENERAL_PROTECTION) => GENERAL_PROTECTION_IST,
        _ => 0,
    }
}

/// An IDT with an interrupt gate to the stub of every vector.
fn build_idt(stubs: usize) -> Result<Idt, IdtError> {
    let mut idt = Idt::new();
    for vector in 0..IDT_ENTRIES {
        let vector = vector as u8;
        idt.install(vector, stubs + vector as usize * STUB_SIZE, KERNEL_CODE_SELECTOR, stack_index(vector), GateAttributes::INTERRUPT)?;
    }
    Ok(idt)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InitError {
    Idt(IdtError),
    Pic(PicError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            InitError::Idt(ref err) => write!(f, "IDT: {}", err),
            InitError::Pic(ref err) => write!(f, "PIC: {}", err),
        }
    }
}

/// Load the IDT and remap the PICs. The GDT with the fault stacks must be loaded already.
/// Interrupts stay disabled.
pub fn init() -> Result<(), InitError> {
    let idt = IDT.try_call_once(|| build_idt(trap_stubs as usize)).map_err(InitError::Idt)?;
    unsafe { idt.load() }.map_err(InitError::Idt)?;
    cpu::without_interrupts(|| DISPATCHER.lock().pics().remap(PIC_MASTER_BASE, PIC_SLAVE_BASE))
        .map_err(InitError::Pic)?;
    info!("[TRAP] {} vectors installed, IRQs at {:#04x} and {:#04x}", IDT_ENTRIES, PIC_MASTER_BASE, PIC_SLAVE_BASE);
    Ok(())
}

/// Route IRQ `line` to `handler`. Replaces a previously registered handler.
pub fn register_irq(line: u8, handler: &'static dyn IrqHandler) -> Result<(), RegisterError> {
    cpu::without_interrupts(|| DISPATCHER.lock().register_irq(line, handler))
}

pub fn unregister_irq(line: u8) -> Option<&'static dyn IrqHandler> {
    cpu::without_interrupts(|| DISPATCHER.lock().unregister_irq(line))
}

pub fn unmask_irq(line: u8) -> Result<(), PicError> {
    cpu::without_interrupts(|| DISPATCHER.lock().pics().unmask(line))
}

pub fn mask_irq(line: u8) -> Result<(), PicError> {
    cpu::without_interrupts(|| DISPATCHER.lock().pics().mask(line))
}

/// Raise the timer vector in software. Nothing is registered for it yet, so this checks
/// that an unhandled IRQ vector is acknowledged and returns.
pub fn smoke_test() {
    info!("[TRAP] testing software interrupt 0x20");
    unsafe { cpu::int_0x20() };
    info!("[TRAP] software interrupt returned");
}

/// What this kernel does about exceptions.
struct KernelPolicy;

impl ExceptionPolicy for KernelPolicy {
    fn page_fault(&mut self, frame: &TrapFrame) -> Outcome {
        memory::handle_page_fault(frame)
    }

    fn general_protection(&mut self, frame: &TrapFrame) -> Outcome {
        error!("[TRAP] === GENERAL PROTECTION FAULT ===");
        match SelectorErrorCode::decode(frame.error_code) {
            Some(selector) => error!("[TRAP] caused by {}", selector),
            None => error!("[TRAP] not selector related"),
        }
        error!("[TRAP] registers:\n{}", frame);
        Outcome::Halt
    }

    fn report(&mut self, exception: Exception, frame: &TrapFrame) {
        error!("[TRAP] === {} (vector {}) ===", exception.name(), exception.vector());
        error!("[TRAP] registers:\n{}", frame);
    }

    fn unknown_vector(&mut self, frame: &TrapFrame) {
        warn!("[TRAP] unexpected interrupt on vector {:#04x}", frame.vector());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_vector_gets_its_stub() {
        let base = 0xFFFF_8000_0010_0000;
        let idt = Box::new(build_idt(base).unwrap());
        assert_eq!(idt.validate(), Ok(()));
        for v in 0..=255u8 {
            assert_eq!(idt[v].handler_address(), base + v as usize * STUB_SIZE);
            assert_eq!(idt[v].selector(), KERNEL_CODE_SELECTOR);
            assert_eq!(idt[v].type_attr(), 0x8E);
        }
    }

    #[test]
    fn fault_vectors_use_guard_stacks() {
        let idt = Box::new(build_idt(0x1000).unwrap());
        assert_eq!(idt[8].stack_index(), DOUBLE_FAULT_IST);
        assert_eq!(idt[14].stack_index(), PAGE_FAULT_IST);
        assert_eq!(idt[13].stack_index(), GENERAL_PROTECTION_IST);
        assert!((0..=255u8).filter(|v| ![8, 13, 14].contains(v)).all(|v| idt[v].stack_index() == 0));
    }
}
