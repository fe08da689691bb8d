//! Routing of captured traps to exception policies and IRQ handlers.

use amd64::io::PortIo;

use crate::exceptions::Exception;
use crate::frame::TrapFrame;
use crate::irq::{IrqHandler, IrqRegistry, RegisterError};
use crate::pic::ChainedPics;

/// What a vector means under the current PIC configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapKind {
    Exception(Exception),
    Irq(u8),
    Unknown(u8),
}

pub fn classify<P: PortIo>(vector: u8, pics: &ChainedPics<P>) -> TrapKind {
    if let Some(exception) = Exception::from_vector(vector) {
        TrapKind::Exception(exception)
    } else if let Some(line) = pics.handles_vector(vector) {
        TrapKind::Irq(line)
    } else {
        TrapKind::Unknown(vector)
    }
}

/// How execution continues after a trap.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// Return to the interrupted code.
    Resume,
    /// The machine state is not trusted anymore. The caller stops the CPU.
    Halt,
}

/// The kernel's reaction to CPU exceptions.
///
/// Only page faults and general protection faults get a say in whether execution continues.
/// Every other exception, and in particular the double fault, is reported and halts.
pub trait ExceptionPolicy {
    fn page_fault(&mut self, frame: &TrapFrame) -> Outcome;

    fn general_protection(&mut self, frame: &TrapFrame) -> Outcome {
        self.report(Exception::GENERAL_PROTECTION, frame);
        Outcome::Halt
    }

    /// Produce the diagnostic for a fatal exception.
    fn report(&mut self, exception: Exception, frame: &TrapFrame);

    /// A vector that is neither an exception nor routed through the PICs.
    fn unknown_vector(&mut self, frame: &TrapFrame);
}

/// Apply the fixed exception policy. Needs no PIC state, so it also serves traps that
/// arrive while the dispatcher itself is busy.
pub fn dispatch_exception(exception: Exception, frame: &TrapFrame, policy: &mut dyn ExceptionPolicy) -> Outcome {
    match exception {
        Exception::DOUBLE_FAULT => {
            // never resumed, whatever the policy thinks
            policy.report(Exception::DOUBLE_FAULT, frame);
            Outcome::Halt
        }
        Exception::PAGE_FAULT => policy.page_fault(frame),
        Exception::GENERAL_PROTECTION => policy.general_protection(frame),
        other => {
            policy.report(other, frame);
            Outcome::Halt
        }
    }
}

pub struct Dispatcher<P> {
    pics: ChainedPics<P>,
    irqs: IrqRegistry,
}

impl<P: PortIo> Dispatcher<P> {
    pub const fn new(bus: P) -> Dispatcher<P> {
        Dispatcher {
            pics: ChainedPics::new(bus),
            irqs: IrqRegistry::new(),
        }
    }

    pub fn pics(&mut self) -> &mut ChainedPics<P> {
        &mut self.pics
    }

    pub fn register_irq(&mut self, line: u8, handler: &'static dyn IrqHandler) -> Result<(), RegisterError> {
        self.irqs.register(line, handler)
    }

    pub fn unregister_irq(&mut self, line: u8) -> Option<&'static dyn IrqHandler> {
        self.irqs.unregister(line)
    }

    pub fn dispatch(&mut self, frame: &TrapFrame, policy: &mut dyn ExceptionPolicy) -> Outcome {
        match classify(frame.vector(), &self.pics) {
            TrapKind::Exception(exception) => dispatch_exception(exception, frame, policy),
            TrapKind::Irq(line) => {
                if !self.irqs.dispatch(line, frame.error_code) {
                    trace!("[IRQ] no handler for line {}", line);
                }
                // acknowledge in any case, an unacknowledged line blocks all lower priority ones
                self.pics.send_eoi(line);
                Outcome::Resume
            }
            TrapKind::Unknown(_) => {
                policy.unknown_vector(frame);
                Outcome::Resume
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::irq::test::Counter;
    use crate::pic::test::RecordingBus;
    use std::vec::Vec;

    /// Remembers what it was asked and claims success for everything it may decide on.
    #[derive(Default)]
    struct Lenient {
        reported: Vec<u8>,
        page_faults: usize,
        unknown: Vec<u8>,
    }

    impl ExceptionPolicy for Lenient {
        fn page_fault(&mut self, _frame: &TrapFrame) -> Outcome {
            self.page_faults += 1;
            Outcome::Resume
        }

        fn general_protection(&mut self, frame: &TrapFrame) -> Outcome {
            self.reported.push(frame.vector());
            Outcome::Resume
        }

        fn report(&mut self, exception: Exception, _frame: &TrapFrame) {
            self.reported.push(exception.vector());
        }

        fn unknown_vector(&mut self, frame: &TrapFrame) {
            self.unknown.push(frame.vector());
        }
    }

    fn frame(vector: u8) -> TrapFrame {
        TrapFrame { vector: vector as u64, ..TrapFrame::default() }
    }

    fn remapped() -> Dispatcher<RecordingBus> {
        let mut d = Dispatcher::new(RecordingBus::default());
        d.pics().remap(0x20, 0x28).unwrap();
        d
    }

    fn writes_after_remap(d: &mut Dispatcher<RecordingBus>) -> Vec<(u16, u8)> {
        // 8 initialization words and 2 mask writes
        d.pics().bus().writes[10..].to_vec()
    }

    #[test]
    fn irq_one_reaches_handler_and_master_eoi() {
        let counter = Counter::leak();
        let mut d = remapped();
        d.register_irq(1, counter).unwrap();
        let mut policy = Lenient::default();

        assert_eq!(d.dispatch(&frame(0x21), &mut policy), Outcome::Resume);
        assert_eq!(counter.calls(), 1, "exactly one invocation");
        assert_eq!(writes_after_remap(&mut d), vec![(0x20, 0x20)], "EOI only to the master");
        assert!(policy.reported.is_empty() && policy.unknown.is_empty());
    }

    #[test]
    fn unhandled_irq_is_acknowledged() {
        let mut d = remapped();
        let mut policy = Lenient::default();
        assert_eq!(d.dispatch(&frame(0x2C), &mut policy), Outcome::Resume);
        assert_eq!(writes_after_remap(&mut d), vec![(0xA0, 0x20), (0x20, 0x20)]);
    }

    #[test]
    fn double_fault_always_halts() {
        let mut d = remapped();
        let mut policy = Lenient::default();
        let mut f = frame(8);
        // garbage stack pointer at the time of the fault
        f.rsp = 0xDEAD_BEEF;
        assert_eq!(d.dispatch(&f, &mut policy), Outcome::Halt);
        assert_eq!(policy.reported, vec![8]);
        assert_eq!(policy.page_faults, 0);
    }

    #[test]
    fn exceptions_are_routed() {
        let mut d = remapped();
        let mut policy = Lenient::default();
        assert_eq!(d.dispatch(&frame(14), &mut policy), Outcome::Resume);
        assert_eq!(policy.page_faults, 1);
        assert_eq!(d.dispatch(&frame(13), &mut policy), Outcome::Resume);
        assert_eq!(d.dispatch(&frame(0), &mut policy), Outcome::Halt);
        assert_eq!(d.dispatch(&frame(3), &mut policy), Outcome::Halt);
        assert_eq!(policy.reported, vec![13, 0, 3]);
    }

    #[test]
    fn unknown_vector_reported_and_resumed() {
        let mut d = remapped();
        let mut policy = Lenient::default();
        assert_eq!(d.dispatch(&frame(0x80), &mut policy), Outcome::Resume);
        assert_eq!(policy.unknown, vec![0x80]);
        assert!(writes_after_remap(&mut d).is_empty(), "no EOI for non-PIC vectors");
    }

    #[test]
    fn exceptions_need_no_dispatcher() {
        let mut policy = Lenient::default();
        assert_eq!(dispatch_exception(Exception::PAGE_FAULT, &frame(14), &mut policy), Outcome::Resume);
        assert_eq!(dispatch_exception(Exception::DOUBLE_FAULT, &frame(8), &mut policy), Outcome::Halt);
        assert_eq!(policy.page_faults, 1);
        assert_eq!(policy.reported, vec![8]);
    }

    #[test]
    fn classification_follows_remap() {
        let mut d = Dispatcher::new(RecordingBus::default());
        assert_eq!(classify(0x21, &d.pics), TrapKind::Unknown(0x21));
        d.pics().remap(0x20, 0x28).unwrap();
        assert_eq!(classify(0x21, &d.pics), TrapKind::Irq(1));
        assert_eq!(classify(0x0E, &d.pics), TrapKind::Exception(Exception::PAGE_FAULT));
    }
}
