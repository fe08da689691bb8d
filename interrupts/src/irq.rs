//! Registry of device handlers for the 16 PIC lines.

use core::fmt;

use crate::pic::PIC_LINES;

/// A device driver's interrupt routine. Runs in trap context with interrupts disabled,
/// so it must not wait for anything that needs another interrupt to happen.
///
/// Any state the handler needs travels in `self`.
pub trait IrqHandler: Sync {
    fn handle(&self, line: u8, error_code: u64);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegisterError {
    LineOutOfRange(u8),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RegisterError::LineOutOfRange(line) => write!(f, "IRQ line {} out of range (0-{})", line, PIC_LINES - 1),
        }
    }
}

pub struct IrqRegistry {
    handlers: [Option<&'static dyn IrqHandler>; PIC_LINES as usize],
}

impl IrqRegistry {
    pub const fn new() -> IrqRegistry {
        IrqRegistry {
            handlers: [None; PIC_LINES as usize],
        }
    }

    /// Install `handler` for `line`, replacing a previously registered one.
    pub fn register(&mut self, line: u8, handler: &'static dyn IrqHandler) -> Result<(), RegisterError> {
        let slot = match self.handlers.get_mut(line as usize) {
            Some(slot) => slot,
            None => {
                warn!("[IRQ] refusing to register handler for line {}", line);
                return Err(RegisterError::LineOutOfRange(line));
            }
        };
        if slot.is_some() {
            debug!("[IRQ] replacing handler of line {}", line);
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Remove the handler of `line` and return it.
    pub fn unregister(&mut self, line: u8) -> Option<&'static dyn IrqHandler> {
        self.handlers.get_mut(line as usize).and_then(|slot| slot.take())
    }

    pub fn is_registered(&self, line: u8) -> bool {
        self.handlers.get(line as usize).map_or(false, |slot| slot.is_some())
    }

    /// Run the handler of `line`. Returns whether there was one.
    pub fn dispatch(&self, line: u8, error_code: u64) -> bool {
        match self.handlers.get(line as usize) {
            Some(Some(handler)) => {
                handler.handle(line, error_code);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::boxed::Box;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts invocations and remembers the last line it saw.
    #[derive(Default)]
    pub struct Counter {
        pub calls: AtomicUsize,
        pub last_line: AtomicUsize,
    }

    impl Counter {
        pub fn leak() -> &'static Counter {
            Box::leak(Box::new(Counter::default()))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IrqHandler for Counter {
        fn handle(&self, line: u8, _error_code: u64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_line.store(line as usize, Ordering::SeqCst);
        }
    }

    #[test]
    fn registered_handler_is_called() {
        let counter = Counter::leak();
        let mut registry = IrqRegistry::new();
        registry.register(1, counter).unwrap();
        assert!(registry.dispatch(1, 0));
        assert!(!registry.dispatch(2, 0), "line 2 has no handler");
        assert_eq!(counter.calls(), 1);
        assert_eq!(counter.last_line.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_range_line_rejected() {
        let mut registry = IrqRegistry::new();
        assert_eq!(registry.register(16, Counter::leak()), Err(RegisterError::LineOutOfRange(16)));
        assert_eq!(registry.register(255, Counter::leak()), Err(RegisterError::LineOutOfRange(255)));
        assert!(!registry.dispatch(255, 0));
        assert!((0..16).all(|l| !registry.is_registered(l)));
    }

    #[test]
    fn reregistration_replaces() {
        let first = Counter::leak();
        let second = Counter::leak();
        let mut registry = IrqRegistry::new();
        registry.register(4, first).unwrap();
        registry.register(4, second).unwrap();
        registry.dispatch(4, 0);
        assert_eq!((first.calls(), second.calls()), (0, 1));
        assert!(registry.unregister(4).is_some());
        assert!(!registry.dispatch(4, 0));
    }
}
