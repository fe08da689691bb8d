//! Interrupt routing: the cascaded 8259 PICs, the IRQ handler registry, the CPU exception
//! table and the dispatcher deciding what happens to a trap.
//!
//! Nothing in here touches the IDT or the trap entry code. The kernel owns the entry
//! stubs and hands every captured `TrapFrame` to a `Dispatcher`.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate static_assertions;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub mod dispatch;
pub mod exceptions;
pub mod fault;
pub mod frame;
pub mod irq;
pub mod pic;

pub use self::dispatch::{classify, dispatch_exception, Dispatcher, ExceptionPolicy, Outcome, TrapKind};
pub use self::frame::TrapFrame;
