//! Thin, mostly zero-cost wrappers around the AMD64 hardware structures and
//! privileged instructions the kernel core needs.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate static_assertions;
#[macro_use]
extern crate bitflags;

mod align;
mod addr;

pub mod cpu;
pub mod gdt;
pub mod idt;
pub mod io;
pub mod paging;
pub mod segments;
pub mod tss;

pub use self::align::*;
pub use self::addr::*;
