//! Kernel core: brings up the trap machinery and the memory core, then idles.
//!
//! The 32 bit boot code enters long mode with the first GiB identity mapped and
//! calls [`kernel_main`] with the physical address of the Multiboot2 information.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

pub mod bootmem;
pub mod cmdline;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod gdt;
pub mod logger;
pub mod memory;
pub mod traps;

#[cfg(not(test))]
mod panic;

use core::fmt;

use amd64::{cpu, PhysAddr};
use log::LevelFilter;
use multiboot2::Multiboot2Info;

use crate::cmdline::Options;

/// Log `what` and stop this CPU.
fn fatal(what: &str, err: &dyn fmt::Display) -> ! {
    error!("{}: {}", what, err);
    cpu::halt_forever()
}

#[no_mangle]
pub extern "C" fn kernel_main(multiboot_info: usize) -> ! {
    logger::init(LevelFilter::Info);
    gdt::init();
    if let Err(err) = traps::init() {
        fatal("trap setup failed", &err);
    }
    unsafe { cpu::enable_interrupts() };
    traps::smoke_test();

    let info = match unsafe { Multiboot2Info::from_addr(multiboot_info as *const u8) } {
        Ok(info) => info,
        Err(err) => fatal("invalid boot information", &err),
    };

    let options = info.command_line().map(Options::from_cmdline).unwrap_or_default();
    logger::set_level(options.log_level);

    let boot_info_range = info.physical_range(PhysAddr(multiboot_info));
    let boot = match bootmem::read_boot_memory(&info, &[boot_info_range]) {
        Ok(boot) => boot,
        Err(err) => fatal("cannot read boot memory", &err),
    };

    if options.memmap {
        diagnostics::print_memory_map(&info);
        diagnostics::print_regions(&boot.regions);
    }

    memory::init(&boot.regions);

    if options.selftest {
        match memory::selftest() {
            Ok(()) => info!("[MEM] selftest passed"),
            Err(err) => error!("[MEM] selftest failed: {}", err),
        }
    }

    info!("initialization complete");
    loop {
        unsafe { cpu::hlt() };
    }
}
