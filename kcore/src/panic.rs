use core::panic::PanicInfo;

use amd64::cpu;

use crate::console;

#[panic_handler]
fn panic(panic_info: &PanicInfo) -> ! {
    // the sink may be held by the code that panicked, write_fmt falls back to COM1 then
    console::write_fmt(format_args!("\n[PANIC] {}\n", panic_info));
    cpu::halt_forever()
}
