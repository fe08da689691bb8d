//! The single place diagnostic text leaves the kernel.
//!
//! A console or serial driver can attach itself as the sink. Until then, and whenever the
//! sink is busy because a trap interrupted a write, text goes straight to COM1.

use core::fmt;

use amd64::cpu;
use amd64::io::com::{SerialPort, COM1_ADDR};
use spin::Mutex;

type Sink = &'static mut (dyn fmt::Write + Send);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

/// Route all further output to `writer`.
pub fn attach(writer: Sink) {
    cpu::without_interrupts(move || *SINK.lock() = Some(writer));
}

/// Write formatted text to the attached sink, or to COM1 if there is none or it is busy.
/// Never waits for a lock, so it may be called from any trap handler.
pub fn write_fmt(args: fmt::Arguments) {
    if let Some(mut sink) = SINK.try_lock() {
        if let Some(writer) = sink.as_mut() {
            let _ = writer.write_fmt(args);
            return;
        }
    }
    write_raw(args);
}

/// Write to COM1 without going through the sink. The UART is assumed to be set up by
/// whoever booted us, or by the serial driver.
pub fn write_raw(args: fmt::Arguments) {
    let mut com1 = unsafe { SerialPort::new(COM1_ADDR) };
    let _ = fmt::Write::write_fmt(&mut com1, args);
}
