use core::fmt;

use log::{LevelFilter, Log, Metadata, Record};

use crate::console;

/// Forwards `log` records to the console sink as `[LEVEL] target: message` lines.
pub struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            console::write_fmt(format_args!("{}", Line(record)));
        }
    }

    fn flush(&self) {}
}

struct Line<'a, 'r>(&'a Record<'r>);

impl<'a, 'r> fmt::Display for Line<'a, 'r> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{:<5}] {}: {}", self.0.level(), self.0.target(), self.0.args())
    }
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger. Only the first call has an effect on the logger, every call
/// sets the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

#[cfg(test)]
mod test {
    use super::*;
    use log::Level;

    #[test]
    fn line_format() {
        let record = Record::builder()
            .level(Level::Warn)
            .target("amd64::idt")
            .args(format_args!("loaded 256 gates"))
            .build();
        assert_eq!(format!("{}", Line(&record)), "[WARN ] amd64::idt: loaded 256 gates\n");
    }
}
