//! `log` backend printing to COM1.

use crate::serial::COM1;

use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

/// Install the serial logger. Only call this once the serial port is initialized.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Format: `[LEVEL] target: message`
fn write_record<W: Write>(out: &mut W, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = write_record(&mut *COM1.lock(), record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use log::Level;
    use std::string::String;

    #[test]
    fn line_format() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::builder().args(format_args!("MADT has {} records", 6)).level(Level::Info).target("acpi").build(),
        )
        .unwrap();
        assert_eq!(out, "[INFO] acpi: MADT has 6 records\n");
    }
}
