/*
 * Simple Logger
 *
 * Minimal `log` backend writing `LEVEL - message` lines to stderr. The
 * runtime itself only talks to the `log` facade; binaries and tests that
 * want to see its output install this logger once.
 */

use std::io::Write;

use log::{LevelFilter, Metadata, Record, SetLoggerError};

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: SimpleLogger = SimpleLogger;

/// Install the logger with the given maximum level
///
/// Only the first call in a process succeeds; later calls return the
/// `SetLoggerError` and leave the level unchanged.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}
