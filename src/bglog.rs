// Background log buffer
//
// Tasks log through the `log` macros without touching the console; the
// records pile up here until the owner drains them (e.g. a console
// command or a periodic flush task). Guarded by a critical section so
// a single static instance can serve as the global logger.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use critical_section::Mutex;
use log::{LevelFilter, Metadata, Record, SetLoggerError};

pub struct BgLog {
    lines: Mutex<RefCell<Vec<String>>>,
}

impl BgLog {
    pub const fn new() -> Self {
        Self {
            lines: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    pub fn push(&self, line: String) {
        critical_section::with(|cs| self.lines.borrow_ref_mut(cs).push(line));
    }

    /// All buffered lines, oldest first. Leaves the buffer empty.
    pub fn take(&self) -> Vec<String> {
        critical_section::with(|cs| core::mem::take(&mut *self.lines.borrow_ref_mut(cs)))
    }

    pub fn clear(&self) {
        critical_section::with(|cs| self.lines.borrow_ref_mut(cs).clear());
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.lines.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BgLog {
    fn default() -> Self {
        Self::new()
    }
}

impl log::Log for BgLog {
    // level filtering happens in the macros via log::max_level()
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.push(format!("{} - {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Install `logger` as the global logger.
pub fn init(logger: &'static BgLog, level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(logger).map(|()| log::set_max_level(level))
}
