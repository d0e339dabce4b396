//! Serialized logger with ANSI colors.
//!
//! Every piece of user-visible output that is not a diagnostic goes through
//! the [`Logger`]. Output is serialized through one mutex so concurrent jobs
//! never interleave their dumps; callers take a [`ScopedLog`] for a whole
//! multi-line block.

use parking_lot::{Mutex, MutexGuard};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// ANSI color palette used by the logger and the instruction printer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogColor {
    Reset,
    Dim,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
}

impl LogColor {
    pub fn to_ansi(self) -> &'static str {
        match self {
            LogColor::Reset => "\x1b[0m",
            LogColor::Dim => "\x1b[2m",
            LogColor::Red => "\x1b[31m",
            LogColor::Green => "\x1b[32m",
            LogColor::Yellow => "\x1b[33m",
            LogColor::Blue => "\x1b[34m",
            LogColor::Magenta => "\x1b[35m",
            LogColor::Cyan => "\x1b[36m",
            LogColor::White => "\x1b[37m",
            LogColor::BrightRed => "\x1b[91m",
            LogColor::BrightGreen => "\x1b[92m",
            LogColor::BrightYellow => "\x1b[93m",
            LogColor::BrightBlue => "\x1b[94m",
            LogColor::BrightMagenta => "\x1b[95m",
            LogColor::BrightCyan => "\x1b[96m",
        }
    }
}

/// Serializing logger
#[derive(Debug, Default)]
pub struct Logger {
    mutex: Mutex<()>,
    color_enabled: AtomicBool,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_color_enabled(&self, enabled: bool) {
        self.color_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn color_enabled(&self) -> bool {
        self.color_enabled.load(Ordering::Relaxed)
    }

    /// Lock the logger for a block of output
    pub fn lock(&self) -> ScopedLog<'_> {
        ScopedLog {
            _guard: self.mutex.lock(),
            color: self.color_enabled(),
        }
    }

    /// Print a single message (locks internally)
    pub fn print(&self, text: &str) {
        self.lock().print(text);
    }
}

/// Holds the logger for a block of output
pub struct ScopedLog<'a> {
    _guard: MutexGuard<'a, ()>,
    color: bool,
}

impl ScopedLog<'_> {
    pub fn print(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    pub fn print_colored(&self, color: LogColor, text: &str) {
        if self.color {
            self.print(color.to_ansi());
            self.print(text);
            self.print(LogColor::Reset.to_ansi());
        } else {
            self.print(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_have_distinct_codes() {
        assert_ne!(LogColor::Red.to_ansi(), LogColor::Green.to_ansi());
        assert_eq!(LogColor::Reset.to_ansi(), "\x1b[0m");
    }

    #[test]
    fn logger_lock_is_reentrant_free() {
        let logger = Logger::new();
        {
            let lock = logger.lock();
            lock.print("");
        }
        // A second lock after release must not deadlock.
        let lock = logger.lock();
        lock.print("");
    }
}
