//! Diagnostic module - error and warning reporting infrastructure.
//!
//! Diagnostics are created through the fluent [`DiagnosticBuilder`], reported
//! to a thread-safe [`Handler`], and rendered to text by [`render`] honoring
//! the driver's diagnostic flags.
//!
//! ```
//! use swc_util::diagnostic::{DiagnosticBuilder, Handler};
//! use swc_util::Span;
//!
//! let handler = Handler::new();
//! DiagnosticBuilder::error("unresolved symbol `foo` at call site")
//!     .span(Span::DUMMY)
//!     .help("declare the function before using it")
//!     .emit(&handler);
//! assert!(handler.has_errors());
//! ```

mod builder;
mod codes;
mod render;

pub use builder::DiagnosticBuilder;
pub use codes::DiagnosticCode;
pub use codes::{
    E_ARG_BAD_VALUE, E_ARG_MISSING_VALUE, E_ARG_UNKNOWN, E_FRAME_TOO_LARGE, E_HARDWARE_EXCEPTION,
    E_MICRO_ASM_SYNTAX, E_NO_INPUT_FILES, E_UNENCODABLE_OPERANDS, E_UNRESOLVED_SYMBOL,
    E_UNSUPPORTED_ARCH, W_EMPTY_FUNCTION,
};
pub use render::{ColorChoice, RenderOptions};

use crate::span::{SourceMap, Span};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Diagnostic severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// An error that prevents the function's codegen
    Error,
    /// A warning that doesn't stop codegen
    Warning,
    /// Additional information attached to another diagnostic
    Note,
    /// A suggestion for fixing an issue
    Help,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
            Level::Help => write!(f, "help"),
        }
    }
}

/// A note or help attached to a primary diagnostic, with an optional
/// location of its own
#[derive(Clone, Debug)]
pub struct SubDiagnostic {
    pub level: Level,
    pub message: String,
    pub span: Option<Span>,
}

/// A diagnostic message with severity and location
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub span: Span,
    pub code: Option<DiagnosticCode>,
    pub children: Vec<SubDiagnostic>,
}

impl Diagnostic {
    pub fn new(level: Level, message: impl Into<String>, span: Span) -> Self {
        Self {
            level,
            message: message.into(),
            span,
            code: None,
            children: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Warning, message, span)
    }
}

/// Thread-safe collector for diagnostics
///
/// Jobs report into the handler from worker threads; the driver drains and
/// renders at top level.
#[derive(Debug, Default)]
pub struct Handler {
    diags: Mutex<Vec<Diagnostic>>,
    errors: AtomicUsize,
    warnings: AtomicUsize,
    silent: AtomicBool,
}

impl Handler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a diagnostic
    pub fn report(&self, diag: Diagnostic) {
        match diag.level {
            Level::Error => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            Level::Warning => {
                self.warnings.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if !self.silent.load(Ordering::Relaxed) {
            self.diags.lock().push(diag);
        }
    }

    /// Shorthand for a plain error
    pub fn error(&self, message: impl Into<String>, span: Span) {
        self.report(Diagnostic::error(message, span));
    }

    /// Shorthand for a plain warning
    pub fn warning(&self, message: impl Into<String>, span: Span) {
        self.report(Diagnostic::warning(message, span));
    }

    pub fn has_errors(&self) -> bool {
        self.errors.load(Ordering::Relaxed) > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Suppress collection (counts still accumulate)
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::Relaxed);
    }

    /// Drain every collected diagnostic
    pub fn take_all(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diags.lock())
    }

    /// Render every collected diagnostic to a string, draining the handler
    pub fn render_all(&self, sources: &SourceMap, opts: &RenderOptions) -> String {
        let mut out = String::new();
        for diag in self.take_all() {
            out.push_str(&render::render(&diag, sources, opts));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_counts_levels() {
        let handler = Handler::new();
        handler.error("bad", Span::DUMMY);
        handler.warning("meh", Span::DUMMY);
        handler.error("worse", Span::DUMMY);
        assert_eq!(handler.error_count(), 2);
        assert_eq!(handler.warning_count(), 1);
        assert!(handler.has_errors());
        assert_eq!(handler.take_all().len(), 3);
    }

    #[test]
    fn silent_handler_still_counts() {
        let handler = Handler::new();
        handler.set_silent(true);
        handler.error("hidden", Span::DUMMY);
        assert!(handler.has_errors());
        assert!(handler.take_all().is_empty());
    }
}
