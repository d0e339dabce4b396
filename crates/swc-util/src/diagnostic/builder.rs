//! Fluent builder for diagnostics.

use super::{Diagnostic, DiagnosticCode, Handler, Level, SubDiagnostic};
use crate::span::Span;

/// Builds a [`Diagnostic`] step by step
///
/// ```
/// use swc_util::diagnostic::{DiagnosticBuilder, E_UNRESOLVED_SYMBOL};
/// use swc_util::Span;
///
/// let diag = DiagnosticBuilder::error("unresolved symbol `memcpy` at call site")
///     .code(E_UNRESOLVED_SYMBOL)
///     .span(Span::DUMMY)
///     .note("the symbol was never declared")
///     .build();
/// assert_eq!(diag.children.len(), 1);
/// ```
pub struct DiagnosticBuilder {
    diag: Diagnostic,
}

impl DiagnosticBuilder {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            diag: Diagnostic::new(level, message, Span::DUMMY),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Level::Warning, message)
    }

    pub fn span(mut self, span: Span) -> Self {
        self.diag.span = span;
        self
    }

    pub fn code(mut self, code: DiagnosticCode) -> Self {
        self.diag.code = Some(code);
        self
    }

    pub fn note(mut self, message: impl Into<String>) -> Self {
        self.diag.children.push(SubDiagnostic {
            level: Level::Note,
            message: message.into(),
            span: None,
        });
        self
    }

    pub fn note_at(mut self, message: impl Into<String>, span: Span) -> Self {
        self.diag.children.push(SubDiagnostic {
            level: Level::Note,
            message: message.into(),
            span: Some(span),
        });
        self
    }

    pub fn help(mut self, message: impl Into<String>) -> Self {
        self.diag.children.push(SubDiagnostic {
            level: Level::Help,
            message: message.into(),
            span: None,
        });
        self
    }

    pub fn build(self) -> Diagnostic {
        self.diag
    }

    /// Build and report to a handler
    pub fn emit(self, handler: &Handler) {
        handler.report(self.diag);
    }
}
