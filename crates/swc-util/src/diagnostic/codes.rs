//! Stable diagnostic codes.
//!
//! Codes are grouped by area: 0xxx for the command line, 7xxx for the
//! backend. The numeric id is shown when `--diag-id` is on.

use std::fmt;

/// A stable identifier for a class of diagnostics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagnosticCode {
    pub id: u32,
    pub name: &'static str,
}

impl DiagnosticCode {
    pub const fn new(id: u32, name: &'static str) -> Self {
        Self { id, name }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.id)
    }
}

// Command-line errors
pub const E_ARG_UNKNOWN: DiagnosticCode = DiagnosticCode::new(1, "unknown_argument");
pub const E_ARG_MISSING_VALUE: DiagnosticCode = DiagnosticCode::new(2, "missing_argument_value");
pub const E_ARG_BAD_VALUE: DiagnosticCode = DiagnosticCode::new(3, "bad_argument_value");
pub const E_NO_INPUT_FILES: DiagnosticCode = DiagnosticCode::new(4, "no_input_files");
pub const E_UNSUPPORTED_ARCH: DiagnosticCode = DiagnosticCode::new(5, "unsupported_arch");

// Backend errors
pub const E_UNRESOLVED_SYMBOL: DiagnosticCode = DiagnosticCode::new(7001, "unresolved_symbol");
pub const E_UNENCODABLE_OPERANDS: DiagnosticCode =
    DiagnosticCode::new(7002, "unencodable_operands");
pub const E_FRAME_TOO_LARGE: DiagnosticCode = DiagnosticCode::new(7003, "frame_too_large");
pub const E_HARDWARE_EXCEPTION: DiagnosticCode = DiagnosticCode::new(7004, "hardware_exception");
pub const E_MICRO_ASM_SYNTAX: DiagnosticCode = DiagnosticCode::new(7005, "micro_asm_syntax");

// Backend warnings
pub const W_EMPTY_FUNCTION: DiagnosticCode = DiagnosticCode::new(7101, "empty_function");
