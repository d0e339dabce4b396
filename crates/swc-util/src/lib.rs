//! swc-util - Core utilities and foundation types.
//!
//! This crate provides the fundamental building blocks shared by every other
//! crate in the compiler: typed indices, the global string interner, source
//! spans and the source map, the diagnostic infrastructure, the serialized
//! logger, and process exit codes.
//!
//! Everything here is designed as a zero-cost abstraction: typed indices
//! compile down to plain integers, symbols are 4-byte handles, and spans are
//! plain `Copy` records.

pub mod diagnostic;
pub mod exit_code;
pub mod index_vec;
pub mod logger;
pub mod span;
pub mod symbol;

pub use diagnostic::{Diagnostic, DiagnosticBuilder, DiagnosticCode, Handler, Level};
pub use exit_code::ExitCode;
pub use index_vec::{Idx, IndexVec};
pub use logger::{LogColor, Logger};
pub use span::{FileId, SourceMap, Span};
pub use symbol::Symbol;

// Re-export commonly used hash collections
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
