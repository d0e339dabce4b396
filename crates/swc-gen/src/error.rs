//! Backend error types.

use thiserror::Error;

/// Errors surfaced at the backend's configuration boundary
///
/// Per-function problems travel through the diagnostic handler instead.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("unsupported architecture `{0}` (only x86_64 is recognized)")]
    UnsupportedArch(String),

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}
