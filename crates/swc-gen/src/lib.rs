//! swc-gen - AST-driven code generation and backend orchestration.
//!
//! [`codegen::CodeGen`] walks one typed AST function and drives the
//! MicroBuilder's emit operations; [`backend`] wraps that (plus the pass
//! pipeline and the encoder) into per-function jobs scheduled on the job
//! pool, producing one [`backend::FunctionArtifact`] per function.

pub mod backend;
pub mod codegen;
mod error;

pub use backend::{compile_builder, Backend, BackendOptions, FunctionArtifact, TaskContext};
pub use codegen::{CodeGen, CodeGenNodePayload, CodeGenOutcome, PayloadKind, StorageKind};
pub use error::BackendError;
