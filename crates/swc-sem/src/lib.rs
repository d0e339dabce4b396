//! swc-sem - Semantic collaborators consumed by the backend.
//!
//! The backend never owns types, constants or symbols; it reads them through
//! the managers defined here. All three managers intern their values behind a
//! reader-writer lock with a double-checked insert, and hand out plain `Copy`
//! references (`TypeRef`, `ConstantRef`, `SymbolRef`) that stay valid for the
//! life of the compilation.
//!
//! The typed AST in [`ast`] is the read-only input surface of the code
//! generator ([`ast::SemaNodeView`] is the per-node view it sees). The
//! frontend producing it is outside this repository's scope; tests and the
//! driver build modules programmatically.

pub mod ast;
pub mod constant;
pub mod symbols;
pub mod types;

pub use ast::{AstFunction, AstNode, AstNodeRef, Module, SemaNodeView};
pub use constant::{ConstantManager, ConstantRef, ConstantValue};
pub use symbols::{CallConvention, FuncSymbol, SymbolRef, SymbolTable};
pub use types::{TypeKind, TypeManager, TypeRef};
