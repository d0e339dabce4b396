//! Typed AST consumed by the code generator.
//!
//! Nodes are arena-stored with integer handles; cycles and parent links are
//! expressed through handle lookups, never through pointers. The code
//! generator reads each node through its [`SemaNodeView`].

use swc_util::{define_idx, IndexVec, Span, Symbol};

use crate::constant::{ConstantManager, ConstantRef, ConstantValue};
use crate::symbols::{CallConvention, SymbolRef, SymbolTable};
use crate::types::{TypeManager, TypeRef};

define_idx!(AstNodeRef);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One typed AST node
#[derive(Clone, Debug)]
pub enum AstNode {
    IntLit { value: u64 },
    FloatLit { value: f64 },
    LocalGet { index: u32 },
    LocalSet { index: u32, value: AstNodeRef },
    Binary { op: BinaryOp, lhs: AstNodeRef, rhs: AstNodeRef },
    Unary { op: UnaryOp, operand: AstNodeRef },
    Compare { op: CompareOp, lhs: AstNodeRef, rhs: AstNodeRef },
    Call { callee: Symbol, args: Vec<AstNodeRef> },
    Return { value: Option<AstNodeRef> },
    Block { stmts: Vec<AstNodeRef> },
    If { cond: AstNodeRef, then_blk: AstNodeRef, else_blk: Option<AstNodeRef> },
    While { cond: AstNodeRef, body: AstNodeRef },
}

/// The read-only per-node view the code generator sees
#[derive(Clone, Copy, Debug)]
pub struct SemaNodeView {
    pub type_ref: TypeRef,
    pub cst_ref: Option<ConstantRef>,
    pub sym: Option<SymbolRef>,
}

impl SemaNodeView {
    pub fn typed(type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            cst_ref: None,
            sym: None,
        }
    }

    pub fn cst(&self, constants: &ConstantManager) -> Option<ConstantValue> {
        self.cst_ref.map(|r| constants.get(r))
    }
}

/// One function's typed AST
pub struct AstFunction {
    pub name: Symbol,
    pub conv: CallConvention,
    pub ret_type: TypeRef,
    pub body: Option<AstNodeRef>,
    pub locals: Vec<TypeRef>,
    nodes: IndexVec<AstNodeRef, AstNode>,
    views: IndexVec<AstNodeRef, SemaNodeView>,
    spans: IndexVec<AstNodeRef, Span>,
}

impl AstFunction {
    pub fn new(name: Symbol, conv: CallConvention, ret_type: TypeRef) -> Self {
        Self {
            name,
            conv,
            ret_type,
            body: None,
            locals: Vec::new(),
            nodes: IndexVec::new(),
            views: IndexVec::new(),
            spans: IndexVec::new(),
        }
    }

    pub fn add_node(&mut self, node: AstNode, view: SemaNodeView, span: Span) -> AstNodeRef {
        let r = self.nodes.push(node);
        self.views.push(view);
        self.spans.push(span);
        r
    }

    pub fn add_local(&mut self, ty: TypeRef) -> u32 {
        self.locals.push(ty);
        self.locals.len() as u32 - 1
    }

    pub fn node(&self, r: AstNodeRef) -> &AstNode {
        &self.nodes[r]
    }

    pub fn view(&self, r: AstNodeRef) -> SemaNodeView {
        self.views[r]
    }

    pub fn span(&self, r: AstNodeRef) -> Span {
        self.spans[r]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// A compilation module: functions plus the shared read-only managers
pub struct Module {
    pub functions: Vec<AstFunction>,
    pub types: TypeManager,
    pub constants: ConstantManager,
    pub symbols: SymbolTable,
}

impl Module {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            types: TypeManager::new(),
            constants: ConstantManager::new(),
            symbols: SymbolTable::new(),
        }
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;

    #[test]
    fn build_small_function() {
        let module = Module::new();
        let s64 = module.types.add_type(TypeKind::S64);
        let mut func = AstFunction::new(Symbol::intern("answer"), CallConvention::C, s64);
        let lit = func.add_node(
            AstNode::IntLit { value: 42 },
            SemaNodeView::typed(s64),
            Span::DUMMY,
        );
        let ret = func.add_node(
            AstNode::Return { value: Some(lit) },
            SemaNodeView::typed(s64),
            Span::DUMMY,
        );
        func.body = Some(ret);
        assert_eq!(func.node_count(), 2);
        assert!(matches!(func.node(lit), AstNode::IntLit { value: 42 }));
        assert_eq!(func.view(lit).type_ref, s64);
    }
}
