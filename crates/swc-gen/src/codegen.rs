//! AST to micro-instruction lowering.
//!
//! `CodeGen` visits one typed function body and emits through the
//! MicroBuilder. Each visited node produces a [`CodeGenNodePayload`]
//! carrying the value's register and storage classification to the parent
//! node. Operand widths come from the type manager; immediate values from
//! the constant manager; call targets from the symbol table.

use swc_micro::{
    regs, CallArg, CallConvKind, CallTarget, MicroBuilder, MicroCond, MicroOp, MicroOpBits,
    MicroReg,
};
use swc_sem::ast::{AstFunction, AstNode, AstNodeRef, BinaryOp, CompareOp, UnaryOp};
use swc_sem::{CallConvention, ConstantManager, ConstantValue, SymbolTable, TypeManager, TypeRef};
use swc_util::Symbol;

/// How a node's value reaches its parent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadKind {
    AddressValue,
    PlainValue,
    ExternalFunctionAddress,
    PointerStorageU64,
    DerefPointerStorageU64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Address,
    Value,
}

/// Per-node result handed to the parent
#[derive(Clone, Copy, Debug)]
pub struct CodeGenNodePayload {
    pub kind: PayloadKind,
    pub reg: MicroReg,
    pub type_ref: TypeRef,
    pub storage_kind: StorageKind,
    pub value_u64: u64,
}

impl CodeGenNodePayload {
    fn value(reg: MicroReg, type_ref: TypeRef) -> Self {
        Self {
            kind: PayloadKind::PlainValue,
            reg,
            type_ref,
            storage_kind: StorageKind::Value,
            value_u64: 0,
        }
    }

    fn unit(type_ref: TypeRef) -> Self {
        Self {
            kind: PayloadKind::PlainValue,
            reg: MicroReg::INVALID,
            type_ref,
            storage_kind: StorageKind::Value,
            value_u64: 0,
        }
    }
}

/// What a code generation attempt ended with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeGenOutcome {
    Done,
    /// A call target is not declared yet; retry after it commits
    NeedsSymbol(Symbol),
}

pub fn conv_kind(conv: CallConvention) -> CallConvKind {
    match conv {
        CallConvention::C => CallConvKind::C,
        CallConvention::WindowsX64 => CallConvKind::WindowsX64,
        CallConvention::Host => CallConvKind::Host,
    }
}

pub struct CodeGen<'a> {
    func: &'a AstFunction,
    types: &'a TypeManager,
    constants: &'a ConstantManager,
    symbols: &'a SymbolTable,
    builder: &'a mut MicroBuilder,
    local_offsets: Vec<u64>,
}

impl<'a> CodeGen<'a> {
    pub fn new(
        func: &'a AstFunction,
        types: &'a TypeManager,
        constants: &'a ConstantManager,
        symbols: &'a SymbolTable,
        builder: &'a mut MicroBuilder,
    ) -> Self {
        Self {
            func,
            types,
            constants,
            symbols,
            builder,
            local_offsets: Vec::new(),
        }
    }

    /// Lower the whole function body
    pub fn run(&mut self) -> CodeGenOutcome {
        // Locals live in 8-byte frame slots below rbp.
        self.local_offsets = (0..self.func.locals.len())
            .map(|i| (i as u64 + 1) * 8)
            .collect();
        self.builder.func.frame.user_stack_size = self.func.locals.len() as u32 * 8;

        self.builder.emit_enter();
        if let Some(body) = self.func.body {
            if let Err(symbol) = self.gen_node(body) {
                return CodeGenOutcome::NeedsSymbol(symbol);
            }
        }
        self.builder.emit_ret();
        self.builder.emit_end();
        CodeGenOutcome::Done
    }

    fn bits_of(&self, ty: TypeRef) -> MicroOpBits {
        let size = self.types.size_of(ty);
        match MicroOpBits::from_size(size) {
            MicroOpBits::Zero => MicroOpBits::B64,
            bits => bits,
        }
    }

    fn fresh_for(&mut self, ty: TypeRef) -> MicroReg {
        if self.types.is_float(ty) {
            self.builder.virtual_float_reg()
        } else {
            self.builder.virtual_int_reg()
        }
    }

    fn local_slot(&self, index: u32) -> u64 {
        (-(self.local_offsets[index as usize] as i64)) as u64
    }

    fn gen_node(&mut self, r: AstNodeRef) -> Result<CodeGenNodePayload, Symbol> {
        self.builder.set_source_ref(self.func.span(r));
        let view = self.func.view(r);
        let ty = view.type_ref;

        match self.func.node(r).clone() {
            AstNode::IntLit { value } => {
                let reg = self.builder.virtual_int_reg();
                self.builder.emit_load_reg_imm(reg, value, self.bits_of(ty));
                let mut payload = CodeGenNodePayload::value(reg, ty);
                payload.value_u64 = value;
                Ok(payload)
            }
            AstNode::FloatLit { value } => {
                let constant = self.constants.add_constant(ConstantValue::from_f64(value));
                let reg = self.builder.virtual_float_reg();
                self.builder
                    .emit_load_constant_reloc_value(reg, constant.0, self.bits_of(ty));
                Ok(CodeGenNodePayload::value(reg, ty))
            }
            AstNode::LocalGet { index } => {
                let local_ty = self.func.locals[index as usize];
                let reg = self.fresh_for(local_ty);
                self.builder.emit_load_reg_mem(
                    reg,
                    regs::RBP,
                    self.local_slot(index),
                    self.bits_of(local_ty),
                );
                Ok(CodeGenNodePayload::value(reg, local_ty))
            }
            AstNode::LocalSet { index, value } => {
                let payload = self.gen_node(value)?;
                let local_ty = self.func.locals[index as usize];
                self.builder.emit_load_mem_reg(
                    regs::RBP,
                    self.local_slot(index),
                    payload.reg,
                    self.bits_of(local_ty),
                );
                Ok(CodeGenNodePayload::unit(ty))
            }
            AstNode::Binary { op, lhs, rhs } => {
                let lhs = self.gen_node(lhs)?;
                let rhs = self.gen_node(rhs)?;
                self.gen_binary(op, lhs, rhs, ty)
            }
            AstNode::Unary { op, operand } => {
                let payload = self.gen_node(operand)?;
                self.gen_unary(op, payload, ty)
            }
            AstNode::Compare { op, lhs, rhs } => {
                let lhs = self.gen_node(lhs)?;
                let rhs = self.gen_node(rhs)?;
                let operand_ty = lhs.type_ref;
                let bits = self.bits_of(operand_ty);
                self.builder.emit_cmp_reg_reg(lhs.reg, rhs.reg, bits);
                let cond = compare_cond(
                    op,
                    self.types.is_signed(operand_ty),
                    self.types.is_float(operand_ty),
                );
                let dst = self.builder.virtual_int_reg();
                self.builder.emit_set_cond_reg(dst, cond);
                Ok(CodeGenNodePayload::value(dst, ty))
            }
            AstNode::Call { callee, args } => self.gen_call(callee, &args, ty),
            AstNode::Return { value } => {
                if let Some(value) = value {
                    let payload = self.gen_node(value)?;
                    let conv = swc_micro::CallConv::get(self.builder.func.conv);
                    let bits = self.bits_of(payload.type_ref);
                    if self.types.is_float(payload.type_ref) {
                        self.builder
                            .emit_load_reg_reg(conv.float_return, payload.reg, bits);
                    } else {
                        self.builder
                            .emit_load_reg_reg(conv.int_return, payload.reg, bits);
                    }
                }
                self.builder.emit_ret();
                Ok(CodeGenNodePayload::unit(ty))
            }
            AstNode::Block { stmts } => {
                let mut last = CodeGenNodePayload::unit(ty);
                for stmt in stmts {
                    last = self.gen_node(stmt)?;
                }
                Ok(last)
            }
            AstNode::If {
                cond,
                then_blk,
                else_blk,
            } => {
                let cond = self.gen_node(cond)?;
                let bits = self.bits_of(cond.type_ref);
                let else_label = self.builder.create_label();
                let end_label = self.builder.create_label();
                self.builder.emit_cmp_reg_imm(cond.reg, 0, bits);
                self.builder
                    .emit_jump_to_label(MicroCond::Equal, MicroOpBits::B32, else_label);
                self.gen_node(then_blk)?;
                self.builder
                    .emit_jump_to_label(MicroCond::Unconditional, MicroOpBits::B32, end_label);
                self.builder.place_label(else_label);
                if let Some(else_blk) = else_blk {
                    self.gen_node(else_blk)?;
                }
                self.builder.place_label(end_label);
                Ok(CodeGenNodePayload::unit(ty))
            }
            AstNode::While { cond, body } => {
                let start_label = self.builder.create_label();
                let end_label = self.builder.create_label();
                self.builder.place_label(start_label);
                let cond = self.gen_node(cond)?;
                let bits = self.bits_of(cond.type_ref);
                self.builder.emit_cmp_reg_imm(cond.reg, 0, bits);
                self.builder
                    .emit_jump_to_label(MicroCond::Equal, MicroOpBits::B32, end_label);
                self.gen_node(body)?;
                self.builder
                    .emit_jump_to_label(MicroCond::Unconditional, MicroOpBits::B32, start_label);
                self.builder.place_label(end_label);
                Ok(CodeGenNodePayload::unit(ty))
            }
        }
    }

    fn gen_binary(
        &mut self,
        op: BinaryOp,
        lhs: CodeGenNodePayload,
        rhs: CodeGenNodePayload,
        ty: TypeRef,
    ) -> Result<CodeGenNodePayload, Symbol> {
        let bits = self.bits_of(ty);
        let is_float = self.types.is_float(ty);
        let signed = self.types.is_signed(ty);

        let micro_op = if is_float {
            match op {
                BinaryOp::Add => MicroOp::FloatAdd,
                BinaryOp::Sub => MicroOp::FloatSubtract,
                BinaryOp::Mul => MicroOp::FloatMultiply,
                BinaryOp::Div => MicroOp::FloatDivide,
                BinaryOp::And => MicroOp::FloatAnd,
                BinaryOp::Xor => MicroOp::FloatXor,
                _ => MicroOp::FloatAdd,
            }
        } else {
            match op {
                BinaryOp::Add => MicroOp::Add,
                BinaryOp::Sub => MicroOp::Subtract,
                BinaryOp::Mul => MicroOp::MultiplySigned,
                BinaryOp::Div => {
                    if signed {
                        MicroOp::DivideSigned
                    } else {
                        MicroOp::DivideUnsigned
                    }
                }
                BinaryOp::Rem => {
                    if signed {
                        MicroOp::ModuloSigned
                    } else {
                        MicroOp::ModuloUnsigned
                    }
                }
                BinaryOp::And => MicroOp::And,
                BinaryOp::Or => MicroOp::Or,
                BinaryOp::Xor => MicroOp::Xor,
                BinaryOp::Shl => MicroOp::ShiftLeft,
                BinaryOp::Shr => {
                    if signed {
                        MicroOp::ShiftArithmeticRight
                    } else {
                        MicroOp::ShiftRight
                    }
                }
            }
        };

        // Constrain operands for the RAX/RDX and RCX sequences the
        // legalizer will materialize.
        if micro_op.is_division() {
            for reg in [lhs.reg, rhs.reg] {
                if reg.is_virtual() {
                    self.builder.add_virtual_reg_forbidden_phys_reg(reg, regs::RAX);
                    self.builder.add_virtual_reg_forbidden_phys_reg(reg, regs::RDX);
                }
            }
        }
        if micro_op.is_shift() && lhs.reg.is_virtual() {
            self.builder
                .add_virtual_reg_forbidden_phys_reg(lhs.reg, regs::RCX);
        }

        self.builder
            .emit_op_binary_reg_reg(lhs.reg, rhs.reg, micro_op, bits);
        Ok(CodeGenNodePayload::value(lhs.reg, ty))
    }

    fn gen_unary(
        &mut self,
        op: UnaryOp,
        payload: CodeGenNodePayload,
        ty: TypeRef,
    ) -> Result<CodeGenNodePayload, Symbol> {
        let bits = self.bits_of(ty);
        if self.types.is_float(ty) {
            // Negation flips the sign bit through a constant mask.
            let mask_bits = if bits == MicroOpBits::B32 {
                0x8000_0000u64
            } else {
                0x8000_0000_0000_0000u64
            };
            let constant = self.constants.add_constant(ConstantValue::Int(mask_bits));
            let mask = self.builder.virtual_float_reg();
            self.builder
                .emit_load_constant_reloc_value(mask, constant.0, bits);
            self.builder
                .emit_op_binary_reg_reg(payload.reg, mask, MicroOp::FloatXor, bits);
            return Ok(CodeGenNodePayload::value(payload.reg, ty));
        }
        let micro_op = match op {
            UnaryOp::Neg => MicroOp::Negate,
            UnaryOp::Not => MicroOp::BitwiseNot,
        };
        self.builder.emit_op_unary_reg(payload.reg, micro_op, bits);
        Ok(CodeGenNodePayload::value(payload.reg, ty))
    }

    fn gen_call(
        &mut self,
        callee: Symbol,
        args: &[AstNodeRef],
        ty: TypeRef,
    ) -> Result<CodeGenNodePayload, Symbol> {
        let Some(sym_ref) = self.symbols.lookup(callee) else {
            return Err(callee);
        };
        let symbol = self.symbols.get(sym_ref);
        let conv = conv_kind(symbol.conv);

        let mut call_args = Vec::with_capacity(args.len());
        for &arg in args {
            let payload = self.gen_node(arg)?;
            call_args.push(CallArg::Reg(payload.reg, self.bits_of(payload.type_ref)));
        }

        let target = if symbol.is_extern {
            CallTarget::Extern(callee)
        } else {
            CallTarget::Local(callee)
        };
        self.builder.emit_call_with_args(target, conv, &call_args);

        if self.types.size_of(ty) == 0 {
            return Ok(CodeGenNodePayload::unit(ty));
        }

        // Move the return value out of its convention register before the
        // allocator runs.
        let conv_table = swc_micro::CallConv::get(conv);
        let bits = self.bits_of(ty);
        let dst = self.fresh_for(ty);
        if self.types.is_float(ty) {
            self.builder
                .emit_load_reg_reg(dst, conv_table.float_return, bits);
        } else {
            self.builder
                .emit_load_reg_reg(dst, conv_table.int_return, bits);
        }
        Ok(CodeGenNodePayload::value(dst, ty))
    }
}

fn compare_cond(op: CompareOp, signed: bool, is_float: bool) -> MicroCond {
    let unsigned_like = is_float || !signed;
    match op {
        CompareOp::Eq => MicroCond::Equal,
        CompareOp::Ne => MicroCond::NotEqual,
        CompareOp::Lt if unsigned_like => MicroCond::Below,
        CompareOp::Lt => MicroCond::Less,
        CompareOp::Le if unsigned_like => MicroCond::BelowOrEqual,
        CompareOp::Le => MicroCond::LessOrEqual,
        CompareOp::Gt if unsigned_like => MicroCond::Above,
        CompareOp::Gt => MicroCond::Greater,
        CompareOp::Ge if unsigned_like => MicroCond::AboveOrEqual,
        CompareOp::Ge => MicroCond::GreaterOrEqual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swc_micro::MicroOpcode;
    use swc_sem::ast::SemaNodeView;
    use swc_sem::{Module, TypeKind};
    use swc_util::Span;

    fn lower(build: impl FnOnce(&Module, &mut AstFunction)) -> (MicroBuilder, CodeGenOutcome) {
        let module = Module::new();
        let s64 = module.types.add_type(TypeKind::S64);
        let mut func = AstFunction::new(Symbol::intern("test"), CallConvention::C, s64);
        build(&module, &mut func);
        let mut builder = MicroBuilder::new(func.name, conv_kind(func.conv));
        let outcome = CodeGen::new(
            &func,
            &module.types,
            &module.constants,
            &module.symbols,
            &mut builder,
        )
        .run();
        (builder, outcome)
    }

    fn opcodes(builder: &MicroBuilder) -> Vec<MicroOpcode> {
        builder
            .func
            .instrs
            .refs()
            .map(|r| builder.func.instr(r).op)
            .collect()
    }

    #[test]
    fn return_of_a_sum_lowers_to_imm_loads_and_add() {
        let (builder, outcome) = lower(|module, func| {
            let s64 = module.types.add_type(TypeKind::S64);
            let view = SemaNodeView::typed(s64);
            let a = func.add_node(AstNode::IntLit { value: 2 }, view, Span::DUMMY);
            let b = func.add_node(AstNode::IntLit { value: 3 }, view, Span::DUMMY);
            let sum = func.add_node(
                AstNode::Binary {
                    op: BinaryOp::Add,
                    lhs: a,
                    rhs: b,
                },
                view,
                Span::DUMMY,
            );
            let ret = func.add_node(AstNode::Return { value: Some(sum) }, view, Span::DUMMY);
            func.body = Some(ret);
        });

        assert_eq!(outcome, CodeGenOutcome::Done);
        let ops = opcodes(&builder);
        assert_eq!(
            ops,
            vec![
                MicroOpcode::Enter,
                MicroOpcode::LoadRegImm,
                MicroOpcode::LoadRegImm,
                MicroOpcode::OpBinaryRegReg,
                MicroOpcode::LoadRegReg, // rax = result
                MicroOpcode::Ret,
                MicroOpcode::Ret, // implicit function-end return
                MicroOpcode::End,
            ]
        );
    }

    #[test]
    fn unresolved_call_reports_the_symbol() {
        let (_, outcome) = lower(|module, func| {
            let s64 = module.types.add_type(TypeKind::S64);
            let view = SemaNodeView::typed(s64);
            let call = func.add_node(
                AstNode::Call {
                    callee: Symbol::intern("missing_fn"),
                    args: vec![],
                },
                view,
                Span::DUMMY,
            );
            func.body = Some(call);
        });
        assert_eq!(
            outcome,
            CodeGenOutcome::NeedsSymbol(Symbol::intern("missing_fn"))
        );
    }

    #[test]
    fn division_records_forbidden_constraints() {
        let (builder, _) = lower(|module, func| {
            let s64 = module.types.add_type(TypeKind::S64);
            let view = SemaNodeView::typed(s64);
            let a = func.add_node(AstNode::IntLit { value: 10 }, view, Span::DUMMY);
            let b = func.add_node(AstNode::IntLit { value: 3 }, view, Span::DUMMY);
            let div = func.add_node(
                AstNode::Binary {
                    op: BinaryOp::Div,
                    lhs: a,
                    rhs: b,
                },
                view,
                Span::DUMMY,
            );
            func.body = Some(div);
        });
        // Both operands must avoid RAX and RDX.
        assert_eq!(builder.func.forbidden.len(), 2);
        for forbidden in builder.func.forbidden.values() {
            assert!(forbidden.contains(&regs::RAX));
            assert!(forbidden.contains(&regs::RDX));
        }
    }

    #[test]
    fn while_loop_places_both_labels() {
        let (builder, _) = lower(|module, func| {
            let s64 = module.types.add_type(TypeKind::S64);
            let bool_ty = module.types.add_type(TypeKind::Bool);
            let view = SemaNodeView::typed(s64);
            let cond_view = SemaNodeView::typed(bool_ty);
            let cond = func.add_node(AstNode::IntLit { value: 0 }, cond_view, Span::DUMMY);
            let body = func.add_node(AstNode::Block { stmts: vec![] }, view, Span::DUMMY);
            let while_node = func.add_node(AstNode::While { cond, body }, view, Span::DUMMY);
            func.body = Some(while_node);
        });
        assert!(builder.func.all_labels_placed());
    }
}
