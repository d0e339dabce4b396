//! Instruction legalization.
//!
//! Rewrites shapes the encoder cannot express directly:
//! - 64-bit immediates on instructions that only encode sign-extended
//!   32-bit immediates are hoisted into a scratch register;
//! - variable shift counts are routed through RCX;
//! - divisions and modulos materialize RAX/RDX and the sign-extension
//!   instruction (`cdq`/`cqo`, denoted `OpUnaryReg(_, MoveSignExtend)`).

use crate::func::MicroFunction;
use crate::instr::{EncodeFlags, MicroOpcode};
use crate::operand::MicroOperand;
use crate::ops::{MicroOp, MicroOpBits};
use crate::pass::{MicroPass, MicroPassContext, MicroRegPrintMode};
use crate::reg::{regs, MicroReg};
use crate::rewrite::StreamRewriter;

fn fits_i32(value: u64) -> bool {
    value as i64 == (value as i32) as i64
}

/// Whether this op/width combination can keep a 64-bit immediate operand
fn imm_needs_hoist(bits: MicroOpBits, value: u64) -> bool {
    bits == MicroOpBits::B64 && !fits_i32(value)
}

#[derive(Default)]
pub struct LegalizePass;

impl MicroPass for LegalizePass {
    fn name(&self) -> &'static str {
        "legalize"
    }

    fn print_mode_before(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Concrete
    }

    fn print_mode_after(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Concrete
    }

    fn run(&mut self, ctx: &mut MicroPassContext<'_>) -> bool {
        let func = &mut *ctx.func;
        let mut changed = false;
        let mut rw = StreamRewriter::new(func);

        for old in func.instrs.refs() {
            let inst = *func.instr(old);
            match inst.op {
                MicroOpcode::OpBinaryRegReg => {
                    let ops = func.ops(old).to_vec();
                    let op = ops[3].micro_op();
                    if op.is_division() {
                        rw.begin(func, old);
                        emit_division(
                            &mut rw,
                            ops[0].reg(),
                            ops[1].reg(),
                            op,
                            ops[2].bits(),
                            inst.emit_flags,
                        );
                        changed = true;
                    } else if op.is_shift() && ops[1].reg() != regs::RCX {
                        debug_assert_ne!(ops[0].reg(), regs::RCX, "shift destination in rcx");
                        rw.begin(func, old);
                        rw.emit(
                            MicroOpcode::LoadRegReg,
                            EncodeFlags::none(),
                            &[
                                MicroOperand::Reg(regs::RCX),
                                MicroOperand::Reg(ops[1].reg()),
                                MicroOperand::Bits(MicroOpBits::B64),
                            ],
                        );
                        rw.emit(
                            MicroOpcode::OpBinaryRegReg,
                            inst.emit_flags,
                            &[
                                ops[0],
                                MicroOperand::Reg(regs::RCX),
                                ops[2],
                                ops[3],
                            ],
                        );
                        changed = true;
                    } else {
                        rw.keep(func, old);
                    }
                }
                MicroOpcode::OpBinaryRegImm => {
                    let ops = func.ops(old).to_vec();
                    let op = ops[2].micro_op();
                    let bits = ops[1].bits();
                    let value = ops[3].imm();
                    if op.is_division() {
                        rw.begin(func, old);
                        rw.emit(
                            MicroOpcode::LoadRegImm,
                            EncodeFlags::none(),
                            &[
                                MicroOperand::Reg(regs::R11),
                                MicroOperand::Bits(bits),
                                MicroOperand::Imm(value),
                            ],
                        );
                        emit_division(&mut rw, ops[0].reg(), regs::R11, op, bits, inst.emit_flags);
                        changed = true;
                    } else if imm_needs_hoist(bits, value) {
                        rw.begin(func, old);
                        rw.emit(
                            MicroOpcode::LoadRegImm,
                            EncodeFlags::none(),
                            &[
                                MicroOperand::Reg(regs::R11),
                                MicroOperand::Bits(MicroOpBits::B64),
                                MicroOperand::Imm(value),
                            ],
                        );
                        rw.emit(
                            MicroOpcode::OpBinaryRegReg,
                            inst.emit_flags,
                            &[
                                ops[0],
                                MicroOperand::Reg(regs::R11),
                                MicroOperand::Bits(bits),
                                ops[2],
                            ],
                        );
                        changed = true;
                    } else {
                        rw.keep(func, old);
                    }
                }
                MicroOpcode::CmpRegImm => {
                    let ops = func.ops(old).to_vec();
                    let bits = ops[1].bits();
                    let value = ops[2].imm();
                    if imm_needs_hoist(bits, value) {
                        rw.begin(func, old);
                        rw.emit(
                            MicroOpcode::LoadRegImm,
                            EncodeFlags::none(),
                            &[
                                MicroOperand::Reg(regs::R11),
                                MicroOperand::Bits(MicroOpBits::B64),
                                MicroOperand::Imm(value),
                            ],
                        );
                        rw.emit(
                            MicroOpcode::CmpRegReg,
                            inst.emit_flags,
                            &[ops[0], MicroOperand::Reg(regs::R11), MicroOperand::Bits(bits)],
                        );
                        changed = true;
                    } else {
                        rw.keep(func, old);
                    }
                }
                MicroOpcode::LoadMemImm => {
                    let ops = func.ops(old).to_vec();
                    let bits = ops[1].bits();
                    let value = ops[3].imm();
                    if imm_needs_hoist(bits, value) {
                        rw.begin(func, old);
                        rw.emit(
                            MicroOpcode::LoadRegImm,
                            EncodeFlags::none(),
                            &[
                                MicroOperand::Reg(regs::R11),
                                MicroOperand::Bits(MicroOpBits::B64),
                                MicroOperand::Imm(value),
                            ],
                        );
                        rw.emit(
                            MicroOpcode::LoadMemReg,
                            inst.emit_flags,
                            &[
                                ops[0],
                                MicroOperand::Reg(regs::R11),
                                MicroOperand::Bits(bits),
                                ops[2],
                            ],
                        );
                        changed = true;
                    } else {
                        rw.keep(func, old);
                    }
                }
                MicroOpcode::OpBinaryMemImm | MicroOpcode::CmpMemImm => {
                    let ops = func.ops(old).to_vec();
                    let bits = ops[1].bits();
                    let value_slot = if inst.op == MicroOpcode::OpBinaryMemImm { 4 } else { 3 };
                    let value = ops[value_slot].imm();
                    if imm_needs_hoist(bits, value) {
                        rw.begin(func, old);
                        rw.emit(
                            MicroOpcode::LoadRegImm,
                            EncodeFlags::none(),
                            &[
                                MicroOperand::Reg(regs::R11),
                                MicroOperand::Bits(MicroOpBits::B64),
                                MicroOperand::Imm(value),
                            ],
                        );
                        if inst.op == MicroOpcode::OpBinaryMemImm {
                            rw.emit(
                                MicroOpcode::OpBinaryMemReg,
                                inst.emit_flags,
                                &[
                                    ops[0],
                                    MicroOperand::Reg(regs::R11),
                                    MicroOperand::Bits(bits),
                                    ops[2],
                                    ops[3],
                                ],
                            );
                        } else {
                            rw.emit(
                                MicroOpcode::CmpMemReg,
                                inst.emit_flags,
                                &[
                                    ops[0],
                                    MicroOperand::Reg(regs::R11),
                                    MicroOperand::Bits(bits),
                                    ops[2],
                                ],
                            );
                        }
                        changed = true;
                    } else {
                        rw.keep(func, old);
                    }
                }
                _ => {
                    rw.keep(func, old);
                }
            }
        }

        rw.finish(func);
        changed
    }
}

/// RAX/RDX division sequence (S6)
fn emit_division(
    rw: &mut StreamRewriter,
    dst: MicroReg,
    divisor: MicroReg,
    op: MicroOp,
    bits: MicroOpBits,
    flags: EncodeFlags,
) {
    let signed = matches!(op, MicroOp::DivideSigned | MicroOp::ModuloSigned);
    let wants_remainder = matches!(op, MicroOp::ModuloSigned | MicroOp::ModuloUnsigned);

    // The divisor must survive the RAX/RDX materialization.
    let divisor = if divisor == regs::RAX || divisor == regs::RDX {
        rw.emit(
            MicroOpcode::LoadRegReg,
            EncodeFlags::none(),
            &[
                MicroOperand::Reg(regs::R10),
                MicroOperand::Reg(divisor),
                MicroOperand::Bits(bits),
            ],
        );
        regs::R10
    } else {
        divisor
    };

    if dst != regs::RAX {
        rw.emit(
            MicroOpcode::LoadRegReg,
            EncodeFlags::none(),
            &[
                MicroOperand::Reg(regs::RAX),
                MicroOperand::Reg(dst),
                MicroOperand::Bits(bits),
            ],
        );
    }

    if signed {
        // cdq / cqo
        rw.emit(
            MicroOpcode::OpUnaryReg,
            EncodeFlags::none(),
            &[
                MicroOperand::Reg(regs::RAX),
                MicroOperand::Bits(bits),
                MicroOperand::Op(MicroOp::MoveSignExtend),
            ],
        );
    } else {
        rw.emit(
            MicroOpcode::ClearReg,
            EncodeFlags::none(),
            &[MicroOperand::Reg(regs::RDX), MicroOperand::Bits(bits)],
        );
    }

    let div_op = if signed {
        MicroOp::DivideSigned
    } else {
        MicroOp::DivideUnsigned
    };
    rw.emit(
        MicroOpcode::OpUnaryReg,
        flags,
        &[
            MicroOperand::Reg(divisor),
            MicroOperand::Bits(bits),
            MicroOperand::Op(div_op),
        ],
    );

    let result = if wants_remainder { regs::RDX } else { regs::RAX };
    if dst != result {
        rw.emit(
            MicroOpcode::LoadRegReg,
            EncodeFlags::none(),
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(result),
                MicroOperand::Bits(bits),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MicroBuilder;
    use crate::ops::CallConvKind;
    use swc_util::{Handler, Logger, Symbol};

    fn run_pass(builder: &mut MicroBuilder) -> bool {
        let handler = Handler::new();
        let logger = Logger::new();
        let mut ctx = MicroPassContext {
            func: &mut builder.func,
            encoder: None,
            handler: &handler,
            logger: &logger,
            opt_level: crate::ops::BackendOptLevel::O0,
            pass_print: &[],
            print_file_path: "",
            print_source_line: 0,
        };
        LegalizePass.run(&mut ctx)
    }

    fn opcodes(func: &MicroFunction) -> Vec<MicroOpcode> {
        func.instrs.refs().map(|r| func.instr(r).op).collect()
    }

    #[test]
    fn division_materializes_rax_rdx_and_cqo() {
        // S6: rbx = rbx / rsi
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_op_binary_reg_reg(regs::RBX, regs::RSI, MicroOp::DivideSigned, MicroOpBits::B64);
        assert!(run_pass(&mut b));

        let ops = opcodes(&b.func);
        assert_eq!(
            ops,
            vec![
                MicroOpcode::LoadRegReg,  // rax = rbx
                MicroOpcode::OpUnaryReg,  // cqo
                MicroOpcode::OpUnaryReg,  // idiv rsi
                MicroOpcode::LoadRegReg,  // rbx = rax
            ]
        );
        let cqo = crate::store::InstrRef(1);
        assert_eq!(b.func.ops(cqo)[2].micro_op(), MicroOp::MoveSignExtend);
        let idiv = crate::store::InstrRef(2);
        assert_eq!(b.func.ops(idiv)[0].reg(), regs::RSI);
    }

    #[test]
    fn modulo_takes_result_from_rdx() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_op_binary_reg_reg(regs::RBX, regs::RSI, MicroOp::ModuloSigned, MicroOpBits::B64);
        run_pass(&mut b);
        let last = crate::store::InstrRef(b.func.instrs.count() - 1);
        let ops = b.func.ops(last);
        assert_eq!(b.func.instr(last).op, MicroOpcode::LoadRegReg);
        assert_eq!(ops[0].reg(), regs::RBX);
        assert_eq!(ops[1].reg(), regs::RDX);
    }

    #[test]
    fn wide_immediate_is_hoisted() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_op_binary_reg_imm(regs::RBX, 0x1_0000_0000, MicroOp::Add, MicroOpBits::B64);
        assert!(run_pass(&mut b));
        let ops = opcodes(&b.func);
        assert_eq!(ops, vec![MicroOpcode::LoadRegImm, MicroOpcode::OpBinaryRegReg]);
    }

    #[test]
    fn small_immediate_is_kept() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_op_binary_reg_imm(regs::RBX, 42, MicroOp::Add, MicroOpBits::B64);
        assert!(!run_pass(&mut b));
        assert_eq!(opcodes(&b.func), vec![MicroOpcode::OpBinaryRegImm]);
    }

    #[test]
    fn shift_count_moves_to_rcx() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_op_binary_reg_reg(regs::RBX, regs::RSI, MicroOp::ShiftLeft, MicroOpBits::B64);
        assert!(run_pass(&mut b));
        let first = crate::store::InstrRef(0);
        assert_eq!(b.func.instr(first).op, MicroOpcode::LoadRegReg);
        assert_eq!(b.func.ops(first)[0].reg(), regs::RCX);
        let second = crate::store::InstrRef(1);
        assert_eq!(b.func.ops(second)[1].reg(), regs::RCX);
    }
}
