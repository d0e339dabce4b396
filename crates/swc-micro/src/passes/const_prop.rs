//! Per-extended-basic-block constant propagation.
//!
//! Tracks known `{value, width}` facts per register inside one extended
//! block (broken at labels and terminators). Known moves become immediate
//! loads and foldable register-immediate operations collapse to the folded
//! constant. Calls invalidate every fact.

use swc_util::FxHashMap;

use crate::instr::MicroOpcode;
use crate::operand::MicroOperand;
use crate::ops::{MicroOp, MicroOpBits};
use crate::pass::{MicroPass, MicroPassContext};

#[derive(Clone, Copy)]
struct KnownConstant {
    value: u64,
    #[allow(dead_code)]
    bits: MicroOpBits,
}

fn normalize(value: u64, bits: MicroOpBits) -> u64 {
    value & bits.mask()
}

fn sign_extend(value: u64, bits: MicroOpBits) -> i64 {
    match bits {
        MicroOpBits::B8 => value as u8 as i8 as i64,
        MicroOpBits::B16 => value as u16 as i16 as i64,
        MicroOpBits::B32 => value as u32 as i32 as i64,
        _ => value as i64,
    }
}

/// Fold `value ⊕ imm` at `bits`; shifts clamp their amount to `width - 1`
/// and the arithmetic right shift keeps the sign at the operation width.
fn fold_binary_immediate(
    value: u64,
    immediate: u64,
    op: MicroOp,
    bits: MicroOpBits,
) -> Option<u64> {
    let value = normalize(value, bits);
    let imm = normalize(immediate, bits);
    let folded = match op {
        MicroOp::Add => value.wrapping_add(imm),
        MicroOp::Subtract => value.wrapping_sub(imm),
        MicroOp::And => value & imm,
        MicroOp::Or => value | imm,
        MicroOp::Xor => value ^ imm,
        MicroOp::ShiftLeft | MicroOp::ShiftRight | MicroOp::ShiftArithmeticRight => {
            let num_bits = bits.num_bits();
            if num_bits == 0 {
                return None;
            }
            let amount = imm.min(num_bits as u64 - 1) as u32;
            match op {
                MicroOp::ShiftLeft => value << amount,
                MicroOp::ShiftRight => value >> amount,
                _ => (sign_extend(value, bits) >> amount) as u64,
            }
        }
        _ => return None,
    };
    Some(normalize(folded, bits))
}

#[derive(Default)]
pub struct ConstantPropagationPass;

impl MicroPass for ConstantPropagationPass {
    fn name(&self) -> &'static str {
        "const-prop"
    }

    fn run(&mut self, ctx: &mut MicroPassContext<'_>) -> bool {
        let func = &mut *ctx.func;
        let mut changed = false;
        let mut known: FxHashMap<u32, KnownConstant> = FxHashMap::default();
        known.reserve(64);

        for r in func.instrs.refs() {
            let op = func.instr(r).op;
            if op == MicroOpcode::Ignore {
                continue;
            }

            // Rewrite with the facts gathered so far.
            match op {
                MicroOpcode::LoadRegReg => {
                    let ops = func.ops(r);
                    let src = ops[1].reg();
                    let dst = ops[0].reg();
                    if dst.is_int() {
                        if let Some(fact) = known.get(&src.packed()).copied() {
                            let bits = ops[2].bits();
                            let ops = func.ops_mut(r);
                            ops[1] = MicroOperand::Bits(bits);
                            ops[2] = MicroOperand::Imm(normalize(fact.value, bits));
                            func.instr_mut(r).op = MicroOpcode::LoadRegImm;
                            changed = true;
                        }
                    }
                }
                MicroOpcode::OpBinaryRegImm => {
                    let ops = func.ops(r);
                    let dst = ops[0].reg();
                    if dst.is_int() {
                        if let Some(fact) = known.get(&dst.packed()).copied() {
                            let bits = ops[1].bits();
                            let micro_op = ops[2].micro_op();
                            let imm = ops[3].imm();
                            if let Some(folded) = fold_binary_immediate(fact.value, imm, micro_op, bits)
                            {
                                let inst = func.instr_mut(r);
                                inst.op = MicroOpcode::LoadRegImm;
                                inst.num_operands = 3;
                                func.ops_mut(r)[2] = MicroOperand::Imm(folded);
                                changed = true;
                            }
                        }
                    }
                }
                _ => {}
            }

            // Defs invalidate old facts; calls invalidate everything.
            let ud = func.use_def(r);
            for def in &ud.defs {
                known.remove(&def.packed());
            }
            if ud.is_call {
                known.clear();
                continue;
            }

            // Record new facts from the (possibly rewritten) instruction.
            let op = func.instr(r).op;
            let ops = func.ops(r);
            match op {
                MicroOpcode::LoadRegImm if ops[0].reg().is_int() => {
                    let bits = ops[1].bits();
                    known.insert(
                        ops[0].reg().packed(),
                        KnownConstant {
                            value: normalize(ops[2].imm(), bits),
                            bits,
                        },
                    );
                }
                MicroOpcode::LoadRegReg if ops[0].reg().is_int() && ops[1].reg().is_int() => {
                    if let Some(fact) = known.get(&ops[1].reg().packed()).copied() {
                        let bits = ops[2].bits();
                        known.insert(
                            ops[0].reg().packed(),
                            KnownConstant {
                                value: normalize(fact.value, bits),
                                bits,
                            },
                        );
                    }
                }
                MicroOpcode::ClearReg if ops[0].reg().is_int() => {
                    let bits = ops[1].bits();
                    known.insert(ops[0].reg().packed(), KnownConstant { value: 0, bits });
                }
                MicroOpcode::OpBinaryRegImm if ops[0].reg().is_int() => {
                    if let Some(fact) = known.get(&ops[0].reg().packed()).copied() {
                        let bits = ops[1].bits();
                        if let Some(folded) =
                            fold_binary_immediate(fact.value, ops[3].imm(), ops[2].micro_op(), bits)
                        {
                            known.insert(
                                ops[0].reg().packed(),
                                KnownConstant {
                                    value: folded,
                                    bits,
                                },
                            );
                        }
                    }
                }
                _ => {}
            }

            let op = func.instr(r).op;
            if op == MicroOpcode::Label || op.is_terminator() {
                known.clear();
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MicroBuilder;
    use crate::ops::{CallConvKind, MicroCond};
    use crate::reg::regs;
    use swc_util::{Handler, Logger, Symbol};

    fn run_pass(builder: &mut MicroBuilder) -> bool {
        let handler = Handler::new();
        let logger = Logger::new();
        let mut ctx = MicroPassContext {
            func: &mut builder.func,
            encoder: None,
            handler: &handler,
            logger: &logger,
            opt_level: crate::ops::BackendOptLevel::O2,
            pass_print: &[],
            print_file_path: "",
            print_source_line: 0,
        };
        ConstantPropagationPass.run(&mut ctx)
    }

    #[test]
    fn folds_chained_adds() {
        // S3: the chain of adds collapses to immediate loads.
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RAX, 10, MicroOpBits::B32);
        b.emit_op_binary_reg_imm(regs::RAX, 5, MicroOp::Add, MicroOpBits::B32);
        b.emit_op_binary_reg_imm(regs::RAX, 7, MicroOp::Add, MicroOpBits::B32);

        assert!(run_pass(&mut b));

        let values: Vec<u64> = b
            .func
            .instrs
            .refs()
            .map(|r| {
                let inst = b.func.instr(r);
                assert_eq!(inst.op, MicroOpcode::LoadRegImm);
                b.func.ops(r)[2].imm()
            })
            .collect();
        assert_eq!(values, vec![10, 15, 22]);
    }

    #[test]
    fn register_only_stream_is_untouched() {
        // Universal invariant 6: no constants, no changes.
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_op_binary_reg_reg(regs::RAX, regs::RBX, MicroOp::Add, MicroOpBits::B64);
        b.emit_op_binary_reg_reg(regs::RCX, regs::RAX, MicroOp::Xor, MicroOpBits::B64);
        assert!(!run_pass(&mut b));
        assert_eq!(b.func.instr(crate::store::InstrRef(0)).op, MicroOpcode::OpBinaryRegReg);
    }

    #[test]
    fn calls_invalidate_facts() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RBX, 3, MicroOpBits::B64);
        b.emit_call_extern(Symbol::intern("clobber"), CallConvKind::C);
        b.emit_op_binary_reg_imm(regs::RBX, 1, MicroOp::Add, MicroOpBits::B64);
        assert!(!run_pass(&mut b));
        // The add after the call must not fold.
        let last = crate::store::InstrRef(2);
        assert_eq!(b.func.instr(last).op, MicroOpcode::OpBinaryRegImm);
    }

    #[test]
    fn labels_break_blocks() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let label = b.create_label();
        b.emit_load_reg_imm(regs::RAX, 1, MicroOpBits::B64);
        b.place_label(label);
        b.emit_op_binary_reg_imm(regs::RAX, 1, MicroOp::Add, MicroOpBits::B64);
        b.emit_jump_to_label(MicroCond::NotZero, MicroOpBits::B32, label);
        assert!(!run_pass(&mut b));
    }

    #[test]
    fn known_move_becomes_immediate() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RAX, 42, MicroOpBits::B64);
        b.emit_load_reg_reg(regs::RBX, regs::RAX, MicroOpBits::B64);
        assert!(run_pass(&mut b));
        let second = crate::store::InstrRef(1);
        assert_eq!(b.func.instr(second).op, MicroOpcode::LoadRegImm);
        assert_eq!(b.func.ops(second)[2].imm(), 42);
    }

    #[test]
    fn shift_amount_clamps_to_width() {
        assert_eq!(
            fold_binary_immediate(1, 40, MicroOp::ShiftLeft, MicroOpBits::B32),
            Some(1u64 << 31)
        );
        // Arithmetic shift keeps the sign at the operation width.
        assert_eq!(
            fold_binary_immediate(0x80u64, 4, MicroOp::ShiftArithmeticRight, MicroOpBits::B8),
            Some(0xF8)
        );
    }
}
