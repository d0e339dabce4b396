//! Dead-store elimination inside extended basic blocks.
//!
//! A side-effect-free register definition that is overwritten before any
//! use is rewritten to `Ignore`. Tracking resets at labels, terminators and
//! calls, mirroring the constant-propagation block boundaries.

use swc_util::FxHashMap;

use crate::instr::MicroOpcode;
use crate::pass::{MicroPass, MicroPassContext};
use crate::store::InstrRef;

fn is_pure_def(op: MicroOpcode) -> bool {
    matches!(
        op,
        MicroOpcode::LoadRegImm | MicroOpcode::LoadRegReg | MicroOpcode::ClearReg
    )
}

#[derive(Default)]
pub struct DeadStorePass;

impl MicroPass for DeadStorePass {
    fn name(&self) -> &'static str {
        "dead-store"
    }

    fn run(&mut self, ctx: &mut MicroPassContext<'_>) -> bool {
        let func = &mut *ctx.func;
        let mut changed = false;
        let mut last_def: FxHashMap<u32, InstrRef> = FxHashMap::default();

        for r in func.instrs.refs() {
            let op = func.instr(r).op;
            if op == MicroOpcode::Ignore {
                continue;
            }

            if op == MicroOpcode::Label || op.is_terminator() {
                last_def.clear();
                continue;
            }

            let ud = func.use_def(r);
            if ud.is_call {
                last_def.clear();
                continue;
            }

            for used in &ud.uses {
                last_def.remove(&used.packed());
            }

            for def in &ud.defs {
                if is_pure_def(op) {
                    if let Some(prev) = last_def.insert(def.packed(), r) {
                        func.instr_mut(prev).op = MicroOpcode::Ignore;
                        changed = true;
                    }
                } else {
                    last_def.remove(&def.packed());
                }
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MicroBuilder;
    use crate::ops::{CallConvKind, MicroOp, MicroOpBits};
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
        DeadStorePass.run(&mut ctx)
    }

    #[test]
    fn overwritten_load_is_removed() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RAX, 1, MicroOpBits::B64);
        b.emit_load_reg_imm(regs::RAX, 2, MicroOpBits::B64);
        assert!(run_pass(&mut b));
        assert_eq!(b.func.instr(InstrRef(0)).op, MicroOpcode::Ignore);
        assert_eq!(b.func.instr(InstrRef(1)).op, MicroOpcode::LoadRegImm);
    }

    #[test]
    fn used_value_is_kept() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RAX, 1, MicroOpBits::B64);
        b.emit_op_binary_reg_reg(regs::RBX, regs::RAX, MicroOp::Add, MicroOpBits::B64);
        b.emit_load_reg_imm(regs::RAX, 2, MicroOpBits::B64);
        assert!(!run_pass(&mut b));
        assert_eq!(b.func.instr(InstrRef(0)).op, MicroOpcode::LoadRegImm);
    }

    #[test]
    fn call_keeps_pending_defs() {
        // The callee may observe argument registers.
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RDI, 1, MicroOpBits::B64);
        b.emit_call_extern(Symbol::intern("sink"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RDI, 2, MicroOpBits::B64);
        assert!(!run_pass(&mut b));
    }
}
