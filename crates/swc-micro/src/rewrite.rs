//! Stream rebuilding for passes that must insert instructions.
//!
//! Optimization passes mutate in place and delete through `Ignore`. The
//! mandatory rewriting passes (register allocation, prolog/epilog,
//! legalization) need to expand one instruction into several, which the
//! append-only stores cannot express in place. They rebuild the stream
//! through a [`StreamRewriter`]: every old instruction maps to its first
//! replacement, and the label table, debug-info map, relocations and
//! `PatchJump` references are remapped on [`StreamRewriter::finish`].

use swc_util::{FxHashMap, Span};

use crate::func::MicroFunction;
use crate::instr::{EncodeFlags, MicroInstr, MicroOpcode};
use crate::operand::MicroOperand;
use crate::store::{InstrRef, InstrStore, OperandStore};

pub struct StreamRewriter {
    instrs: InstrStore,
    operands: OperandStore,
    debug_info: FxHashMap<InstrRef, Span>,
    /// old instruction index -> first replacement
    map: Vec<Option<InstrRef>>,
    current_old: Option<u32>,
    current_span: Option<Span>,
}

impl StreamRewriter {
    pub fn new(func: &MicroFunction) -> Self {
        Self {
            instrs: InstrStore::new(),
            operands: OperandStore::new(),
            debug_info: FxHashMap::default(),
            map: vec![None; func.instrs.count() as usize],
            current_old: None,
            current_span: None,
        }
    }

    /// Start rewriting `old`; emitted instructions inherit its debug info
    pub fn begin(&mut self, func: &MicroFunction, old: InstrRef) {
        self.current_old = Some(old.0);
        self.current_span = func.debug_info.get(&old).copied();
    }

    /// Append a replacement instruction
    pub fn emit(&mut self, op: MicroOpcode, flags: EncodeFlags, ops: &[MicroOperand]) -> InstrRef {
        let ops_ref = self.operands.alloc_from(ops);
        let r = self.instrs.push(MicroInstr {
            op,
            emit_flags: flags,
            num_operands: ops.len() as u8,
            ops: ops_ref,
        });
        if let Some(old) = self.current_old {
            if self.map[old as usize].is_none() {
                self.map[old as usize] = Some(r);
            }
        }
        if let Some(span) = self.current_span {
            self.debug_info.insert(r, span);
        }
        r
    }

    /// Copy `old` unchanged (same opcode, flags and operands)
    pub fn keep(&mut self, func: &MicroFunction, old: InstrRef) -> InstrRef {
        let inst = *func.instr(old);
        let ops: Vec<MicroOperand> = func.ops(old).to_vec();
        self.begin(func, old);
        self.emit(inst.op, inst.emit_flags, &ops)
    }

    /// Install the rebuilt stream and remap every side table
    pub fn finish(mut self, func: &mut MicroFunction) {
        // PatchJump instructions reference instruction indices.
        for idx in 0..self.instrs.count() {
            let r = InstrRef(idx);
            let inst = *self.instrs.get(r);
            if inst.op == MicroOpcode::PatchJump {
                let ops = self.operands.slice_mut(inst.ops, inst.num_operands);
                let old_target = ops[0].imm() as usize;
                if let Some(Some(new_target)) = self.map.get(old_target) {
                    ops[0] = MicroOperand::Imm(new_target.0 as u64);
                }
            }
        }

        for label in func.labels.iter_mut() {
            if let Some(old) = *label {
                *label = self.map[old.0 as usize];
                debug_assert!(label.is_some(), "label instruction dropped by a rewrite");
            }
        }

        func.relocations.retain_mut(|reloc| {
            match self.map[reloc.instr.0 as usize] {
                Some(new_ref) => {
                    reloc.instr = new_ref;
                    true
                }
                None => false,
            }
        });

        func.instrs = self.instrs;
        func.operands = self.operands;
        func.debug_info = self.debug_info;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MicroBuilder;
    use crate::ops::{CallConvKind, MicroCond, MicroOp, MicroOpBits};
    use swc_util::Symbol;

    #[test]
    fn keep_preserves_stream_and_labels() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let v0 = b.virtual_int_reg();
        let label = b.create_label();
        b.emit_load_reg_imm(v0, 1, MicroOpBits::B64);
        b.place_label(label);
        b.emit_jump_to_label(MicroCond::Unconditional, MicroOpBits::B32, label);

        let mut rw = StreamRewriter::new(&b.func);
        for old in b.func.instrs.refs() {
            rw.keep(&b.func, old);
        }
        rw.finish(&mut b.func);

        assert_eq!(b.func.instrs.count(), 3);
        assert_eq!(b.func.label_target(label), Some(crate::store::InstrRef(1)));
    }

    #[test]
    fn expansion_shifts_label_targets() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let v0 = b.virtual_int_reg();
        let label = b.create_label();
        b.emit_load_reg_imm(v0, 1, MicroOpBits::B64);
        b.place_label(label);

        let mut rw = StreamRewriter::new(&b.func);
        for old in b.func.instrs.refs() {
            let op = b.func.instr(old).op;
            if op == MicroOpcode::LoadRegImm {
                // Expand the load into two instructions.
                rw.begin(&b.func, old);
                rw.emit(MicroOpcode::Nop, EncodeFlags::none(), &[]);
                rw.keep(&b.func, old);
            } else {
                rw.keep(&b.func, old);
            }
        }
        rw.finish(&mut b.func);

        assert_eq!(b.func.instrs.count(), 3);
        // The label moved from index 1 to index 2.
        assert_eq!(b.func.label_target(label), Some(crate::store::InstrRef(2)));
    }

    #[test]
    fn dropped_relocations_are_removed() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_call_extern(Symbol::intern("gone"), CallConvKind::C);
        assert_eq!(b.func.relocations.len(), 1);

        let rw = StreamRewriter::new(&b.func);
        // Drop everything.
        rw.finish(&mut b.func);
        assert!(b.func.relocations.is_empty());
        assert_eq!(b.func.instrs.count(), 0);
    }
}
