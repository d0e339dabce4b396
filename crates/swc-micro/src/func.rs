//! The per-function instruction container passes operate on.

use swc_util::{define_idx, FxHashMap, Span, Symbol};

use crate::callconv::CallConv;
use crate::instr::{MicroInstr, UseDef};
use crate::operand::MicroOperand;
use crate::ops::CallConvKind;
use crate::reg::MicroReg;
use crate::store::{InstrRef, InstrStore, OperandStore};

define_idx!(LabelId);

/// What a recorded relocation refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MicroRelocKind {
    ForeignFunctionAddress,
    ConstantAddress,
    LocalFunctionAddress,
}

/// A pending fix-up attached to one instruction
///
/// The encoder turns these into byte-offset relocations once layout is
/// known.
#[derive(Clone, Copy, Debug)]
pub struct MicroRelocation {
    pub kind: MicroRelocKind,
    pub instr: InstrRef,
    pub symbol: Option<Symbol>,
    pub constant: Option<u32>,
    pub address: Option<u64>,
}

/// Stack frame accounting filled in by the allocator and the prolog pass
#[derive(Clone, Debug, Default)]
pub struct FrameLayout {
    /// Stack bytes the function asked for itself
    pub user_stack_size: u32,
    /// Bytes of allocator spill slots
    pub spill_size: u32,
    /// Callee-saved registers the allocator handed out, push order
    pub callee_saved: Vec<MicroReg>,
    /// Final `sub rsp` amount, valid after the prolog/epilog pass
    pub frame_size: u32,
}

impl FrameLayout {
    /// Reserve one 8-byte spill slot; returns its offset below rbp
    pub fn alloc_spill_slot(&mut self) -> u32 {
        self.spill_size += 8;
        self.user_stack_size + self.spill_size
    }

    /// Compute the final frame size: user stack + spills, padded so the
    /// frame plus pushed callee-saved registers keeps `alignment`
    pub fn finalize(&mut self, conv: &CallConv) {
        let mut size = self.user_stack_size + self.spill_size;
        let alignment = conv.stack_alignment.max(8);
        size = size.div_ceil(alignment) * alignment;
        // Saved rbp plus the return address are already 16-aligned; each
        // pushed callee-saved register shifts rsp by 8.
        if self.callee_saved.len() % 2 == 1 {
            size += 8;
        }
        self.frame_size = size;
    }
}

/// Jump-table payload referenced by a `JumpTable` instruction
#[derive(Clone, Debug, Default)]
pub struct JumpTableData {
    pub labels: Vec<LabelId>,
}

/// One function's micro-instruction stream and side tables
///
/// Owned by a `MicroBuilder` during emission; passes receive it mutably
/// through the pass context.
pub struct MicroFunction {
    pub symbol_name: Symbol,
    pub conv: CallConvKind,
    pub instrs: InstrStore,
    pub operands: OperandStore,
    /// Label table: placed labels point at their `Label` instruction
    pub labels: Vec<Option<InstrRef>>,
    /// Jump tables materialized at the end of the code buffer
    pub jump_tables: Vec<JumpTableData>,
    /// Debug-info side table (present when `--debug-info` is on)
    pub debug_info: FxHashMap<InstrRef, Span>,
    pub relocations: Vec<MicroRelocation>,
    /// Physical registers the allocator must avoid per virtual register
    pub forbidden: FxHashMap<MicroReg, Vec<MicroReg>>,
    pub frame: FrameLayout,
}

impl MicroFunction {
    pub fn new(symbol_name: Symbol, conv: CallConvKind) -> Self {
        Self {
            symbol_name,
            conv,
            instrs: InstrStore::new(),
            operands: OperandStore::new(),
            labels: Vec::new(),
            jump_tables: Vec::new(),
            debug_info: FxHashMap::default(),
            relocations: Vec::new(),
            forbidden: FxHashMap::default(),
            frame: FrameLayout::default(),
        }
    }

    pub fn instr(&self, r: InstrRef) -> &MicroInstr {
        self.instrs.get(r)
    }

    pub fn instr_mut(&mut self, r: InstrRef) -> &mut MicroInstr {
        self.instrs.get_mut(r)
    }

    /// Operand slice of an instruction
    pub fn ops(&self, r: InstrRef) -> &[MicroOperand] {
        let inst = self.instrs.get(r);
        self.operands.slice(inst.ops, inst.num_operands)
    }

    /// Mutable operand slice of an instruction
    pub fn ops_mut(&mut self, r: InstrRef) -> &mut [MicroOperand] {
        let inst = *self.instrs.get(r);
        self.operands.slice_mut(inst.ops, inst.num_operands)
    }

    /// Use/def sets for the instruction at `r`
    pub fn use_def(&self, r: InstrRef) -> UseDef {
        self.instr(r).use_def(self.ops(r))
    }

    /// Resolved target of a placed label
    pub fn label_target(&self, label: LabelId) -> Option<InstrRef> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// True once every referenced label has been placed
    pub fn all_labels_placed(&self) -> bool {
        self.labels.iter().all(|l| l.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::CallConvKind;

    #[test]
    fn spill_slots_grow_the_frame() {
        let mut frame = FrameLayout::default();
        let a = frame.alloc_spill_slot();
        let b = frame.alloc_spill_slot();
        assert_eq!(a, 8);
        assert_eq!(b, 16);
        assert_eq!(frame.spill_size, 16);
    }

    #[test]
    fn finalize_aligns_and_pads_for_pushes() {
        let conv = CallConv::get(CallConvKind::C);
        let mut frame = FrameLayout {
            user_stack_size: 4,
            spill_size: 8,
            ..Default::default()
        };
        frame.finalize(conv);
        assert_eq!(frame.frame_size, 16);

        frame.callee_saved = vec![crate::reg::regs::RBX];
        frame.finalize(conv);
        assert_eq!(frame.frame_size, 24);
    }

    #[test]
    fn empty_function_has_no_labels() {
        let func = MicroFunction::new(Symbol::intern("f"), CallConvKind::C);
        assert!(func.all_labels_placed());
        assert!(func.instrs.is_empty());
    }
}
