//! The micro-instruction record and its opcode catalog.

use crate::operand::MicroOperand;
use crate::reg::MicroReg;
use crate::store::OperandRef;

/// Emission flags carried by every instruction
///
/// `Lock` and `Overflow` are semantic; `B64` and `CanEncode` are encoder
/// hints. The union is kept so the record stays one byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeFlags(u8);

impl EncodeFlags {
    pub const LOCK: EncodeFlags = EncodeFlags(1 << 0);
    pub const OVERFLOW: EncodeFlags = EncodeFlags(1 << 1);
    pub const B64: EncodeFlags = EncodeFlags(1 << 2);
    pub const CAN_ENCODE: EncodeFlags = EncodeFlags(1 << 3);

    pub fn none() -> Self {
        EncodeFlags(0)
    }

    pub fn has(self, flag: EncodeFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EncodeFlags {
    type Output = EncodeFlags;

    fn bitor(self, rhs: EncodeFlags) -> EncodeFlags {
        EncodeFlags(self.0 | rhs.0)
    }
}

/// Abstract, machine-independent opcode
///
/// Each opcode has a canonical operand layout shared by the builder, the
/// printer and the encoder (see the `emit_*` operations on `MicroBuilder`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MicroOpcode {
    // Structural
    Label,
    Enter,
    Leave,
    Nop,
    End,
    /// Structural no-op, also what passes rewrite deleted instructions to
    Ignore,
    Debug,
    // Data movement
    LoadRegReg,
    LoadRegImm,
    LoadRegMem,
    LoadMemReg,
    LoadMemImm,
    LoadAddrRegMem,
    LoadAmcRegMem,
    LoadAmcMemReg,
    LoadAmcMemImm,
    LoadAddrAmcRegMem,
    LoadSignedExtRegMem,
    LoadSignedExtRegReg,
    LoadZeroExtRegMem,
    LoadZeroExtRegReg,
    ClearReg,
    // Arithmetic
    OpUnaryReg,
    OpUnaryMem,
    OpBinaryRegReg,
    OpBinaryRegMem,
    OpBinaryMemReg,
    OpBinaryRegImm,
    OpBinaryMemImm,
    OpTernaryRegRegReg,
    // Comparison
    CmpRegReg,
    CmpRegImm,
    CmpMemReg,
    CmpMemImm,
    SetCondReg,
    LoadCondRegReg,
    // Control
    JumpReg,
    JumpCond,
    JumpCondImm,
    JumpTable,
    PatchJump,
    Ret,
    Push,
    Pop,
    CallLocal,
    CallExtern,
    CallIndirect,
    // Parameters
    LoadCallParam,
    LoadCallAddrParam,
    LoadCallZeroExtParam,
    StoreCallParam,
    // Relocation
    SymbolRelocAddr,
    SymbolRelocValue,
}

impl MicroOpcode {
    /// Lower-snake mnemonic used by the printer and the reader
    pub fn name(self) -> &'static str {
        match self {
            MicroOpcode::Label => "label",
            MicroOpcode::Enter => "enter",
            MicroOpcode::Leave => "leave",
            MicroOpcode::Nop => "nop",
            MicroOpcode::End => "end",
            MicroOpcode::Ignore => "ignore",
            MicroOpcode::Debug => "debug",
            MicroOpcode::LoadRegReg => "load_reg_reg",
            MicroOpcode::LoadRegImm => "load_reg_imm",
            MicroOpcode::LoadRegMem => "load_reg_mem",
            MicroOpcode::LoadMemReg => "load_mem_reg",
            MicroOpcode::LoadMemImm => "load_mem_imm",
            MicroOpcode::LoadAddrRegMem => "load_addr_reg_mem",
            MicroOpcode::LoadAmcRegMem => "load_amc_reg_mem",
            MicroOpcode::LoadAmcMemReg => "load_amc_mem_reg",
            MicroOpcode::LoadAmcMemImm => "load_amc_mem_imm",
            MicroOpcode::LoadAddrAmcRegMem => "load_addr_amc_reg_mem",
            MicroOpcode::LoadSignedExtRegMem => "load_signed_ext_reg_mem",
            MicroOpcode::LoadSignedExtRegReg => "load_signed_ext_reg_reg",
            MicroOpcode::LoadZeroExtRegMem => "load_zero_ext_reg_mem",
            MicroOpcode::LoadZeroExtRegReg => "load_zero_ext_reg_reg",
            MicroOpcode::ClearReg => "clear_reg",
            MicroOpcode::OpUnaryReg => "op_unary_reg",
            MicroOpcode::OpUnaryMem => "op_unary_mem",
            MicroOpcode::OpBinaryRegReg => "op_binary_reg_reg",
            MicroOpcode::OpBinaryRegMem => "op_binary_reg_mem",
            MicroOpcode::OpBinaryMemReg => "op_binary_mem_reg",
            MicroOpcode::OpBinaryRegImm => "op_binary_reg_imm",
            MicroOpcode::OpBinaryMemImm => "op_binary_mem_imm",
            MicroOpcode::OpTernaryRegRegReg => "op_ternary_reg_reg_reg",
            MicroOpcode::CmpRegReg => "cmp_reg_reg",
            MicroOpcode::CmpRegImm => "cmp_reg_imm",
            MicroOpcode::CmpMemReg => "cmp_mem_reg",
            MicroOpcode::CmpMemImm => "cmp_mem_imm",
            MicroOpcode::SetCondReg => "set_cond_reg",
            MicroOpcode::LoadCondRegReg => "load_cond_reg_reg",
            MicroOpcode::JumpReg => "jump_reg",
            MicroOpcode::JumpCond => "jump_cond",
            MicroOpcode::JumpCondImm => "jump_cond_imm",
            MicroOpcode::JumpTable => "jump_table",
            MicroOpcode::PatchJump => "patch_jump",
            MicroOpcode::Ret => "ret",
            MicroOpcode::Push => "push",
            MicroOpcode::Pop => "pop",
            MicroOpcode::CallLocal => "call_local",
            MicroOpcode::CallExtern => "call_extern",
            MicroOpcode::CallIndirect => "call_indirect",
            MicroOpcode::LoadCallParam => "load_call_param",
            MicroOpcode::LoadCallAddrParam => "load_call_addr_param",
            MicroOpcode::LoadCallZeroExtParam => "load_call_zero_ext_param",
            MicroOpcode::StoreCallParam => "store_call_param",
            MicroOpcode::SymbolRelocAddr => "symbol_reloc_addr",
            MicroOpcode::SymbolRelocValue => "symbol_reloc_value",
        }
    }

    pub fn is_call(self) -> bool {
        matches!(
            self,
            MicroOpcode::CallLocal | MicroOpcode::CallExtern | MicroOpcode::CallIndirect
        )
    }

    /// Ends an extended basic block
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            MicroOpcode::JumpCond
                | MicroOpcode::JumpCondImm
                | MicroOpcode::JumpReg
                | MicroOpcode::JumpTable
                | MicroOpcode::Ret
        )
    }
}

/// Fixed-size instruction record
///
/// Operands live in the operand arena; `ops`/`num_operands` address the
/// contiguous range. Passes may rewrite `op` and overwrite operand slots,
/// but a range is never reallocated.
#[derive(Clone, Copy, Debug)]
pub struct MicroInstr {
    pub op: MicroOpcode,
    pub emit_flags: EncodeFlags,
    pub num_operands: u8,
    pub ops: OperandRef,
}

static_assertions::const_assert!(std::mem::size_of::<MicroInstr>() <= 8);

/// Use/def sets of one instruction
#[derive(Clone, Debug, Default)]
pub struct UseDef {
    pub uses: Vec<MicroReg>,
    pub defs: Vec<MicroReg>,
    pub is_call: bool,
}

impl MicroInstr {
    /// Collect which register operands are read and written
    ///
    /// Registers that are both (two-operand destinations) appear in both
    /// sets. `NoBase` and the instruction pointer are never reported.
    pub fn use_def(&self, ops: &[MicroOperand]) -> UseDef {
        let mut ud = UseDef {
            is_call: self.op.is_call(),
            ..Default::default()
        };

        let using = |ud: &mut UseDef, slot: usize| {
            let reg = ops[slot].reg();
            if reg.is_int() || reg.is_float() {
                ud.uses.push(reg);
            }
        };
        let defining = |ud: &mut UseDef, slot: usize, ops: &[MicroOperand]| {
            let reg = ops[slot].reg();
            if reg.is_int() || reg.is_float() {
                ud.defs.push(reg);
            }
        };

        match self.op {
            MicroOpcode::LoadRegReg
            | MicroOpcode::LoadSignedExtRegReg
            | MicroOpcode::LoadZeroExtRegReg => {
                defining(&mut ud, 0, ops);
                using(&mut ud, 1);
            }
            MicroOpcode::LoadRegImm
            | MicroOpcode::ClearReg
            | MicroOpcode::SetCondReg
            | MicroOpcode::Pop
            | MicroOpcode::SymbolRelocAddr
            | MicroOpcode::SymbolRelocValue => {
                defining(&mut ud, 0, ops);
            }
            MicroOpcode::LoadRegMem
            | MicroOpcode::LoadAddrRegMem
            | MicroOpcode::LoadSignedExtRegMem
            | MicroOpcode::LoadZeroExtRegMem => {
                defining(&mut ud, 0, ops);
                using(&mut ud, 1);
            }
            MicroOpcode::LoadMemReg | MicroOpcode::CmpMemReg | MicroOpcode::OpBinaryMemReg => {
                using(&mut ud, 0);
                using(&mut ud, 1);
            }
            MicroOpcode::LoadMemImm
            | MicroOpcode::CmpMemImm
            | MicroOpcode::OpBinaryMemImm
            | MicroOpcode::OpUnaryMem => {
                using(&mut ud, 0);
            }
            MicroOpcode::LoadAmcRegMem | MicroOpcode::LoadAddrAmcRegMem => {
                defining(&mut ud, 0, ops);
                using(&mut ud, 1);
                using(&mut ud, 2);
            }
            MicroOpcode::LoadAmcMemReg => {
                using(&mut ud, 0);
                using(&mut ud, 1);
                using(&mut ud, 2);
            }
            MicroOpcode::LoadAmcMemImm => {
                using(&mut ud, 0);
                using(&mut ud, 1);
            }
            MicroOpcode::OpUnaryReg => {
                defining(&mut ud, 0, ops);
                using(&mut ud, 0);
            }
            MicroOpcode::OpBinaryRegReg => {
                defining(&mut ud, 0, ops);
                using(&mut ud, 0);
                using(&mut ud, 1);
            }
            MicroOpcode::OpBinaryRegMem => {
                defining(&mut ud, 0, ops);
                using(&mut ud, 0);
                using(&mut ud, 1);
            }
            MicroOpcode::OpBinaryRegImm => {
                defining(&mut ud, 0, ops);
                using(&mut ud, 0);
            }
            MicroOpcode::OpTernaryRegRegReg => {
                defining(&mut ud, 0, ops);
                using(&mut ud, 0);
                using(&mut ud, 1);
                using(&mut ud, 2);
            }
            MicroOpcode::CmpRegReg => {
                using(&mut ud, 0);
                using(&mut ud, 1);
            }
            MicroOpcode::CmpRegImm => {
                using(&mut ud, 0);
            }
            MicroOpcode::LoadCondRegReg => {
                // cmov writes conditionally, so the destination stays live
                defining(&mut ud, 0, ops);
                using(&mut ud, 0);
                using(&mut ud, 1);
            }
            MicroOpcode::JumpReg | MicroOpcode::Push => {
                using(&mut ud, 0);
            }
            MicroOpcode::JumpTable => {
                using(&mut ud, 0);
                using(&mut ud, 1);
            }
            MicroOpcode::CallIndirect => {
                using(&mut ud, 0);
            }
            MicroOpcode::LoadCallParam
            | MicroOpcode::LoadCallZeroExtParam
            | MicroOpcode::StoreCallParam => {
                using(&mut ud, 1);
            }
            MicroOpcode::LoadCallAddrParam => {
                using(&mut ud, 1);
            }
            MicroOpcode::Label
            | MicroOpcode::Enter
            | MicroOpcode::Leave
            | MicroOpcode::Nop
            | MicroOpcode::End
            | MicroOpcode::Ignore
            | MicroOpcode::Debug
            | MicroOpcode::JumpCond
            | MicroOpcode::JumpCondImm
            | MicroOpcode::PatchJump
            | MicroOpcode::Ret
            | MicroOpcode::CallLocal
            | MicroOpcode::CallExtern => {}
        }

        ud
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::regs;
    use crate::MicroOpBits;

    #[test]
    fn flags_combine() {
        let flags = EncodeFlags::LOCK | EncodeFlags::B64;
        assert!(flags.has(EncodeFlags::LOCK));
        assert!(flags.has(EncodeFlags::B64));
        assert!(!flags.has(EncodeFlags::OVERFLOW));
        assert!(EncodeFlags::none().is_empty());
    }

    #[test]
    fn binary_dst_is_use_and_def() {
        let ops = [
            MicroOperand::Reg(regs::RAX),
            MicroOperand::Reg(regs::RBX),
            MicroOperand::Bits(MicroOpBits::B64),
            MicroOperand::Op(crate::MicroOp::Add),
        ];
        let inst = MicroInstr {
            op: MicroOpcode::OpBinaryRegReg,
            emit_flags: EncodeFlags::none(),
            num_operands: 4,
            ops: crate::store::OperandRef(0),
        };
        let ud = inst.use_def(&ops);
        assert!(ud.defs.contains(&regs::RAX));
        assert!(ud.uses.contains(&regs::RAX));
        assert!(ud.uses.contains(&regs::RBX));
        assert!(!ud.is_call);
    }

    #[test]
    fn calls_are_flagged() {
        let inst = MicroInstr {
            op: MicroOpcode::CallLocal,
            emit_flags: EncodeFlags::none(),
            num_operands: 2,
            ops: crate::store::OperandRef(0),
        };
        let ops = [
            MicroOperand::Name(swc_util::Symbol::intern("f")),
            MicroOperand::Conv(crate::CallConvKind::C),
        ];
        assert!(inst.use_def(&ops).is_call);
    }
}
