//! Instruction operand record.
//!
//! One operand slot carries a register, an immediate, a width, an abstract
//! operation, a condition, a symbol name or a calling convention. Which
//! variant is live in which slot is fixed by the enclosing opcode's
//! canonical layout, so the accessors assume the tag and fail loudly on an
//! internal layout bug.

use swc_util::Symbol;

use crate::ops::{CallConvKind, MicroCond, MicroOp, MicroOpBits};
use crate::reg::MicroReg;

/// A tagged operand slot
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MicroOperand {
    Reg(MicroReg),
    Imm(u64),
    Bits(MicroOpBits),
    Op(MicroOp),
    Cond(MicroCond),
    Name(Symbol),
    Conv(CallConvKind),
}

static_assertions::const_assert!(std::mem::size_of::<MicroOperand>() <= 16);

impl Default for MicroOperand {
    fn default() -> Self {
        MicroOperand::Imm(0)
    }
}

impl MicroOperand {
    #[inline]
    pub fn reg(self) -> MicroReg {
        match self {
            MicroOperand::Reg(r) => r,
            other => unreachable_operand("reg", &other),
        }
    }

    #[inline]
    pub fn imm(self) -> u64 {
        match self {
            MicroOperand::Imm(v) => v,
            other => unreachable_operand("imm", &other),
        }
    }

    #[inline]
    pub fn imm_i64(self) -> i64 {
        self.imm() as i64
    }

    #[inline]
    pub fn imm_u32(self) -> u32 {
        self.imm() as u32
    }

    #[inline]
    pub fn imm_i32(self) -> i32 {
        self.imm() as i32
    }

    #[inline]
    pub fn bits(self) -> MicroOpBits {
        match self {
            MicroOperand::Bits(b) => b,
            other => unreachable_operand("bits", &other),
        }
    }

    #[inline]
    pub fn micro_op(self) -> MicroOp {
        match self {
            MicroOperand::Op(op) => op,
            other => unreachable_operand("op", &other),
        }
    }

    #[inline]
    pub fn cond(self) -> MicroCond {
        match self {
            MicroOperand::Cond(c) => c,
            other => unreachable_operand("cond", &other),
        }
    }

    #[inline]
    pub fn name(self) -> Symbol {
        match self {
            MicroOperand::Name(s) => s,
            other => unreachable_operand("name", &other),
        }
    }

    #[inline]
    pub fn conv(self) -> CallConvKind {
        match self {
            MicroOperand::Conv(c) => c,
            other => unreachable_operand("conv", &other),
        }
    }

    pub fn as_reg(self) -> Option<MicroReg> {
        match self {
            MicroOperand::Reg(r) => Some(r),
            _ => None,
        }
    }
}

#[cold]
#[inline(never)]
fn unreachable_operand(expected: &str, got: &dyn std::fmt::Debug) -> ! {
    panic!(
        "operand layout violation: expected {}, slot holds {:?}",
        expected, got
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::regs;

    #[test]
    fn accessors_return_the_tagged_value() {
        assert_eq!(MicroOperand::Reg(regs::RAX).reg(), regs::RAX);
        assert_eq!(MicroOperand::Imm(0x1234).imm(), 0x1234);
        assert_eq!(MicroOperand::Bits(MicroOpBits::B32).bits(), MicroOpBits::B32);
        assert_eq!(MicroOperand::Op(MicroOp::Add).micro_op(), MicroOp::Add);
        assert_eq!(MicroOperand::Cond(MicroCond::Zero).cond(), MicroCond::Zero);
    }

    #[test]
    fn negative_immediates_round_trip() {
        let op = MicroOperand::Imm(-8i64 as u64);
        assert_eq!(op.imm_i64(), -8);
        assert_eq!(op.imm_i32(), -8);
    }

    #[test]
    #[should_panic(expected = "operand layout violation")]
    fn wrong_accessor_panics() {
        let _ = MicroOperand::Imm(1).reg();
    }
}
