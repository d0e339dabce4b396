//! Calling-convention tables.
//!
//! Two concrete conventions exist: `C` (System V AMD64) and `WindowsX64`;
//! `Host` resolves to whichever matches the build target. The tables are
//! immutable statics initialized at compile time.

use crate::ops::CallConvKind;
use crate::reg::{regs, MicroReg};

/// How a struct return travels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructParamPassing {
    ByValue,
    ByReference,
}

/// One calling convention's register and stack contract
pub struct CallConv {
    pub kind: CallConvKind,
    pub int_arg_regs: &'static [MicroReg],
    pub float_arg_regs: &'static [MicroReg],
    pub int_return: MicroReg,
    pub float_return: MicroReg,
    /// Callee-saved ("persistent") registers
    pub int_persistent_regs: &'static [MicroReg],
    pub float_persistent_regs: &'static [MicroReg],
    pub stack_pointer: MicroReg,
    pub frame_pointer: MicroReg,
    pub stack_alignment: u32,
    pub stack_slot_size: u32,
    pub stack_shadow_space: u32,
}

static C_CONV: CallConv = CallConv {
    kind: CallConvKind::C,
    int_arg_regs: &[
        regs::RDI,
        regs::RSI,
        regs::RDX,
        regs::RCX,
        regs::R8,
        regs::R9,
    ],
    float_arg_regs: &[
        regs::XMM0,
        regs::XMM1,
        regs::XMM2,
        regs::XMM3,
        regs::XMM4,
        regs::XMM5,
        regs::XMM6,
        regs::XMM7,
    ],
    int_return: regs::RAX,
    float_return: regs::XMM0,
    int_persistent_regs: &[regs::RBX, regs::R12, regs::R13, regs::R14, regs::R15],
    float_persistent_regs: &[],
    stack_pointer: regs::RSP,
    frame_pointer: regs::RBP,
    stack_alignment: 16,
    stack_slot_size: 8,
    stack_shadow_space: 0,
};

static WIN64_CONV: CallConv = CallConv {
    kind: CallConvKind::WindowsX64,
    int_arg_regs: &[regs::RCX, regs::RDX, regs::R8, regs::R9],
    float_arg_regs: &[regs::XMM0, regs::XMM1, regs::XMM2, regs::XMM3],
    int_return: regs::RAX,
    float_return: regs::XMM0,
    int_persistent_regs: &[
        regs::RBX,
        regs::RSI,
        regs::RDI,
        regs::R12,
        regs::R13,
        regs::R14,
        regs::R15,
    ],
    float_persistent_regs: &[
        regs::XMM6,
        regs::XMM7,
        regs::XMM12,
        regs::XMM13,
        regs::XMM14,
        regs::XMM15,
    ],
    stack_pointer: regs::RSP,
    frame_pointer: regs::RBP,
    stack_alignment: 16,
    stack_slot_size: 8,
    stack_shadow_space: 32,
};

impl CallConv {
    /// Table for a convention kind, with `Host` resolved
    pub fn get(kind: CallConvKind) -> &'static CallConv {
        match kind.resolve() {
            CallConvKind::C => &C_CONV,
            CallConvKind::WindowsX64 => &WIN64_CONV,
            CallConvKind::Host => unreachable!("Host resolves to a concrete convention"),
        }
    }

    pub fn is_persistent(&self, reg: MicroReg) -> bool {
        if reg.is_int() {
            self.int_persistent_regs.contains(&reg)
        } else if reg.is_float() {
            self.float_persistent_regs.contains(&reg)
        } else {
            false
        }
    }

    /// True for registers the callee may clobber
    pub fn is_caller_saved(&self, reg: MicroReg) -> bool {
        if reg == self.stack_pointer || reg == self.frame_pointer {
            return false;
        }
        if !reg.is_physical() {
            return false;
        }
        !self.is_persistent(reg)
    }

    /// ABI classification for returning a struct of `size` bytes
    pub fn classify_struct_return_passing(&self, size: u32) -> StructParamPassing {
        let by_value = match self.kind {
            CallConvKind::WindowsX64 => matches!(size, 1 | 2 | 4 | 8),
            _ => size <= 16,
        };
        if by_value {
            StructParamPassing::ByValue
        } else {
            StructParamPassing::ByReference
        }
    }

    /// Bytes to reserve below the stack arguments for a call with
    /// `num_stack_args` spilled arguments, aligned to `stack_alignment`
    pub fn call_stack_adjust(&self, num_stack_args: u32) -> u32 {
        let raw = self.stack_shadow_space + num_stack_args * self.stack_slot_size;
        if raw == 0 {
            return 0;
        }
        raw.div_ceil(self.stack_alignment) * self.stack_alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysv_argument_order() {
        let conv = CallConv::get(CallConvKind::C);
        assert_eq!(conv.int_arg_regs[0], regs::RDI);
        assert_eq!(conv.int_arg_regs[5], regs::R9);
        assert_eq!(conv.float_arg_regs.len(), 8);
        assert_eq!(conv.stack_shadow_space, 0);
    }

    #[test]
    fn win64_shadow_space_and_args() {
        let conv = CallConv::get(CallConvKind::WindowsX64);
        assert_eq!(conv.int_arg_regs, &[regs::RCX, regs::RDX, regs::R8, regs::R9]);
        assert_eq!(conv.stack_shadow_space, 32);
    }

    #[test]
    fn persistent_vs_caller_saved() {
        let conv = CallConv::get(CallConvKind::C);
        assert!(conv.is_persistent(regs::RBX));
        assert!(conv.is_persistent(regs::R12));
        assert!(!conv.is_persistent(regs::RAX));
        assert!(conv.is_caller_saved(regs::RAX));
        assert!(conv.is_caller_saved(regs::RCX));
        assert!(!conv.is_caller_saved(regs::RSP));
        assert!(!conv.is_caller_saved(regs::RBP));
    }

    #[test]
    fn win64_five_int_args_adjust_to_48() {
        // 32-byte shadow + one stack slot, rounded up to 16.
        let conv = CallConv::get(CallConvKind::WindowsX64);
        assert_eq!(conv.call_stack_adjust(1), 48);
        assert_eq!(conv.call_stack_adjust(0), 32);
    }

    #[test]
    fn struct_return_classification() {
        let c = CallConv::get(CallConvKind::C);
        let w = CallConv::get(CallConvKind::WindowsX64);
        assert_eq!(c.classify_struct_return_passing(16), StructParamPassing::ByValue);
        assert_eq!(c.classify_struct_return_passing(24), StructParamPassing::ByReference);
        assert_eq!(w.classify_struct_return_passing(8), StructParamPassing::ByValue);
        assert_eq!(w.classify_struct_return_passing(12), StructParamPassing::ByReference);
    }
}
