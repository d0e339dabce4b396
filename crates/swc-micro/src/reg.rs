//! Register identity.
//!
//! A [`MicroReg`] packs a class tag and an index into 32 bits. Physical
//! integer registers use the table order `rax, rbx, rcx, rdx, rsp, rbp,
//! rsi, rdi, r8..r15`; the encoder maps that order to hardware register
//! numbers. Virtual registers draw from per-builder counters, one namespace
//! for ints and one for floats.

use std::fmt;

/// Register class tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MicroRegClass {
    IntPhysical = 0,
    FloatPhysical = 1,
    IntVirtual = 2,
    FloatVirtual = 3,
    InstructionPointer = 4,
    NoBase = 5,
    Invalid = 6,
}

/// Packed register identity: class in the top byte, index below
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MicroReg {
    packed: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<MicroReg>(), 4);

const CLASS_SHIFT: u32 = 24;
const INDEX_MASK: u32 = (1 << CLASS_SHIFT) - 1;

impl MicroReg {
    pub const INVALID: MicroReg = MicroReg::pack(MicroRegClass::Invalid, 0);
    pub const RIP: MicroReg = MicroReg::pack(MicroRegClass::InstructionPointer, 0);
    pub const NO_BASE: MicroReg = MicroReg::pack(MicroRegClass::NoBase, 0);

    const fn pack(class: MicroRegClass, index: u32) -> Self {
        Self {
            packed: ((class as u32) << CLASS_SHIFT) | (index & INDEX_MASK),
        }
    }

    pub const fn int_phys(index: u32) -> Self {
        Self::pack(MicroRegClass::IntPhysical, index)
    }

    pub const fn float_phys(index: u32) -> Self {
        Self::pack(MicroRegClass::FloatPhysical, index)
    }

    pub const fn virt_int(index: u32) -> Self {
        Self::pack(MicroRegClass::IntVirtual, index)
    }

    pub const fn virt_float(index: u32) -> Self {
        Self::pack(MicroRegClass::FloatVirtual, index)
    }

    pub fn class(self) -> MicroRegClass {
        match self.packed >> CLASS_SHIFT {
            0 => MicroRegClass::IntPhysical,
            1 => MicroRegClass::FloatPhysical,
            2 => MicroRegClass::IntVirtual,
            3 => MicroRegClass::FloatVirtual,
            4 => MicroRegClass::InstructionPointer,
            5 => MicroRegClass::NoBase,
            _ => MicroRegClass::Invalid,
        }
    }

    pub fn index(self) -> u32 {
        self.packed & INDEX_MASK
    }

    pub fn packed(self) -> u32 {
        self.packed
    }

    pub fn is_valid(self) -> bool {
        self.class() != MicroRegClass::Invalid
    }

    pub fn is_int(self) -> bool {
        matches!(
            self.class(),
            MicroRegClass::IntPhysical | MicroRegClass::IntVirtual
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self.class(),
            MicroRegClass::FloatPhysical | MicroRegClass::FloatVirtual
        )
    }

    pub fn is_instruction_pointer(self) -> bool {
        self.class() == MicroRegClass::InstructionPointer
    }

    pub fn is_no_base(self) -> bool {
        self.class() == MicroRegClass::NoBase
    }

    pub fn is_virtual(self) -> bool {
        matches!(
            self.class(),
            MicroRegClass::IntVirtual | MicroRegClass::FloatVirtual
        )
    }

    pub fn is_virtual_int(self) -> bool {
        self.class() == MicroRegClass::IntVirtual
    }

    pub fn is_virtual_float(self) -> bool {
        self.class() == MicroRegClass::FloatVirtual
    }

    pub fn is_physical(self) -> bool {
        matches!(
            self.class(),
            MicroRegClass::IntPhysical | MicroRegClass::FloatPhysical
        )
    }

    /// Base name, ignoring operand width (`rax`, `xmm3`, `v0`, `vf2`)
    pub fn name(self) -> String {
        if !self.is_valid() {
            return "inv".to_string();
        }
        match self.class() {
            MicroRegClass::InstructionPointer => "rip".to_string(),
            MicroRegClass::NoBase => "nobase".to_string(),
            MicroRegClass::IntPhysical => {
                if (self.index() as usize) < INT_REG_NAMES.len() {
                    INT_REG_NAMES[self.index() as usize].to_string()
                } else {
                    format!("r{}", self.index())
                }
            }
            MicroRegClass::FloatPhysical => format!("xmm{}", self.index()),
            MicroRegClass::IntVirtual => format!("v{}", self.index()),
            MicroRegClass::FloatVirtual => format!("vf{}", self.index()),
            MicroRegClass::Invalid => "inv".to_string(),
        }
    }
}

impl fmt::Debug for MicroReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Integer physical register names in table order
pub const INT_REG_NAMES: [&str; 16] = [
    "rax", "rbx", "rcx", "rdx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

/// Physical register constants in table order
pub mod regs {
    use super::MicroReg;

    pub const RAX: MicroReg = MicroReg::int_phys(0);
    pub const RBX: MicroReg = MicroReg::int_phys(1);
    pub const RCX: MicroReg = MicroReg::int_phys(2);
    pub const RDX: MicroReg = MicroReg::int_phys(3);
    pub const RSP: MicroReg = MicroReg::int_phys(4);
    pub const RBP: MicroReg = MicroReg::int_phys(5);
    pub const RSI: MicroReg = MicroReg::int_phys(6);
    pub const RDI: MicroReg = MicroReg::int_phys(7);
    pub const R8: MicroReg = MicroReg::int_phys(8);
    pub const R9: MicroReg = MicroReg::int_phys(9);
    pub const R10: MicroReg = MicroReg::int_phys(10);
    pub const R11: MicroReg = MicroReg::int_phys(11);
    pub const R12: MicroReg = MicroReg::int_phys(12);
    pub const R13: MicroReg = MicroReg::int_phys(13);
    pub const R14: MicroReg = MicroReg::int_phys(14);
    pub const R15: MicroReg = MicroReg::int_phys(15);

    pub const XMM0: MicroReg = MicroReg::float_phys(0);
    pub const XMM1: MicroReg = MicroReg::float_phys(1);
    pub const XMM2: MicroReg = MicroReg::float_phys(2);
    pub const XMM3: MicroReg = MicroReg::float_phys(3);
    pub const XMM4: MicroReg = MicroReg::float_phys(4);
    pub const XMM5: MicroReg = MicroReg::float_phys(5);
    pub const XMM6: MicroReg = MicroReg::float_phys(6);
    pub const XMM7: MicroReg = MicroReg::float_phys(7);
    pub const XMM12: MicroReg = MicroReg::float_phys(12);
    pub const XMM13: MicroReg = MicroReg::float_phys(13);
    pub const XMM14: MicroReg = MicroReg::float_phys(14);
    pub const XMM15: MicroReg = MicroReg::float_phys(15);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_exclusive() {
        let cases = [
            regs::RAX,
            regs::XMM0,
            MicroReg::virt_int(3),
            MicroReg::virt_float(2),
            MicroReg::RIP,
            MicroReg::NO_BASE,
        ];
        for reg in cases {
            assert!(reg.is_valid());
            let count = [
                reg.is_int(),
                reg.is_float(),
                reg.is_instruction_pointer(),
                reg.is_no_base(),
            ]
            .iter()
            .filter(|&&b| b)
            .count();
            assert_eq!(count, 1, "{:?} must belong to exactly one class", reg);
        }
        assert!(!MicroReg::INVALID.is_valid());
    }

    #[test]
    fn virtuality_is_orthogonal() {
        assert!(MicroReg::virt_int(0).is_int());
        assert!(MicroReg::virt_int(0).is_virtual());
        assert!(regs::RAX.is_int());
        assert!(!regs::RAX.is_virtual());
        assert!(MicroReg::virt_float(1).is_float());
    }

    #[test]
    fn names_follow_table_order() {
        assert_eq!(regs::RAX.name(), "rax");
        assert_eq!(regs::RBX.name(), "rbx");
        assert_eq!(regs::RSP.name(), "rsp");
        assert_eq!(regs::R15.name(), "r15");
        assert_eq!(regs::XMM7.name(), "xmm7");
        assert_eq!(MicroReg::virt_int(4).name(), "v4");
        assert_eq!(MicroReg::virt_float(9).name(), "vf9");
    }

    #[test]
    fn packed_round_trips() {
        let reg = MicroReg::virt_float(123456);
        assert_eq!(reg.index(), 123456);
        assert!(reg.is_virtual_float());
    }
}
