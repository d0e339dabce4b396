//! The architecture-facing encoder interface.
//!
//! Only x86-64 is implemented (in `swc-x64`), but every consumer goes
//! through this trait so the architecture stays a configuration detail.

use swc_util::{Handler, Symbol};

use crate::func::{MicroFunction, MicroRelocKind};
use crate::ops::MicroOpBits;
use crate::reg::MicroReg;
use crate::store::InstrRef;

/// A byte-offset relocation in the emitted buffer
///
/// After the host resolves the target address it patches the 32- or 64-bit
/// field at `offset`.
#[derive(Clone, Copy, Debug)]
pub struct Relocation {
    pub kind: MicroRelocKind,
    pub offset: u32,
    pub symbol: Option<Symbol>,
    pub constant: Option<u32>,
    pub addend: i64,
}

/// Translates a post-allocation instruction stream into machine code
pub trait Encoder {
    fn arch_name(&self) -> &'static str;

    /// Encode the whole stream, resolving labels and jump patches.
    /// Problems are reported through `handler`; returns false when the
    /// buffer is unusable.
    fn encode_function(&mut self, func: &MicroFunction, handler: &Handler) -> bool;

    /// The emitted bytes
    fn code(&self) -> &[u8];

    /// Relocations recorded against the buffer
    fn relocations(&self) -> &[Relocation];

    /// Code offset an instruction was encoded at
    fn instr_offset(&self, r: InstrRef) -> Option<u32>;

    /// Concrete register name at a width (`rax`, `eax`, `al`, `xmm3`)
    fn format_register_name(&self, reg: MicroReg, bits: MicroOpBits) -> String;
}
