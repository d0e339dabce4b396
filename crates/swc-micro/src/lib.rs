//! swc-micro - The virtual-register micro-instruction IR.
//!
//! This crate is the heart of the backend: the [`MicroInstr`] data model and
//! its paged storage, the [`MicroBuilder`] emission API, the calling
//! convention tables, the pass manager with every IR pass (register
//! allocation, constant propagation, dead-store elimination, prolog/epilog,
//! legalization, encoding), the textual printer and the micro-asm reader.
//!
//! The pipeline over one function:
//!
//! ```text
//! MicroBuilder emits -> MicroFunction (virtual regs)
//!     pre-optimization passes   (fixed point)
//!     RegisterAllocation -> PrologEpilog -> Legalize
//!     post-optimization passes  (fixed point)
//!     Encode -> machine code bytes + relocations
//! ```
//!
//! The machine encoder itself lives in `swc-x64`; this crate only defines
//! the [`Encoder`] interface the final pass drives.

pub mod builder;
pub mod callconv;
pub mod encoder;
pub mod func;
pub mod instr;
pub mod operand;
pub mod ops;
pub mod pass;
pub mod passes;
pub mod printer;
pub mod reader;
pub mod reg;
pub mod rewrite;
pub mod store;

pub use builder::{CallArg, CallTarget, MicroBuilder, MicroJump};
pub use callconv::{CallConv, StructParamPassing};
pub use encoder::{Encoder, Relocation};
pub use func::{FrameLayout, LabelId, MicroFunction, MicroRelocKind, MicroRelocation};
pub use instr::{EncodeFlags, MicroInstr, MicroOpcode, UseDef};
pub use operand::MicroOperand;
pub use ops::{BackendOptLevel, CallConvKind, MicroCond, MicroOp, MicroOpBits};
pub use pass::{MicroPass, MicroPassContext, MicroPassManager, MicroRegPrintMode};
pub use printer::PrintHeader;
pub use reader::parse_micro_asm;
pub use reg::{regs, MicroReg, MicroRegClass};
pub use store::{InstrRef, InstrStore, OperandRef, OperandStore};
