//! swc-x64 - The x86-64 machine-code encoder.
//!
//! Translates a post-allocation micro-instruction stream into bytes:
//! operand-size and REX prefixes, ModR/M and SIB from the operand classes,
//! RIP-relative addressing for relocated loads, short/long jump selection
//! with label patching, and a relocation table over the emitted buffer.

pub mod data_segment;
mod emit;
pub mod encoder;

pub use data_segment::DataSegment;
pub use encoder::X64Encoder;
