//! The MicroBuilder emission API.
//!
//! Code generation drives these `emit_*` operations; each appends one
//! instruction with its canonical operand layout and returns the new
//! instruction's handle. Failures never flow back through the return value;
//! they are reported on the diagnostic channel by the caller.
//!
//! When debug info is enabled the builder snapshots the current source-code
//! reference into the side table for every emitted instruction.

use swc_util::{Span, Symbol};

use crate::callconv::CallConv;
use crate::func::{JumpTableData, LabelId, MicroFunction, MicroRelocKind, MicroRelocation};
use crate::instr::{EncodeFlags, MicroInstr, MicroOpcode};
use crate::operand::MicroOperand;
use crate::ops::{BackendOptLevel, CallConvKind, MicroCond, MicroOp, MicroOpBits};
use crate::reg::MicroReg;
use crate::store::InstrRef;

/// A forward jump awaiting its `PatchJump`
#[derive(Clone, Copy, Debug)]
pub struct MicroJump {
    pub instr: InstrRef,
    pub op_bits: MicroOpBits,
}

/// Destination of a call-parameter pseudo-instruction: a register index in
/// the convention's argument vector, or a positive stack byte offset
/// (marked with [`STACK_SLOT_BIT`]).
pub const STACK_SLOT_BIT: u64 = 1 << 32;

/// A lowered call argument
#[derive(Clone, Copy, Debug)]
pub enum CallArg {
    /// Pass the value held in a register
    Reg(MicroReg, MicroOpBits),
    /// Pass the address `base + offset`
    Addr(MicroReg, u64),
}

/// Call target forms
#[derive(Clone, Copy, Debug)]
pub enum CallTarget {
    Local(Symbol),
    Extern(Symbol),
    Reg(MicroReg),
}

/// Owns one function's stream during emission
pub struct MicroBuilder {
    pub func: MicroFunction,
    next_virt_int: u32,
    next_virt_float: u32,
    debug_info_enabled: bool,
    current_span: Span,
    pending_flags: EncodeFlags,
    pub opt_level: BackendOptLevel,
    pub print_file_path: String,
    pub print_source_line: u32,
}

impl MicroBuilder {
    pub fn new(name: Symbol, conv: CallConvKind) -> Self {
        Self {
            func: MicroFunction::new(name, conv),
            next_virt_int: 0,
            next_virt_float: 0,
            debug_info_enabled: false,
            current_span: Span::DUMMY,
            pending_flags: EncodeFlags::none(),
            opt_level: BackendOptLevel::O0,
            print_file_path: String::new(),
            print_source_line: 0,
        }
    }

    pub fn set_debug_info(&mut self, enabled: bool) {
        self.debug_info_enabled = enabled;
    }

    /// Source reference snapshotted into subsequently emitted instructions
    pub fn set_source_ref(&mut self, span: Span) {
        self.current_span = span;
    }

    /// Flags applied to the next emitted instruction only
    pub fn with_flags(&mut self, flags: EncodeFlags) -> &mut Self {
        self.pending_flags = flags;
        self
    }

    pub fn virtual_int_reg(&mut self) -> MicroReg {
        let reg = MicroReg::virt_int(self.next_virt_int);
        self.next_virt_int += 1;
        reg
    }

    pub fn virtual_float_reg(&mut self) -> MicroReg {
        let reg = MicroReg::virt_float(self.next_virt_float);
        self.next_virt_float += 1;
        reg
    }

    pub fn virtual_int_count(&self) -> u32 {
        self.next_virt_int
    }

    /// The allocator must not color `vreg` with `preg`
    pub fn add_virtual_reg_forbidden_phys_reg(&mut self, vreg: MicroReg, preg: MicroReg) {
        debug_assert!(vreg.is_virtual() && preg.is_physical());
        self.func.forbidden.entry(vreg).or_default().push(preg);
    }

    fn add_instr(&mut self, op: MicroOpcode, ops: &[MicroOperand]) -> InstrRef {
        let flags = std::mem::take(&mut self.pending_flags);
        let ops_ref = self.func.operands.alloc_from(ops);
        let r = self.func.instrs.push(MicroInstr {
            op,
            emit_flags: flags,
            num_operands: ops.len() as u8,
            ops: ops_ref,
        });
        if self.debug_info_enabled && !self.current_span.is_dummy() {
            self.func.debug_info.insert(r, self.current_span);
        }
        r
    }

    // ----- data movement ---------------------------------------------------

    pub fn emit_load_reg_imm(&mut self, dst: MicroReg, value: u64, bits: MicroOpBits) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadRegImm,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(value),
            ],
        )
    }

    pub fn emit_load_reg_reg(&mut self, dst: MicroReg, src: MicroReg, bits: MicroOpBits) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadRegReg,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
            ],
        )
    }

    pub fn emit_load_reg_mem(
        &mut self,
        dst: MicroReg,
        base: MicroReg,
        offset: u64,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadRegMem,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_load_mem_reg(
        &mut self,
        base: MicroReg,
        offset: u64,
        src: MicroReg,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadMemReg,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_load_mem_imm(
        &mut self,
        base: MicroReg,
        offset: u64,
        value: u64,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadMemImm,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(offset),
                MicroOperand::Imm(value),
            ],
        )
    }

    pub fn emit_load_addr_reg_mem(
        &mut self,
        dst: MicroReg,
        base: MicroReg,
        offset: u64,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadAddrRegMem,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(offset),
            ],
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit_load_amc_reg_mem(
        &mut self,
        dst: MicroReg,
        dst_bits: MicroOpBits,
        base: MicroReg,
        mul: MicroReg,
        scale: u64,
        disp: u64,
        src_bits: MicroOpBits,
    ) -> InstrRef {
        debug_assert!(matches!(scale, 1 | 2 | 4 | 8));
        self.add_instr(
            MicroOpcode::LoadAmcRegMem,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Reg(mul),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
                MicroOperand::Imm(scale),
                MicroOperand::Imm(disp),
            ],
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit_load_amc_mem_reg(
        &mut self,
        base: MicroReg,
        mul: MicroReg,
        scale: u64,
        disp: u64,
        base_bits: MicroOpBits,
        src: MicroReg,
        src_bits: MicroOpBits,
    ) -> InstrRef {
        debug_assert!(matches!(scale, 1 | 2 | 4 | 8));
        self.add_instr(
            MicroOpcode::LoadAmcMemReg,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Reg(mul),
                MicroOperand::Reg(src),
                MicroOperand::Bits(base_bits),
                MicroOperand::Bits(src_bits),
                MicroOperand::Imm(scale),
                MicroOperand::Imm(disp),
            ],
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit_load_amc_mem_imm(
        &mut self,
        base: MicroReg,
        mul: MicroReg,
        scale: u64,
        disp: u64,
        base_bits: MicroOpBits,
        value: u64,
        value_bits: MicroOpBits,
    ) -> InstrRef {
        debug_assert!(matches!(scale, 1 | 2 | 4 | 8));
        self.add_instr(
            MicroOpcode::LoadAmcMemImm,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Reg(mul),
                MicroOperand::Bits(base_bits),
                MicroOperand::Bits(value_bits),
                MicroOperand::Imm(scale),
                MicroOperand::Imm(disp),
                MicroOperand::Imm(value),
            ],
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit_load_addr_amc_reg_mem(
        &mut self,
        dst: MicroReg,
        dst_bits: MicroOpBits,
        base: MicroReg,
        mul: MicroReg,
        scale: u64,
        disp: u64,
    ) -> InstrRef {
        debug_assert!(matches!(scale, 1 | 2 | 4 | 8));
        self.add_instr(
            MicroOpcode::LoadAddrAmcRegMem,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Reg(mul),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Imm(scale),
                MicroOperand::Imm(disp),
            ],
        )
    }

    pub fn emit_load_signed_ext_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        dst_bits: MicroOpBits,
        src_bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadSignedExtRegReg,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
            ],
        )
    }

    pub fn emit_load_signed_ext_reg_mem(
        &mut self,
        dst: MicroReg,
        base: MicroReg,
        offset: u64,
        dst_bits: MicroOpBits,
        src_bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadSignedExtRegMem,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_load_zero_ext_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        dst_bits: MicroOpBits,
        src_bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadZeroExtRegReg,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
            ],
        )
    }

    pub fn emit_load_zero_ext_reg_mem(
        &mut self,
        dst: MicroReg,
        base: MicroReg,
        offset: u64,
        dst_bits: MicroOpBits,
        src_bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadZeroExtRegMem,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_clear_reg(&mut self, reg: MicroReg, bits: MicroOpBits) -> InstrRef {
        self.add_instr(
            MicroOpcode::ClearReg,
            &[MicroOperand::Reg(reg), MicroOperand::Bits(bits)],
        )
    }

    // ----- arithmetic ------------------------------------------------------

    pub fn emit_op_unary_reg(&mut self, reg: MicroReg, op: MicroOp, bits: MicroOpBits) -> InstrRef {
        self.add_instr(
            MicroOpcode::OpUnaryReg,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
            ],
        )
    }

    pub fn emit_op_unary_mem(
        &mut self,
        base: MicroReg,
        offset: u64,
        op: MicroOp,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::OpUnaryMem,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_op_binary_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        op: MicroOp,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::OpBinaryRegReg,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
            ],
        )
    }

    pub fn emit_op_binary_reg_mem(
        &mut self,
        dst: MicroReg,
        base: MicroReg,
        offset: u64,
        op: MicroOp,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::OpBinaryRegMem,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(base),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_op_binary_mem_reg(
        &mut self,
        base: MicroReg,
        offset: u64,
        src: MicroReg,
        op: MicroOp,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::OpBinaryMemReg,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_op_binary_reg_imm(
        &mut self,
        dst: MicroReg,
        value: u64,
        op: MicroOp,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::OpBinaryRegImm,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::Imm(value),
            ],
        )
    }

    pub fn emit_op_binary_mem_imm(
        &mut self,
        base: MicroReg,
        offset: u64,
        value: u64,
        op: MicroOp,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::OpBinaryMemImm,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
                MicroOperand::Imm(offset),
                MicroOperand::Imm(value),
            ],
        )
    }

    pub fn emit_op_ternary_reg_reg_reg(
        &mut self,
        r0: MicroReg,
        r1: MicroReg,
        r2: MicroReg,
        op: MicroOp,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::OpTernaryRegRegReg,
            &[
                MicroOperand::Reg(r0),
                MicroOperand::Reg(r1),
                MicroOperand::Reg(r2),
                MicroOperand::Bits(bits),
                MicroOperand::Op(op),
            ],
        )
    }

    // ----- comparison ------------------------------------------------------

    pub fn emit_cmp_reg_reg(&mut self, a: MicroReg, b: MicroReg, bits: MicroOpBits) -> InstrRef {
        self.add_instr(
            MicroOpcode::CmpRegReg,
            &[
                MicroOperand::Reg(a),
                MicroOperand::Reg(b),
                MicroOperand::Bits(bits),
            ],
        )
    }

    pub fn emit_cmp_reg_imm(&mut self, a: MicroReg, value: u64, bits: MicroOpBits) -> InstrRef {
        self.add_instr(
            MicroOpcode::CmpRegImm,
            &[
                MicroOperand::Reg(a),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(value),
            ],
        )
    }

    pub fn emit_cmp_mem_reg(
        &mut self,
        base: MicroReg,
        offset: u64,
        reg: MicroReg,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::CmpMemReg,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_cmp_mem_imm(
        &mut self,
        base: MicroReg,
        offset: u64,
        value: u64,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::CmpMemImm,
            &[
                MicroOperand::Reg(base),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(offset),
                MicroOperand::Imm(value),
            ],
        )
    }

    pub fn emit_set_cond_reg(&mut self, dst: MicroReg, cond: MicroCond) -> InstrRef {
        debug_assert!(dst.is_int());
        self.add_instr(
            MicroOpcode::SetCondReg,
            &[MicroOperand::Reg(dst), MicroOperand::Cond(cond)],
        )
    }

    pub fn emit_load_cond_reg_reg(
        &mut self,
        dst: MicroReg,
        src: MicroReg,
        cond: MicroCond,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadCondRegReg,
            &[
                MicroOperand::Reg(dst),
                MicroOperand::Reg(src),
                MicroOperand::Cond(cond),
                MicroOperand::Bits(bits),
            ],
        )
    }

    // ----- structural ------------------------------------------------------

    pub fn emit_enter(&mut self) -> InstrRef {
        self.add_instr(MicroOpcode::Enter, &[])
    }

    pub fn emit_leave(&mut self) -> InstrRef {
        self.add_instr(MicroOpcode::Leave, &[])
    }

    pub fn emit_nop(&mut self) -> InstrRef {
        self.add_instr(MicroOpcode::Nop, &[])
    }

    pub fn emit_end(&mut self) -> InstrRef {
        self.add_instr(MicroOpcode::End, &[])
    }

    pub fn emit_ret(&mut self) -> InstrRef {
        self.add_instr(MicroOpcode::Ret, &[])
    }

    pub fn emit_push(&mut self, reg: MicroReg) -> InstrRef {
        self.add_instr(MicroOpcode::Push, &[MicroOperand::Reg(reg)])
    }

    pub fn emit_pop(&mut self, reg: MicroReg) -> InstrRef {
        self.add_instr(MicroOpcode::Pop, &[MicroOperand::Reg(reg)])
    }

    // ----- calls -----------------------------------------------------------

    pub fn emit_call_local(&mut self, name: Symbol, conv: CallConvKind) -> InstrRef {
        let r = self.add_instr(
            MicroOpcode::CallLocal,
            &[MicroOperand::Name(name), MicroOperand::Conv(conv)],
        );
        self.func.relocations.push(MicroRelocation {
            kind: MicroRelocKind::LocalFunctionAddress,
            instr: r,
            symbol: Some(name),
            constant: None,
            address: None,
        });
        r
    }

    pub fn emit_call_extern(&mut self, name: Symbol, conv: CallConvKind) -> InstrRef {
        let r = self.add_instr(
            MicroOpcode::CallExtern,
            &[MicroOperand::Name(name), MicroOperand::Conv(conv)],
        );
        self.func.relocations.push(MicroRelocation {
            kind: MicroRelocKind::ForeignFunctionAddress,
            instr: r,
            symbol: Some(name),
            constant: None,
            address: None,
        });
        r
    }

    pub fn emit_call_reg(&mut self, reg: MicroReg, conv: CallConvKind) -> InstrRef {
        self.add_instr(
            MicroOpcode::CallIndirect,
            &[MicroOperand::Reg(reg), MicroOperand::Conv(conv)],
        )
    }

    pub fn emit_load_call_param(&mut self, slot: u64, src: MicroReg, bits: MicroOpBits) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadCallParam,
            &[
                MicroOperand::Imm(slot),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
            ],
        )
    }

    pub fn emit_load_call_addr_param(&mut self, slot: u64, base: MicroReg, offset: u64) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadCallAddrParam,
            &[
                MicroOperand::Imm(slot),
                MicroOperand::Reg(base),
                MicroOperand::Imm(offset),
            ],
        )
    }

    pub fn emit_load_call_zero_ext_param(
        &mut self,
        slot: u64,
        src: MicroReg,
        dst_bits: MicroOpBits,
        src_bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::LoadCallZeroExtParam,
            &[
                MicroOperand::Imm(slot),
                MicroOperand::Reg(src),
                MicroOperand::Bits(dst_bits),
                MicroOperand::Bits(src_bits),
            ],
        )
    }

    /// Store `src` into the function's own incoming parameter home slot
    pub fn emit_store_call_param(
        &mut self,
        param_index: u64,
        src: MicroReg,
        bits: MicroOpBits,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::StoreCallParam,
            &[
                MicroOperand::Imm(param_index),
                MicroOperand::Reg(src),
                MicroOperand::Bits(bits),
            ],
        )
    }

    /// Full call-site lowering: materialize arguments into the convention's
    /// slots, adjust the stack for shadow space and stack arguments, emit
    /// the call, restore the stack.
    pub fn emit_call_with_args(
        &mut self,
        target: CallTarget,
        conv_kind: CallConvKind,
        args: &[CallArg],
    ) -> InstrRef {
        let conv = CallConv::get(conv_kind);
        let mut int_used = 0usize;
        let mut float_used = 0usize;
        let mut stack_used = 0u32;
        let mut lowered: Vec<(u64, Option<MicroReg>, CallArg)> = Vec::with_capacity(args.len());

        for (position, &arg) in args.iter().enumerate() {
            let is_float = matches!(arg, CallArg::Reg(reg, _) if reg.is_float());
            let vector = if is_float {
                conv.float_arg_regs
            } else {
                conv.int_arg_regs
            };
            // Windows x64 argument slots are positional; System V counts
            // int and float registers independently.
            let reg_slot = match conv.kind {
                CallConvKind::WindowsX64 => (position < vector.len()).then_some(position),
                _ => {
                    if is_float {
                        (float_used < vector.len()).then_some(float_used)
                    } else {
                        (int_used < vector.len()).then_some(int_used)
                    }
                }
            };

            if is_float {
                float_used += 1;
            } else {
                int_used += 1;
            }

            let (slot, dest) = match reg_slot {
                Some(index) => (index as u64, Some(vector[index])),
                None => {
                    let offset = conv.stack_shadow_space + stack_used * conv.stack_slot_size;
                    stack_used += 1;
                    (STACK_SLOT_BIT | offset as u64, None)
                }
            };
            lowered.push((slot, dest, arg));
        }

        // Argument registers are written in order; a source consumed after
        // slot k's move must not be allocated to slot k's register.
        for k in 0..lowered.len() {
            let Some(arg_reg) = lowered[k].1 else {
                continue;
            };
            for (_, _, later) in lowered.iter().skip(k + 1) {
                let src = match later {
                    CallArg::Reg(src, _) => *src,
                    CallArg::Addr(base, _) => *base,
                };
                if src.is_virtual() {
                    self.add_virtual_reg_forbidden_phys_reg(src, arg_reg);
                }
            }
            if let CallTarget::Reg(target_reg) = target {
                if target_reg.is_virtual() {
                    self.add_virtual_reg_forbidden_phys_reg(target_reg, arg_reg);
                }
            }
        }

        let adjust = conv.call_stack_adjust(stack_used);
        if adjust > 0 {
            self.emit_op_binary_reg_imm(
                conv.stack_pointer,
                adjust as u64,
                MicroOp::Subtract,
                MicroOpBits::B64,
            );
        }

        for (slot, _, arg) in lowered {
            match arg {
                CallArg::Reg(reg, bits) => {
                    self.emit_load_call_param(slot, reg, bits);
                }
                CallArg::Addr(base, offset) => {
                    self.emit_load_call_addr_param(slot, base, offset);
                }
            }
        }

        let call = match target {
            CallTarget::Local(name) => self.emit_call_local(name, conv_kind),
            CallTarget::Extern(name) => self.emit_call_extern(name, conv_kind),
            CallTarget::Reg(reg) => self.emit_call_reg(reg, conv_kind),
        };

        if adjust > 0 {
            self.emit_op_binary_reg_imm(
                conv.stack_pointer,
                adjust as u64,
                MicroOp::Add,
                MicroOpBits::B64,
            );
        }

        call
    }

    // ----- jumps and labels ------------------------------------------------

    pub fn emit_jump_reg(&mut self, reg: MicroReg) -> InstrRef {
        self.add_instr(MicroOpcode::JumpReg, &[MicroOperand::Reg(reg)])
    }

    /// Forward jump with two-phase patching; pair with [`emit_patch_jump`]
    pub fn emit_jump(&mut self, cond: MicroCond, bits: MicroOpBits) -> MicroJump {
        let instr = self.add_instr(
            MicroOpcode::JumpCond,
            &[MicroOperand::Cond(cond), MicroOperand::Bits(bits)],
        );
        MicroJump {
            instr,
            op_bits: bits,
        }
    }

    /// Resolve `jump` to the position of this patch instruction
    pub fn emit_patch_jump(&mut self, jump: MicroJump) -> InstrRef {
        self.add_instr(
            MicroOpcode::PatchJump,
            &[
                MicroOperand::Imm(jump.instr.0 as u64),
                MicroOperand::Imm(0),
                MicroOperand::Imm(0),
            ],
        )
    }

    pub fn create_label(&mut self) -> LabelId {
        let id = LabelId(self.func.labels.len() as u32);
        self.func.labels.push(None);
        id
    }

    /// Place `label` at the current stream position
    ///
    /// Each label must be placed exactly once before encoding.
    pub fn place_label(&mut self, label: LabelId) -> InstrRef {
        debug_assert!(
            self.func.labels[label.0 as usize].is_none(),
            "label placed twice"
        );
        let r = self.add_instr(MicroOpcode::Label, &[MicroOperand::Imm(label.0 as u64)]);
        self.func.labels[label.0 as usize] = Some(r);
        r
    }

    /// Jump to a label, placed or not
    pub fn emit_jump_to_label(
        &mut self,
        cond: MicroCond,
        bits: MicroOpBits,
        label: LabelId,
    ) -> InstrRef {
        self.add_instr(
            MicroOpcode::JumpCondImm,
            &[
                MicroOperand::Cond(cond),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(label.0 as u64),
            ],
        )
    }

    /// Indexed jump through a table of code offsets
    pub fn emit_jump_table(
        &mut self,
        table_reg: MicroReg,
        offset_reg: MicroReg,
        labels: &[LabelId],
    ) -> InstrRef {
        let table_index = self.func.jump_tables.len() as u64;
        self.func.jump_tables.push(JumpTableData {
            labels: labels.to_vec(),
        });
        let r = self.add_instr(
            MicroOpcode::JumpTable,
            &[
                MicroOperand::Reg(table_reg),
                MicroOperand::Reg(offset_reg),
                MicroOperand::Imm(table_index),
                MicroOperand::Imm(labels.len() as u64),
            ],
        );
        self.func.relocations.push(MicroRelocation {
            kind: MicroRelocKind::ConstantAddress,
            instr: r,
            symbol: None,
            constant: Some(table_index as u32),
            address: None,
        });
        r
    }

    // ----- relocated loads -------------------------------------------------

    /// Load the address of `symbol`; the 32-bit displacement slot is
    /// relocated after layout
    pub fn emit_load_symbol_reloc_address(
        &mut self,
        reg: MicroReg,
        symbol: Symbol,
        offset: u32,
        kind: MicroRelocKind,
    ) -> InstrRef {
        let r = self.add_instr(
            MicroOpcode::SymbolRelocAddr,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Name(symbol),
                MicroOperand::Imm(offset as u64),
            ],
        );
        self.func.relocations.push(MicroRelocation {
            kind,
            instr: r,
            symbol: Some(symbol),
            constant: None,
            address: None,
        });
        r
    }

    /// Load the value stored at a managed constant's address
    pub fn emit_load_constant_reloc_value(
        &mut self,
        reg: MicroReg,
        constant: u32,
        bits: MicroOpBits,
    ) -> InstrRef {
        let r = self.add_instr(
            MicroOpcode::SymbolRelocValue,
            &[
                MicroOperand::Reg(reg),
                MicroOperand::Bits(bits),
                MicroOperand::Imm(constant as u64),
                MicroOperand::Imm(0),
            ],
        );
        self.func.relocations.push(MicroRelocation {
            kind: MicroRelocKind::ConstantAddress,
            instr: r,
            symbol: None,
            constant: Some(constant),
            address: None,
        });
        r
    }
}
