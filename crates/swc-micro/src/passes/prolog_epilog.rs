//! Stack frame materialization.
//!
//! Runs after allocation: finalizes the frame layout, expands `Enter` into
//! `push rbp; mov rbp, rsp; sub rsp, frame; push <callee-saved>` and every
//! `Ret` into the symmetric restore sequence, and replaces the
//! `LoadCallParam*` pseudo-instructions with concrete moves into argument
//! registers or outgoing stack slots.

use swc_util::diagnostic::E_FRAME_TOO_LARGE;
use swc_util::DiagnosticBuilder;

use crate::builder::STACK_SLOT_BIT;
use crate::callconv::CallConv;
use crate::func::MicroFunction;
use crate::instr::{EncodeFlags, MicroOpcode};
use crate::operand::MicroOperand;
use crate::ops::{CallConvKind, MicroOp, MicroOpBits};
use crate::pass::{MicroPass, MicroPassContext, MicroRegPrintMode};
use crate::reg::{regs, MicroReg};
use crate::rewrite::StreamRewriter;

/// Incoming parameter home slots live above the saved rbp/return address
const PARAM_HOME_BASE: u64 = 16;

#[derive(Default)]
pub struct PrologEpilogPass;

impl MicroPass for PrologEpilogPass {
    fn name(&self) -> &'static str {
        "prolog-epilog"
    }

    fn print_mode_before(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Concrete
    }

    fn print_mode_after(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Concrete
    }

    fn run(&mut self, ctx: &mut MicroPassContext<'_>) -> bool {
        let func = &mut *ctx.func;
        let conv = CallConv::get(func.conv);
        func.frame.finalize(conv);

        // The frame adjustment must stay encodable as a 32-bit immediate.
        if func.frame.frame_size > i32::MAX as u32 {
            DiagnosticBuilder::error(format!(
                "function `{}`: stack frame of {} bytes is too large for the ABI",
                func.symbol_name, func.frame.frame_size
            ))
            .code(E_FRAME_TOO_LARGE)
            .emit(ctx.handler);
            return false;
        }

        let next_call_conv = next_call_convs(func);
        let frame_size = func.frame.frame_size;
        let callee_saved = func.frame.callee_saved.clone();

        let mut rw = StreamRewriter::new(func);
        let mut saw_enter = false;

        for old in func.instrs.refs() {
            let inst = *func.instr(old);

            // A function without an explicit Enter still needs its frame.
            if !saw_enter {
                saw_enter = true;
                rw.begin(func, old);
                if inst.op == MicroOpcode::Enter {
                    emit_prolog(&mut rw, frame_size, &callee_saved);
                    continue;
                }
                emit_prolog(&mut rw, frame_size, &callee_saved);
            }

            match inst.op {
                MicroOpcode::Enter => {
                    // Duplicate Enter; nothing left to set up.
                    rw.begin(func, old);
                    rw.emit(MicroOpcode::Ignore, EncodeFlags::none(), &[]);
                }
                MicroOpcode::Leave => {
                    // The restore sequence is emitted at Ret.
                    rw.begin(func, old);
                    rw.emit(MicroOpcode::Ignore, EncodeFlags::none(), &[]);
                }
                MicroOpcode::Ret => {
                    rw.begin(func, old);
                    emit_epilog(&mut rw, frame_size, &callee_saved);
                    rw.emit(MicroOpcode::Ret, inst.emit_flags, &[]);
                }
                MicroOpcode::LoadCallParam => {
                    let ops = func.ops(old);
                    let slot = ops[0].imm();
                    let src = ops[1].reg();
                    let bits = ops[2].bits();
                    let call_conv =
                        CallConv::get(next_call_conv[old.0 as usize].unwrap_or(func.conv));
                    rw.begin(func, old);
                    match decode_slot(call_conv, slot, src.is_float()) {
                        SlotDest::Reg(arg) => {
                            rw.emit(
                                MicroOpcode::LoadRegReg,
                                inst.emit_flags,
                                &[
                                    MicroOperand::Reg(arg),
                                    MicroOperand::Reg(src),
                                    MicroOperand::Bits(bits),
                                ],
                            );
                        }
                        SlotDest::Stack(offset) => {
                            rw.emit(
                                MicroOpcode::LoadMemReg,
                                inst.emit_flags,
                                &[
                                    MicroOperand::Reg(regs::RSP),
                                    MicroOperand::Reg(src),
                                    MicroOperand::Bits(bits),
                                    MicroOperand::Imm(offset),
                                ],
                            );
                        }
                    }
                }
                MicroOpcode::LoadCallAddrParam => {
                    let ops = func.ops(old);
                    let slot = ops[0].imm();
                    let base = ops[1].reg();
                    let offset = ops[2].imm();
                    let call_conv =
                        CallConv::get(next_call_conv[old.0 as usize].unwrap_or(func.conv));
                    rw.begin(func, old);
                    match decode_slot(call_conv, slot, false) {
                        SlotDest::Reg(arg) => {
                            rw.emit(
                                MicroOpcode::LoadAddrRegMem,
                                inst.emit_flags,
                                &[
                                    MicroOperand::Reg(arg),
                                    MicroOperand::Reg(base),
                                    MicroOperand::Bits(MicroOpBits::B64),
                                    MicroOperand::Imm(offset),
                                ],
                            );
                        }
                        SlotDest::Stack(stack_offset) => {
                            rw.emit(
                                MicroOpcode::LoadAddrRegMem,
                                inst.emit_flags,
                                &[
                                    MicroOperand::Reg(regs::R11),
                                    MicroOperand::Reg(base),
                                    MicroOperand::Bits(MicroOpBits::B64),
                                    MicroOperand::Imm(offset),
                                ],
                            );
                            rw.emit(
                                MicroOpcode::LoadMemReg,
                                inst.emit_flags,
                                &[
                                    MicroOperand::Reg(regs::RSP),
                                    MicroOperand::Reg(regs::R11),
                                    MicroOperand::Bits(MicroOpBits::B64),
                                    MicroOperand::Imm(stack_offset),
                                ],
                            );
                        }
                    }
                }
                MicroOpcode::LoadCallZeroExtParam => {
                    let ops = func.ops(old);
                    let slot = ops[0].imm();
                    let src = ops[1].reg();
                    let dst_bits = ops[2].bits();
                    let src_bits = ops[3].bits();
                    let call_conv =
                        CallConv::get(next_call_conv[old.0 as usize].unwrap_or(func.conv));
                    rw.begin(func, old);
                    match decode_slot(call_conv, slot, src.is_float()) {
                        SlotDest::Reg(arg) => {
                            rw.emit(
                                MicroOpcode::LoadZeroExtRegReg,
                                inst.emit_flags,
                                &[
                                    MicroOperand::Reg(arg),
                                    MicroOperand::Reg(src),
                                    MicroOperand::Bits(dst_bits),
                                    MicroOperand::Bits(src_bits),
                                ],
                            );
                        }
                        SlotDest::Stack(offset) => {
                            rw.emit(
                                MicroOpcode::LoadZeroExtRegReg,
                                inst.emit_flags,
                                &[
                                    MicroOperand::Reg(regs::R11),
                                    MicroOperand::Reg(src),
                                    MicroOperand::Bits(dst_bits),
                                    MicroOperand::Bits(src_bits),
                                ],
                            );
                            rw.emit(
                                MicroOpcode::LoadMemReg,
                                inst.emit_flags,
                                &[
                                    MicroOperand::Reg(regs::RSP),
                                    MicroOperand::Reg(regs::R11),
                                    MicroOperand::Bits(dst_bits),
                                    MicroOperand::Imm(offset),
                                ],
                            );
                        }
                    }
                }
                MicroOpcode::StoreCallParam => {
                    let ops = func.ops(old);
                    let index = ops[0].imm();
                    let src = ops[1].reg();
                    let bits = ops[2].bits();
                    rw.begin(func, old);
                    rw.emit(
                        MicroOpcode::LoadMemReg,
                        inst.emit_flags,
                        &[
                            MicroOperand::Reg(regs::RBP),
                            MicroOperand::Reg(src),
                            MicroOperand::Bits(bits),
                            MicroOperand::Imm(PARAM_HOME_BASE + index * 8),
                        ],
                    );
                }
                _ => {
                    rw.keep(func, old);
                }
            }
        }

        rw.finish(func);
        true
    }
}

enum SlotDest {
    Reg(MicroReg),
    Stack(u64),
}

fn decode_slot(conv: &CallConv, slot: u64, is_float: bool) -> SlotDest {
    if slot & STACK_SLOT_BIT != 0 {
        SlotDest::Stack(slot & 0xFFFF_FFFF)
    } else {
        let vector = if is_float {
            conv.float_arg_regs
        } else {
            conv.int_arg_regs
        };
        SlotDest::Reg(vector[slot as usize])
    }
}

/// Convention of the call each instruction position feeds into
fn next_call_convs(func: &MicroFunction) -> Vec<Option<CallConvKind>> {
    let count = func.instrs.count() as usize;
    let mut out = vec![None; count];
    let mut pending: Option<CallConvKind> = None;
    for idx in (0..count).rev() {
        let r = crate::store::InstrRef(idx as u32);
        let inst = func.instr(r);
        if inst.op.is_call() {
            pending = Some(func.ops(r)[1].conv());
        }
        out[idx] = pending;
    }
    out
}

fn emit_prolog(rw: &mut StreamRewriter, frame_size: u32, callee_saved: &[MicroReg]) {
    rw.emit(
        MicroOpcode::Push,
        EncodeFlags::none(),
        &[MicroOperand::Reg(regs::RBP)],
    );
    rw.emit(
        MicroOpcode::LoadRegReg,
        EncodeFlags::none(),
        &[
            MicroOperand::Reg(regs::RBP),
            MicroOperand::Reg(regs::RSP),
            MicroOperand::Bits(MicroOpBits::B64),
        ],
    );
    if frame_size > 0 {
        rw.emit(
            MicroOpcode::OpBinaryRegImm,
            EncodeFlags::none(),
            &[
                MicroOperand::Reg(regs::RSP),
                MicroOperand::Bits(MicroOpBits::B64),
                MicroOperand::Op(MicroOp::Subtract),
                MicroOperand::Imm(frame_size as u64),
            ],
        );
    }
    for &reg in callee_saved {
        rw.emit(
            MicroOpcode::Push,
            EncodeFlags::none(),
            &[MicroOperand::Reg(reg)],
        );
    }
}

fn emit_epilog(rw: &mut StreamRewriter, frame_size: u32, callee_saved: &[MicroReg]) {
    for &reg in callee_saved.iter().rev() {
        rw.emit(
            MicroOpcode::Pop,
            EncodeFlags::none(),
            &[MicroOperand::Reg(reg)],
        );
    }
    if frame_size > 0 {
        rw.emit(
            MicroOpcode::OpBinaryRegImm,
            EncodeFlags::none(),
            &[
                MicroOperand::Reg(regs::RSP),
                MicroOperand::Bits(MicroOpBits::B64),
                MicroOperand::Op(MicroOp::Add),
                MicroOperand::Imm(frame_size as u64),
            ],
        );
    }
    rw.emit(
        MicroOpcode::Pop,
        EncodeFlags::none(),
        &[MicroOperand::Reg(regs::RBP)],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{CallArg, CallTarget, MicroBuilder};
    use swc_util::{Handler, Logger, Symbol};

    fn run_pass(builder: &mut MicroBuilder) {
        let handler = Handler::new();
        let logger = Logger::new();
        let mut ctx = MicroPassContext {
            func: &mut builder.func,
            encoder: None,
            handler: &handler,
            logger: &logger,
            opt_level: crate::ops::BackendOptLevel::O0,
            pass_print: &[],
            print_file_path: "",
            print_source_line: 0,
        };
        PrologEpilogPass.run(&mut ctx);
    }

    fn opcodes(func: &MicroFunction) -> Vec<MicroOpcode> {
        func.instrs.refs().map(|r| func.instr(r).op).collect()
    }

    #[test]
    fn enter_and_ret_expand_symmetrically() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_enter();
        b.emit_nop();
        b.emit_ret();
        b.func.frame.user_stack_size = 24;
        b.func.frame.callee_saved = vec![regs::RBX];
        run_pass(&mut b);

        let ops = opcodes(&b.func);
        // push rbp, mov, sub, push rbx, nop, pop rbx, add, pop rbp, ret
        assert_eq!(
            ops,
            vec![
                MicroOpcode::Push,
                MicroOpcode::LoadRegReg,
                MicroOpcode::OpBinaryRegImm,
                MicroOpcode::Push,
                MicroOpcode::Nop,
                MicroOpcode::Pop,
                MicroOpcode::OpBinaryRegImm,
                MicroOpcode::Pop,
                MicroOpcode::Ret,
            ]
        );
        // Frame padded to keep 16-byte alignment with one push.
        assert_eq!(b.func.frame.frame_size, 40);
    }

    #[test]
    fn call_params_become_arg_register_moves() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_enter();
        b.emit_call_with_args(
            CallTarget::Extern(Symbol::intern("callee")),
            CallConvKind::C,
            &[
                CallArg::Reg(regs::RAX, MicroOpBits::B64),
                CallArg::Reg(regs::RBX, MicroOpBits::B64),
            ],
        );
        b.emit_ret();
        run_pass(&mut b);

        let mut moves = Vec::new();
        for r in b.func.instrs.refs() {
            if b.func.instr(r).op == MicroOpcode::LoadRegReg {
                let ops = b.func.ops(r);
                moves.push((ops[0].reg(), ops[1].reg()));
            }
        }
        // mov rbp,rsp plus the two argument moves (SysV: rdi, rsi).
        assert!(moves.contains(&(regs::RDI, regs::RAX)));
        assert!(moves.contains(&(regs::RSI, regs::RBX)));
        assert!(b.func.instrs.refs().all(|r| {
            b.func.instr(r).op != MicroOpcode::LoadCallParam
        }));
    }
}
