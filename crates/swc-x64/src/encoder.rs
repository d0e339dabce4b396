//! Micro-instruction to x86-64 byte translation.

use swc_micro::{
    Encoder, InstrRef, MicroCond, MicroFunction, MicroInstr, MicroOp, MicroOpBits, MicroOpcode,
    MicroReg, MicroRelocKind, Relocation,
};
use swc_util::diagnostic::E_UNENCODABLE_OPERANDS;
use swc_util::{DiagnosticBuilder, FxHashMap, Handler, Span};

use crate::data_segment::DataSegment;
use crate::emit::{cond_code, hw, Insn, Mem};

/// Reserved byte span of a not-yet-resolved jump
#[derive(Clone, Copy, Debug)]
struct JumpSlot {
    at: u32,
    len: u8,
    cond: MicroCond,
}

#[derive(Clone, Copy, Debug)]
struct ForwardJump {
    slot: JumpSlot,
    label: u32,
}

/// The x86-64 encoder
pub struct X64Encoder {
    #[allow(dead_code)]
    cpu: String,
    seg: DataSegment,
    relocations: Vec<Relocation>,
    instr_offsets: FxHashMap<InstrRef, u32>,
    label_offsets: FxHashMap<u32, u32>,
    forward_jumps: Vec<ForwardJump>,
    patch_jumps: FxHashMap<u32, JumpSlot>,
    /// (disp32 slot, table index) for jump tables appended in `finish`
    table_slots: Vec<(u32, u32)>,
}

impl X64Encoder {
    pub fn new(cpu: impl Into<String>) -> Self {
        Self {
            cpu: cpu.into(),
            seg: DataSegment::new(),
            relocations: Vec::new(),
            instr_offsets: FxHashMap::default(),
            label_offsets: FxHashMap::default(),
            forward_jumps: Vec::new(),
            patch_jumps: FxHashMap::default(),
            table_slots: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.seg.clear();
        self.relocations.clear();
        self.instr_offsets.clear();
        self.label_offsets.clear();
        self.forward_jumps.clear();
        self.patch_jumps.clear();
        self.table_slots.clear();
    }

    fn unencodable(&self, handler: &Handler, func: &MicroFunction, r: InstrRef) {
        let inst = func.instr(r);
        DiagnosticBuilder::error(format!(
            "function `{}`: operand combination of `{}` cannot be encoded",
            func.symbol_name,
            inst.op.name()
        ))
        .code(E_UNENCODABLE_OPERANDS)
        .span(func.debug_info.get(&r).copied().unwrap_or(Span::DUMMY))
        .emit(handler);
    }

    // ----- jumps -----------------------------------------------------------

    /// Reserve the long-form span for a jump; the patch decides the final
    /// shape.
    fn reserve_jump(&mut self, cond: MicroCond) -> JumpSlot {
        let len = if cond == MicroCond::Unconditional { 5 } else { 6 };
        let slot = JumpSlot {
            at: self.seg.len(),
            len,
            cond,
        };
        for _ in 0..len {
            self.seg.push_u8(0x90);
        }
        slot
    }

    /// Emit a jump whose target is already known (backward case) directly
    /// in its final form: two bytes when the displacement fits an i8, the
    /// long form otherwise.
    fn emit_jump_final(&mut self, cond: MicroCond, target: u32) {
        let at = self.seg.len();
        let short_disp = target as i64 - (at as i64 + 2);
        if i8::try_from(short_disp).is_ok() {
            let opcode = if cond == MicroCond::Unconditional {
                0xEB
            } else {
                0x70 + cond_code(cond)
            };
            self.seg.push_u8(opcode);
            self.seg.push_u8(short_disp as i8 as u8);
        } else if cond == MicroCond::Unconditional {
            let disp = target as i64 - (at as i64 + 5);
            self.seg.push_u8(0xE9);
            self.seg.push_i32(disp as i32);
        } else {
            let disp = target as i64 - (at as i64 + 6);
            self.seg.push_u8(0x0F);
            self.seg.push_u8(0x80 + cond_code(cond));
            self.seg.push_i32(disp as i32);
        }
    }

    /// Write the final jump into a reserved slot: short form plus `nop`
    /// padding when the displacement fits an i8, long form otherwise.
    fn patch_jump_slot(&mut self, slot: JumpSlot, target: u32) {
        let short_disp = target as i64 - (slot.at as i64 + 2);
        if i8::try_from(short_disp).is_ok() {
            let opcode = if slot.cond == MicroCond::Unconditional {
                0xEB
            } else {
                0x70 + cond_code(slot.cond)
            };
            self.seg.patch_u8(slot.at, opcode);
            self.seg.patch_u8(slot.at + 1, short_disp as i8 as u8);
            for i in 2..slot.len {
                self.seg.patch_u8(slot.at + i as u32, 0x90);
            }
        } else if slot.cond == MicroCond::Unconditional {
            let disp = target as i64 - (slot.at as i64 + 5);
            self.seg.patch_u8(slot.at, 0xE9);
            self.seg.patch_i32(slot.at + 1, disp as i32);
        } else {
            let disp = target as i64 - (slot.at as i64 + 6);
            self.seg.patch_u8(slot.at, 0x0F);
            self.seg.patch_u8(slot.at + 1, 0x80 + cond_code(slot.cond));
            self.seg.patch_i32(slot.at + 2, disp as i32);
        }
    }

    // ----- relocated fields ------------------------------------------------

    fn record_reloc(
        &mut self,
        kind: MicroRelocKind,
        offset: u32,
        symbol: Option<swc_util::Symbol>,
        constant: Option<u32>,
        addend: i64,
    ) {
        self.relocations.push(Relocation {
            kind,
            offset,
            symbol,
            constant,
            addend,
        });
    }

    // ----- instruction dispatch --------------------------------------------

    fn encode_instr(
        &mut self,
        func: &MicroFunction,
        r: InstrRef,
        handler: &Handler,
    ) {
        let inst = *func.instr(r);
        let ops = func.ops(r);

        match inst.op {
            MicroOpcode::Label => {
                self.label_offsets.insert(ops[0].imm_u32(), self.seg.len());
            }
            MicroOpcode::Nop => self.seg.push_u8(0x90),
            MicroOpcode::Ignore
            | MicroOpcode::End
            | MicroOpcode::Debug
            | MicroOpcode::Enter
            | MicroOpcode::Leave => {}
            MicroOpcode::Ret => self.seg.push_u8(0xC3),
            MicroOpcode::Push => {
                let reg = hw(ops[0].reg());
                Insn::new(&mut self.seg, &[0x50]).opcode_plus_reg(reg);
            }
            MicroOpcode::Pop => {
                let reg = hw(ops[0].reg());
                Insn::new(&mut self.seg, &[0x58]).opcode_plus_reg(reg);
            }
            MicroOpcode::LoadRegReg => {
                self.load_reg_reg(ops[0].reg(), ops[1].reg(), ops[2].bits());
            }
            MicroOpcode::LoadRegImm => {
                if ops[0].reg().is_float() {
                    self.unencodable(handler, func, r);
                } else {
                    self.load_reg_imm(ops[0].reg(), ops[1].bits(), ops[2].imm());
                }
            }
            MicroOpcode::LoadRegMem => {
                let mem = Mem::base_disp(ops[1].reg(), ops[3].imm_i64());
                self.load_reg_mem(ops[0].reg(), ops[2].bits(), mem);
            }
            MicroOpcode::LoadMemReg => {
                let mem = Mem::base_disp(ops[0].reg(), ops[3].imm_i64());
                self.load_mem_reg(mem, ops[1].reg(), ops[2].bits());
            }
            MicroOpcode::LoadMemImm => {
                let mem = Mem::base_disp(ops[0].reg(), ops[2].imm_i64());
                self.load_mem_imm(mem, ops[1].bits(), ops[3].imm());
            }
            MicroOpcode::LoadAddrRegMem => {
                let mem = Mem::base_disp(ops[1].reg(), ops[3].imm_i64());
                Insn::new(&mut self.seg, &[0x8D])
                    .width(ops[2].bits())
                    .modrm_mem(hw(ops[0].reg()), mem);
            }
            MicroOpcode::LoadAmcRegMem => {
                let mem = Mem::amc(ops[1].reg(), ops[2].reg(), ops[5].imm(), ops[6].imm_i64());
                self.load_reg_mem(ops[0].reg(), ops[3].bits(), mem);
            }
            MicroOpcode::LoadAmcMemReg => {
                let mem = Mem::amc(ops[0].reg(), ops[1].reg(), ops[5].imm(), ops[6].imm_i64());
                self.load_mem_reg(mem, ops[2].reg(), ops[4].bits());
            }
            MicroOpcode::LoadAmcMemImm => {
                let mem = Mem::amc(ops[0].reg(), ops[1].reg(), ops[4].imm(), ops[5].imm_i64());
                self.load_mem_imm(mem, ops[3].bits(), ops[6].imm());
            }
            MicroOpcode::LoadAddrAmcRegMem => {
                let mem = Mem::amc(ops[1].reg(), ops[2].reg(), ops[4].imm(), ops[5].imm_i64());
                Insn::new(&mut self.seg, &[0x8D])
                    .width(ops[3].bits())
                    .modrm_mem(hw(ops[0].reg()), mem);
            }
            MicroOpcode::LoadSignedExtRegReg => {
                self.sign_extend(
                    ops[0].reg(),
                    RmSide::Reg(ops[1].reg()),
                    ops[2].bits(),
                    ops[3].bits(),
                );
            }
            MicroOpcode::LoadSignedExtRegMem => {
                let mem = Mem::base_disp(ops[1].reg(), ops[4].imm_i64());
                self.sign_extend(ops[0].reg(), RmSide::Mem(mem), ops[2].bits(), ops[3].bits());
            }
            MicroOpcode::LoadZeroExtRegReg => {
                self.zero_extend(
                    ops[0].reg(),
                    RmSide::Reg(ops[1].reg()),
                    ops[2].bits(),
                    ops[3].bits(),
                );
            }
            MicroOpcode::LoadZeroExtRegMem => {
                let mem = Mem::base_disp(ops[1].reg(), ops[4].imm_i64());
                self.zero_extend(ops[0].reg(), RmSide::Mem(mem), ops[2].bits(), ops[3].bits());
            }
            MicroOpcode::ClearReg => {
                let reg = ops[0].reg();
                if reg.is_float() {
                    Insn::new(&mut self.seg, &[0x0F, 0x57]).modrm_reg(hw(reg), hw(reg));
                } else {
                    Insn::new(&mut self.seg, &[0x31]).modrm_reg(hw(reg), hw(reg));
                }
            }
            MicroOpcode::OpUnaryReg => {
                self.op_unary_reg(func, r, ops[0].reg(), ops[1].bits(), ops[2].micro_op(), handler);
            }
            MicroOpcode::OpUnaryMem => {
                let mem = Mem::base_disp(ops[0].reg(), ops[3].imm_i64());
                let ext = match ops[2].micro_op() {
                    MicroOp::BitwiseNot => 2,
                    MicroOp::Negate => 3,
                    _ => {
                        self.unencodable(handler, func, r);
                        return;
                    }
                };
                let bits = ops[1].bits();
                let opcode = if bits == MicroOpBits::B8 { 0xF6 } else { 0xF7 };
                Insn::new(&mut self.seg, &[opcode]).width(bits).modrm_mem(ext, mem);
            }
            MicroOpcode::OpBinaryRegReg => {
                self.op_binary_reg_reg(
                    func,
                    r,
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[2].bits(),
                    ops[3].micro_op(),
                    inst,
                    handler,
                );
            }
            MicroOpcode::OpBinaryRegMem => {
                let mem = Mem::base_disp(ops[1].reg(), ops[4].imm_i64());
                self.op_binary_reg_mem(
                    func,
                    r,
                    ops[0].reg(),
                    mem,
                    ops[2].bits(),
                    ops[3].micro_op(),
                    handler,
                );
            }
            MicroOpcode::OpBinaryMemReg => {
                let mem = Mem::base_disp(ops[0].reg(), ops[4].imm_i64());
                self.op_binary_mem_reg(
                    func,
                    r,
                    mem,
                    ops[1].reg(),
                    ops[2].bits(),
                    ops[3].micro_op(),
                    handler,
                );
            }
            MicroOpcode::OpBinaryRegImm => {
                self.op_binary_reg_imm(
                    func,
                    r,
                    ops[0].reg(),
                    ops[1].bits(),
                    ops[2].micro_op(),
                    ops[3].imm(),
                    handler,
                );
            }
            MicroOpcode::OpBinaryMemImm => {
                let mem = Mem::base_disp(ops[0].reg(), ops[3].imm_i64());
                self.op_binary_mem_imm(
                    func,
                    r,
                    mem,
                    ops[1].bits(),
                    ops[2].micro_op(),
                    ops[4].imm(),
                    handler,
                );
            }
            MicroOpcode::OpTernaryRegRegReg => {
                self.op_ternary(
                    func,
                    r,
                    ops[0].reg(),
                    ops[1].reg(),
                    ops[2].reg(),
                    ops[3].bits(),
                    ops[4].micro_op(),
                    handler,
                );
            }
            MicroOpcode::CmpRegReg => {
                let (a, b, bits) = (ops[0].reg(), ops[1].reg(), ops[2].bits());
                if a.is_float() {
                    // ucomiss / ucomisd
                    let insn = Insn::new(&mut self.seg, &[0x0F, 0x2E]);
                    let insn = if bits == MicroOpBits::B64 { insn.op16() } else { insn };
                    insn.modrm_reg(hw(a), hw(b));
                } else {
                    let opcode = if bits == MicroOpBits::B8 { 0x3A } else { 0x3B };
                    Insn::new(&mut self.seg, &[opcode])
                        .width(bits)
                        .modrm_reg(hw(a), hw(b));
                }
            }
            MicroOpcode::CmpRegImm => {
                let (a, bits, value) = (ops[0].reg(), ops[1].bits(), ops[2].imm());
                self.group1_imm(RmSide::Reg(a), bits, 7, value);
            }
            MicroOpcode::CmpMemReg => {
                let mem = Mem::base_disp(ops[0].reg(), ops[3].imm_i64());
                let bits = ops[2].bits();
                let opcode = if bits == MicroOpBits::B8 { 0x38 } else { 0x39 };
                Insn::new(&mut self.seg, &[opcode])
                    .width(bits)
                    .modrm_mem(hw(ops[1].reg()), mem);
            }
            MicroOpcode::CmpMemImm => {
                let mem = Mem::base_disp(ops[0].reg(), ops[2].imm_i64());
                self.group1_imm(RmSide::Mem(mem), ops[1].bits(), 7, ops[3].imm());
            }
            MicroOpcode::SetCondReg => {
                let reg = ops[0].reg();
                let cc = cond_code(ops[1].cond());
                let insn = Insn::new(&mut self.seg, &[0x0F, 0x90 + cc]);
                let insn = if (4..8).contains(&hw(reg)) { insn.rex_force() } else { insn };
                insn.modrm_reg(0, hw(reg));
                // Zero-extend the flag byte to the full register.
                let insn = Insn::new(&mut self.seg, &[0x0F, 0xB6]);
                let insn = if (4..8).contains(&hw(reg)) { insn.rex_force() } else { insn };
                insn.modrm_reg(hw(reg), hw(reg));
            }
            MicroOpcode::LoadCondRegReg => {
                let cc = cond_code(ops[2].cond());
                Insn::new(&mut self.seg, &[0x0F, 0x40 + cc])
                    .width(ops[3].bits())
                    .modrm_reg(hw(ops[0].reg()), hw(ops[1].reg()));
            }
            MicroOpcode::JumpReg => {
                Insn::new(&mut self.seg, &[0xFF]).modrm_reg(4, hw(ops[0].reg()));
            }
            MicroOpcode::JumpCond => {
                let slot = self.reserve_jump(ops[0].cond());
                self.patch_jumps.insert(r.0, slot);
            }
            MicroOpcode::JumpCondImm => {
                let label = ops[2].imm_u32();
                match self.label_offsets.get(&label).copied() {
                    // Backward jump: the label is placed, emit the final
                    // form directly.
                    Some(target) => self.emit_jump_final(ops[0].cond(), target),
                    None => {
                        let slot = self.reserve_jump(ops[0].cond());
                        self.forward_jumps.push(ForwardJump { slot, label });
                    }
                }
            }
            MicroOpcode::PatchJump => {
                let jump = ops[0].imm_u32();
                let target = self.seg.len();
                match self.patch_jumps.remove(&jump) {
                    Some(slot) => self.patch_jump_slot(slot, target),
                    None => self.unencodable(handler, func, r),
                }
            }
            MicroOpcode::JumpTable => {
                self.jump_table(ops[0].reg(), ops[1].reg(), ops[2].imm_u32());
            }
            MicroOpcode::CallLocal | MicroOpcode::CallExtern => {
                let kind = if inst.op == MicroOpcode::CallLocal {
                    MicroRelocKind::LocalFunctionAddress
                } else {
                    MicroRelocKind::ForeignFunctionAddress
                };
                let symbol = ops[0].name();
                let slot = if inst.op == MicroOpcode::CallLocal {
                    // call rel32
                    self.seg.push_u8(0xE8);
                    let slot = self.seg.len();
                    self.seg.push_u32(0);
                    slot
                } else {
                    // call [rip + disp32]
                    self.seg.push_u8(0xFF);
                    self.seg.push_u8(0x15);
                    let slot = self.seg.len();
                    self.seg.push_u32(0);
                    slot
                };
                self.record_reloc(kind, slot, Some(symbol), None, 0);
            }
            MicroOpcode::CallIndirect => {
                Insn::new(&mut self.seg, &[0xFF]).modrm_reg(2, hw(ops[0].reg()));
            }
            MicroOpcode::SymbolRelocAddr => {
                let reg = ops[0].reg();
                let symbol = ops[1].name();
                let addend = ops[2].imm() as i64;
                let kind = reloc_kind_for(func, r, MicroRelocKind::ForeignFunctionAddress);
                let slot = Insn::new(&mut self.seg, &[0x8D])
                    .rex_w()
                    .modrm_mem(hw(reg), Mem::base_disp(MicroReg::RIP, 0));
                self.record_reloc(kind, slot, Some(symbol), None, addend);
            }
            MicroOpcode::SymbolRelocValue => {
                let reg = ops[0].reg();
                let bits = ops[1].bits();
                let constant = ops[2].imm_u32();
                let addend = ops[3].imm() as i64;
                let mem = Mem::base_disp(MicroReg::RIP, 0);
                let slot = if reg.is_float() {
                    let insn = Insn::new(&mut self.seg, &[0x0F, 0x10]);
                    let insn = if bits == MicroOpBits::B64 { insn.f2() } else { insn.f3() };
                    insn.modrm_mem(hw(reg), mem)
                } else {
                    Insn::new(&mut self.seg, &[0x8B]).width(bits).modrm_mem(hw(reg), mem)
                };
                self.record_reloc(MicroRelocKind::ConstantAddress, slot, None, Some(constant), addend);
            }
            MicroOpcode::LoadCallParam
            | MicroOpcode::LoadCallAddrParam
            | MicroOpcode::LoadCallZeroExtParam
            | MicroOpcode::StoreCallParam => {
                // Must have been replaced by the prolog/epilog pass.
                self.unencodable(handler, func, r);
            }
        }
    }

    // ----- form helpers ----------------------------------------------------

    fn load_reg_reg(&mut self, dst: MicroReg, src: MicroReg, bits: MicroOpBits) {
        match (dst.is_float(), src.is_float()) {
            (false, false) => {
                let opcode = if bits == MicroOpBits::B8 { 0x8A } else { 0x8B };
                let insn = Insn::new(&mut self.seg, &[opcode]).width(bits);
                let insn = if bits == MicroOpBits::B8 && (hw(dst) >= 4 || hw(src) >= 4) {
                    insn.rex_force()
                } else {
                    insn
                };
                insn.modrm_reg(hw(dst), hw(src));
            }
            (true, true) => match bits {
                MicroOpBits::B128 => {
                    Insn::new(&mut self.seg, &[0x0F, 0x28]).modrm_reg(hw(dst), hw(src));
                }
                MicroOpBits::B64 => {
                    Insn::new(&mut self.seg, &[0x0F, 0x10]).f2().modrm_reg(hw(dst), hw(src));
                }
                _ => {
                    Insn::new(&mut self.seg, &[0x0F, 0x10]).f3().modrm_reg(hw(dst), hw(src));
                }
            },
            (true, false) => {
                // movq xmm, r64
                Insn::new(&mut self.seg, &[0x0F, 0x6E])
                    .op16()
                    .rex_w()
                    .modrm_reg(hw(dst), hw(src));
            }
            (false, true) => {
                // movq r64, xmm
                Insn::new(&mut self.seg, &[0x0F, 0x7E])
                    .op16()
                    .rex_w()
                    .modrm_reg(hw(src), hw(dst));
            }
        }
    }

    fn load_reg_imm(&mut self, dst: MicroReg, bits: MicroOpBits, value: u64) {
        let reg = hw(dst);
        match bits {
            MicroOpBits::B8 => {
                let insn = Insn::new(&mut self.seg, &[0xB0]);
                let insn = if reg >= 4 { insn.rex_force() } else { insn };
                insn.opcode_plus_reg(reg);
                self.seg.push_u8(value as u8);
            }
            MicroOpBits::B16 => {
                Insn::new(&mut self.seg, &[0xB8]).op16().opcode_plus_reg(reg);
                self.seg.push_u16(value as u16);
            }
            MicroOpBits::B64 => {
                if value as i64 == (value as i32) as i64 {
                    // Sign-extended imm32 form.
                    Insn::new(&mut self.seg, &[0xC7]).rex_w().modrm_reg(0, reg);
                    self.seg.push_u32(value as u32);
                } else if u32::try_from(value).is_ok() {
                    // 32-bit write zero-extends.
                    Insn::new(&mut self.seg, &[0xB8]).opcode_plus_reg(reg);
                    self.seg.push_u32(value as u32);
                } else {
                    Insn::new(&mut self.seg, &[0xB8]).rex_w().opcode_plus_reg(reg);
                    self.seg.push_u64(value);
                }
            }
            _ => {
                Insn::new(&mut self.seg, &[0xB8]).opcode_plus_reg(reg);
                self.seg.push_u32(value as u32);
            }
        }
    }

    fn load_reg_mem(&mut self, dst: MicroReg, bits: MicroOpBits, mem: Mem) {
        if dst.is_float() {
            let insn = Insn::new(&mut self.seg, &[0x0F, 0x10]);
            let insn = if bits == MicroOpBits::B64 { insn.f2() } else { insn.f3() };
            insn.modrm_mem(hw(dst), mem);
        } else {
            let opcode = if bits == MicroOpBits::B8 { 0x8A } else { 0x8B };
            Insn::new(&mut self.seg, &[opcode])
                .width(bits)
                .modrm_mem(hw(dst), mem);
        }
    }

    fn load_mem_reg(&mut self, mem: Mem, src: MicroReg, bits: MicroOpBits) {
        if src.is_float() {
            let insn = Insn::new(&mut self.seg, &[0x0F, 0x11]);
            let insn = if bits == MicroOpBits::B64 { insn.f2() } else { insn.f3() };
            insn.modrm_mem(hw(src), mem);
        } else {
            let opcode = if bits == MicroOpBits::B8 { 0x88 } else { 0x89 };
            Insn::new(&mut self.seg, &[opcode])
                .width(bits)
                .modrm_mem(hw(src), mem);
        }
    }

    fn load_mem_imm(&mut self, mem: Mem, bits: MicroOpBits, value: u64) {
        match bits {
            MicroOpBits::B8 => {
                Insn::new(&mut self.seg, &[0xC6]).modrm_mem(0, mem);
                self.seg.push_u8(value as u8);
            }
            MicroOpBits::B16 => {
                Insn::new(&mut self.seg, &[0xC7]).op16().modrm_mem(0, mem);
                self.seg.push_u16(value as u16);
            }
            _ => {
                Insn::new(&mut self.seg, &[0xC7]).width(bits).modrm_mem(0, mem);
                self.seg.push_u32(value as u32);
            }
        }
    }

    fn sign_extend(&mut self, dst: MicroReg, src: RmSide, dst_bits: MicroOpBits, src_bits: MicroOpBits) {
        let opcode: &[u8] = match src_bits {
            MicroOpBits::B8 => &[0x0F, 0xBE],
            MicroOpBits::B16 => &[0x0F, 0xBF],
            _ => &[0x63], // movsxd
        };
        let insn = Insn::new(&mut self.seg, opcode).width(dst_bits);
        match src {
            RmSide::Reg(src) => insn.modrm_reg(hw(dst), hw(src)),
            RmSide::Mem(mem) => {
                insn.modrm_mem(hw(dst), mem);
            }
        }
    }

    fn zero_extend(&mut self, dst: MicroReg, src: RmSide, dst_bits: MicroOpBits, src_bits: MicroOpBits) {
        let (opcode, width): (&[u8], MicroOpBits) = match src_bits {
            MicroOpBits::B8 => (&[0x0F, 0xB6], dst_bits),
            MicroOpBits::B16 => (&[0x0F, 0xB7], dst_bits),
            // A 32-bit mov zero-extends into the upper half.
            _ => (&[0x8B], MicroOpBits::B32),
        };
        let insn = Insn::new(&mut self.seg, opcode).width(width);
        match src {
            RmSide::Reg(src) => insn.modrm_reg(hw(dst), hw(src)),
            RmSide::Mem(mem) => {
                insn.modrm_mem(hw(dst), mem);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn op_unary_reg(
        &mut self,
        func: &MicroFunction,
        r: InstrRef,
        reg: MicroReg,
        bits: MicroOpBits,
        op: MicroOp,
        handler: &Handler,
    ) {
        let f7 = if bits == MicroOpBits::B8 { 0xF6 } else { 0xF7 };
        match op {
            MicroOp::Negate => {
                Insn::new(&mut self.seg, &[f7]).width(bits).modrm_reg(3, hw(reg));
            }
            MicroOp::BitwiseNot => {
                Insn::new(&mut self.seg, &[f7]).width(bits).modrm_reg(2, hw(reg));
            }
            MicroOp::DivideSigned | MicroOp::ModuloSigned => {
                Insn::new(&mut self.seg, &[f7]).width(bits).modrm_reg(7, hw(reg));
            }
            MicroOp::DivideUnsigned | MicroOp::ModuloUnsigned => {
                Insn::new(&mut self.seg, &[f7]).width(bits).modrm_reg(6, hw(reg));
            }
            MicroOp::MoveSignExtend => {
                // cdq / cqo: sign-extend rax into rdx:rax
                let insn = Insn::new(&mut self.seg, &[0x99]).width(bits);
                insn.bare();
            }
            MicroOp::ByteSwap => {
                // bswap: 0F C8+rd
                let low = hw(reg);
                let mut rex = 0x40u8;
                if bits == MicroOpBits::B64 {
                    rex |= 0x08;
                }
                if low >= 8 {
                    rex |= 0x01;
                }
                if rex != 0x40 {
                    self.seg.push_u8(rex);
                }
                self.seg.push_u8(0x0F);
                self.seg.push_u8(0xC8 + (low & 7));
            }
            MicroOp::PopCount => {
                Insn::new(&mut self.seg, &[0x0F, 0xB8])
                    .f3()
                    .width(bits)
                    .modrm_reg(hw(reg), hw(reg));
            }
            MicroOp::BitScanForward => {
                Insn::new(&mut self.seg, &[0x0F, 0xBC])
                    .width(bits)
                    .modrm_reg(hw(reg), hw(reg));
            }
            MicroOp::BitScanReverse => {
                Insn::new(&mut self.seg, &[0x0F, 0xBD])
                    .width(bits)
                    .modrm_reg(hw(reg), hw(reg));
            }
            MicroOp::FloatSqrt => {
                let insn = Insn::new(&mut self.seg, &[0x0F, 0x51]);
                let insn = if bits == MicroOpBits::B32 { insn.f3() } else { insn.f2() };
                insn.modrm_reg(hw(reg), hw(reg));
            }
            _ => self.unencodable(handler, func, r),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn op_binary_reg_reg(
        &mut self,
        func: &MicroFunction,
        r: InstrRef,
        dst: MicroReg,
        src: MicroReg,
        bits: MicroOpBits,
        op: MicroOp,
        inst: MicroInstr,
        handler: &Handler,
    ) {
        if op.is_float_op() {
            let opcode: &[u8] = match op {
                MicroOp::FloatAdd => &[0x0F, 0x58],
                MicroOp::FloatSubtract => &[0x0F, 0x5C],
                MicroOp::FloatMultiply => &[0x0F, 0x59],
                MicroOp::FloatDivide => &[0x0F, 0x5E],
                MicroOp::FloatMin => &[0x0F, 0x5D],
                MicroOp::FloatMax => &[0x0F, 0x5F],
                MicroOp::FloatAnd => &[0x0F, 0x54],
                MicroOp::FloatXor => &[0x0F, 0x57],
                _ => &[0x0F, 0x51],
            };
            let packed = matches!(op, MicroOp::FloatAnd | MicroOp::FloatXor);
            let insn = Insn::new(&mut self.seg, opcode);
            let insn = if packed {
                insn
            } else if bits == MicroOpBits::B32 {
                insn.f3()
            } else {
                insn.f2()
            };
            insn.modrm_reg(hw(dst), hw(src));
            return;
        }

        match op {
            MicroOp::Add | MicroOp::Subtract | MicroOp::And | MicroOp::Or | MicroOp::Xor => {
                let opcode = match (op, bits == MicroOpBits::B8) {
                    (MicroOp::Add, false) => 0x03,
                    (MicroOp::Add, true) => 0x02,
                    (MicroOp::Subtract, false) => 0x2B,
                    (MicroOp::Subtract, true) => 0x2A,
                    (MicroOp::And, false) => 0x23,
                    (MicroOp::And, true) => 0x22,
                    (MicroOp::Or, false) => 0x0B,
                    (MicroOp::Or, true) => 0x0A,
                    (MicroOp::Xor, false) => 0x33,
                    _ => 0x32,
                };
                Insn::new(&mut self.seg, &[opcode])
                    .width(bits)
                    .modrm_reg(hw(dst), hw(src));
            }
            MicroOp::MultiplySigned | MicroOp::MultiplyUnsigned => {
                Insn::new(&mut self.seg, &[0x0F, 0xAF])
                    .width(bits)
                    .modrm_reg(hw(dst), hw(src));
            }
            MicroOp::ShiftLeft
            | MicroOp::ShiftArithmeticLeft
            | MicroOp::ShiftRight
            | MicroOp::ShiftArithmeticRight
            | MicroOp::RotateLeft
            | MicroOp::RotateRight => {
                // Count travels in CL (legalize routed it there).
                let d3 = if bits == MicroOpBits::B8 { 0xD2 } else { 0xD3 };
                let ext = shift_ext(op);
                Insn::new(&mut self.seg, &[d3]).width(bits).modrm_reg(ext, hw(dst));
            }
            MicroOp::Exchange => {
                Insn::new(&mut self.seg, &[0x87])
                    .width(bits)
                    .modrm_reg(hw(src), hw(dst));
            }
            MicroOp::CompareExchange => {
                let insn = Insn::new(&mut self.seg, &[0x0F, 0xB1]).width(bits);
                let insn = if inst.emit_flags.has(swc_micro::EncodeFlags::LOCK) {
                    insn.prefix(0xF0)
                } else {
                    insn
                };
                insn.modrm_reg(hw(src), hw(dst));
            }
            MicroOp::ConvertIntToFloat => {
                // cvtsi2ss / cvtsi2sd, 64-bit integer source
                let insn = Insn::new(&mut self.seg, &[0x0F, 0x2A]);
                let insn = if bits == MicroOpBits::B32 { insn.f3() } else { insn.f2() };
                insn.rex_w().modrm_reg(hw(dst), hw(src));
            }
            MicroOp::ConvertUIntToFloat64 => {
                let insn = Insn::new(&mut self.seg, &[0x0F, 0x2A]).f2();
                insn.rex_w().modrm_reg(hw(dst), hw(src));
            }
            MicroOp::ConvertFloatToInt => {
                // cvttss2si / cvttsd2si
                let insn = Insn::new(&mut self.seg, &[0x0F, 0x2C]);
                let insn = if bits == MicroOpBits::B32 { insn.f3() } else { insn.f2() };
                insn.rex_w().modrm_reg(hw(dst), hw(src));
            }
            MicroOp::ConvertFloatToFloat => {
                // cvtss2sd / cvtsd2ss; bits names the source width
                let insn = Insn::new(&mut self.seg, &[0x0F, 0x5A]);
                let insn = if bits == MicroOpBits::B32 { insn.f3() } else { insn.f2() };
                insn.modrm_reg(hw(dst), hw(src));
            }
            _ => self.unencodable(handler, func, r),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn op_binary_reg_mem(
        &mut self,
        func: &MicroFunction,
        r: InstrRef,
        dst: MicroReg,
        mem: Mem,
        bits: MicroOpBits,
        op: MicroOp,
        handler: &Handler,
    ) {
        if op.is_float_op() {
            let opcode: &[u8] = match op {
                MicroOp::FloatAdd => &[0x0F, 0x58],
                MicroOp::FloatSubtract => &[0x0F, 0x5C],
                MicroOp::FloatMultiply => &[0x0F, 0x59],
                MicroOp::FloatDivide => &[0x0F, 0x5E],
                MicroOp::FloatMin => &[0x0F, 0x5D],
                MicroOp::FloatMax => &[0x0F, 0x5F],
                _ => {
                    self.unencodable(handler, func, r);
                    return;
                }
            };
            let insn = Insn::new(&mut self.seg, opcode);
            let insn = if bits == MicroOpBits::B32 { insn.f3() } else { insn.f2() };
            insn.modrm_mem(hw(dst), mem);
            return;
        }
        let opcode = match op {
            MicroOp::Add => 0x03,
            MicroOp::Subtract => 0x2B,
            MicroOp::And => 0x23,
            MicroOp::Or => 0x0B,
            MicroOp::Xor => 0x33,
            MicroOp::MultiplySigned | MicroOp::MultiplyUnsigned => {
                Insn::new(&mut self.seg, &[0x0F, 0xAF]).width(bits).modrm_mem(hw(dst), mem);
                return;
            }
            _ => {
                self.unencodable(handler, func, r);
                return;
            }
        };
        let opcode = if bits == MicroOpBits::B8 { opcode - 1 } else { opcode };
        Insn::new(&mut self.seg, &[opcode]).width(bits).modrm_mem(hw(dst), mem);
    }

    #[allow(clippy::too_many_arguments)]
    fn op_binary_mem_reg(
        &mut self,
        func: &MicroFunction,
        r: InstrRef,
        mem: Mem,
        src: MicroReg,
        bits: MicroOpBits,
        op: MicroOp,
        handler: &Handler,
    ) {
        let opcode = match op {
            MicroOp::Add => 0x01,
            MicroOp::Subtract => 0x29,
            MicroOp::And => 0x21,
            MicroOp::Or => 0x09,
            MicroOp::Xor => 0x31,
            _ => {
                self.unencodable(handler, func, r);
                return;
            }
        };
        let opcode = if bits == MicroOpBits::B8 { opcode - 1 } else { opcode };
        Insn::new(&mut self.seg, &[opcode]).width(bits).modrm_mem(hw(src), mem);
    }

    #[allow(clippy::too_many_arguments)]
    fn op_binary_reg_imm(
        &mut self,
        func: &MicroFunction,
        r: InstrRef,
        dst: MicroReg,
        bits: MicroOpBits,
        op: MicroOp,
        value: u64,
        handler: &Handler,
    ) {
        match op {
            MicroOp::Add => self.group1_imm(RmSide::Reg(dst), bits, 0, value),
            MicroOp::Or => self.group1_imm(RmSide::Reg(dst), bits, 1, value),
            MicroOp::And => self.group1_imm(RmSide::Reg(dst), bits, 4, value),
            MicroOp::Subtract => self.group1_imm(RmSide::Reg(dst), bits, 5, value),
            MicroOp::Xor => self.group1_imm(RmSide::Reg(dst), bits, 6, value),
            MicroOp::ShiftLeft
            | MicroOp::ShiftArithmeticLeft
            | MicroOp::ShiftRight
            | MicroOp::ShiftArithmeticRight
            | MicroOp::RotateLeft
            | MicroOp::RotateRight => {
                let c1 = if bits == MicroOpBits::B8 { 0xC0 } else { 0xC1 };
                Insn::new(&mut self.seg, &[c1])
                    .width(bits)
                    .modrm_reg(shift_ext(op), hw(dst));
                self.seg.push_u8(value as u8);
            }
            MicroOp::MultiplySigned | MicroOp::MultiplyUnsigned => {
                if i8::try_from(value as i64).is_ok() {
                    Insn::new(&mut self.seg, &[0x6B]).width(bits).modrm_reg(hw(dst), hw(dst));
                    self.seg.push_u8(value as u8);
                } else {
                    Insn::new(&mut self.seg, &[0x69]).width(bits).modrm_reg(hw(dst), hw(dst));
                    self.seg.push_u32(value as u32);
                }
            }
            _ => self.unencodable(handler, func, r),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn op_binary_mem_imm(
        &mut self,
        func: &MicroFunction,
        r: InstrRef,
        mem: Mem,
        bits: MicroOpBits,
        op: MicroOp,
        value: u64,
        handler: &Handler,
    ) {
        let ext = match op {
            MicroOp::Add => 0,
            MicroOp::Or => 1,
            MicroOp::And => 4,
            MicroOp::Subtract => 5,
            MicroOp::Xor => 6,
            _ => {
                self.unencodable(handler, func, r);
                return;
            }
        };
        self.group1_imm(RmSide::Mem(mem), bits, ext, value);
    }

    /// The 80/81/83 immediate group (add/or/and/sub/xor/cmp)
    fn group1_imm(&mut self, rm: RmSide, bits: MicroOpBits, ext: u8, value: u64) {
        if bits == MicroOpBits::B8 {
            let insn = Insn::new(&mut self.seg, &[0x80]);
            match rm {
                RmSide::Reg(reg) => {
                    let insn = if hw(reg) >= 4 { insn.rex_force() } else { insn };
                    insn.modrm_reg(ext, hw(reg));
                }
                RmSide::Mem(mem) => {
                    insn.modrm_mem(ext, mem);
                }
            }
            self.seg.push_u8(value as u8);
            return;
        }

        let short = i8::try_from(value as i64).is_ok();
        let opcode = if short { 0x83 } else { 0x81 };
        let insn = Insn::new(&mut self.seg, &[opcode]).width(bits);
        match rm {
            RmSide::Reg(reg) => insn.modrm_reg(ext, hw(reg)),
            RmSide::Mem(mem) => {
                insn.modrm_mem(ext, mem);
            }
        }
        if short {
            self.seg.push_u8(value as u8);
        } else if bits == MicroOpBits::B16 {
            self.seg.push_u16(value as u16);
        } else {
            self.seg.push_u32(value as u32);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn op_ternary(
        &mut self,
        func: &MicroFunction,
        r: InstrRef,
        dst: MicroReg,
        src1: MicroReg,
        src2: MicroReg,
        bits: MicroOpBits,
        op: MicroOp,
        handler: &Handler,
    ) {
        if op != MicroOp::MultiplyAdd {
            self.unencodable(handler, func, r);
            return;
        }
        if dst.is_float() {
            let scratch = swc_micro::regs::XMM15;
            self.load_reg_reg(scratch, src1, bits);
            let f = if bits == MicroOpBits::B32 { 0xF3 } else { 0xF2 };
            Insn::new(&mut self.seg, &[0x0F, 0x59])
                .prefix(f)
                .modrm_reg(hw(scratch), hw(src2));
            Insn::new(&mut self.seg, &[0x0F, 0x58])
                .prefix(f)
                .modrm_reg(hw(dst), hw(scratch));
        } else {
            let scratch = swc_micro::regs::R11;
            self.load_reg_reg(scratch, src1, bits);
            Insn::new(&mut self.seg, &[0x0F, 0xAF])
                .width(bits)
                .modrm_reg(hw(scratch), hw(src2));
            Insn::new(&mut self.seg, &[0x03]).width(bits).modrm_reg(hw(dst), hw(scratch));
        }
    }

    fn jump_table(&mut self, table_reg: MicroReg, offset_reg: MicroReg, table_index: u32) {
        // lea table, [rip + <table>]
        let slot = Insn::new(&mut self.seg, &[0x8D])
            .rex_w()
            .modrm_mem(hw(table_reg), Mem::base_disp(MicroReg::RIP, 0));
        self.table_slots.push((slot, table_index));

        // movsxd offset, dword [table + offset*4]
        Insn::new(&mut self.seg, &[0x63]).rex_w().modrm_mem(
            hw(offset_reg),
            Mem {
                base: crate::emit::Base::Reg(hw(table_reg)),
                index: Some((hw(offset_reg), 4)),
                disp: 0,
            },
        );

        // add table, offset ; jmp table
        Insn::new(&mut self.seg, &[0x03])
            .rex_w()
            .modrm_reg(hw(table_reg), hw(offset_reg));
        Insn::new(&mut self.seg, &[0xFF]).modrm_reg(4, hw(table_reg));
    }

    fn finish(&mut self, func: &MicroFunction, handler: &Handler) {
        // Forward jumps: every target must be known by now.
        let pending = std::mem::take(&mut self.forward_jumps);
        for jump in pending {
            match self.label_offsets.get(&jump.label).copied() {
                Some(target) => self.patch_jump_slot(jump.slot, target),
                None => handler.error(
                    format!(
                        "function `{}`: jump target label L{} was never placed",
                        func.symbol_name, jump.label
                    ),
                    Span::DUMMY,
                ),
            }
        }

        if !self.patch_jumps.is_empty() {
            handler.error(
                format!(
                    "function `{}`: {} jump(s) missing their patch",
                    func.symbol_name,
                    self.patch_jumps.len()
                ),
                Span::DUMMY,
            );
            self.patch_jumps.clear();
        }

        // Materialize jump tables at the end of the buffer.
        let slots = std::mem::take(&mut self.table_slots);
        for (slot, table_index) in slots {
            let base = self.seg.len();
            let disp = base as i64 - (slot as i64 + 4);
            self.seg.patch_i32(slot, disp as i32);
            if let Some(table) = func.jump_tables.get(table_index as usize) {
                for &label in &table.labels {
                    let target = self.label_offsets.get(&label.0).copied().unwrap_or(0);
                    self.seg.push_i32(target as i32 - base as i32);
                }
            }
            self.record_reloc(
                MicroRelocKind::ConstantAddress,
                slot,
                None,
                Some(table_index),
                base as i64,
            );
        }
    }
}

/// Default relocation kind recorded by the builder for this instruction
fn reloc_kind_for(func: &MicroFunction, r: InstrRef, fallback: MicroRelocKind) -> MicroRelocKind {
    func.relocations
        .iter()
        .find(|reloc| reloc.instr == r)
        .map(|reloc| reloc.kind)
        .unwrap_or(fallback)
}

fn shift_ext(op: MicroOp) -> u8 {
    match op {
        MicroOp::RotateLeft => 0,
        MicroOp::RotateRight => 1,
        MicroOp::ShiftLeft | MicroOp::ShiftArithmeticLeft => 4,
        MicroOp::ShiftRight => 5,
        _ => 7, // sar
    }
}

/// Register-or-memory shorthand used by the immediate group
enum RmSide {
    Reg(MicroReg),
    Mem(Mem),
}

impl Encoder for X64Encoder {
    fn arch_name(&self) -> &'static str {
        "x86_64"
    }

    fn encode_function(&mut self, func: &MicroFunction, handler: &Handler) -> bool {
        self.reset();
        for r in func.instrs.refs() {
            self.instr_offsets.insert(r, self.seg.len());
            self.encode_instr(func, r, handler);
        }
        self.finish(func, handler);
        !handler.has_errors()
    }

    fn code(&self) -> &[u8] {
        self.seg.as_slice()
    }

    fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    fn instr_offset(&self, r: InstrRef) -> Option<u32> {
        self.instr_offsets.get(&r).copied()
    }

    fn format_register_name(&self, reg: MicroReg, bits: MicroOpBits) -> String {
        format_register_name(reg, bits)
    }
}

/// Concrete register name at an operand width
pub fn format_register_name(reg: MicroReg, bits: MicroOpBits) -> String {
    if !reg.is_physical() {
        return reg.name();
    }
    if reg.is_float() {
        return format!("xmm{}", reg.index());
    }

    // Table order, per width.
    const B64_NAMES: [&str; 16] = [
        "rax", "rbx", "rcx", "rdx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
        "r13", "r14", "r15",
    ];
    const B32_NAMES: [&str; 16] = [
        "eax", "ebx", "ecx", "edx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
        "r12d", "r13d", "r14d", "r15d",
    ];
    const B16_NAMES: [&str; 16] = [
        "ax", "bx", "cx", "dx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w",
        "r13w", "r14w", "r15w",
    ];
    const B8_NAMES: [&str; 16] = [
        "al", "bl", "cl", "dl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
        "r13b", "r14b", "r15b",
    ];

    let idx = reg.index() as usize;
    match bits {
        MicroOpBits::B8 => B8_NAMES[idx].to_string(),
        MicroOpBits::B16 => B16_NAMES[idx].to_string(),
        MicroOpBits::B32 => B32_NAMES[idx].to_string(),
        _ => B64_NAMES[idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swc_micro::{regs, CallConvKind, MicroBuilder};
    use swc_util::Symbol;

    fn encode(builder: &MicroBuilder) -> (X64Encoder, Handler) {
        let handler = Handler::new();
        let mut encoder = X64Encoder::new("generic");
        let ok = encoder.encode_function(&builder.func, &handler);
        assert!(ok, "encode failed: {:?}", handler.take_all());
        (encoder, handler)
    }

    #[test]
    fn simple_sequence_has_expected_shape() {
        // S2: mov rax, 0x1234 ; add rax, rbx ; ret
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RAX, 0x1234, MicroOpBits::B64);
        b.emit_op_binary_reg_reg(regs::RAX, regs::RBX, MicroOp::Add, MicroOpBits::B64);
        b.emit_ret();
        let (enc, _) = encode(&b);

        let code = enc.code();
        assert!(!code.is_empty());
        // REX.W C7 C0 imm32 for the sign-extended form.
        assert_eq!(&code[..7], &[0x48, 0xC7, 0xC0, 0x34, 0x12, 0x00, 0x00]);
        assert_eq!(*code.last().unwrap(), 0xC3);
    }

    #[test]
    fn imm64_uses_the_full_form() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_reg_imm(regs::RAX, 0x1234_5678_9ABC_DEF0, MicroOpBits::B64);
        let (enc, _) = encode(&b);
        assert_eq!(enc.code()[..2], [0x48, 0xB8]);
        assert_eq!(enc.code().len(), 10);
    }

    #[test]
    fn forward_jump_patches_to_long_form_over_200_bytes() {
        // S4: jcc over ~200 bytes of nops.
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let label = b.create_label();
        b.emit_jump_to_label(MicroCond::NotZero, MicroOpBits::B32, label);
        for _ in 0..200 {
            b.emit_nop();
        }
        b.place_label(label);
        b.emit_ret();
        let (enc, _) = encode(&b);

        let code = enc.code();
        // Long form: 0F 85 disp32 at offset 0; displacement reaches the
        // label, which sits right before the final ret.
        assert_eq!(code[0], 0x0F);
        assert_eq!(code[1], 0x85);
        let disp = i32::from_le_bytes(code[2..6].try_into().unwrap());
        let target = (6 + disp) as usize;
        assert_eq!(target, code.len() - 1);
    }

    #[test]
    fn short_forward_jump_fits_in_two_bytes_with_padding() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let label = b.create_label();
        b.emit_jump_to_label(MicroCond::NotZero, MicroOpBits::B32, label);
        b.emit_nop();
        b.place_label(label);
        b.emit_ret();
        let (enc, _) = encode(&b);

        let code = enc.code();
        // Short jcc + nop padding inside the reserved slot.
        assert_eq!(code[0], 0x75);
        let disp = code[1] as i8 as i32;
        assert_eq!((2 + disp) as usize, code.len() - 1);
        assert_eq!(&code[2..6], &[0x90, 0x90, 0x90, 0x90]);
    }

    #[test]
    fn backward_jump_is_emitted_directly_in_short_form() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let label = b.create_label();
        b.place_label(label);
        b.emit_nop();
        b.emit_jump_to_label(MicroCond::Unconditional, MicroOpBits::B32, label);
        b.emit_ret();
        let (enc, _) = encode(&b);

        // nop, then the two-byte EB disp8 back to offset 0 with nothing
        // reserved or padded, then ret.
        assert_eq!(enc.code(), &[0x90, 0xEB, 0xFD, 0xC3]);
    }

    #[test]
    fn backward_conditional_jump_is_two_bytes() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let label = b.create_label();
        b.place_label(label);
        b.emit_nop();
        b.emit_jump_to_label(MicroCond::NotZero, MicroOpBits::B32, label);
        b.emit_ret();
        let (enc, _) = encode(&b);
        assert_eq!(enc.code(), &[0x90, 0x75, 0xFD, 0xC3]);
    }

    #[test]
    fn far_backward_jump_uses_the_long_form() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let label = b.create_label();
        b.place_label(label);
        for _ in 0..200 {
            b.emit_nop();
        }
        b.emit_jump_to_label(MicroCond::NotZero, MicroOpBits::B32, label);
        b.emit_ret();
        let (enc, _) = encode(&b);

        let code = enc.code();
        // 200 nops, then 0F 85 disp32 back to offset 0, then ret.
        assert_eq!(code.len(), 200 + 6 + 1);
        assert_eq!(code[200], 0x0F);
        assert_eq!(code[201], 0x85);
        let disp = i32::from_le_bytes(code[202..206].try_into().unwrap());
        assert_eq!(200 + 6 + disp, 0);
        assert_eq!(*code.last().unwrap(), 0xC3);
    }

    #[test]
    fn extern_call_records_relocation_inside_buffer() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_call_extern(Symbol::intern("memcpy"), CallConvKind::C);
        b.emit_ret();
        let (enc, _) = encode(&b);

        assert_eq!(enc.relocations().len(), 1);
        let reloc = enc.relocations()[0];
        assert_eq!(reloc.kind, MicroRelocKind::ForeignFunctionAddress);
        // The 32-bit field lies entirely inside the buffer.
        assert!(reloc.offset + 4 <= enc.code().len() as u32);
        assert_eq!(reloc.symbol.unwrap().as_str(), "memcpy");
    }

    #[test]
    fn push_pop_r15_sets_rex_b() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_push(regs::R15);
        b.emit_pop(regs::R15);
        let (enc, _) = encode(&b);
        assert_eq!(enc.code(), &[0x41, 0x57, 0x41, 0x5F]);
    }

    #[test]
    fn setcc_zero_extends() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_set_cond_reg(regs::RAX, MicroCond::Equal);
        let (enc, _) = encode(&b);
        // sete al ; movzx eax, al
        assert_eq!(enc.code(), &[0x0F, 0x94, 0xC0, 0x0F, 0xB6, 0xC0]);
    }

    #[test]
    fn instr_offsets_map_back_to_ir() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let a = b.emit_nop();
        let c = b.emit_ret();
        let (enc, _) = encode(&b);
        assert_eq!(enc.instr_offset(a), Some(0));
        assert_eq!(enc.instr_offset(c), Some(1));
    }

    #[test]
    fn amc_load_uses_sib_encoding() {
        // mov rax, [rcx + rsi*4 + 0x10]
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_amc_reg_mem(
            regs::RAX,
            MicroOpBits::B64,
            regs::RCX,
            regs::RSI,
            4,
            0x10,
            MicroOpBits::B64,
        );
        let (enc, _) = encode(&b);
        assert_eq!(enc.code(), &[0x48, 0x8B, 0x44, 0xB1, 0x10]);
    }

    #[test]
    fn amc_store_without_base_uses_disp32() {
        // mov [rsi*8 + 0x20], rbx
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        b.emit_load_amc_mem_reg(
            swc_micro::MicroReg::NO_BASE,
            regs::RSI,
            8,
            0x20,
            MicroOpBits::B64,
            regs::RBX,
            MicroOpBits::B64,
        );
        let (enc, _) = encode(&b);
        // 48 89 1C F5 20 00 00 00 (SIB: scale=8, index=rsi, base=101)
        assert_eq!(
            enc.code(),
            &[0x48, 0x89, 0x1C, 0xF5, 0x20, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn register_names_at_all_widths() {
        assert_eq!(format_register_name(regs::RAX, MicroOpBits::B64), "rax");
        assert_eq!(format_register_name(regs::RAX, MicroOpBits::B32), "eax");
        assert_eq!(format_register_name(regs::RAX, MicroOpBits::B16), "ax");
        assert_eq!(format_register_name(regs::RAX, MicroOpBits::B8), "al");
        assert_eq!(format_register_name(regs::R10, MicroOpBits::B8), "r10b");
        assert_eq!(format_register_name(regs::XMM3, MicroOpBits::B128), "xmm3");
    }
}
