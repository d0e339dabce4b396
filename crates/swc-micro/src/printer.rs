//! Textual dump of a micro-instruction stream (`--pass`).
//!
//! Two columns: the opcode's mnemonic form with raw operands on the left, a
//! "natural" reading on the right (`v0 = v1 + v2`, `[rbp + 0x10] = rax`).
//! Jumps to labels that are not placed yet print `????` as their target.

use crate::builder::STACK_SLOT_BIT;
use crate::encoder::Encoder;
use crate::func::{LabelId, MicroFunction};
use crate::instr::{EncodeFlags, MicroOpcode};
use crate::operand::MicroOperand;
use crate::ops::{BackendOptLevel, MicroOpBits};
use crate::reg::MicroReg;
use swc_util::{LogColor, Logger};

/// Header block printed above a dump
pub struct PrintHeader<'a> {
    pub stage: &'a str,
    pub file_path: &'a str,
    pub source_line: u32,
    pub opt_level: BackendOptLevel,
}

fn hex(value: u64) -> String {
    format!("0x{:X}", value)
}

fn reg_name(reg: MicroReg, bits: MicroOpBits, encoder: Option<&dyn Encoder>) -> String {
    match encoder {
        Some(enc) if reg.is_physical() => enc.format_register_name(reg, bits),
        _ => reg.name(),
    }
}

fn mem(base: MicroReg, offset: u64, encoder: Option<&dyn Encoder>) -> String {
    let base = reg_name(base, MicroOpBits::B64, encoder);
    let signed = offset as i64;
    if signed == 0 {
        format!("[{}]", base)
    } else if signed < 0 {
        format!("[{} - {}]", base, hex(signed.unsigned_abs()))
    } else {
        format!("[{} + {}]", base, hex(offset))
    }
}

fn amc(
    base: MicroReg,
    mul: MicroReg,
    scale: u64,
    disp: u64,
    encoder: Option<&dyn Encoder>,
) -> String {
    let mut out = String::from("[");
    if !base.is_no_base() {
        out.push_str(&reg_name(base, MicroOpBits::B64, encoder));
    }
    if !mul.is_no_base() {
        if !base.is_no_base() {
            out.push_str(" + ");
        }
        out.push_str(&reg_name(mul, MicroOpBits::B64, encoder));
        if scale != 1 {
            out.push_str(&format!(" * {}", scale));
        }
    }
    if disp != 0 {
        if !base.is_no_base() || !mul.is_no_base() {
            out.push_str(" + ");
        }
        out.push_str(&hex(disp));
    }
    if base.is_no_base() && mul.is_no_base() && disp == 0 {
        out.push('0');
    }
    out.push(']');
    out
}

fn label_target(func: &MicroFunction, label: u64) -> String {
    match func.label_target(LabelId(label as u32)) {
        Some(r) => format!("#{}", r.0),
        None => "????".to_string(),
    }
}

fn call_slot(slot: u64) -> String {
    if slot & STACK_SLOT_BIT != 0 {
        format!("[rsp + {}]", hex(slot & 0xFFFF_FFFF))
    } else {
        format!("arg{}", slot)
    }
}

fn flags_tail(flags: EncodeFlags) -> String {
    if flags.is_empty() {
        return String::new();
    }
    let mut parts = Vec::new();
    if flags.has(EncodeFlags::OVERFLOW) {
        parts.push("overflow");
    }
    if flags.has(EncodeFlags::LOCK) {
        parts.push("lock");
    }
    if flags.has(EncodeFlags::B64) {
        parts.push("b64");
    }
    if flags.has(EncodeFlags::CAN_ENCODE) {
        parts.push("can_encode");
    }
    format!("  ; flags={}", parts.join("|"))
}

/// Mnemonic operand list and natural expression of one instruction
fn format_instr(
    func: &MicroFunction,
    idx: u32,
    encoder: Option<&dyn Encoder>,
) -> (String, String) {
    let r = crate::store::InstrRef(idx);
    let inst = func.instr(r);
    let ops = func.ops(r);

    let rn = |slot: usize, bits: MicroOpBits| reg_name(ops[slot].reg(), bits, encoder);

    match inst.op {
        MicroOpcode::Label => {
            let text = format!("L{}", ops[0].imm());
            (text.clone(), format!("{}:", text))
        }
        MicroOpcode::LoadRegImm => {
            let bits = ops[1].bits();
            (
                format!("{}, {}, {}", rn(0, bits), bits.name(), hex(ops[2].imm())),
                format!("{} = {}", rn(0, bits), hex(ops[2].imm())),
            )
        }
        MicroOpcode::LoadRegReg => {
            let bits = ops[2].bits();
            (
                format!("{}, {}, {}", rn(0, bits), rn(1, bits), bits.name()),
                format!("{} = {}", rn(0, bits), rn(1, bits)),
            )
        }
        MicroOpcode::LoadRegMem => {
            let bits = ops[2].bits();
            let m = mem(ops[1].reg(), ops[3].imm(), encoder);
            (
                format!("{}, {}, {}", rn(0, bits), m, bits.name()),
                format!("{} = {}", rn(0, bits), m),
            )
        }
        MicroOpcode::LoadMemReg => {
            let bits = ops[2].bits();
            let m = mem(ops[0].reg(), ops[3].imm(), encoder);
            (
                format!("{}, {}, {}", m, rn(1, bits), bits.name()),
                format!("{} = {}", m, rn(1, bits)),
            )
        }
        MicroOpcode::LoadMemImm => {
            let bits = ops[1].bits();
            let m = mem(ops[0].reg(), ops[2].imm(), encoder);
            (
                format!("{}, {}, {}", m, hex(ops[3].imm()), bits.name()),
                format!("{} = {}", m, hex(ops[3].imm())),
            )
        }
        MicroOpcode::LoadAddrRegMem => {
            let bits = ops[2].bits();
            let m = mem(ops[1].reg(), ops[3].imm(), encoder);
            (
                format!("{}, {}, {}", rn(0, bits), m, bits.name()),
                format!("{} = &{}", rn(0, bits), m),
            )
        }
        MicroOpcode::LoadAmcRegMem => {
            let bits = ops[3].bits();
            let m = amc(ops[1].reg(), ops[2].reg(), ops[5].imm(), ops[6].imm(), encoder);
            (
                format!("{}, {}, {}", rn(0, bits), m, bits.name()),
                format!("{} = {}", rn(0, bits), m),
            )
        }
        MicroOpcode::LoadAmcMemReg => {
            let bits = ops[4].bits();
            let m = amc(ops[0].reg(), ops[1].reg(), ops[5].imm(), ops[6].imm(), encoder);
            (
                format!("{}, {}, {}", m, rn(2, bits), bits.name()),
                format!("{} = {}", m, rn(2, bits)),
            )
        }
        MicroOpcode::LoadAmcMemImm => {
            let m = amc(ops[0].reg(), ops[1].reg(), ops[4].imm(), ops[5].imm(), encoder);
            (
                format!("{}, {}", m, hex(ops[6].imm())),
                format!("{} = {}", m, hex(ops[6].imm())),
            )
        }
        MicroOpcode::LoadAddrAmcRegMem => {
            let bits = ops[3].bits();
            let m = amc(ops[1].reg(), ops[2].reg(), ops[4].imm(), ops[5].imm(), encoder);
            (
                format!("{}, {}, {}", rn(0, bits), m, bits.name()),
                format!("{} = &{}", rn(0, bits), m),
            )
        }
        MicroOpcode::LoadSignedExtRegReg | MicroOpcode::LoadZeroExtRegReg => {
            let (db, sb) = (ops[2].bits(), ops[3].bits());
            let ext = if inst.op == MicroOpcode::LoadSignedExtRegReg {
                "sx"
            } else {
                "zx"
            };
            (
                format!("{}, {}, {}, {}", rn(0, db), rn(1, sb), db.name(), sb.name()),
                format!("{} = {}({})", rn(0, db), ext, rn(1, sb)),
            )
        }
        MicroOpcode::LoadSignedExtRegMem | MicroOpcode::LoadZeroExtRegMem => {
            let (db, sb) = (ops[2].bits(), ops[3].bits());
            let m = mem(ops[1].reg(), ops[4].imm(), encoder);
            let ext = if inst.op == MicroOpcode::LoadSignedExtRegMem {
                "sx"
            } else {
                "zx"
            };
            (
                format!("{}, {}, {}, {}", rn(0, db), m, db.name(), sb.name()),
                format!("{} = {}({})", rn(0, db), ext, m),
            )
        }
        MicroOpcode::ClearReg => {
            let bits = ops[1].bits();
            (
                format!("{}, {}", rn(0, bits), bits.name()),
                format!("{} = 0", rn(0, bits)),
            )
        }
        MicroOpcode::OpUnaryReg => {
            let bits = ops[1].bits();
            let op = ops[2].micro_op();
            (
                format!("{}, {}, {}", rn(0, bits), bits.name(), op.mnemonic()),
                format!("{} = {}({})", rn(0, bits), op.mnemonic(), rn(0, bits)),
            )
        }
        MicroOpcode::OpUnaryMem => {
            let bits = ops[1].bits();
            let op = ops[2].micro_op();
            let m = mem(ops[0].reg(), ops[3].imm(), encoder);
            (
                format!("{}, {}, {}", m, bits.name(), op.mnemonic()),
                format!("{} = {}({})", m, op.mnemonic(), m),
            )
        }
        MicroOpcode::OpBinaryRegReg => {
            let bits = ops[2].bits();
            let op = ops[3].micro_op();
            let (d, s) = (rn(0, bits), rn(1, bits));
            let natural = match op.infix() {
                Some(sym) => format!("{} = {} {} {}", d, d, sym, s),
                None => format!("{} = {}({}, {})", d, op.mnemonic(), d, s),
            };
            (
                format!("{}, {}, {}, {}", d, s, bits.name(), op.mnemonic()),
                natural,
            )
        }
        MicroOpcode::OpBinaryRegMem => {
            let bits = ops[2].bits();
            let op = ops[3].micro_op();
            let d = rn(0, bits);
            let m = mem(ops[1].reg(), ops[4].imm(), encoder);
            let natural = match op.infix() {
                Some(sym) => format!("{} = {} {} {}", d, d, sym, m),
                None => format!("{} = {}({}, {})", d, op.mnemonic(), d, m),
            };
            (
                format!("{}, {}, {}, {}", d, m, bits.name(), op.mnemonic()),
                natural,
            )
        }
        MicroOpcode::OpBinaryMemReg => {
            let bits = ops[2].bits();
            let op = ops[3].micro_op();
            let m = mem(ops[0].reg(), ops[4].imm(), encoder);
            let s = rn(1, bits);
            let natural = match op.infix() {
                Some(sym) => format!("{} = {} {} {}", m, m, sym, s),
                None => format!("{} = {}({}, {})", m, op.mnemonic(), m, s),
            };
            (
                format!("{}, {}, {}, {}", m, s, bits.name(), op.mnemonic()),
                natural,
            )
        }
        MicroOpcode::OpBinaryRegImm => {
            let bits = ops[1].bits();
            let op = ops[2].micro_op();
            let d = rn(0, bits);
            let value = hex(ops[3].imm());
            let natural = match op.infix() {
                Some(sym) => format!("{} = {} {} {}", d, d, sym, value),
                None => format!("{} = {}({}, {})", d, op.mnemonic(), d, value),
            };
            (
                format!("{}, {}, {}, {}", d, value, bits.name(), op.mnemonic()),
                natural,
            )
        }
        MicroOpcode::OpBinaryMemImm => {
            let bits = ops[1].bits();
            let op = ops[2].micro_op();
            let m = mem(ops[0].reg(), ops[3].imm(), encoder);
            let value = hex(ops[4].imm());
            let natural = match op.infix() {
                Some(sym) => format!("{} = {} {} {}", m, m, sym, value),
                None => format!("{} = {}({}, {})", m, op.mnemonic(), m, value),
            };
            (
                format!("{}, {}, {}, {}", m, value, bits.name(), op.mnemonic()),
                natural,
            )
        }
        MicroOpcode::OpTernaryRegRegReg => {
            let bits = ops[3].bits();
            let op = ops[4].micro_op();
            (
                format!(
                    "{}, {}, {}, {}, {}",
                    rn(0, bits),
                    rn(1, bits),
                    rn(2, bits),
                    bits.name(),
                    op.mnemonic()
                ),
                format!(
                    "{} = {}({}, {}, {})",
                    rn(0, bits),
                    op.mnemonic(),
                    rn(0, bits),
                    rn(1, bits),
                    rn(2, bits)
                ),
            )
        }
        MicroOpcode::CmpRegReg => {
            let bits = ops[2].bits();
            (
                format!("{}, {}, {}", rn(0, bits), rn(1, bits), bits.name()),
                format!("flags = cmp({}, {})", rn(0, bits), rn(1, bits)),
            )
        }
        MicroOpcode::CmpRegImm => {
            let bits = ops[1].bits();
            (
                format!("{}, {}, {}", rn(0, bits), hex(ops[2].imm()), bits.name()),
                format!("flags = cmp({}, {})", rn(0, bits), hex(ops[2].imm())),
            )
        }
        MicroOpcode::CmpMemReg => {
            let bits = ops[2].bits();
            let m = mem(ops[0].reg(), ops[3].imm(), encoder);
            (
                format!("{}, {}, {}", m, rn(1, bits), bits.name()),
                format!("flags = cmp({}, {})", m, rn(1, bits)),
            )
        }
        MicroOpcode::CmpMemImm => {
            let bits = ops[1].bits();
            let m = mem(ops[0].reg(), ops[2].imm(), encoder);
            (
                format!("{}, {}, {}", m, hex(ops[3].imm()), bits.name()),
                format!("flags = cmp({}, {})", m, hex(ops[3].imm())),
            )
        }
        MicroOpcode::SetCondReg => {
            let cond = ops[1].cond();
            (
                format!("{}, {}", rn(0, MicroOpBits::B8), cond.mnemonic()),
                format!("{} = ({} ? 1 : 0)", rn(0, MicroOpBits::B8), cond.mnemonic()),
            )
        }
        MicroOpcode::LoadCondRegReg => {
            let bits = ops[3].bits();
            let cond = ops[2].cond();
            (
                format!(
                    "{}, {}, {}, {}",
                    rn(0, bits),
                    rn(1, bits),
                    cond.mnemonic(),
                    bits.name()
                ),
                format!(
                    "{} = {} ? {} : {}",
                    rn(0, bits),
                    cond.mnemonic(),
                    rn(1, bits),
                    rn(0, bits)
                ),
            )
        }
        MicroOpcode::JumpReg => (
            rn(0, MicroOpBits::B64),
            format!("goto {}", rn(0, MicroOpBits::B64)),
        ),
        MicroOpcode::JumpCond => {
            let cond = ops[0].cond();
            (
                format!("{}, {}", cond.mnemonic(), ops[1].bits().name()),
                format!("jump {} ????", cond.mnemonic()),
            )
        }
        MicroOpcode::JumpCondImm => {
            let cond = ops[0].cond();
            let target = label_target(func, ops[2].imm());
            (
                format!("{}, L{}, {}", cond.mnemonic(), ops[2].imm(), ops[1].bits().name()),
                format!("if {} goto {}", cond.mnemonic(), target),
            )
        }
        MicroOpcode::JumpTable => (
            format!(
                "{}, {}, table{}, {}",
                rn(0, MicroOpBits::B64),
                rn(1, MicroOpBits::B64),
                ops[2].imm(),
                ops[3].imm()
            ),
            format!(
                "goto table{}[{}]",
                ops[2].imm(),
                rn(1, MicroOpBits::B64)
            ),
        ),
        MicroOpcode::PatchJump => (
            format!("#{}", ops[0].imm()),
            format!("patch #{} -> here", ops[0].imm()),
        ),
        MicroOpcode::Push => (
            rn(0, MicroOpBits::B64),
            format!("push {}", rn(0, MicroOpBits::B64)),
        ),
        MicroOpcode::Pop => (
            rn(0, MicroOpBits::B64),
            format!("{} = pop", rn(0, MicroOpBits::B64)),
        ),
        MicroOpcode::CallLocal | MicroOpcode::CallExtern => {
            let name = ops[0].name();
            let conv = ops[1].conv();
            (
                format!("{}, {}", name, conv.name()),
                format!("call {} ({})", name, conv.name()),
            )
        }
        MicroOpcode::CallIndirect => {
            let conv = ops[1].conv();
            (
                format!("{}, {}", rn(0, MicroOpBits::B64), conv.name()),
                format!("call {} ({})", rn(0, MicroOpBits::B64), conv.name()),
            )
        }
        MicroOpcode::LoadCallParam => {
            let bits = ops[2].bits();
            (
                format!("{}, {}, {}", call_slot(ops[0].imm()), rn(1, bits), bits.name()),
                format!("{} = {}", call_slot(ops[0].imm()), rn(1, bits)),
            )
        }
        MicroOpcode::LoadCallAddrParam => {
            let m = mem(ops[1].reg(), ops[2].imm(), encoder);
            (
                format!("{}, {}", call_slot(ops[0].imm()), m),
                format!("{} = &{}", call_slot(ops[0].imm()), m),
            )
        }
        MicroOpcode::LoadCallZeroExtParam => {
            let (db, sb) = (ops[2].bits(), ops[3].bits());
            (
                format!(
                    "{}, {}, {}, {}",
                    call_slot(ops[0].imm()),
                    rn(1, sb),
                    db.name(),
                    sb.name()
                ),
                format!("{} = zx({})", call_slot(ops[0].imm()), rn(1, sb)),
            )
        }
        MicroOpcode::StoreCallParam => {
            let bits = ops[2].bits();
            (
                format!("param{}, {}, {}", ops[0].imm(), rn(1, bits), bits.name()),
                format!("param{} = {}", ops[0].imm(), rn(1, bits)),
            )
        }
        MicroOpcode::SymbolRelocAddr => (
            format!("{}, {}, {}", rn(0, MicroOpBits::B64), ops[1].name(), hex(ops[2].imm())),
            format!("{} = &{}", rn(0, MicroOpBits::B64), ops[1].name()),
        ),
        MicroOpcode::SymbolRelocValue => {
            let bits = ops[1].bits();
            (
                format!("{}, cst{}, {}", rn(0, bits), ops[2].imm(), bits.name()),
                format!("{} = cst{}", rn(0, bits), ops[2].imm()),
            )
        }
        MicroOpcode::Enter
        | MicroOpcode::Leave
        | MicroOpcode::Nop
        | MicroOpcode::End
        | MicroOpcode::Ignore
        | MicroOpcode::Debug
        | MicroOpcode::Ret => (String::new(), inst.op.name().to_string()),
    }
}

/// Render the whole stream to a string
pub fn format_function(
    func: &MicroFunction,
    header: &PrintHeader<'_>,
    encoder: Option<&dyn Encoder>,
    colorize: bool,
) -> String {
    let paint = |color: LogColor, text: &str| -> String {
        if colorize {
            format!("{}{}{}", color.to_ansi(), text, LogColor::Reset.to_ansi())
        } else {
            text.to_string()
        }
    };

    let mut out = String::new();
    out.push_str(&paint(LogColor::Magenta, "[micro]"));
    out.push('\n');
    out.push_str(&format!(
        "  stage    : {}\n",
        paint(LogColor::Yellow, header.stage)
    ));
    out.push_str(&format!(
        "  function : {}\n",
        paint(LogColor::BrightGreen, func.symbol_name.as_str())
    ));
    out.push_str(&format!(
        "  location : {}:{}\n",
        header.file_path, header.source_line
    ));
    out.push_str(&format!("  opt      : {}\n", header.opt_level.name()));
    out.push_str(&format!("micro-instructions: {}\n", func.instrs.count()));

    for idx in 0..func.instrs.count() {
        let inst = func.instr(crate::store::InstrRef(idx));
        let (operand_text, natural) = format_instr(func, idx, encoder);
        out.push_str(&paint(LogColor::Dim, &format!("{:04}", idx)));
        out.push_str("  ");
        out.push_str(&paint(
            LogColor::BrightCyan,
            &format!("{:<26}", inst.op.name()),
        ));
        out.push_str(&format!("{:<40}", operand_text));
        out.push_str(&paint(LogColor::Dim, &natural));
        out.push_str(&flags_tail(inst.emit_flags));
        out.push('\n');
    }

    out
}

/// Print the stream through the serialized logger
pub fn print_function(
    func: &MicroFunction,
    header: &PrintHeader<'_>,
    encoder: Option<&dyn Encoder>,
    logger: &Logger,
) {
    let text = format_function(func, header, encoder, logger.color_enabled());
    let lock = logger.lock();
    lock.print("\n");
    lock.print(&text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MicroBuilder;
    use crate::ops::{CallConvKind, MicroCond, MicroOp};
    use swc_util::Symbol;

    fn dump(builder: &MicroBuilder) -> String {
        let header = PrintHeader {
            stage: "pre-regalloc",
            file_path: "demo.swg",
            source_line: 1,
            opt_level: BackendOptLevel::O0,
        };
        format_function(&builder.func, &header, None, false)
    }

    #[test]
    fn natural_column_shows_infix_ops() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let v0 = b.virtual_int_reg();
        let v1 = b.virtual_int_reg();
        b.emit_op_binary_reg_reg(v0, v1, MicroOp::Add, MicroOpBits::B64);
        let text = dump(&b);
        assert!(text.contains("v0 = v0 + v1"), "got:\n{}", text);
        assert!(text.contains("op_binary_reg_reg"));
    }

    #[test]
    fn unplaced_label_prints_question_marks() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let label = b.create_label();
        b.emit_jump_to_label(MicroCond::NotZero, MicroOpBits::B32, label);
        let text = dump(&b);
        assert!(text.contains("????"), "got:\n{}", text);

        b.place_label(label);
        let text = dump(&b);
        assert!(!text.contains("????"), "got:\n{}", text);
    }

    #[test]
    fn header_names_the_function() {
        let b = MicroBuilder::new(Symbol::intern("my_func"), CallConvKind::C);
        let text = dump(&b);
        assert!(text.contains("my_func"));
        assert!(text.contains("micro-instructions: 0"));
    }
}
