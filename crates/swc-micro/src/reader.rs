//! Reader for the textual micro-IR form.
//!
//! Mirrors the printer's notation so dumps and hand-written test programs
//! feed straight back into a builder:
//!
//! ```text
//! func demo (conv=c)
//!   v0 = load_imm 0x11, b64
//!   v1 = add v1, 1, b64
//!   cmp v0, 0, b64
//!   jump ne, again, b32
//!   label again
//!   call_reg rax (conv=c)
//!   ret
//! ```
//!
//! Syntax problems are reported as diagnostics carrying the offending
//! line's span; parsing continues so several errors surface at once.

use swc_util::diagnostic::E_MICRO_ASM_SYNTAX;
use swc_util::{DiagnosticBuilder, FileId, FxHashMap, Handler, Span, Symbol};

use crate::builder::MicroBuilder;
use crate::func::LabelId;
use crate::ops::{CallConvKind, MicroCond, MicroOp, MicroOpBits};
use crate::reg::{MicroReg, INT_REG_NAMES};

/// Parse a whole micro-asm module into one builder per `func` block
pub fn parse_micro_asm(text: &str, file: FileId, handler: &Handler) -> Vec<MicroBuilder> {
    let mut parser = Parser {
        file,
        handler,
        functions: Vec::new(),
        current: None,
        labels: FxHashMap::default(),
        offset: 0,
    };

    for line in text.lines() {
        let span = Span::new(file, parser.offset, line.len() as u32);
        parser.offset += line.len() as u32 + 1;

        let line = match line.find([';', '#']) {
            Some(pos) => &line[..pos],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        parser.parse_line(line, span);
    }

    parser.finish()
}

struct Parser<'a> {
    file: FileId,
    handler: &'a Handler,
    functions: Vec<MicroBuilder>,
    current: Option<MicroBuilder>,
    labels: FxHashMap<String, LabelId>,
    offset: u32,
}

impl Parser<'_> {
    fn error(&self, message: String, span: Span) {
        DiagnosticBuilder::error(message)
            .code(E_MICRO_ASM_SYNTAX)
            .span(span)
            .emit(self.handler);
    }

    fn finish(mut self) -> Vec<MicroBuilder> {
        if let Some(builder) = self.current.take() {
            self.functions.push(builder);
        }
        self.functions
    }

    fn begin_function(&mut self, name: &str, conv: CallConvKind) {
        if let Some(builder) = self.current.take() {
            self.functions.push(builder);
        }
        self.labels.clear();
        self.current = Some(MicroBuilder::new(Symbol::intern(name), conv));
    }

    fn parse_line(&mut self, line: &str, span: Span) {
        if let Some(rest) = line.strip_prefix("func ") {
            let (name, conv) = split_conv(rest);
            let conv = match conv {
                Some(text) => match parse_conv(text) {
                    Some(conv) => conv,
                    None => {
                        self.error(format!("unknown calling convention `{}`", text), span);
                        CallConvKind::C
                    }
                },
                None => CallConvKind::C,
            };
            self.begin_function(name.trim(), conv);
            return;
        }

        if self.current.is_none() {
            // Allow headerless snippets: wrap them into an implicit `main`.
            self.begin_function("main", CallConvKind::C);
        }

        if let Err(message) = self.parse_statement(line) {
            self.error(message, span);
        }
    }

    fn parse_statement(&mut self, line: &str) -> Result<(), String> {
        // Assignment forms first: `<reg> = ...`
        if let Some((lhs, rhs)) = line.split_once('=') {
            let lhs = lhs.trim();
            let rhs = rhs.trim();
            if let Some(dst) = parse_reg(lhs) {
                return self.parse_assignment(dst, rhs);
            }
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let builder = self.current.as_mut().expect("current function");
        match head {
            "ret" => {
                builder.emit_ret();
                Ok(())
            }
            "nop" => {
                builder.emit_nop();
                Ok(())
            }
            "enter" => {
                builder.emit_enter();
                Ok(())
            }
            "leave" => {
                builder.emit_leave();
                Ok(())
            }
            "push" | "pop" => {
                let reg = parse_reg(rest).ok_or_else(|| format!("expected register, got `{}`", rest))?;
                if head == "push" {
                    builder.emit_push(reg);
                } else {
                    builder.emit_pop(reg);
                }
                Ok(())
            }
            "cmp" => {
                let args = split_args(rest);
                if args.len() != 3 {
                    return Err("cmp expects `cmp a, b, bits`".to_string());
                }
                let a = parse_reg(&args[0])
                    .ok_or_else(|| format!("expected register, got `{}`", args[0]))?;
                let bits = parse_bits(&args[2])?;
                match parse_reg(&args[1]) {
                    Some(b) => builder.emit_cmp_reg_reg(a, b, bits),
                    None => builder.emit_cmp_reg_imm(a, parse_imm(&args[1])?, bits),
                };
                Ok(())
            }
            "label" => {
                let label = self.label_for(rest.to_string());
                let builder = self.current.as_mut().expect("current function");
                if builder.func.label_target(label).is_some() {
                    return Err(format!("label `{}` placed twice", rest));
                }
                builder.place_label(label);
                Ok(())
            }
            "jump" => {
                let args = split_args(rest);
                let (cond, target, bits) = match args.len() {
                    1 => (MicroCond::Unconditional, args[0].clone(), MicroOpBits::B32),
                    3 => (
                        parse_cond(&args[0]).ok_or_else(|| {
                            format!("unknown condition `{}`", args[0])
                        })?,
                        args[1].clone(),
                        parse_bits(&args[2])?,
                    ),
                    _ => return Err("jump expects `jump cc, label, bits` or `jump label`".to_string()),
                };
                let label = self.label_for(target);
                let builder = self.current.as_mut().expect("current function");
                builder.emit_jump_to_label(cond, bits, label);
                Ok(())
            }
            "call" | "call_extern" => {
                let (name, conv) = split_conv(rest);
                let conv = conv
                    .and_then(parse_conv)
                    .ok_or_else(|| format!("call needs `(conv=...)`: `{}`", rest))?;
                let sym = Symbol::intern(name.trim());
                if head == "call" {
                    builder.emit_call_local(sym, conv);
                } else {
                    builder.emit_call_extern(sym, conv);
                }
                Ok(())
            }
            "call_reg" => {
                let (reg_text, conv) = split_conv(rest);
                let conv = conv
                    .and_then(parse_conv)
                    .ok_or_else(|| format!("call_reg needs `(conv=...)`: `{}`", rest))?;
                let reg = parse_reg(reg_text.trim())
                    .ok_or_else(|| format!("expected register, got `{}`", reg_text.trim()))?;
                builder.emit_call_reg(reg, conv);
                Ok(())
            }
            other => Err(format!("unknown statement `{}`", other)),
        }
    }

    fn parse_assignment(&mut self, dst: MicroReg, rhs: &str) -> Result<(), String> {
        let builder = self.current.as_mut().expect("current function");
        let (head, rest) = match rhs.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (rhs, ""),
        };

        // `r0 = sete` and friends
        if let Some(cond_text) = head.strip_prefix("set") {
            if rest.is_empty() {
                let cond = parse_cond(cond_text)
                    .ok_or_else(|| format!("unknown condition `{}`", cond_text))?;
                builder.emit_set_cond_reg(dst, cond);
                return Ok(());
            }
        }

        match head {
            "load_imm" => {
                let args = split_args(rest);
                if args.len() != 2 {
                    return Err("load_imm expects `load_imm value, bits`".to_string());
                }
                let value = parse_imm(&args[0])?;
                let bits = parse_bits(&args[1])?;
                builder.emit_load_reg_imm(dst, value, bits);
                Ok(())
            }
            "mov" => {
                let args = split_args(rest);
                if args.len() != 2 {
                    return Err("mov expects `mov src, bits`".to_string());
                }
                let src = parse_reg(&args[0])
                    .ok_or_else(|| format!("expected register, got `{}`", args[0]))?;
                let bits = parse_bits(&args[1])?;
                builder.emit_load_reg_reg(dst, src, bits);
                Ok(())
            }
            op_text => {
                let op = parse_binary_op(op_text)
                    .ok_or_else(|| format!("unknown operation `{}`", op_text))?;
                let args = split_args(rest);
                if args.len() != 3 {
                    return Err(format!("{} expects `{} a, b, bits`", op_text, op_text));
                }
                let first = parse_reg(&args[0])
                    .ok_or_else(|| format!("expected register, got `{}`", args[0]))?;
                let bits = parse_bits(&args[2])?;
                // Two-operand form: dst must be the first source.
                if first != dst {
                    builder.emit_load_reg_reg(dst, first, bits);
                }
                match parse_reg(&args[1]) {
                    Some(src) => builder.emit_op_binary_reg_reg(dst, src, op, bits),
                    None => builder.emit_op_binary_reg_imm(dst, parse_imm(&args[1])?, op, bits),
                };
                Ok(())
            }
        }
    }

    fn label_for(&mut self, name: String) -> LabelId {
        if let Some(&label) = self.labels.get(&name) {
            return label;
        }
        let builder = self.current.as_mut().expect("current function");
        let label = builder.create_label();
        self.labels.insert(name, label);
        label
    }
}

fn split_args(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(',').map(|part| part.trim().to_string()).collect()
}

/// Split a trailing `(conv=...)` group off a statement tail
fn split_conv(text: &str) -> (&str, Option<&str>) {
    match text.rfind("(conv=") {
        Some(pos) => {
            let inner = &text[pos + 6..];
            let inner = inner.strip_suffix(')').unwrap_or(inner);
            (&text[..pos], Some(inner.trim()))
        }
        None => (text, None),
    }
}

fn parse_conv(text: &str) -> Option<CallConvKind> {
    match text.to_ascii_lowercase().as_str() {
        "c" => Some(CallConvKind::C),
        "win64" => Some(CallConvKind::WindowsX64),
        "host" => Some(CallConvKind::Host),
        _ => None,
    }
}

fn parse_reg(text: &str) -> Option<MicroReg> {
    if let Some(idx) = INT_REG_NAMES.iter().position(|&name| name == text) {
        return Some(MicroReg::int_phys(idx as u32));
    }
    if let Some(rest) = text.strip_prefix("xmm") {
        return rest.parse::<u32>().ok().filter(|&n| n < 16).map(MicroReg::float_phys);
    }
    if let Some(rest) = text.strip_prefix("vf") {
        return rest.parse::<u32>().ok().map(MicroReg::virt_float);
    }
    if let Some(rest) = text.strip_prefix('v') {
        return rest.parse::<u32>().ok().map(MicroReg::virt_int);
    }
    None
}

fn parse_imm(text: &str) -> Result<u64, String> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        digits.parse::<u64>()
    }
    .map_err(|_| format!("bad immediate `{}`", text))?;
    Ok(if negative { value.wrapping_neg() } else { value })
}

fn parse_bits(text: &str) -> Result<MicroOpBits, String> {
    match text.to_ascii_lowercase().as_str() {
        "b8" | "8" => Ok(MicroOpBits::B8),
        "b16" | "16" => Ok(MicroOpBits::B16),
        "b32" | "32" => Ok(MicroOpBits::B32),
        "b64" | "64" => Ok(MicroOpBits::B64),
        "b128" | "128" => Ok(MicroOpBits::B128),
        _ => Err(format!("bad width `{}`", text)),
    }
}

fn parse_cond(text: &str) -> Option<MicroCond> {
    Some(match text {
        "a" => MicroCond::Above,
        "ae" => MicroCond::AboveOrEqual,
        "b" => MicroCond::Below,
        "be" => MicroCond::BelowOrEqual,
        "e" => MicroCond::Equal,
        "ne" => MicroCond::NotEqual,
        "l" => MicroCond::Less,
        "le" => MicroCond::LessOrEqual,
        "g" => MicroCond::Greater,
        "ge" => MicroCond::GreaterOrEqual,
        "o" => MicroCond::Overflow,
        "no" => MicroCond::NotOverflow,
        "p" => MicroCond::Parity,
        "np" => MicroCond::NotParity,
        "pe" => MicroCond::EvenParity,
        "po" => MicroCond::NotEvenParity,
        "s" => MicroCond::Sign,
        "z" => MicroCond::Zero,
        "nz" => MicroCond::NotZero,
        "jmp" => MicroCond::Unconditional,
        _ => return None,
    })
}

fn parse_binary_op(text: &str) -> Option<MicroOp> {
    Some(match text {
        "add" => MicroOp::Add,
        "sub" => MicroOp::Subtract,
        "imul" | "mul" => MicroOp::MultiplySigned,
        "idiv" => MicroOp::DivideSigned,
        "div" => MicroOp::DivideUnsigned,
        "imod" => MicroOp::ModuloSigned,
        "mod" => MicroOp::ModuloUnsigned,
        "and" => MicroOp::And,
        "or" => MicroOp::Or,
        "xor" => MicroOp::Xor,
        "shl" => MicroOp::ShiftLeft,
        "shr" => MicroOp::ShiftRight,
        "sar" => MicroOp::ShiftArithmeticRight,
        "rol" => MicroOp::RotateLeft,
        "ror" => MicroOp::RotateRight,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::MicroOpcode;
    use crate::reg::regs;

    fn parse_one(text: &str) -> (MicroBuilder, Handler) {
        let handler = Handler::new();
        let mut funcs = parse_micro_asm(text, FileId(0), &handler);
        assert_eq!(funcs.len(), 1, "expected one function");
        (funcs.remove(0), handler)
    }

    #[test]
    fn parses_the_allocation_scenario() {
        // S1's pseudo-IR feeds straight through.
        let text = "\
v0 = load_imm 0x11, B64
v1 = load_imm 0x22, B64
v1 = add v1, 1, B64
call_reg rax (conv=c)
v0 = add v0, 2, B64
ret
";
        let (builder, handler) = parse_one(text);
        assert!(!handler.has_errors());
        let ops: Vec<MicroOpcode> = builder
            .func
            .instrs
            .refs()
            .map(|r| builder.func.instr(r).op)
            .collect();
        assert_eq!(
            ops,
            vec![
                MicroOpcode::LoadRegImm,
                MicroOpcode::LoadRegImm,
                MicroOpcode::OpBinaryRegImm,
                MicroOpcode::CallIndirect,
                MicroOpcode::OpBinaryRegImm,
                MicroOpcode::Ret,
            ]
        );
    }

    #[test]
    fn physical_and_virtual_registers_parse() {
        assert_eq!(parse_reg("rax"), Some(regs::RAX));
        assert_eq!(parse_reg("r12"), Some(regs::R12));
        assert_eq!(parse_reg("xmm5"), Some(regs::XMM5));
        assert_eq!(parse_reg("v7"), Some(MicroReg::virt_int(7)));
        assert_eq!(parse_reg("vf2"), Some(MicroReg::virt_float(2)));
        assert_eq!(parse_reg("bogus"), None);
    }

    #[test]
    fn forward_labels_resolve() {
        let text = "\
func loopy (conv=c)
cmp rax, 0, b64
jump ne, done, b32
rax = add rax, 1, b64
label done
ret
";
        let (builder, handler) = parse_one(text);
        assert!(!handler.has_errors());
        assert!(builder.func.all_labels_placed());
    }

    #[test]
    fn syntax_errors_are_reported_with_spans() {
        let handler = Handler::new();
        parse_micro_asm("frobnicate rax\n", FileId(0), &handler);
        assert!(handler.has_errors());
        let diags = handler.take_all();
        assert!(diags[0].message.contains("frobnicate"));
    }

    #[test]
    fn multiple_functions_split() {
        let handler = Handler::new();
        let funcs = parse_micro_asm(
            "func a (conv=c)\nret\nfunc b (conv=win64)\nret\n",
            FileId(0),
            &handler,
        );
        assert_eq!(funcs.len(), 2);
        assert_eq!(funcs[0].func.symbol_name.as_str(), "a");
        assert_eq!(funcs[1].func.conv, CallConvKind::WindowsX64);
    }

    #[test]
    fn two_operand_form_inserts_move() {
        let (builder, _) = parse_one("v2 = add v0, v1, b64\nret\n");
        let ops: Vec<MicroOpcode> = builder
            .func
            .instrs
            .refs()
            .map(|r| builder.func.instr(r).op)
            .collect();
        assert_eq!(
            ops,
            vec![
                MicroOpcode::LoadRegReg,
                MicroOpcode::OpBinaryRegReg,
                MicroOpcode::Ret,
            ]
        );
    }
}
