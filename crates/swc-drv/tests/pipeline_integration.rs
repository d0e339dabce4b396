//! End-to-end backend scenarios, driven through the micro-asm reader, the
//! pass pipeline and the x86-64 encoder.

use std::sync::Arc;

use swc_gen::{compile_builder, BackendOptions, TaskContext};
use swc_micro::passes::{ConstantPropagationPass, RegisterAllocationPass};
use swc_micro::{
    parse_micro_asm, regs, BackendOptLevel, CallConv, CallConvKind, Encoder, MicroBuilder,
    MicroOpcode, MicroOperand, MicroPass, MicroPassContext,
};
use swc_util::{FileId, Handler, Logger, Symbol};
use swc_x64::X64Encoder;

fn parse_one(text: &str, handler: &Handler) -> MicroBuilder {
    let mut funcs = parse_micro_asm(text, FileId(0), handler);
    assert_eq!(funcs.len(), 1);
    funcs.remove(0)
}

fn run_pass(builder: &mut MicroBuilder, pass: &mut dyn MicroPass, handler: &Handler, logger: &Logger) {
    let mut ctx = MicroPassContext {
        func: &mut builder.func,
        encoder: None,
        handler,
        logger,
        opt_level: BackendOptLevel::O2,
        pass_print: &[],
        print_file_path: "",
        print_source_line: 0,
    };
    pass.run(&mut ctx);
}

fn full_compile(builder: MicroBuilder) -> (Vec<u8>, Vec<swc_micro::Relocation>, Arc<Handler>) {
    let handler = Arc::new(Handler::new());
    let logger = Arc::new(Logger::new());
    let options = BackendOptions {
        opt_level: BackendOptLevel::O1,
        ..Default::default()
    };
    let ctx = TaskContext {
        handler: &handler,
        logger: &logger,
        options: &options,
    };
    let artifact = compile_builder(builder, ctx, "test.swgir").expect("compilation failed");
    (artifact.code, artifact.relocations, handler)
}

/// S1: a value live across a call lands in a callee-saved register; a value
/// dead across the call may take any free register.
#[test]
fn s1_allocation_across_a_call() {
    let handler = Handler::new();
    let logger = Logger::new();
    let mut builder = parse_one(
        "\
v0 = load_imm 0x11, B64
v1 = load_imm 0x22, B64
v1 = add v1, 1, B64
call_reg rax (conv=c)
v0 = add v0, 2, B64
ret
",
        &handler,
    );
    assert!(!handler.has_errors());

    run_pass(&mut builder, &mut RegisterAllocationPass, &handler, &logger);

    let conv = CallConv::get(CallConvKind::C);
    // Find the post-call `add <reg>, 2` and check its destination.
    let mut v0_home = None;
    for r in builder.func.instrs.refs() {
        if builder.func.instr(r).op == MicroOpcode::OpBinaryRegImm {
            let ops = builder.func.ops(r);
            if ops[3].imm() == 2 {
                v0_home = Some(ops[0].reg());
            }
        }
    }
    let v0_home = v0_home.expect("v0's add survived");
    assert!(
        conv.is_persistent(v0_home) || v0_home == regs::R10 || v0_home == regs::R11,
        "v0 must be callee-saved or spilled, got {:?}",
        v0_home
    );

    // No virtual register anywhere in the final stream.
    for r in builder.func.instrs.refs() {
        for op in builder.func.ops(r) {
            if let MicroOperand::Reg(reg) = op {
                assert!(!reg.is_virtual());
            }
        }
    }
}

/// S2: the raw encoder output of a simple physical-register sequence.
#[test]
fn s2_simple_sequence_encoding() {
    let handler = Handler::new();
    let builder = parse_one(
        "\
rax = load_imm 0x1234, B64
rax = add rax, rbx, B64
ret
",
        &handler,
    );

    let mut encoder = X64Encoder::new("");
    assert!(encoder.encode_function(&builder.func, &handler));
    let code = encoder.code();
    assert!(!code.is_empty());
    assert_eq!(&code[..3], &[0x48, 0xC7, 0xC0], "mov rax, imm32");
    assert_eq!(*code.last().unwrap(), 0xC3);
}

/// S3: constant propagation folds chained adds into immediate loads.
#[test]
fn s3_constant_propagation_folds_chained_adds() {
    let handler = Handler::new();
    let logger = Logger::new();
    let mut builder = parse_one(
        "\
rax = load_imm 10, B32
rax = add rax, 5, B32
rax = add rax, 7, B32
",
        &handler,
    );

    let mut pass = ConstantPropagationPass;
    let mut ctx = MicroPassContext {
        func: &mut builder.func,
        encoder: None,
        handler: &handler,
        logger: &logger,
        opt_level: BackendOptLevel::O2,
        pass_print: &[],
        print_file_path: "",
        print_source_line: 0,
    };
    assert!(pass.run(&mut ctx), "the pass must report changed = true");

    let values: Vec<u64> = builder
        .func
        .instrs
        .refs()
        .map(|r| {
            assert_eq!(builder.func.instr(r).op, MicroOpcode::LoadRegImm);
            builder.func.ops(r)[2].imm()
        })
        .collect();
    assert_eq!(values, vec![10, 15, 22]);
}

/// S4: a forward conditional jump over ~200 bytes patches to the long form
/// with the exact displacement.
#[test]
fn s4_forward_jump_patching() {
    let mut text = String::from("func j (conv=c)\njump nz, out, b32\n");
    for _ in 0..200 {
        text.push_str("nop\n");
    }
    text.push_str("label out\nret\n");

    let handler = Handler::new();
    let builder = parse_one(&text, &handler);
    let mut encoder = X64Encoder::new("");
    assert!(encoder.encode_function(&builder.func, &handler));

    let code = encoder.code();
    // Long form jcc at offset 0: 0F 85 disp32.
    assert_eq!(code[0], 0x0F);
    assert_eq!(code[1], 0x85);
    let disp = i32::from_le_bytes(code[2..6].try_into().unwrap());
    let instruction_len = 6;
    assert_eq!(instruction_len + disp as usize, code.len() - 1);
}

/// S5: five integer arguments under Windows x64 reserve 48 bytes
/// (32 shadow + 8 stack arg + 8 alignment).
#[test]
fn s5_win64_stack_adjustment() {
    let mut builder = MicroBuilder::new(Symbol::intern("w"), CallConvKind::WindowsX64);
    builder.emit_enter();
    let args: Vec<swc_micro::CallArg> = (0..5)
        .map(|_| swc_micro::CallArg::Reg(builder.virtual_int_reg(), swc_micro::MicroOpBits::B64))
        .collect();
    // Give the arguments values so the allocator has defs to work with.
    for arg in &args {
        if let swc_micro::CallArg::Reg(reg, bits) = arg {
            builder.emit_load_reg_imm(*reg, 1, *bits);
        }
    }
    builder.emit_call_with_args(
        swc_micro::CallTarget::Extern(Symbol::intern("five_args")),
        CallConvKind::WindowsX64,
        &args,
    );
    builder.emit_ret();

    let (code, relocations, handler) = full_compile(builder);
    assert!(!handler.has_errors(), "{:?}", handler.take_all());

    // sub rsp, 48 and add rsp, 48 both appear in the encoded stream.
    let sub = [0x48, 0x83, 0xEC, 0x30];
    let add = [0x48, 0x83, 0xC4, 0x30];
    let contains = |needle: &[u8]| code.windows(needle.len()).any(|w| w == needle);
    assert!(contains(&sub), "missing sub rsp, 48");
    assert!(contains(&add), "missing add rsp, 48");
    assert_eq!(relocations.len(), 1);
}

/// S6: signed division routes through RAX/RDX with the sign extension.
#[test]
fn s6_division_uses_rax_rdx() {
    let handler = Handler::new();
    let builder = parse_one(
        "\
func d (conv=c)
v0 = load_imm 100, B64
v1 = load_imm 7, B64
v2 = idiv v0, v1, B64
ret
",
        &handler,
    );
    assert!(!handler.has_errors());

    let (code, _, handler) = full_compile(builder);
    assert!(!handler.has_errors(), "{:?}", handler.take_all());
    // cqo (48 99) directly before idiv (REX.W F7 /7).
    let pos = code
        .windows(2)
        .position(|w| w == [0x48, 0x99])
        .expect("cqo missing");
    assert!(matches!(code[pos + 2], 0x48 | 0x49), "expected REX.W after cqo");
    assert_eq!(code[pos + 3], 0xF7);
}

/// Universal invariants 3 and 4: instruction offsets are monotonic inside
/// the buffer and every relocation's field lies fully inside it.
#[test]
fn relocations_and_offsets_stay_inside_the_buffer() {
    let handler = Handler::new();
    let builder = parse_one(
        "\
func r (conv=c)
call memset (conv=c)
call_extern memcpy (conv=c)
ret
",
        &handler,
    );

    let mut encoder = X64Encoder::new("");
    assert!(encoder.encode_function(&builder.func, &handler));
    let len = encoder.code().len() as u32;

    let mut last = 0;
    for r in builder.func.instrs.refs() {
        if let Some(offset) = encoder.instr_offset(r) {
            assert!(offset >= last && offset <= len);
            last = offset;
        }
    }

    assert_eq!(encoder.relocations().len(), 2);
    for reloc in encoder.relocations() {
        assert!(reloc.offset + 4 <= len, "relocation outside the buffer");
    }
}

/// The whole pipeline over the reader path: parse, optimize, allocate,
/// legalize, encode.
#[test]
fn reader_to_bytes_round_trip() {
    let handler = Handler::new();
    let builder = parse_one(
        "\
func loop_sum (conv=c)
v0 = load_imm 0, B64
v1 = load_imm 10, B64
label again
v0 = add v0, v1, B64
v1 = sub v1, 1, B64
cmp v1, 0, B64
jump nz, again, b32
rax = mov v0, B64
ret
",
        &handler,
    );
    assert!(!handler.has_errors());

    let (code, relocations, handler) = full_compile(builder);
    assert!(!handler.has_errors(), "{:?}", handler.take_all());
    assert!(!code.is_empty());
    assert!(relocations.is_empty());
    assert_eq!(*code.last().unwrap(), 0xC3);
}
