//! Linear-scan register allocation.
//!
//! The stream is one extended basic block per function; labels and backward
//! jumps introduce liveness holes that are closed by extending intervals
//! across the jump-back region. The walk assigns physical registers in
//! table order (lowest index wins), restricts call-crossing virtuals to the
//! convention's persistent set, spills with the furthest-end heuristic, and
//! rebuilds the stream with spill loads/stores around rewritten operands.
//!
//! After the pass no operand contains a virtual register.

use swc_util::{FxHashMap, FxHashSet};

use crate::callconv::CallConv;
use crate::func::MicroFunction;
use crate::instr::MicroOpcode;
use crate::operand::MicroOperand;
use crate::ops::{CallConvKind, MicroOpBits};
use crate::pass::{MicroPass, MicroPassContext, MicroRegPrintMode};
use crate::reg::{regs, MicroReg};
use crate::rewrite::StreamRewriter;

/// Scratch registers reserved for spill traffic, excluded from allocation
const INT_SCRATCH: [MicroReg; 2] = [regs::R10, regs::R11];
const FLOAT_SCRATCH: [MicroReg; 2] = [regs::XMM14, regs::XMM15];

/// Integer registers handed out to virtuals, table order
const INT_ALLOCATABLE: [MicroReg; 12] = [
    regs::RAX,
    regs::RBX,
    regs::RCX,
    regs::RDX,
    regs::RSI,
    regs::RDI,
    regs::R8,
    regs::R9,
    regs::R12,
    regs::R13,
    regs::R14,
    regs::R15,
];

fn float_allocatable() -> Vec<MicroReg> {
    (0..14).map(MicroReg::float_phys).collect()
}

#[derive(Clone, Copy, Debug)]
struct Interval {
    start: u32,
    end: u32,
}

#[derive(Clone, Copy, Debug)]
enum Loc {
    Reg(MicroReg),
    /// Bytes below the frame pointer
    Slot(u32),
}

#[derive(Default)]
pub struct RegisterAllocationPass;

impl MicroPass for RegisterAllocationPass {
    fn name(&self) -> &'static str {
        "regalloc"
    }

    fn print_mode_after(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Concrete
    }

    fn run(&mut self, ctx: &mut MicroPassContext<'_>) -> bool {
        let func = &mut *ctx.func;

        let intervals = build_intervals(func);
        if intervals.is_empty() {
            return false;
        }

        let call_sites = collect_call_sites(func);
        let phys_conflicts = collect_phys_conflicts(func, &intervals);
        let assignment = assign(func, &intervals, &call_sites, &phys_conflicts);
        rewrite_stream(func, &assignment);

        debug_assert!(no_virtuals_remain(func), "virtual register survived allocation");
        true
    }
}

/// Live interval per virtual register, extended across backward jumps
fn build_intervals(func: &MicroFunction) -> FxHashMap<MicroReg, Interval> {
    let mut intervals: FxHashMap<MicroReg, Interval> = FxHashMap::default();

    for r in func.instrs.refs() {
        if func.instr(r).op == MicroOpcode::Ignore {
            continue;
        }
        let ud = func.use_def(r);
        for reg in ud.uses.iter().chain(ud.defs.iter()) {
            if !reg.is_virtual() {
                continue;
            }
            let entry = intervals.entry(*reg).or_insert(Interval {
                start: r.0,
                end: r.0,
            });
            entry.start = entry.start.min(r.0);
            entry.end = entry.end.max(r.0);
        }
    }

    // A backward jump re-enters the region [target, jump]; anything live in
    // it stays live until the jump.
    let back_edges = collect_back_edges(func);
    let mut changed = true;
    while changed {
        changed = false;
        for &(target, jump) in &back_edges {
            for interval in intervals.values_mut() {
                if interval.start <= jump && interval.end >= target && interval.end < jump {
                    interval.end = jump;
                    changed = true;
                }
            }
        }
    }

    intervals
}

fn collect_back_edges(func: &MicroFunction) -> Vec<(u32, u32)> {
    let mut edges = Vec::new();
    for r in func.instrs.refs() {
        let inst = func.instr(r);
        match inst.op {
            MicroOpcode::JumpCondImm => {
                let label = crate::func::LabelId(func.ops(r)[2].imm() as u32);
                if let Some(target) = func.label_target(label) {
                    if target.0 < r.0 {
                        edges.push((target.0, r.0));
                    }
                }
            }
            MicroOpcode::PatchJump => {
                // A patch placed before its jump closes a backward loop.
                let jump = func.ops(r)[0].imm() as u32;
                if r.0 < jump {
                    edges.push((r.0, jump));
                }
            }
            MicroOpcode::JumpTable => {
                let table = func.ops(r)[2].imm() as usize;
                if let Some(data) = func.jump_tables.get(table) {
                    for &label in &data.labels {
                        if let Some(target) = func.label_target(label) {
                            if target.0 < r.0 {
                                edges.push((target.0, r.0));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    edges
}

fn collect_call_sites(func: &MicroFunction) -> Vec<(u32, CallConvKind)> {
    let mut sites = Vec::new();
    for r in func.instrs.refs() {
        let inst = func.instr(r);
        if inst.op.is_call() {
            let conv = func.ops(r)[1].conv();
            sites.push((r.0, conv));
        }
    }
    sites
}

/// Physical registers referenced explicitly while a virtual is live cannot
/// be handed to that virtual.
fn collect_phys_conflicts(
    func: &MicroFunction,
    intervals: &FxHashMap<MicroReg, Interval>,
) -> FxHashMap<MicroReg, FxHashSet<MicroReg>> {
    let mut conflicts: FxHashMap<MicroReg, FxHashSet<MicroReg>> = FxHashMap::default();

    for r in func.instrs.refs() {
        if func.instr(r).op == MicroOpcode::Ignore {
            continue;
        }
        let ud = func.use_def(r);
        for reg in ud.uses.iter().chain(ud.defs.iter()) {
            if !reg.is_physical() {
                continue;
            }
            for (vreg, interval) in intervals {
                if interval.start <= r.0 && r.0 <= interval.end {
                    conflicts.entry(*vreg).or_default().insert(*reg);
                }
            }
        }
    }

    conflicts
}

fn assign(
    func: &mut MicroFunction,
    intervals: &FxHashMap<MicroReg, Interval>,
    call_sites: &[(u32, CallConvKind)],
    phys_conflicts: &FxHashMap<MicroReg, FxHashSet<MicroReg>>,
) -> FxHashMap<MicroReg, Loc> {
    let mut order: Vec<(MicroReg, Interval)> =
        intervals.iter().map(|(r, i)| (*r, *i)).collect();
    order.sort_by_key(|(reg, interval)| (interval.start, reg.packed()));

    let float_pool = float_allocatable();
    let mut free: FxHashSet<MicroReg> = INT_ALLOCATABLE.iter().copied().collect();
    free.extend(float_pool.iter().copied());

    // (vreg, end, preg) sorted by insertion; expiry scans linearly
    let mut active: Vec<(MicroReg, u32, MicroReg)> = Vec::new();
    let mut assignment: FxHashMap<MicroReg, Loc> = FxHashMap::default();

    for (vreg, interval) in order {
        // Expire intervals that ended before this one starts.
        active.retain(|&(_, end, preg)| {
            if end < interval.start {
                free.insert(preg);
                false
            } else {
                true
            }
        });

        let crossed: Vec<CallConvKind> = call_sites
            .iter()
            .filter(|&&(idx, _)| interval.start < idx && idx < interval.end)
            .map(|&(_, conv)| conv)
            .collect();

        let forbidden = forbidden_set(func, phys_conflicts, vreg);
        let candidates = candidate_regs(vreg, &crossed, &float_pool);

        let chosen = candidates
            .iter()
            .copied()
            .find(|reg| free.contains(reg) && !forbidden.contains(reg));

        match chosen {
            Some(preg) => {
                free.remove(&preg);
                active.push((vreg, interval.end, preg));
                assignment.insert(vreg, Loc::Reg(preg));
            }
            None => {
                // Furthest-first: spill whichever same-class interval ends
                // last, the current one included.
                let victim: Option<(usize, MicroReg, u32, MicroReg)> = active
                    .iter()
                    .enumerate()
                    .filter(|(_, (other, _, preg))| {
                        other.is_int() == vreg.is_int()
                            && candidates.contains(preg)
                            && !forbidden.contains(preg)
                    })
                    .max_by_key(|(_, (_, end, _))| *end)
                    .map(|(idx, &(other, end, preg))| (idx, other, end, preg));

                match victim {
                    Some((slot_idx, victim_reg, victim_end, preg)) if victim_end > interval.end => {
                        let offset = func.frame.alloc_spill_slot();
                        assignment.insert(victim_reg, Loc::Slot(offset));
                        active[slot_idx] = (vreg, interval.end, preg);
                        assignment.insert(vreg, Loc::Reg(preg));
                    }
                    _ => {
                        let offset = func.frame.alloc_spill_slot();
                        assignment.insert(vreg, Loc::Slot(offset));
                    }
                }
            }
        }
    }

    // Record which callee-saved registers the function must preserve.
    let conv = CallConv::get(func.conv);
    let used: FxHashSet<MicroReg> = assignment
        .values()
        .filter_map(|loc| match loc {
            Loc::Reg(preg) => Some(*preg),
            Loc::Slot(_) => None,
        })
        .collect();
    func.frame.callee_saved = conv
        .int_persistent_regs
        .iter()
        .chain(conv.float_persistent_regs.iter())
        .filter(|reg| used.contains(reg))
        .copied()
        .collect();

    assignment
}

fn forbidden_set(
    func: &MicroFunction,
    phys_conflicts: &FxHashMap<MicroReg, FxHashSet<MicroReg>>,
    vreg: MicroReg,
) -> FxHashSet<MicroReg> {
    let mut forbidden: FxHashSet<MicroReg> = phys_conflicts
        .get(&vreg)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default();
    if let Some(list) = func.forbidden.get(&vreg) {
        forbidden.extend(list.iter().copied());
    }
    forbidden
}

/// Registers a virtual may receive, most preferred first
fn candidate_regs(vreg: MicroReg, crossed: &[CallConvKind], float_pool: &[MicroReg]) -> Vec<MicroReg> {
    if crossed.is_empty() {
        return if vreg.is_int() {
            INT_ALLOCATABLE.to_vec()
        } else {
            float_pool.to_vec()
        };
    }

    // Live across a call: only registers persistent in every crossed
    // convention are safe.
    let mut candidates: Vec<MicroReg> = Vec::new();
    let first = CallConv::get(crossed[0]);
    let pool: Vec<MicroReg> = if vreg.is_int() {
        first.int_persistent_regs.to_vec()
    } else {
        first.float_persistent_regs.to_vec()
    };
    for reg in pool {
        let safe = crossed
            .iter()
            .all(|&kind| CallConv::get(kind).is_persistent(reg));
        let scratch = INT_SCRATCH.contains(&reg) || FLOAT_SCRATCH.contains(&reg);
        if safe && !scratch {
            candidates.push(reg);
        }
    }
    candidates
}

/// Rebuild the stream, substituting assigned registers and inserting spill
/// loads/stores through the reserved scratch registers.
fn rewrite_stream(func: &mut MicroFunction, assignment: &FxHashMap<MicroReg, Loc>) {
    let mut rw = StreamRewriter::new(func);

    for old in func.instrs.refs() {
        let inst = *func.instr(old);
        if inst.op == MicroOpcode::Ignore {
            rw.keep(func, old);
            continue;
        }

        let ud = func.use_def(old);
        let mut ops: Vec<MicroOperand> = func.ops(old).to_vec();

        // Map each spilled virtual in this instruction to a scratch register.
        let mut scratch_map: FxHashMap<MicroReg, (MicroReg, u32)> = FxHashMap::default();
        let mut int_next = 0usize;
        let mut float_next = 0usize;
        for reg in ud.uses.iter().chain(ud.defs.iter()) {
            if !reg.is_virtual() || scratch_map.contains_key(reg) {
                continue;
            }
            if let Some(Loc::Slot(offset)) = assignment.get(reg) {
                let scratch = if reg.is_int() {
                    let s = INT_SCRATCH[int_next];
                    int_next += 1;
                    s
                } else {
                    let s = FLOAT_SCRATCH[float_next];
                    float_next += 1;
                    s
                };
                scratch_map.insert(*reg, (scratch, *offset));
            }
        }

        rw.begin(func, old);

        // Reload spilled uses before the instruction.
        for used in &ud.uses {
            if let Some(&(scratch, offset)) = scratch_map.get(used) {
                rw.emit(
                    MicroOpcode::LoadRegMem,
                    inst.emit_flags,
                    &[
                        MicroOperand::Reg(scratch),
                        MicroOperand::Reg(regs::RBP),
                        MicroOperand::Bits(MicroOpBits::B64),
                        MicroOperand::Imm((-(offset as i64)) as u64),
                    ],
                );
            }
        }

        for op in ops.iter_mut() {
            if let MicroOperand::Reg(reg) = op {
                if reg.is_virtual() {
                    let mapped = match assignment.get(reg) {
                        Some(Loc::Reg(preg)) => *preg,
                        Some(Loc::Slot(_)) => scratch_map[reg].0,
                        None => unreachable!("virtual register without an interval"),
                    };
                    *op = MicroOperand::Reg(mapped);
                }
            }
        }

        rw.emit(inst.op, inst.emit_flags, &ops);

        // Write spilled defs back to their slots.
        for def in &ud.defs {
            if let Some(&(scratch, offset)) = scratch_map.get(def) {
                rw.emit(
                    MicroOpcode::LoadMemReg,
                    inst.emit_flags,
                    &[
                        MicroOperand::Reg(regs::RBP),
                        MicroOperand::Reg(scratch),
                        MicroOperand::Bits(MicroOpBits::B64),
                        MicroOperand::Imm((-(offset as i64)) as u64),
                    ],
                );
            }
        }
    }

    rw.finish(func);
}

fn no_virtuals_remain(func: &MicroFunction) -> bool {
    for r in func.instrs.refs() {
        if func.instr(r).op == MicroOpcode::Ignore {
            continue;
        }
        for op in func.ops(r) {
            if let MicroOperand::Reg(reg) = op {
                if reg.is_virtual() {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MicroBuilder;
    use crate::ops::{MicroOp, MicroOpBits};
    use swc_util::{Handler, Logger, Symbol};

    fn run_alloc(builder: &mut MicroBuilder) {
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
        RegisterAllocationPass.run(&mut ctx);
    }

    fn collect_regs(func: &MicroFunction) -> Vec<MicroReg> {
        let mut out = Vec::new();
        for r in func.instrs.refs() {
            for op in func.ops(r) {
                if let MicroOperand::Reg(reg) = op {
                    out.push(*reg);
                }
            }
        }
        out
    }

    #[test]
    fn no_virtual_survives() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let v0 = b.virtual_int_reg();
        let v1 = b.virtual_int_reg();
        b.emit_load_reg_imm(v0, 1, MicroOpBits::B64);
        b.emit_load_reg_imm(v1, 2, MicroOpBits::B64);
        b.emit_op_binary_reg_reg(v0, v1, MicroOp::Add, MicroOpBits::B64);
        b.emit_ret();
        run_alloc(&mut b);
        assert!(collect_regs(&b.func).iter().all(|r| !r.is_virtual()));
    }

    #[test]
    fn call_crossing_virtual_gets_callee_saved_register() {
        // S1: v0 lives across the call, v1 does not.
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let v0 = b.virtual_int_reg();
        let v1 = b.virtual_int_reg();
        b.emit_load_reg_imm(v0, 0x11, MicroOpBits::B64);
        b.emit_load_reg_imm(v1, 0x22, MicroOpBits::B64);
        b.emit_op_binary_reg_imm(v1, 1, MicroOp::Add, MicroOpBits::B64);
        b.emit_call_reg(regs::RAX, CallConvKind::C);
        b.emit_op_binary_reg_imm(v0, 2, MicroOp::Add, MicroOpBits::B64);
        b.emit_ret();
        run_alloc(&mut b);

        // v0's register must be persistent under the C convention (or v0
        // was spilled, which also satisfies the contract). The final add
        // destination tells us where v0 ended up.
        let conv = CallConv::get(CallConvKind::C);
        let mut last_add_dst = None;
        for r in b.func.instrs.refs() {
            let inst = b.func.instr(r);
            if inst.op == MicroOpcode::OpBinaryRegImm {
                let ops = b.func.ops(r);
                if ops[3].imm() == 2 {
                    last_add_dst = Some(ops[0].reg());
                }
            }
        }
        let dst = last_add_dst.expect("rewritten add missing");
        let spilled = INT_SCRATCH.contains(&dst);
        assert!(
            conv.is_persistent(dst) || spilled,
            "v0 landed in caller-saved {:?}",
            dst
        );
        assert!(b.func.frame.callee_saved.iter().all(|r| conv.is_persistent(*r)));
    }

    #[test]
    fn spills_when_pressure_exceeds_registers() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let vregs: Vec<MicroReg> = (0..20).map(|_| b.virtual_int_reg()).collect();
        for (i, &v) in vregs.iter().enumerate() {
            b.emit_load_reg_imm(v, i as u64, MicroOpBits::B64);
        }
        // Keep every virtual live to the end.
        let sum = b.virtual_int_reg();
        b.emit_clear_reg(sum, MicroOpBits::B64);
        for &v in &vregs {
            b.emit_op_binary_reg_reg(sum, v, MicroOp::Add, MicroOpBits::B64);
        }
        b.emit_ret();
        run_alloc(&mut b);

        assert!(collect_regs(&b.func).iter().all(|r| !r.is_virtual()));
        assert!(b.func.frame.spill_size > 0, "expected spills under pressure");
    }

    #[test]
    fn forbidden_register_is_avoided() {
        let mut b = MicroBuilder::new(Symbol::intern("f"), CallConvKind::C);
        let v0 = b.virtual_int_reg();
        b.add_virtual_reg_forbidden_phys_reg(v0, regs::RAX);
        b.emit_load_reg_imm(v0, 7, MicroOpBits::B64);
        b.emit_op_binary_reg_imm(v0, 1, MicroOp::Add, MicroOpBits::B64);
        b.emit_ret();
        run_alloc(&mut b);

        for r in b.func.instrs.refs() {
            if b.func.instr(r).op == MicroOpcode::LoadRegImm {
                assert_ne!(b.func.ops(r)[0].reg(), regs::RAX);
            }
        }
    }
}
