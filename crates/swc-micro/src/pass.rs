//! Pass protocol and the pass manager.
//!
//! The manager holds four ordered lists. Optimization lists run to a fixed
//! point bounded by the level-derived iteration limit; mandatory and final
//! lists run linearly, once per pass, in order.

use swc_util::{Handler, Logger};

use crate::encoder::Encoder;
use crate::func::MicroFunction;
use crate::ops::BackendOptLevel;
use crate::printer;

/// Whether a dump shows virtual or concrete register names
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MicroRegPrintMode {
    Virtual,
    Concrete,
}

/// One IR pass
pub trait MicroPass {
    fn name(&self) -> &'static str;

    /// Returns true when the pass changed the stream
    fn run(&mut self, ctx: &mut MicroPassContext<'_>) -> bool;

    fn print_mode_before(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Virtual
    }

    fn print_mode_after(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Virtual
    }
}

/// Everything a pass can touch
pub struct MicroPassContext<'a> {
    pub func: &'a mut MicroFunction,
    /// Populated before the final (encode) list runs
    pub encoder: Option<&'a mut dyn Encoder>,
    pub handler: &'a Handler,
    pub logger: &'a Logger,
    pub opt_level: BackendOptLevel,
    /// Stage tokens from `--pass` (e.g. `pre-regalloc`)
    pub pass_print: &'a [String],
    pub print_file_path: &'a str,
    pub print_source_line: u32,
}

impl MicroPassContext<'_> {
    fn should_print(&self, pass: &dyn MicroPass, before: bool) -> bool {
        if self.pass_print.is_empty() {
            return false;
        }
        let stage = stage_name(pass, before);
        self.pass_print.iter().any(|token| *token == stage)
    }

    fn print_stage(&self, pass: &dyn MicroPass, before: bool) {
        let stage = stage_name(pass, before);
        let mode = if before {
            pass.print_mode_before()
        } else {
            pass.print_mode_after()
        };
        let encoder = match mode {
            MicroRegPrintMode::Concrete => self.encoder.as_deref(),
            MicroRegPrintMode::Virtual => None,
        };
        let header = printer::PrintHeader {
            stage: stage.as_str(),
            file_path: self.print_file_path,
            source_line: self.print_source_line,
            opt_level: self.opt_level,
        };
        printer::print_function(self.func, &header, encoder, self.logger);
    }
}

fn stage_name(pass: &dyn MicroPass, before: bool) -> String {
    format!("{}-{}", if before { "pre" } else { "post" }, pass.name())
}

/// Ordered pass pipeline
#[derive(Default)]
pub struct MicroPassManager {
    pre_optimization: Vec<Box<dyn MicroPass>>,
    mandatory: Vec<Box<dyn MicroPass>>,
    post_optimization: Vec<Box<dyn MicroPass>>,
    final_passes: Vec<Box<dyn MicroPass>>,
}

impl MicroPassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pre_optimization(&mut self, pass: Box<dyn MicroPass>) {
        self.pre_optimization.push(pass);
    }

    pub fn add_mandatory(&mut self, pass: Box<dyn MicroPass>) {
        self.mandatory.push(pass);
    }

    pub fn add_post_optimization(&mut self, pass: Box<dyn MicroPass>) {
        self.post_optimization.push(pass);
    }

    pub fn add_final(&mut self, pass: Box<dyn MicroPass>) {
        self.final_passes.push(pass);
    }

    /// Run the full pipeline over one function
    pub fn run(&mut self, ctx: &mut MicroPassContext<'_>) {
        run_optimization_passes(ctx, &mut self.pre_optimization);
        run_linear_passes(ctx, &mut self.mandatory);
        run_optimization_passes(ctx, &mut self.post_optimization);
        run_linear_passes(ctx, &mut self.final_passes);
    }
}

fn run_pass(ctx: &mut MicroPassContext<'_>, pass: &mut Box<dyn MicroPass>) -> bool {
    if ctx.should_print(pass.as_ref(), true) {
        ctx.print_stage(pass.as_ref(), true);
    }

    let changed = pass.run(ctx);

    if ctx.should_print(pass.as_ref(), false) {
        ctx.print_stage(pass.as_ref(), false);
    }

    changed
}

fn run_linear_passes(ctx: &mut MicroPassContext<'_>, passes: &mut [Box<dyn MicroPass>]) {
    for pass in passes {
        run_pass(ctx, pass);
    }
}

fn run_optimization_passes(ctx: &mut MicroPassContext<'_>, passes: &mut [Box<dyn MicroPass>]) {
    if passes.is_empty() {
        return;
    }

    let max_iterations = ctx.opt_level.iteration_limit().max(1);
    for _ in 0..max_iterations {
        let mut changed = false;
        for pass in passes.iter_mut() {
            if run_pass(ctx, pass) {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}
