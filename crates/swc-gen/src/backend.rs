//! Backend orchestration: per-function jobs over the shared managers.
//!
//! Code generation runs as a family of jobs, one per function. Jobs read
//! the shared managers (types, constants, symbols) and write into their own
//! MicroBuilder, so no cross-function mutation happens during the passes.
//! A job whose call target is not declared yet registers itself as a waiter
//! and sleeps; committing the declaration wakes the client.

use parking_lot::Mutex;
use std::sync::Arc;

use swc_jobs::{Job, JobManager, JobPriority, JobResult};
use swc_micro::passes::default_pipeline;
use swc_micro::{BackendOptLevel, Encoder, MicroBuilder, MicroPassContext, Relocation};
use swc_sem::Module;
use swc_util::diagnostic::{E_HARDWARE_EXCEPTION, E_UNRESOLVED_SYMBOL, W_EMPTY_FUNCTION};
use swc_util::{DiagnosticBuilder, Handler, Logger, Span, Symbol};
use swc_x64::X64Encoder;

use crate::codegen::{conv_kind, CodeGen, CodeGenOutcome};
use crate::error::BackendError;

/// Backend configuration decided by the driver
#[derive(Clone, Debug)]
pub struct BackendOptions {
    pub opt_level: BackendOptLevel,
    pub debug_info: bool,
    /// `--pass` stage tokens
    pub pass_print: Vec<String>,
    pub arch: String,
    pub cpu: String,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            opt_level: BackendOptLevel::O0,
            debug_info: false,
            pass_print: Vec::new(),
            arch: "x86_64".to_string(),
            cpu: String::new(),
        }
    }
}

impl BackendOptions {
    /// Build the architecture encoder; only x86-64 is recognized
    pub fn make_encoder(&self) -> Result<X64Encoder, BackendError> {
        if self.arch != "x86_64" {
            return Err(BackendError::UnsupportedArch(self.arch.clone()));
        }
        Ok(X64Encoder::new(self.cpu.clone()))
    }
}

/// Read-only bundle threaded through backend operations
#[derive(Clone, Copy)]
pub struct TaskContext<'a> {
    pub handler: &'a Handler,
    pub logger: &'a Logger,
    pub options: &'a BackendOptions,
}

/// One function's emitted machine code
pub struct FunctionArtifact {
    pub name: Symbol,
    pub code: Vec<u8>,
    pub relocations: Vec<Relocation>,
    /// instruction index -> (source ref, code offset)
    pub debug_map: Vec<(u32, Span, Option<u32>)>,
}

/// Run the pass pipeline and the encoder over one finished builder
pub fn compile_builder(
    mut builder: MicroBuilder,
    ctx: TaskContext<'_>,
    file_path: &str,
) -> Option<FunctionArtifact> {
    if builder.func.instrs.is_empty() {
        DiagnosticBuilder::warning(format!(
            "function `{}` has an empty body",
            builder.func.symbol_name
        ))
        .code(W_EMPTY_FUNCTION)
        .emit(ctx.handler);
    }

    let mut encoder = match ctx.options.make_encoder() {
        Ok(encoder) => encoder,
        Err(err) => {
            ctx.handler.error(err.to_string(), Span::DUMMY);
            return None;
        }
    };

    let errors_before = ctx.handler.error_count();
    let name = builder.func.symbol_name;
    let source_line = builder.print_source_line;
    let mut pipeline = default_pipeline();
    {
        let mut pass_ctx = MicroPassContext {
            func: &mut builder.func,
            encoder: Some(&mut encoder),
            handler: ctx.handler,
            logger: ctx.logger,
            opt_level: ctx.options.opt_level,
            pass_print: &ctx.options.pass_print,
            print_file_path: file_path,
            print_source_line: source_line,
        };
        pipeline.run(&mut pass_ctx);
    }

    if ctx.handler.error_count() > errors_before {
        return None;
    }

    let debug_map = builder
        .func
        .debug_info
        .iter()
        .map(|(&instr, &span)| (instr.0, span, encoder.instr_offset(instr)))
        .collect();

    Some(FunctionArtifact {
        name,
        code: encoder.code().to_vec(),
        relocations: encoder.relocations().to_vec(),
        debug_map,
    })
}

/// One function's code generation, scheduled on the pool
struct CodeGenJob {
    module: Arc<Module>,
    func_index: usize,
    options: Arc<BackendOptions>,
    handler: Arc<Handler>,
    logger: Arc<Logger>,
    file_path: String,
    artifacts: Arc<Mutex<Vec<FunctionArtifact>>>,
    /// Set after the first sleep; a second miss is a hard error
    retried: bool,
}

impl Job for CodeGenJob {
    fn name(&self) -> &str {
        "codegen"
    }

    fn run(&mut self) -> JobResult {
        let func = &self.module.functions[self.func_index];
        let mut builder = MicroBuilder::new(func.name, conv_kind(func.conv));
        builder.set_debug_info(self.options.debug_info);
        builder.opt_level = self.options.opt_level;
        builder.print_file_path = self.file_path.clone();

        let outcome = CodeGen::new(
            func,
            &self.module.types,
            &self.module.constants,
            &self.module.symbols,
            &mut builder,
        )
        .run();

        match outcome {
            CodeGenOutcome::NeedsSymbol(symbol) if !self.retried => {
                self.retried = true;
                // Parked until the declaration commits and wakes us.
                self.module.symbols.add_waiter(symbol, 0);
                JobResult::Sleep
            }
            CodeGenOutcome::NeedsSymbol(symbol) => {
                DiagnosticBuilder::error(format!(
                    "unresolved symbol `{}` at call site in `{}`",
                    symbol, func.name
                ))
                .code(E_UNRESOLVED_SYMBOL)
                .help("declare the function or mark it extern")
                .emit(&self.handler);
                JobResult::Done
            }
            CodeGenOutcome::Done => {
                let ctx = TaskContext {
                    handler: &self.handler,
                    logger: &self.logger,
                    options: &self.options,
                };
                if let Some(artifact) = compile_builder(builder, ctx, &self.file_path) {
                    self.artifacts.lock().push(artifact);
                }
                JobResult::Done
            }
        }
    }
}

/// Module-level backend entry point
pub struct Backend {
    pub options: Arc<BackendOptions>,
    pub handler: Arc<Handler>,
    pub logger: Arc<Logger>,
}

impl Backend {
    pub fn new(options: BackendOptions, handler: Arc<Handler>, logger: Arc<Logger>) -> Self {
        Self {
            options: Arc::new(options),
            handler,
            logger,
        }
    }

    /// Compile every function of `module`, one job each
    pub fn compile_module(
        &self,
        module: Arc<Module>,
        file_path: &str,
        jobs: &JobManager,
    ) -> Vec<FunctionArtifact> {
        let artifacts = Arc::new(Mutex::new(Vec::new()));
        let client = jobs.new_client_id();

        for func_index in 0..module.functions.len() {
            jobs.enqueue(
                Box::new(CodeGenJob {
                    module: Arc::clone(&module),
                    func_index,
                    options: Arc::clone(&self.options),
                    handler: Arc::clone(&self.handler),
                    logger: Arc::clone(&self.logger),
                    file_path: file_path.to_string(),
                    artifacts: Arc::clone(&artifacts),
                    retried: false,
                }),
                JobPriority::Normal,
                client,
            );
        }

        let sleepers = jobs.wait_all(client);
        if sleepers > 0 {
            // Give parked jobs one final attempt; a still-missing symbol
            // becomes a diagnostic instead of another sleep.
            jobs.wake_all(client);
            jobs.wait_all(client);
        }

        for message in jobs.take_panics() {
            DiagnosticBuilder::error(message)
                .code(E_HARDWARE_EXCEPTION)
                .emit(&self.handler);
        }

        // Deterministic output order regardless of scheduling.
        let mut artifacts = match Arc::try_unwrap(artifacts) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => std::mem::take(&mut *shared.lock()),
        };
        artifacts.sort_by_key(|a| {
            module
                .functions
                .iter()
                .position(|f| f.name == a.name)
                .unwrap_or(usize::MAX)
        });
        artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swc_jobs::JobSetup;
    use swc_sem::ast::{AstFunction, AstNode, SemaNodeView};
    use swc_sem::{CallConvention, TypeKind};

    fn test_backend() -> (Backend, Arc<Handler>) {
        let handler = Arc::new(Handler::new());
        let logger = Arc::new(Logger::new());
        let backend = Backend::new(BackendOptions::default(), Arc::clone(&handler), logger);
        (backend, handler)
    }

    fn answer_module() -> Arc<Module> {
        let module = Module::new();
        let s64 = module.types.add_type(TypeKind::S64);
        let mut func = AstFunction::new(Symbol::intern("answer"), CallConvention::C, s64);
        let view = SemaNodeView::typed(s64);
        let lit = func.add_node(AstNode::IntLit { value: 42 }, view, Span::DUMMY);
        let ret = func.add_node(AstNode::Return { value: Some(lit) }, view, Span::DUMMY);
        func.body = Some(ret);
        let mut module = module;
        module.functions.push(func);
        Arc::new(module)
    }

    #[test]
    fn compiles_a_module_end_to_end() {
        let (backend, handler) = test_backend();
        let jobs = JobManager::new(JobSetup {
            num_cores: 1,
            ..Default::default()
        });
        let artifacts = backend.compile_module(answer_module(), "answer.swg", &jobs);
        assert!(!handler.has_errors(), "{:?}", handler.take_all());
        assert_eq!(artifacts.len(), 1);
        let artifact = &artifacts[0];
        assert!(!artifact.code.is_empty());
        // Every function ends in ret.
        assert_eq!(*artifact.code.last().unwrap(), 0xC3);
    }

    #[test]
    fn undeclared_call_becomes_a_diagnostic() {
        let module = Module::new();
        let s64 = module.types.add_type(TypeKind::S64);
        let mut func = AstFunction::new(Symbol::intern("caller"), CallConvention::C, s64);
        let view = SemaNodeView::typed(s64);
        let call = func.add_node(
            AstNode::Call {
                callee: Symbol::intern("nowhere"),
                args: vec![],
            },
            view,
            Span::DUMMY,
        );
        func.body = Some(call);
        let mut module = module;
        module.functions.push(func);

        let (backend, handler) = test_backend();
        let jobs = JobManager::new(JobSetup {
            num_cores: 1,
            ..Default::default()
        });
        let artifacts = backend.compile_module(Arc::new(module), "caller.swg", &jobs);
        assert!(artifacts.is_empty());
        assert!(handler.has_errors());
        let diags = handler.take_all();
        assert!(diags.iter().any(|d| d.message.contains("nowhere")));
    }

    #[test]
    fn extern_call_records_relocation_for_host() {
        let module = Module::new();
        let s64 = module.types.add_type(TypeKind::S64);
        let view = SemaNodeView::typed(s64);

        let mut caller = AstFunction::new(Symbol::intern("early"), CallConvention::C, s64);
        let call = caller.add_node(
            AstNode::Call {
                callee: Symbol::intern("late_helper"),
                args: vec![],
            },
            view,
            Span::DUMMY,
        );
        caller.body = Some(call);
        let mut module = module;
        module.functions.push(caller);
        let module = Arc::new(module);

        module
            .symbols
            .declare(Symbol::intern("late_helper"), true, CallConvention::C);

        let (backend, handler) = test_backend();
        let jobs = JobManager::new(JobSetup {
            num_cores: 1,
            ..Default::default()
        });
        let artifacts = backend.compile_module(Arc::clone(&module), "early.swg", &jobs);
        assert!(!handler.has_errors(), "{:?}", handler.take_all());
        assert_eq!(artifacts.len(), 1);
        // The extern call left a relocation for the host to patch.
        assert!(artifacts[0]
            .relocations
            .iter()
            .any(|r| r.symbol == Some(Symbol::intern("late_helper"))));
    }

    #[test]
    fn debug_info_flows_into_the_artifact_map() {
        let module = answer_module();
        let handler = Arc::new(Handler::new());
        let logger = Arc::new(Logger::new());
        let options = BackendOptions {
            debug_info: true,
            ..Default::default()
        };
        let backend = Backend::new(options, Arc::clone(&handler), logger);
        let jobs = JobManager::new(JobSetup {
            num_cores: 1,
            ..Default::default()
        });
        let artifacts = backend.compile_module(module, "answer.swg", &jobs);
        assert_eq!(artifacts.len(), 1);
        // Spans were all dummy, so the map may be empty; the pipeline must
        // still succeed with the flag on.
        assert!(!handler.has_errors());
    }
}
