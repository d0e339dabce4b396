//! Compilation session: one driver invocation.

use anyhow::Context;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

use swc_gen::{compile_builder, BackendOptions, FunctionArtifact, TaskContext};
use swc_jobs::{Job, JobManager, JobPriority, JobResult, JobSetup};
use swc_micro::{parse_micro_asm, MicroBuilder};
use swc_util::diagnostic::{ColorChoice, E_HARDWARE_EXCEPTION};
use swc_util::{DiagnosticBuilder, ExitCode, Handler, Logger, SourceMap, Span};

use crate::config::Config;

/// State for one invocation of the compiler
pub struct Session {
    pub config: Config,
    pub sources: SourceMap,
    pub handler: Arc<Handler>,
    pub logger: Arc<Logger>,
}

/// Compiles one parsed micro-asm function on the pool
struct MicroCompileJob {
    builder: Option<MicroBuilder>,
    options: Arc<BackendOptions>,
    handler: Arc<Handler>,
    logger: Arc<Logger>,
    file_path: String,
    artifacts: Arc<Mutex<Vec<FunctionArtifact>>>,
}

impl Job for MicroCompileJob {
    fn name(&self) -> &str {
        "micro-compile"
    }

    fn run(&mut self) -> JobResult {
        let Some(builder) = self.builder.take() else {
            return JobResult::Done;
        };
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

impl Session {
    pub fn new(config: Config) -> Self {
        let logger = Logger::new();
        logger.set_color_enabled(config.diag.color == ColorChoice::Always);
        Self {
            config,
            sources: SourceMap::new(),
            handler: Arc::new(Handler::new()),
            logger: Arc::new(logger),
        }
    }

    fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            opt_level: self.config.backend_optimize,
            debug_info: self.config.debug_info,
            pass_print: self.config.pass_print.iter().cloned().collect(),
            arch: self.config.arch.clone(),
            cpu: self.config.cpu.clone(),
        }
    }

    /// Run the whole invocation
    pub fn compile(&mut self) -> ExitCode {
        if self.config.help {
            print!("{}", Config::usage());
            return ExitCode::Success;
        }

        let jobs = JobManager::new(JobSetup {
            num_cores: self.config.num_cores,
            randomize: self.config.randomize,
            rand_seed: self.config.rand_seed,
        });
        let options = Arc::new(self.backend_options());
        let artifacts = Arc::new(Mutex::new(Vec::new()));
        let client = jobs.new_client_id();
        let mut scheduled = 0usize;

        let inputs = std::mem::take(&mut self.config.inputs);
        for path in &inputs {
            let text = match std::fs::read_to_string(path)
                .with_context(|| format!("cannot read `{}`", path.display()))
            {
                Ok(text) => text,
                Err(err) => {
                    self.handler.error(format!("{:#}", err), Span::DUMMY);
                    continue;
                }
            };
            let file = self.sources.add_file(path, text.clone());
            let file_path = path.display().to_string();

            for mut builder in parse_micro_asm(&text, file, &self.handler) {
                builder.set_debug_info(self.config.debug_info);
                builder.opt_level = self.config.backend_optimize;
                builder.print_file_path = file_path.clone();
                jobs.enqueue(
                    Box::new(MicroCompileJob {
                        builder: Some(builder),
                        options: Arc::clone(&options),
                        handler: Arc::clone(&self.handler),
                        logger: Arc::clone(&self.logger),
                        file_path: file_path.clone(),
                        artifacts: Arc::clone(&artifacts),
                    }),
                    JobPriority::Normal,
                    client,
                );
                scheduled += 1;
            }
        }
        self.config.inputs = inputs;

        jobs.wait_all(client);
        let hardware_exception = self.report_job_panics(&jobs);

        let mut artifacts = std::mem::take(&mut *artifacts.lock());
        artifacts.sort_by_key(|a| a.name);

        self.report_artifacts(&artifacts, scheduled);
        self.flush_diagnostics();

        let exit = self.exit_code(hardware_exception);
        if exit == ExitCode::Success {
            if let Err(err) = self.write_output(&artifacts) {
                eprintln!("error: {}", err);
                return ExitCode::ErrorCommand;
            }
        }
        exit
    }

    /// Turn caught job panics into diagnostics; returns true when any job
    /// died on a hardware exception
    fn report_job_panics(&self, jobs: &JobManager) -> bool {
        let panics = jobs.take_panics();
        let any = !panics.is_empty();
        for message in panics {
            DiagnosticBuilder::error(message)
                .code(E_HARDWARE_EXCEPTION)
                .emit(&self.handler);
        }
        any
    }

    /// Map the invocation's outcome onto the process exit codes; a crashed
    /// job outranks ordinary diagnostics
    fn exit_code(&self, hardware_exception: bool) -> ExitCode {
        if hardware_exception {
            ExitCode::HardwareException
        } else if self.handler.has_errors() {
            ExitCode::ErrorCommand
        } else {
            ExitCode::Success
        }
    }

    fn report_artifacts(&self, artifacts: &[FunctionArtifact], scheduled: usize) {
        if !self.config.verbose && self.config.output.is_none() {
            for artifact in artifacts {
                println!(
                    "{}: {} bytes, {} relocation(s)",
                    artifact.name,
                    artifact.code.len(),
                    artifact.relocations.len()
                );
            }
            return;
        }
        if self.config.verbose {
            println!(
                "compiled {}/{} function(s), opt {}",
                artifacts.len(),
                scheduled,
                self.config.backend_optimize.name()
            );
            for artifact in artifacts {
                println!(
                    "  {}: {} bytes, {} relocation(s), {} debug entries",
                    artifact.name,
                    artifact.code.len(),
                    artifact.relocations.len(),
                    artifact.debug_map.len()
                );
            }
        }
    }

    fn write_output(&self, artifacts: &[FunctionArtifact]) -> std::io::Result<()> {
        let Some(path) = &self.config.output else {
            return Ok(());
        };
        let mut file = std::fs::File::create(path)?;
        for artifact in artifacts {
            file.write_all(&artifact.code)?;
        }
        Ok(())
    }

    fn flush_diagnostics(&self) {
        let rendered = self.handler.render_all(&self.sources, &self.config.diag);
        if !rendered.is_empty() {
            eprint!("{}", rendered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panicking_job_maps_to_hardware_exception_exit() {
        struct BoomJob;
        impl Job for BoomJob {
            fn run(&mut self) -> JobResult {
                panic!("simulated access violation");
            }
            fn name(&self) -> &str {
                "boom"
            }
        }

        let session = Session::new(Config {
            help: true,
            num_cores: 1,
            ..Default::default()
        });
        let jobs = JobManager::new(JobSetup {
            num_cores: 1,
            ..Default::default()
        });
        let client = jobs.new_client_id();
        jobs.enqueue(Box::new(BoomJob), JobPriority::Normal, client);
        jobs.wait_all(client);

        let hardware_exception = session.report_job_panics(&jobs);
        assert!(hardware_exception);
        assert!(session.handler.has_errors());
        assert_eq!(
            session.exit_code(hardware_exception),
            ExitCode::HardwareException
        );

        // A crash outranks the plain command-error mapping.
        assert_eq!(session.exit_code(false), ExitCode::ErrorCommand);
        let diags = session.handler.take_all();
        assert!(diags
            .iter()
            .any(|d| d.code == Some(swc_util::diagnostic::E_HARDWARE_EXCEPTION)));
    }

    #[test]
    fn session_compiles_inline_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_test.swgir");
        std::fs::write(&path, "func f (conv=c)\nrax = load_imm 1, b64\nret\n").unwrap();

        let mut config = Config::default();
        config.inputs.push(path);
        config.num_cores = 1;
        let mut session = Session::new(config);
        assert_eq!(session.compile(), ExitCode::Success);
    }
}
