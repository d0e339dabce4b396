//! Command-line configuration.
//!
//! The driver parses its own flags; the surface relevant to the backend is
//! `--pass`, `--backend-optimize`, `--debug-info`, `--arch`, `--cpu`,
//! `--num-cores`, plus the diagnostic rendering switches.

use indexmap::IndexSet;
use std::path::PathBuf;
use swc_micro::BackendOptLevel;
use swc_util::diagnostic::{ColorChoice, RenderOptions};
use thiserror::Error;

/// Stage tokens `--pass` accepts
pub const PASS_STAGES: [&str; 12] = [
    "pre-regalloc",
    "post-regalloc",
    "pre-prolog-epilog",
    "post-prolog-epilog",
    "pre-legalize",
    "post-legalize",
    "pre-encode",
    "post-encode",
    "pre-const-prop",
    "post-const-prop",
    "pre-dead-store",
    "post-dead-store",
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CmdLineError {
    #[error("unknown argument `{0}`")]
    UnknownArgument(String),

    #[error("argument `{0}` expects a value")]
    MissingValue(String),

    #[error("invalid value `{value}` for `{flag}`")]
    BadValue { flag: String, value: String },

    #[error("no input files")]
    NoInputFiles,
}

/// One compiler invocation's configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Input source files (micro-asm form)
    pub inputs: Vec<PathBuf>,

    /// Output file for the raw code bytes (None prints a summary only)
    pub output: Option<PathBuf>,

    /// Target architecture; only `x86_64` is recognized
    pub arch: String,

    /// CPU string passed through to the encoder
    pub cpu: String,

    /// Backend optimization level
    pub backend_optimize: BackendOptLevel,

    /// Attach source refs to every emitted instruction
    pub debug_info: bool,

    /// IR dump stages, in request order
    pub pass_print: IndexSet<String>,

    /// Worker count; 0 means hardware concurrency
    pub num_cores: usize,

    /// Randomized scheduling (development mode)
    pub randomize: bool,
    pub rand_seed: u32,

    /// Diagnostic rendering switches
    pub diag: RenderOptions,

    pub verbose: bool,
    pub help: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: None,
            arch: "x86_64".to_string(),
            cpu: String::new(),
            backend_optimize: BackendOptLevel::O0,
            debug_info: false,
            pass_print: IndexSet::new(),
            num_cores: 0,
            randomize: false,
            rand_seed: 0,
            diag: RenderOptions::default(),
            verbose: false,
            help: false,
        }
    }
}

impl Config {
    /// Parse argv (without the program name)
    pub fn parse(args: &[String]) -> Result<Config, CmdLineError> {
        let mut config = Config::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            // --flag=value is split up front.
            let (flag, inline_value) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (arg.as_str(), None),
            };

            let take_value = |iter: &mut std::slice::Iter<String>|
             -> Result<String, CmdLineError> {
                if let Some(value) = inline_value.clone() {
                    return Ok(value);
                }
                iter.next()
                    .cloned()
                    .ok_or_else(|| CmdLineError::MissingValue(flag.to_string()))
            };

            match flag {
                "-h" | "--help" => config.help = true,
                "--verbose" => config.verbose = true,
                "--debug-info" => config.debug_info = true,
                "--randomize" => config.randomize = true,
                "--diag-one-line" => config.diag.one_line = true,
                "--diag-absolute" => config.diag.absolute_paths = true,
                "--diag-id" => config.diag.show_id = true,
                "-o" | "--output" => {
                    config.output = Some(PathBuf::from(take_value(&mut iter)?));
                }
                "--arch" => config.arch = take_value(&mut iter)?,
                "--cpu" => config.cpu = take_value(&mut iter)?,
                "--seed" => {
                    let value = take_value(&mut iter)?;
                    config.rand_seed = value.parse().map_err(|_| CmdLineError::BadValue {
                        flag: flag.to_string(),
                        value,
                    })?;
                }
                "--num-cores" => {
                    let value = take_value(&mut iter)?;
                    config.num_cores = value.parse().map_err(|_| CmdLineError::BadValue {
                        flag: flag.to_string(),
                        value,
                    })?;
                }
                "--diag-max-column" => {
                    let value = take_value(&mut iter)?;
                    config.diag.max_column = value.parse().map_err(|_| CmdLineError::BadValue {
                        flag: flag.to_string(),
                        value,
                    })?;
                }
                "--log-color" => {
                    let value = take_value(&mut iter)?;
                    config.diag.color = match value.as_str() {
                        "on" | "always" => ColorChoice::Always,
                        "off" | "never" => ColorChoice::Never,
                        "auto" => ColorChoice::Auto,
                        _ => {
                            return Err(CmdLineError::BadValue {
                                flag: flag.to_string(),
                                value,
                            })
                        }
                    };
                }
                "--backend-optimize" => {
                    let value = take_value(&mut iter)?;
                    config.backend_optimize = BackendOptLevel::parse(&value).ok_or(
                        CmdLineError::BadValue {
                            flag: flag.to_string(),
                            value,
                        },
                    )?;
                }
                "--pass" => {
                    let value = take_value(&mut iter)?;
                    if !PASS_STAGES.contains(&value.as_str()) {
                        return Err(CmdLineError::BadValue {
                            flag: flag.to_string(),
                            value,
                        });
                    }
                    config.pass_print.insert(value);
                }
                other if other.starts_with('-') => {
                    return Err(CmdLineError::UnknownArgument(other.to_string()));
                }
                _ => config.inputs.push(PathBuf::from(arg)),
            }
        }

        if !config.help && config.inputs.is_empty() {
            return Err(CmdLineError::NoInputFiles);
        }

        Ok(config)
    }

    pub fn usage() -> &'static str {
        "\
usage: swc [options] <inputs>...

options:
    -o, --output <file>         write the emitted code bytes
    --arch <arch>               target architecture (x86_64)
    --cpu <name>                cpu string passed to the encoder
    --backend-optimize <level>  O0|O1|O2|O3|Os|Oz
    --debug-info                attach source refs to emitted instructions
    --pass <stage>              print IR at a stage (repeatable)
    --num-cores <n>             worker threads (0 = hardware)
    --randomize                 randomized scheduling, single worker
    --seed <n>                  seed for --randomize
    --diag-one-line             one-line diagnostics
    --diag-absolute             absolute paths in diagnostics
    --diag-id                   show diagnostic ids
    --diag-max-column <n>       truncate wide source lines
    --log-color <on|off|auto>   colorized output
    --verbose                   chatty driver
    -h, --help                  this text
"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, CmdLineError> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Config::parse(&args)
    }

    #[test]
    fn parses_backend_flags() {
        let config = parse(&[
            "--backend-optimize",
            "O2",
            "--debug-info",
            "--pass=pre-regalloc",
            "--pass",
            "post-encode",
            "--arch",
            "x86_64",
            "main.swgir",
        ])
        .unwrap();
        assert_eq!(config.backend_optimize, BackendOptLevel::O2);
        assert!(config.debug_info);
        assert!(config.pass_print.contains("pre-regalloc"));
        assert!(config.pass_print.contains("post-encode"));
        assert_eq!(config.inputs.len(), 1);
    }

    #[test]
    fn rejects_unknown_flags_and_bad_values() {
        assert_eq!(
            parse(&["--frobnicate", "x.swgir"]),
            Err(CmdLineError::UnknownArgument("--frobnicate".into()))
        );
        assert!(matches!(
            parse(&["--backend-optimize", "O9", "x.swgir"]),
            Err(CmdLineError::BadValue { .. })
        ));
        assert!(matches!(
            parse(&["--pass", "mid-regalloc", "x.swgir"]),
            Err(CmdLineError::BadValue { .. })
        ));
    }

    #[test]
    fn requires_inputs_unless_help() {
        assert_eq!(parse(&[]), Err(CmdLineError::NoInputFiles));
        assert!(parse(&["--help"]).unwrap().help);
    }

    #[test]
    fn pass_stages_dedupe_in_order() {
        let config = parse(&[
            "--pass=post-regalloc",
            "--pass=pre-regalloc",
            "--pass=post-regalloc",
            "x.swgir",
        ])
        .unwrap();
        let stages: Vec<&String> = config.pass_print.iter().collect();
        assert_eq!(stages, ["post-regalloc", "pre-regalloc"]);
    }
}
