//! swc-drv - The compiler driver.
//!
//! Parses the command line, sets up the session (sources, diagnostics,
//! logger, job pool), compiles every input through the backend and maps the
//! result onto the process exit codes:
//!
//! | code | meaning |
//! |------|--------------------|
//! |  0   | success            |
//! | -1   | command-line error |
//! | -2   | hardware exception |
//! | -3   | panic box          |
//! | -4   | command error      |

pub mod config;
pub mod session;

pub use config::{CmdLineError, Config};
pub use session::Session;

use swc_util::ExitCode;

/// Driver entry point shared by the binary and the tests
pub fn run(args: &[String]) -> ExitCode {
    let config = match Config::parse(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            eprint!("{}", Config::usage());
            return ExitCode::ErrorCmdLine;
        }
    };

    let mut session = Session::new(config);
    session.compile()
}
