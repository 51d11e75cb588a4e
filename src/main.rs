//! QL command-line front end.
//!
//! Usage summary:
//! - `-h`/`--help` prints usage and exits.
//! - `-v`/`--version` prints a build-target/version string and exits.
//! - Any other single argument is treated as a path to a `.ql` source
//!   file: it is compiled and, if that succeeds, run with output going
//!   to stdout and the process exit code set from the program's `main`.
//!
//! There is no bytecode-file mode and no REPL: QL's grammar has no
//! sub-function top-level form a REPL could usefully evaluate one line
//! at a time (see `DESIGN.md`).

use std::env;
use std::fs;
use std::process::ExitCode;

use ql_runtime::driver::{self, CancelToken, StdoutSink};

const VERSION: &str = "0.1.0";

fn usage() -> String {
    format!(
        r#"QL Language Toolchain v{VERSION}

Usage:
    ql <script.ql>

Arguments:
    <script.ql>
        Path to a QL source file to compile and run.

Options:
    -h, --help
        Show this help message and exit.
    -v, --version
        Show toolchain version."#
    )
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("{}", usage());
        return ExitCode::FAILURE;
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            println!("{}", usage());
            return ExitCode::SUCCESS;
        }
        "-v" | "--version" => {
            println!(
                "ql-runtime-build-{}-{}: v{VERSION}",
                env::consts::OS,
                env::consts::ARCH
            );
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let path = &args[1];
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to read '{path}': {e}");
            return ExitCode::FAILURE;
        }
    };

    let program = match driver::compile(&source) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut sink = StdoutSink;
    let cancel = CancelToken::new();
    match driver::run(&program, &mut sink, &cancel) {
        driver::RunOutcome::Finished(code) => {
            ExitCode::from((code as u32 & 0xFF) as u8)
        }
        driver::RunOutcome::Stopped => {
            eprintln!("execution stopped");
            ExitCode::FAILURE
        }
        driver::RunOutcome::RuntimeError(message) => {
            eprintln!("runtime error: {message}");
            ExitCode::FAILURE
        }
    }
}
