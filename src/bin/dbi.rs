//! `dbi`: load and run a BASIC program, compile one without running it,
//! execute it once non-interactively, or drop into the REPL with no
//! arguments.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dbasic::repl;
use dbasic::{Program, RunStatus, Runtime};

/// A line-numbered BASIC compiler and bytecode VM.
#[derive(Parser, Debug)]
#[command(name = "dbi", version, about)]
struct Cli {
    /// Load FILE, run it, then drop into the REPL. Omit to start the REPL
    /// with an empty program.
    file: Option<PathBuf>,

    /// Compile FILE only; report errors and exit without running it.
    #[arg(short = 'c', long = "compile", value_name = "FILE", conflicts_with_all = ["execute", "file"])]
    compile: Option<PathBuf>,

    /// Compile and run FILE non-interactively, then exit.
    #[arg(short = 'e', long = "execute", value_name = "FILE", conflicts_with_all = ["compile", "file"])]
    execute: Option<PathBuf>,

    /// Opcode step budget before a runaway program is aborted.
    #[arg(long = "max-steps", value_name = "N")]
    max_steps: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let mut program = Program::new();
    let mut runtime = Runtime::new();
    if let Some(n) = cli.max_steps {
        runtime = runtime.with_max_steps(n);
    }

    if let Some(path) = cli.compile {
        return match repl::compile_only(&mut program, &path) {
            Ok(Ok(())) => ExitCode::SUCCESS,
            Ok(Err(())) => {
                eprint!("{}", program.errors());
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("dbi: could not read '{}': {}", path.display(), e);
                ExitCode::FAILURE
            }
        };
    }

    if let Some(path) = cli.execute {
        return match repl::run_file(&mut program, &mut runtime, &path) {
            Ok(status) => exit_for(status, &runtime),
            Err(e) => {
                eprintln!("dbi: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if let Some(path) = cli.file {
        return match repl::run_file_then_interactive(&mut program, &mut runtime, &path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("dbi: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    match repl::run_interactive(&mut program, &mut runtime) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dbi: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn exit_for(status: RunStatus, runtime: &Runtime) -> ExitCode {
    match status {
        RunStatus::Finished => ExitCode::SUCCESS,
        RunStatus::Error => {
            eprint!("{}", runtime.errors());
            ExitCode::FAILURE
        }
        RunStatus::Yield => ExitCode::SUCCESS,
    }
}
