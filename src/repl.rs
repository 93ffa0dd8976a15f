//! The REPL and file-driving loop: the part of the system that owns stdin,
//! stdout, and the filesystem, and turns a `Runtime`'s yields into actual
//! interaction. `Runtime` itself never touches any of those.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::program::Program;
use crate::vm::{Entry, PendingAction, RunStatus, Runtime};

/// Pump a run to completion, answering `INPUT`/`LOAD` yields along the way
/// via `read_line` (called with a prompt, returning `Ok(None)` on EOF/
/// interrupt). Shared by the interactive REPL and batch file execution so
/// both honor the same yield protocol.
pub fn drive(
    program: &mut Program,
    runtime: &mut Runtime,
    mut status: RunStatus,
    mut read_line: impl FnMut(&str) -> io::Result<Option<String>>,
) -> io::Result<RunStatus> {
    loop {
        match status {
            RunStatus::Yield => match runtime.pending() {
                Some(PendingAction::Input { .. }) => {
                    let answer = match read_line("? ")? {
                        Some(a) => a,
                        None => return Ok(RunStatus::Finished),
                    };
                    match runtime.provide_input(program, &answer) {
                        Ok(()) => status = runtime.run(program, Entry::Resume),
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }
                Some(PendingAction::Load { .. }) => {
                    let path = runtime
                        .take_load_path()
                        .expect("Load pending implies a path");
                    program.clear();
                    match program.compile_file(&path) {
                        Ok(Ok(())) => {}
                        Ok(Err(())) => eprint!("{}", program.errors()),
                        Err(e) => eprintln!("Error: could not load '{}': {}", path, e),
                    }
                    return Ok(RunStatus::Finished);
                }
                Some(PendingAction::Host) | None => {
                    status = runtime.run(program, Entry::Resume);
                }
            },
            other => return Ok(other),
        }
    }
}

fn starts_with_line_number(s: &str) -> bool {
    s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
}

/// Compile one REPL line: either store it as a numbered program line, or
/// compile and run it immediately, pumping any yield through `read_line`.
/// Shared by the interactive editor loop and the non-terminal stdin loop.
fn process_line(
    program: &mut Program,
    runtime: &mut Runtime,
    line: &str,
    read_line: impl FnMut(&str) -> io::Result<Option<String>>,
) -> io::Result<()> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    if starts_with_line_number(trimmed) {
        let mut one_line = line.to_string();
        one_line.push('\n');
        if program.compile_str(&one_line).is_err() {
            eprint!("{}", program.errors());
        }
        return Ok(());
    }
    match program.compile_immediate(trimmed) {
        Ok(Some(stmt)) => {
            let status = runtime.run(program, Entry::Immediate(&stmt));
            let status = drive(program, runtime, status, read_line)?;
            if status == RunStatus::Error {
                eprint!("{}", runtime.errors());
            }
        }
        Ok(None) => {}
        Err(e) => eprintln!("Error: {}", e),
    }
    Ok(())
}

/// Compile `path` only; do not run it. Errors land in `program.errors()`.
pub fn compile_only(program: &mut Program, path: &Path) -> io::Result<Result<(), ()>> {
    program.compile_file(path)
}

/// Compile and run `path` to completion non-interactively, answering any
/// `INPUT`/`LOAD` yields from real stdin, then return without entering an
/// editor loop.
pub fn run_file(program: &mut Program, runtime: &mut Runtime, path: &Path) -> io::Result<RunStatus> {
    match program.compile_file(path)? {
        Ok(()) => {}
        Err(()) => eprint!("{}", program.errors()),
    }
    let status = runtime.run_program(program);
    drive(program, runtime, status, stdin_read_line)
}

/// Load and run `path`, synthesizing `RUN`, then drop into the same
/// interactive session a bare `dbi` would give — the classic "load a
/// program, have it run, then keep tinkering at the prompt" BASIC flow.
pub fn run_file_then_interactive(program: &mut Program, runtime: &mut Runtime, path: &Path) -> io::Result<()> {
    match program.compile_file(path)? {
        Ok(()) => {}
        Err(()) => eprint!("{}", program.errors()),
    }
    let status = runtime.run_program(program);
    run_interactive_from(program, runtime, Some(status))
}

fn stdin_read_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    let n = io::stdin().read_line(&mut line)?;
    if n == 0 {
        Ok(None)
    } else {
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }
}

/// Run an interactive session. When stdin is a terminal this uses
/// `rustyline` for line editing and the `"> "` prompt; otherwise (stdin
/// redirected from a file or a pipe) it reads lines straight off stdin with
/// no prompt noise, matching how a piped `dbi` invocation behaves.
pub fn run_interactive(program: &mut Program, runtime: &mut Runtime) -> io::Result<()> {
    run_interactive_from(program, runtime, None)
}

fn run_interactive_from(
    program: &mut Program,
    runtime: &mut Runtime,
    initial: Option<RunStatus>,
) -> io::Result<()> {
    if io::stdin().is_terminal() {
        run_editor_loop(program, runtime, initial)
    } else {
        run_piped_loop(program, runtime, initial)
    }
}

fn run_editor_loop(
    program: &mut Program,
    runtime: &mut Runtime,
    initial: Option<RunStatus>,
) -> io::Result<()> {
    let mut editor = DefaultEditor::new().map_err(to_io_error)?;
    let read_for_editor = |editor: &mut DefaultEditor, prompt: &str| -> io::Result<Option<String>> {
        match editor.readline(prompt) {
            Ok(l) => Ok(Some(l)),
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => Ok(None),
            Err(e) => Err(to_io_error(e)),
        }
    };

    if let Some(status) = initial {
        let status = drive(program, runtime, status, |prompt| {
            read_for_editor(&mut editor, prompt)
        })?;
        if status == RunStatus::Error {
            eprint!("{}", runtime.errors());
        }
    }

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                process_line(program, runtime, &line, |prompt| {
                    read_for_editor(&mut editor, prompt)
                })?;
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {}", e);
                break;
            }
        }
    }
    Ok(())
}

fn run_piped_loop(
    program: &mut Program,
    runtime: &mut Runtime,
    initial: Option<RunStatus>,
) -> io::Result<()> {
    if let Some(status) = initial {
        let status = drive(program, runtime, status, stdin_read_line)?;
        if status == RunStatus::Error {
            eprint!("{}", runtime.errors());
        }
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        process_line(program, runtime, &line, stdin_read_line)?;
    }
    Ok(())
}

fn to_io_error(e: ReadlineError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_leading_line_number() {
        assert!(starts_with_line_number("10 PRINT 1"));
        assert!(!starts_with_line_number("PRINT 1"));
        assert!(!starts_with_line_number(""));
    }

    #[test]
    fn drive_answers_pending_input_via_callback() {
        let mut program = Program::new();
        program.compile_str("10 INPUT A\n20 PRINT A * 2\n").unwrap();
        let mut runtime = Runtime::new();
        let status = runtime.run_program(&mut program);
        let mut answers = vec!["21".to_string()].into_iter();
        let status = drive(&mut program, &mut runtime, status, |_prompt| {
            Ok(answers.next())
        })
        .unwrap();
        assert_eq!(status, RunStatus::Finished);
    }

    #[test]
    fn drive_stops_on_eof_during_input() {
        let mut program = Program::new();
        program.compile_str("10 INPUT A\n20 PRINT A\n").unwrap();
        let mut runtime = Runtime::new();
        let status = runtime.run_program(&mut program);
        let status = drive(&mut program, &mut runtime, status, |_prompt| Ok(None)).unwrap();
        assert_eq!(status, RunStatus::Finished);
    }

    #[test]
    fn process_line_stores_numbered_lines_without_running_them() {
        let mut program = Program::new();
        let mut runtime = Runtime::new();
        process_line(&mut program, &mut runtime, "10 PRINT 1", |_| Ok(None)).unwrap();
        assert!(program.statement(10).is_some());
    }
}
