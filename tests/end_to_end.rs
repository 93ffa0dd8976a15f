//! End-to-end tests for the compiler and VM, driven entirely through the
//! public crate API the way a host embedding the language would use it.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use dbasic::{Entry, PendingAction, Program, RunStatus, Runtime};

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run_source(src: &str) -> (RunStatus, String, Program, Runtime) {
    let mut program = Program::new();
    program.compile_str(src).expect("source should compile");
    let mut runtime = Runtime::new();
    let buf = SharedBuf::default();
    runtime.set_output(Box::new(buf.clone()));
    let status = runtime.run_program(&mut program);
    let text = String::from_utf8(buf.0.borrow().clone()).unwrap();
    (status, text, program, runtime)
}

#[test]
fn arithmetic_precedence_is_left_to_right_with_mul_div_first() {
    let (status, output, _program, _runtime) = run_source("10 PRINT 1 + 2 * 3\n");
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(output, "7\n");
}

#[test]
fn parens_override_precedence() {
    let (status, output, _program, _runtime) = run_source("10 PRINT (1+2)*3\n");
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(output, "9\n");
}

#[test]
fn if_goto_loop_terminates_and_reports_final_count() {
    let (status, output, _program, _runtime) = run_source(
        "10 LET A = 0\n\
         20 LET A = A + 1\n\
         30 IF A < 3 THEN GOTO 20\n\
         40 PRINT A\n",
    );
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(output, "3\n");
}

#[test]
fn gosub_and_return_interleave_with_top_level_flow() {
    let (status, output, _program, _runtime) = run_source(
        "10 GOSUB 100\n\
         20 PRINT \"after\"\n\
         30 END\n\
         100 PRINT \"sub\"\n\
         110 RETURN\n",
    );
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(output, "sub\nafter\n");
}

#[test]
fn return_without_a_prior_gosub_ends_the_run_cleanly() {
    let (status, output, _program, _runtime) = run_source(
        "10 PRINT \"before\"\n\
         20 RETURN\n\
         30 PRINT \"after\"\n",
    );
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(output, "before\n");
}

#[test]
fn division_by_zero_fails_the_run_and_populates_the_error_buffer() {
    let (status, _output, _program, runtime) = run_source("10 PRINT 10 / 0\n");
    assert_eq!(status, RunStatus::Error);
    assert!(runtime.has_errors());
    assert!(runtime.errors().contains("division by zero"));
}

#[test]
fn adding_two_strings_is_a_type_error() {
    let (status, _output, _program, runtime) = run_source("10 PRINT \"foo\" + \"bar\"\n");
    assert_eq!(status, RunStatus::Error);
    assert!(runtime.has_errors());
    assert!(runtime.errors().contains("type error"));
}

#[test]
fn comma_separated_print_list_has_no_trailing_newline_between_items() {
    let (status, output, _program, _runtime) = run_source("10 PRINT 1, 2, 3\n");
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(output, "123\n");
}

#[test]
fn host_command_receives_args_then_yields_and_resumes() {
    let mut program = Program::new();
    program
        .register_command(
            "DOUBLE",
            1,
            Some("doubles its argument into the host context"),
            Box::new(|rt: &mut Runtime| {
                let n = match rt.arg(0) {
                    Some(dbasic::Value::Int(n)) => *n,
                    _ => return rt.runtime_error("DOUBLE expects an integer"),
                };
                rt.set_context(n * 2);
                RunStatus::Yield
            }),
        )
        .unwrap();
    program
        .compile_str("10 DOUBLE 21\n20 PRINT \"done\"\n")
        .unwrap();

    let mut runtime = Runtime::new();
    let buf = SharedBuf::default();
    runtime.set_output(Box::new(buf.clone()));

    let status = runtime.run_program(&mut program);
    assert_eq!(status, RunStatus::Yield);
    assert_eq!(runtime.context::<i64>(), Some(&42));

    let status = runtime.run(&mut program, Entry::Resume);
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "done\n");
}

#[test]
fn input_pauses_for_a_value_and_resumes_with_it() {
    let mut program = Program::new();
    program
        .compile_str("10 INPUT N\n20 PRINT N + 1\n")
        .unwrap();
    let mut runtime = Runtime::new();
    let buf = SharedBuf::default();
    runtime.set_output(Box::new(buf.clone()));

    let status = runtime.run_program(&mut program);
    assert_eq!(status, RunStatus::Yield);
    match runtime.pending() {
        Some(PendingAction::Input { vars }) => assert_eq!(vars.len(), 1),
        other => panic!("expected a pending Input request, got {:?}", other),
    }

    runtime.provide_input(&mut program, "41").unwrap();
    let status = runtime.run(&mut program, Entry::Resume);
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "42\n");
}

#[test]
fn replacing_a_stored_line_changes_behavior_on_next_run() {
    let mut program = Program::new();
    program.compile_str("10 PRINT 1\n20 END\n").unwrap();
    program.compile_str("10 PRINT 2\n").unwrap();

    let mut runtime = Runtime::new();
    let buf = SharedBuf::default();
    runtime.set_output(Box::new(buf.clone()));
    assert_eq!(runtime.run_program(&mut program), RunStatus::Finished);
    assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "2\n");
}

#[test]
fn unknown_command_is_reported_without_aborting_the_whole_compile() {
    let mut program = Program::new();
    let result = program.compile_str("10 PRINT 1\n20 FROBNICATE\n30 PRINT 2\n");
    assert!(result.is_err());
    assert!(program.errors().contains("Error at line 20"));
    // The well-formed lines still made it into the store.
    assert!(program.statement(10).is_some());
    assert!(program.statement(30).is_some());
}
