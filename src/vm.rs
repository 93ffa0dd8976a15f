//! The stack-based bytecode VM: statement dispatch, the operand/call
//! stacks, the 26 variable cells, and the cooperative yield/resume
//! protocol that lets a foreign command or INPUT/LOAD suspend execution
//! mid-program and pick back up later with no lost state.

use std::any::Any;
use std::io::{self, Write};

use crate::bytecode::{Op, Statement};
use crate::compiler::Compiler;
use crate::error::{ErrorBuffer, RuntimeError};
use crate::program::Program;
use crate::value::{var_index, var_letter, Value};

pub const MAX_VARS: usize = 26;
pub const MAX_STACK: usize = 128;
pub const MAX_CALL_STACK: usize = 16;
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// The outcome of a `Runtime::run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Execution ran to completion (END, CLEAR, falling off the end of the
    /// program, or an immediate command with nothing left to do).
    Finished,
    /// Execution suspended itself — on INPUT, on LOAD, or because a foreign
    /// command returned `RunStatus::Yield`. Inspect `Runtime::pending` and
    /// call `Runtime::run` again with `Entry::Resume` to continue.
    Yield,
    /// A runtime error was raised. See `Runtime::last_error`.
    Error,
}

/// What a suspended `Runtime` is waiting on.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    /// `INPUT` is waiting for a comma-separated line of values for these
    /// variable cells.
    Input { vars: Vec<u8> },
    /// `LOAD` is waiting for the host to close the current input source and
    /// reopen this file.
    Load { path: String },
    /// A foreign command yielded with no further detail to report.
    Host,
}

/// Where a `Runtime::run` call begins.
pub enum Entry<'a> {
    /// Run a one-off statement not stored in the program (an unnumbered
    /// REPL line, or a synthesized `RUN`/`LIST`/etc).
    Immediate(&'a Statement),
    /// Pick back up after a `RunStatus::Yield`.
    Resume,
}

/// Control-flow signal produced by executing one statement's bytecode.
enum Step {
    /// Ran off the end of the statement's code normally.
    Fallthrough,
    /// END or CLEAR: stop the whole run, not just this statement.
    Halt,
    /// GOTO/GOSUB/RUN: transfer control to another stored line, which must
    /// exist exactly.
    Jump(i64),
    /// RETURN: transfer to the first stored line at or after this address.
    /// The compiler bakes a GOSUB's return address in as `line + 1`, which
    /// is rarely itself a stored line number, so unlike `Jump` this does
    /// not require an exact match.
    ReturnTo(i64),
    /// Suspend.
    Yield,
}

/// The executing half of a BASIC program: variable cells, operand and call
/// stacks, and everything needed to suspend and resume a run. A `Runtime`
/// has no opinion about which `Program` it executes — the same runtime can
/// be reused across multiple `Program`s, and the same `Program` can back
/// multiple runtimes (spec's sharing model).
pub struct Runtime {
    vars: [Value; MAX_VARS],
    stack: Vec<Value>,
    call_stack: Vec<u32>,
    ffi_args: Vec<Value>,
    cur_line: Option<u32>,
    steps: u64,
    max_steps: u64,
    pending: Option<PendingAction>,
    resume_stmt: Option<Statement>,
    resume_pc: usize,
    resume_cur_line: Option<u32>,
    host_context: Option<Box<dyn Any>>,
    last_error: Option<RuntimeError>,
    errors: ErrorBuffer,
    output: Box<dyn Write>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Runtime {
            vars: std::array::from_fn(|_| Value::Int(0)),
            stack: Vec::new(),
            call_stack: Vec::new(),
            ffi_args: Vec::new(),
            cur_line: None,
            steps: 0,
            max_steps: DEFAULT_MAX_STEPS,
            pending: None,
            resume_stmt: None,
            resume_pc: 0,
            resume_cur_line: None,
            host_context: None,
            last_error: None,
            errors: ErrorBuffer::new(),
            output: Box::new(io::stdout()),
        }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Redirect `PRINT`/`LIST` output. Defaults to stdout.
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    // ---- Host embedding surface ----

    /// Stash arbitrary host state on the runtime, replacing whatever was
    /// there before (regardless of its type).
    pub fn set_context<T: 'static>(&mut self, value: T) {
        self.host_context = Some(Box::new(value));
    }

    /// Borrow the host context back as `T`, or `None` if nothing was set or
    /// it was set as a different type.
    pub fn context<T: 'static>(&self) -> Option<&T> {
        self.host_context.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    pub fn argc(&self) -> usize {
        self.ffi_args.len()
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.ffi_args.get(index)
    }

    pub fn get_var(&self, letter: char) -> Option<Value> {
        var_index(letter).map(|idx| self.vars[idx as usize].clone())
    }

    pub fn set_var(&mut self, letter: char, value: Value) -> Result<(), RuntimeError> {
        let idx = var_index(letter).ok_or(RuntimeError::Malformed("not a variable letter"))?;
        self.vars[idx as usize] = value;
        Ok(())
    }

    /// Record a host-raised error and return the status a `CommandFn`
    /// should hand back to the dispatcher. See `CommandFn`.
    pub fn runtime_error(&mut self, message: impl Into<String>) -> RunStatus {
        self.fail(RuntimeError::Host(message.into()))
    }

    pub fn last_error(&self) -> Option<&RuntimeError> {
        self.last_error.as_ref()
    }

    pub fn errors(&self) -> &str {
        self.errors.as_str()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    pub fn take_pending(&mut self) -> Option<PendingAction> {
        self.pending.take()
    }

    /// Convenience entry point equivalent to typing `RUN` at the prompt.
    pub fn run_program(&mut self, program: &mut Program) -> RunStatus {
        let mut stmt = Statement::new(0, String::new());
        stmt.emit(Op::Run).expect("a single opcode always fits");
        self.run(program, Entry::Immediate(&stmt))
    }

    /// Answer a pending `INPUT` request. `text` is split on commas and each
    /// part is compiled and executed as a one-off `LET <var> = <part>` —
    /// the same expression grammar as everywhere else, so `INPUT` accepts
    /// `3+4` or `A*2` and not just literals.
    pub fn provide_input(&mut self, program: &mut Program, text: &str) -> Result<(), String> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| "no pending request".to_string())?;
        let vars = match pending {
            PendingAction::Input { vars } => vars,
            other => {
                self.pending = Some(other);
                return Err("pending request is not an INPUT".to_string());
            }
        };
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() != vars.len() {
            let expected = vars.len();
            let got = parts.len();
            self.pending = Some(PendingAction::Input { vars });
            return Err(format!("expected {} value(s), got {}", expected, got));
        }
        for (part, &idx) in parts.iter().zip(vars.iter()) {
            let synthetic = format!("LET {} = {}", var_letter(idx), part.trim());
            if let Err(msg) = self.apply_input_value(program, &synthetic) {
                self.pending = Some(PendingAction::Input { vars });
                return Err(msg);
            }
        }
        Ok(())
    }

    fn apply_input_value(&mut self, program: &mut Program, synthetic: &str) -> Result<(), String> {
        let stmt = Compiler::compile_line(synthetic, program.commands())
            .map_err(|e| e.error.to_string())?
            .ok_or_else(|| "empty input value".to_string())?;
        self.exec_statement(program, &stmt, 0)
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Tell the driver which file `LOAD` asked for, consuming the pending
    /// request. The driver is responsible for actually reopening input;
    /// `Runtime` has no notion of files or stdin.
    pub fn take_load_path(&mut self) -> Option<String> {
        match self.pending.take() {
            Some(PendingAction::Load { path }) => Some(path),
            other => {
                self.pending = other;
                None
            }
        }
    }

    fn fail(&mut self, error: RuntimeError) -> RunStatus {
        self.errors.push(self.cur_line, &error);
        self.last_error = Some(error);
        RunStatus::Error
    }

    /// Run from `entry` until the program finishes, yields, or errors.
    pub fn run(&mut self, program: &mut Program, entry: Entry) -> RunStatus {
        self.last_error = None;
        let (mut active, mut pc) = match entry {
            Entry::Immediate(stmt) => {
                self.cur_line = None;
                (stmt.clone(), 0)
            }
            Entry::Resume => match self.resume_stmt.take() {
                Some(stmt) => {
                    self.cur_line = self.resume_cur_line;
                    (stmt, self.resume_pc)
                }
                None => return RunStatus::Finished,
            },
        };

        loop {
            let step = match self.exec_statement(program, &active, pc) {
                Ok(step) => step,
                Err(e) => return self.fail(e),
            };
            match step {
                Step::Halt => return RunStatus::Finished,
                Step::Yield => {
                    self.resume_cur_line = self.cur_line;
                    self.resume_stmt = Some(active);
                    return RunStatus::Yield;
                }
                Step::Fallthrough => match self.cur_line {
                    None => return RunStatus::Finished,
                    Some(line) => match program.find_next(line + 1) {
                        Some(next) => {
                            active = program.statement(next).expect("find_next hit").clone();
                            self.cur_line = Some(next);
                            pc = 0;
                        }
                        None => return RunStatus::Finished,
                    },
                },
                Step::Jump(target) => {
                    if target <= 0 {
                        return self.fail(RuntimeError::BadLine(target));
                    }
                    match program.statement(target as u32) {
                        Some(stmt) => {
                            active = stmt.clone();
                            self.cur_line = Some(target as u32);
                            pc = 0;
                        }
                        None => return self.fail(RuntimeError::BadLine(target)),
                    }
                }
                Step::ReturnTo(target) => {
                    if target <= 0 {
                        return self.fail(RuntimeError::BadLine(target));
                    }
                    match program.find_next(target as u32) {
                        Some(next) => {
                            active = program.statement(next).expect("find_next hit").clone();
                            self.cur_line = Some(next);
                            pc = 0;
                        }
                        None => return self.fail(RuntimeError::BadLine(target)),
                    }
                }
            }
        }
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= MAX_STACK {
            return Err(RuntimeError::OperandStackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::OperandStackUnderflow)
    }

    fn deref(&self, value: Value) -> Value {
        match value {
            Value::VarRef(idx) => self.vars[idx as usize].clone(),
            other => other,
        }
    }

    fn pop_deref(&mut self) -> Result<Value, RuntimeError> {
        let v = self.pop()?;
        Ok(self.deref(v))
    }

    fn expect_int(&self, value: Value) -> Result<i64, RuntimeError> {
        match value {
            Value::Int(n) => Ok(n),
            other => Err(RuntimeError::TypeError {
                expected: "integer",
                got: other.type_name(),
            }),
        }
    }

    fn expect_str(&self, value: Value) -> Result<String, RuntimeError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::TypeError {
                expected: "string",
                got: other.type_name(),
            }),
        }
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        let v = self.pop_deref()?;
        self.expect_int(v)
    }

    fn compare(&mut self, int_op: fn(i64, i64) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Int(int_op(a, b) as i64))
    }

    /// Execute `stmt`'s bytecode starting at `pc` until it halts, falls
    /// through, jumps, or yields. Kept as a standalone pass over an owned
    /// `&Statement` (never `Program`'s own storage) so there is no
    /// simultaneous mutable/immutable borrow of `program` across a step
    /// that also needs to call back into it (LIST, RUN, SAVE, FFI calls).
    fn exec_statement(
        &mut self,
        program: &mut Program,
        stmt: &Statement,
        mut pc: usize,
    ) -> Result<Step, RuntimeError> {
        loop {
            if pc >= stmt.code.len() {
                return Ok(Step::Fallthrough);
            }
            self.steps += 1;
            if self.steps > self.max_steps {
                return Err(RuntimeError::IterationLimitExceeded(self.max_steps));
            }

            let op = Op::from_byte(stmt.code[pc]).ok_or(RuntimeError::Malformed("bad opcode"))?;
            pc += 1;
            log::trace!("line {:?} pc {}: {:?}", self.cur_line, pc - 1, op);

            match op {
                Op::No => {}
                Op::Push => {
                    let idx = stmt.code[pc];
                    pc += 1;
                    self.push(stmt.pool[idx as usize].clone())?;
                }
                Op::Print => {
                    let v = self.pop_deref()?;
                    write!(self.output, "{}", v.display())
                        .map_err(|e| RuntimeError::Io(e.to_string()))?;
                }
                Op::Println => {
                    let v = self.pop_deref()?;
                    writeln!(self.output, "{}", v.display())
                        .map_err(|e| RuntimeError::Io(e.to_string()))?;
                }
                Op::Let => {
                    let idx = stmt.code[pc];
                    pc += 1;
                    let v = self.pop_deref()?;
                    self.vars[idx as usize] = v;
                }
                Op::Jmp => {
                    let line = self.pop_int()?;
                    return Ok(Step::Jump(line));
                }
                Op::Jnz => {
                    let target = self.pop_int()?;
                    let cond = self.pop_int()?;
                    if cond == 0 {
                        pc = target as usize;
                    }
                }
                Op::Call => {
                    if self.call_stack.len() >= MAX_CALL_STACK {
                        return Err(RuntimeError::CallStackOverflow(MAX_CALL_STACK));
                    }
                    let return_line = self.pop_int()?;
                    self.call_stack.push(return_line as u32);
                }
                Op::Return => {
                    return Ok(match self.call_stack.pop() {
                        Some(line) => Step::ReturnTo(line as i64),
                        None => Step::Halt,
                    });
                }
                Op::Input => {
                    let n = stmt.code[pc];
                    pc += 1;
                    let vars = stmt.code[pc..pc + n as usize].to_vec();
                    pc += n as usize;
                    self.pending = Some(PendingAction::Input { vars });
                    self.resume_pc = pc;
                    return Ok(Step::Yield);
                }
                Op::Clear => {
                    self.vars = std::array::from_fn(|_| Value::Int(0));
                    return Ok(Step::Halt);
                }
                Op::List => {
                    write!(self.output, "{}", program.listing())
                        .map_err(|e| RuntimeError::Io(e.to_string()))?;
                }
                Op::Run => {
                    self.vars = std::array::from_fn(|_| Value::Int(0));
                    self.call_stack.clear();
                    self.ffi_args.clear();
                    return Ok(match program.first_line() {
                        Some(first) => Step::Jump(first as i64),
                        None => Step::Halt,
                    });
                }
                Op::End => return Ok(Step::Halt),
                Op::Load => {
                    let v = self.pop_deref()?;
                    let path = self.expect_str(v)?;
                    self.pending = Some(PendingAction::Load { path });
                    self.resume_pc = pc;
                    return Ok(Step::Yield);
                }
                Op::Save => {
                    let v = self.pop_deref()?;
                    let path = self.expect_str(v)?;
                    program
                        .save(&path)
                        .map_err(|e| RuntimeError::Io(e.to_string()))?;
                }
                Op::Add => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Int(a.wrapping_add(b)))?;
                }
                Op::Sub => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Int(a.wrapping_sub(b)))?;
                }
                Op::Mul => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Int(a.wrapping_mul(b)))?;
                }
                Op::Div => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    if b == 0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    self.push(Value::Int(a.wrapping_div(b)))?;
                }
                Op::Lt => self.compare(|a, b| a < b)?,
                Op::Gt => self.compare(|a, b| a > b)?,
                Op::Eq => self.compare(|a, b| a == b)?,
                Op::Neq => self.compare(|a, b| a != b)?,
                Op::Leq => self.compare(|a, b| a <= b)?,
                Op::Geq => self.compare(|a, b| a >= b)?,
                Op::FfiArg => {
                    let v = self.pop_deref()?;
                    self.ffi_args.push(v);
                }
                Op::FfiCall => {
                    let v = self.pop_deref()?;
                    let idx = self.expect_int(v)? as u8;
                    let status = program.call_command(idx, self);
                    self.ffi_args.clear();
                    match status {
                        RunStatus::Finished => {}
                        RunStatus::Yield => {
                            if self.pending.is_none() {
                                self.pending = Some(PendingAction::Host);
                            }
                            self.resume_pc = pc;
                            return Ok(Step::Yield);
                        }
                        RunStatus::Error => {
                            return Err(self
                                .last_error
                                .clone()
                                .unwrap_or(RuntimeError::Host("foreign command failed".into())));
                        }
                    }
                }
            }
        }
    }
}
