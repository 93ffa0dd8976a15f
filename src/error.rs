//! Diagnostics: the compile/runtime error taxonomy of spec §7, and the
//! error buffer that accumulates them.
//!
//! Unlike the original C implementation, the buffer is not process-global
//! — one lives on `Program` (compile diagnostics) and one on `Runtime`
//! (runtime diagnostics), per the re-implementation note in the design
//! notes.

use thiserror::Error;

/// Lex/parse and resource-limit errors, all detected at compile time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("line number out of range (must be 1..{0})")]
    LineNumberOutOfRange(u32),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("'{0}' is not a single-letter variable")]
    NotAVariable(String),
    #[error("duplicate variable '{0}' in INPUT list")]
    DuplicateInputVariable(char),
    #[error("RUN, INPUT, and LOAD must be the last statement on a line")]
    NonTerminalStatement,
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("empty expression")]
    EmptyExpression,
    #[error("expected an operand after operator")]
    ExpectedOperand,
    #[error("expected a relational operator in IF")]
    ExpectedRelop,
    #[error("expected THEN after IF condition")]
    ExpectedThen,
    #[error("expected '=' after variable in LET")]
    ExpectedAssign,
    #[error("{name} expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: i32,
        got: usize,
    },
    #[error("constant pool full (max {0} entries per line)")]
    ConstantPoolFull(usize),
    #[error("bytecode buffer full (max {0} bytes per line)")]
    BytecodeFull(usize),
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("operator stack exhausted (max depth {0})")]
    OperatorStackExhausted(usize),
    #[error("lex error: {0}")]
    Lex(String),
    #[error("command name '{0}' is already registered")]
    DuplicateCommand(String),
    #[error("command name '{0}' shadows a built-in")]
    ShadowsBuiltin(String),
    #[error("command name must be uppercase ASCII letters")]
    InvalidCommandName(String),
    #[error("too many registered commands")]
    TooManyCommands,
}

/// Type errors, reference errors, and runtime-limit errors, all detected
/// during dispatch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("no such line {0}")]
    BadLine(i64),
    #[error("operand stack overflow")]
    OperandStackOverflow,
    #[error("operand stack underflow")]
    OperandStackUnderflow,
    #[error("call stack overflow (max depth {0})")]
    CallStackOverflow(usize),
    #[error("exceeded maximum of {0} opcode steps")]
    IterationLimitExceeded(u64),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("{0}")]
    Host(String),
    #[error("malformed bytecode: {0}")]
    Malformed(&'static str),
}

const ERROR_BUFFER_CAP: usize = 4096;
const OVERFLOW_TRAILER: &str = "...too many errors to display\n";

/// Accumulates diagnostics keyed by line number, truncating once it would
/// overflow its configured capacity.
#[derive(Debug, Default, Clone)]
pub struct ErrorBuffer {
    text: String,
    truncated: bool,
}

impl ErrorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.truncated = false;
    }

    /// Append a diagnostic with the `Error at line <n>: ` / `Error: `
    /// prefix spec §4.8 requires.
    pub fn push(&mut self, line: Option<u32>, message: impl std::fmt::Display) {
        if self.truncated {
            return;
        }
        let prefix = match line {
            Some(n) => format!("Error at line {}: ", n),
            None => "Error: ".to_string(),
        };
        let entry = format!("{}{}\n", prefix, message);
        if self.text.len() + entry.len() > ERROR_BUFFER_CAP {
            self.text.push_str(OVERFLOW_TRAILER);
            self.truncated = true;
            return;
        }
        log::warn!("{}", entry.trim_end());
        self.text.push_str(&entry);
    }
}
