//! The program object: the sparse line-indexed statement store, the
//! command registry, and the compile-time error buffer.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::bytecode::{Statement, MAX_LINES};
use crate::command::{CommandFn, CommandRegistry};
use crate::compiler::Compiler;
use crate::error::{CompileError, ErrorBuffer};
use crate::vm::RunStatus;
use crate::vm::Runtime;

/// The compiled program: a mapping from line number to statement plus the
/// command registry that statement compiled against. Treated as immutable
/// after compilation for the purposes of sharing across runtimes (spec §5);
/// nothing here enforces that at the type level, matching the spec's "the
/// host's own discipline" framing.
pub struct Program {
    statements: BTreeMap<u32, Statement>,
    commands: CommandRegistry,
    errors: ErrorBuffer,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Program {
            statements: BTreeMap::new(),
            commands: CommandRegistry::new(),
            errors: ErrorBuffer::new(),
        }
    }

    /// Register a host command. Must be called before compiling any
    /// source that references it.
    pub fn register_command(
        &mut self,
        name: &str,
        arity: i32,
        help: Option<&str>,
        handler: Box<CommandFn>,
    ) -> Result<(), CompileError> {
        self.commands
            .register(name, arity, help.map(str::to_string), handler)
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub(crate) fn commands_mut(&mut self) -> &mut CommandRegistry {
        &mut self.commands
    }

    /// Compile `text` line by line, appending to (or overwriting by line
    /// number) the existing store. Errors accumulate in the error buffer;
    /// returns `Err(())` if any line failed, but still compiles every
    /// other line.
    pub fn compile_str(&mut self, text: &str) -> Result<(), ()> {
        self.errors.clear();
        let mut ok = true;
        for raw_line in text.lines() {
            if raw_line.len() > crate::bytecode::MAX_LINE_LENGTH {
                self.errors.push(
                    None,
                    CompileError::LineTooLong(crate::bytecode::MAX_LINE_LENGTH),
                );
                ok = false;
                continue;
            }
            match Compiler::compile_line(raw_line, &self.commands) {
                Ok(Some(stmt)) => {
                    self.insert(stmt);
                }
                Ok(None) => {} // blank or comment line
                Err(e) => {
                    self.errors.push(e.line, e.error);
                    ok = false;
                }
            }
        }
        if ok {
            Ok(())
        } else {
            Err(())
        }
    }

    pub fn compile_file(&mut self, path: impl AsRef<Path>) -> io::Result<Result<(), ()>> {
        let text = fs::read_to_string(path)?;
        Ok(self.compile_str(&text))
    }

    /// Compile a single line as an immediate (unnumbered) command,
    /// returning the transient statement without inserting it into the
    /// store.
    pub fn compile_immediate(&mut self, text: &str) -> Result<Option<Statement>, String> {
        self.errors.clear();
        if text.len() > crate::bytecode::MAX_LINE_LENGTH {
            let msg = CompileError::LineTooLong(crate::bytecode::MAX_LINE_LENGTH).to_string();
            self.errors.push(None, &msg);
            return Err(msg);
        }
        match Compiler::compile_line(text, &self.commands) {
            Ok(stmt) => Ok(stmt),
            Err(e) => {
                self.errors.push(e.line, &e.error);
                Err(e.error.to_string())
            }
        }
    }

    fn insert(&mut self, stmt: Statement) {
        self.statements.insert(stmt.line, stmt);
    }

    pub fn clear(&mut self) {
        self.statements.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statement(&self, line: u32) -> Option<&Statement> {
        self.statements.get(&line)
    }

    /// The first stored line with number >= `from`, if any.
    pub fn find_next(&self, from: u32) -> Option<u32> {
        self.statements.range(from..).next().map(|(&l, _)| l)
    }

    pub fn first_line(&self) -> Option<u32> {
        self.statements.keys().next().copied()
    }

    pub fn lines(&self) -> impl Iterator<Item = &Statement> {
        self.statements.values()
    }

    /// Render the stored program exactly as submitted, one line per
    /// statement, in ascending line order — the shared implementation of
    /// `LIST` and `SAVE`.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for stmt in self.statements.values() {
            out.push_str(&stmt.source);
            out.push('\n');
        }
        out
    }

    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::write(path, self.listing())
    }

    pub fn errors(&self) -> &str {
        self.errors.as_str()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Invoke the foreign command at registry index `idx`. Temporarily
    /// removes the handler from the registry (see
    /// `CommandRegistry::take_handler`) so it can run with an unaliased
    /// `&mut Runtime`.
    pub(crate) fn call_command(&mut self, idx: u8, rt: &mut Runtime) -> RunStatus {
        match self.commands.take_handler(idx) {
            Some(mut handler) => {
                let status = handler(rt);
                self.commands.restore_handler(idx, handler);
                status
            }
            None => {
                rt.runtime_error(format!("no such foreign command #{}", idx));
                RunStatus::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_then_list_roundtrips_source_text() {
        let mut program = Program::new();
        program
            .compile_str("10 PRINT 1 + 2 * 3\n20 END\n")
            .unwrap();
        assert_eq!(program.listing(), "10 PRINT 1 + 2 * 3\n20 END\n");
    }

    #[test]
    fn replacing_a_line_overwrites_it() {
        let mut program = Program::new();
        program.compile_str("10 PRINT 1\n").unwrap();
        program.compile_str("10 PRINT 2\n").unwrap();
        assert_eq!(program.listing(), "10 PRINT 2\n");
    }

    #[test]
    fn clear_empties_the_store() {
        let mut program = Program::new();
        program.compile_str("10 PRINT 1\n").unwrap();
        program.clear();
        assert!(program.is_empty());
        assert_eq!(program.listing(), "");
    }

    #[test]
    fn find_next_skips_gaps() {
        let mut program = Program::new();
        program.compile_str("10 PRINT 1\n30 PRINT 2\n").unwrap();
        assert_eq!(program.find_next(11), Some(30));
        assert_eq!(program.find_next(31), None);
    }

    #[test]
    fn compile_errors_accumulate_and_fail_the_call() {
        let mut program = Program::new();
        let result = program.compile_str("10 GARBAGE\n");
        assert!(result.is_err());
        assert!(program.errors().contains("Error at line 10"));
    }
}
