//! The command registry: built-in commands are hard-wired into the
//! compiler's statement dispatch, but host-registered (foreign) commands
//! live here in an insertion-ordered table so the compiler can resolve a
//! bareword to a table index and the VM can invoke the matching callback.

use crate::error::CompileError;
use crate::vm::{Runtime, RunStatus};

/// A host-supplied callback backing a foreign command. Reads its
/// arguments and variables off `Runtime`, optionally calls
/// `Runtime::runtime_error`, and returns the resulting status.
pub type CommandFn = dyn FnMut(&mut Runtime) -> RunStatus;

pub struct CommandEntry {
    pub name: String,
    /// -1 means "any positive number of arguments".
    pub arity: i32,
    pub help: Option<String>,
    handler: Option<Box<CommandFn>>,
}

/// Insertion-ordered table of host-registered commands. A command's
/// opcode-like tag is `LAST_BUILTIN + registration-ordinal`; in this
/// implementation that just means its index in `entries`.
#[derive(Default)]
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
}

const BUILTIN_NAMES: &[&str] = &[
    "LET", "PRINT", "IF", "THEN", "GOTO", "GOSUB", "RETURN", "INPUT", "END", "REM", "LIST",
    "CLEAR", "RUN", "LOAD", "SAVE",
];

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        arity: i32,
        help: Option<String>,
        handler: Box<CommandFn>,
    ) -> Result<(), CompileError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(CompileError::InvalidCommandName(name.to_string()));
        }
        if BUILTIN_NAMES.contains(&name) {
            return Err(CompileError::ShadowsBuiltin(name.to_string()));
        }
        if self.entries.iter().any(|e| e.name == name) {
            return Err(CompileError::DuplicateCommand(name.to_string()));
        }
        if self.entries.len() >= u8::MAX as usize {
            return Err(CompileError::TooManyCommands);
        }
        self.entries.push(CommandEntry {
            name: name.to_string(),
            arity,
            help,
            handler: Some(handler),
        });
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<u8> {
        self.entries.iter().position(|e| e.name == name).map(|i| i as u8)
    }

    pub fn entry(&self, idx: u8) -> Option<&CommandEntry> {
        self.entries.get(idx as usize)
    }

    /// Temporarily removes the handler so it can be invoked with `&mut
    /// Runtime` without a simultaneous borrow of the registry it lives
    /// in, then restores it.
    pub fn take_handler(&mut self, idx: u8) -> Option<Box<CommandFn>> {
        self.entries.get_mut(idx as usize).and_then(|e| e.handler.take())
    }

    pub fn restore_handler(&mut self, idx: u8, handler: Box<CommandFn>) {
        if let Some(e) = self.entries.get_mut(idx as usize) {
            e.handler = Some(handler);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.iter()
    }
}
