//! The closed opcode set and the per-statement constant pool / code
//! buffer pair that the compiler emits into and the VM dispatches over.

use crate::error::CompileError;
use crate::value::Value;

pub const MAX_LINE_MEMORY: usize = 64;
pub const MAX_BYTECODE: usize = 64;
pub const MAX_LINE_LENGTH: usize = 256;
pub const MAX_LINES: u32 = 10_000;

/// Bytecode opcodes (1 byte each). A closed sum of 28 variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    No = 0,
    Push = 1,
    Print = 2,
    Println = 3,
    Let = 4,
    Jmp = 5,
    Jnz = 6,
    Call = 7,
    Return = 8,
    Input = 9,
    Clear = 10,
    List = 11,
    Run = 12,
    End = 13,
    Load = 14,
    Save = 15,
    Add = 16,
    Sub = 17,
    Mul = 18,
    Div = 19,
    Lt = 20,
    Gt = 21,
    Eq = 22,
    Neq = 23,
    Leq = 24,
    Geq = 25,
    FfiArg = 26,
    FfiCall = 27,
}

impl Op {
    pub fn from_byte(b: u8) -> Option<Op> {
        use Op::*;
        Some(match b {
            0 => No,
            1 => Push,
            2 => Print,
            3 => Println,
            4 => Let,
            5 => Jmp,
            6 => Jnz,
            7 => Call,
            8 => Return,
            9 => Input,
            10 => Clear,
            11 => List,
            12 => Run,
            13 => End,
            14 => Load,
            15 => Save,
            16 => Add,
            17 => Sub,
            18 => Mul,
            19 => Div,
            20 => Lt,
            21 => Gt,
            22 => Eq,
            23 => Neq,
            24 => Leq,
            25 => Geq,
            26 => FfiArg,
            27 => FfiCall,
            _ => return None,
        })
    }
}

/// One compiled line (or, for immediate commands, a transient one-off):
/// the original source text, a frozen constant pool, and a bytecode
/// buffer. `line == 0` marks an immediate statement.
#[derive(Debug, Clone)]
pub struct Statement {
    pub line: u32,
    pub source: String,
    pub pool: Vec<Value>,
    pub code: Vec<u8>,
}

impl Statement {
    pub fn new(line: u32, source: impl Into<String>) -> Self {
        Statement {
            line,
            source: source.into(),
            pool: Vec::new(),
            code: Vec::new(),
        }
    }

    /// Append `value` to the constant pool, returning its index. Does not
    /// deduplicate: each call site wants its own slot, notably the IF
    /// jump-target placeholder which is mutated after emission.
    pub fn push_const(&mut self, value: Value) -> Result<u8, CompileError> {
        if self.pool.len() >= MAX_LINE_MEMORY {
            return Err(CompileError::ConstantPoolFull(MAX_LINE_MEMORY));
        }
        let idx = self.pool.len() as u8;
        self.pool.push(value);
        Ok(idx)
    }

    fn check_room(&self, extra: usize) -> Result<(), CompileError> {
        if self.code.len() + extra > MAX_BYTECODE {
            return Err(CompileError::BytecodeFull(MAX_BYTECODE));
        }
        Ok(())
    }

    pub fn emit(&mut self, op: Op) -> Result<(), CompileError> {
        self.check_room(1)?;
        self.code.push(op as u8);
        Ok(())
    }

    pub fn emit_byte(&mut self, op: Op, operand: u8) -> Result<(), CompileError> {
        self.check_room(2)?;
        self.code.push(op as u8);
        self.code.push(operand);
        Ok(())
    }

    pub fn emit_bytes(&mut self, op: Op, operands: &[u8]) -> Result<(), CompileError> {
        self.check_room(1 + operands.len())?;
        self.code.push(op as u8);
        self.code.extend_from_slice(operands);
        Ok(())
    }

    /// Current length of the code buffer, used as a jump target.
    pub fn pos(&self) -> usize {
        self.code.len()
    }

    /// Patch a previously-reserved constant pool slot, used to fix up an
    /// IF's jump target once the then-branch has been emitted.
    pub fn patch_const(&mut self, idx: u8, value: Value) {
        self.pool[idx as usize] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_and_reads_back() {
        let mut stmt = Statement::new(10, "10 PRINT 1");
        let idx = stmt.push_const(Value::Int(1)).unwrap();
        stmt.emit_byte(Op::Push, idx).unwrap();
        stmt.emit(Op::Println).unwrap();
        assert_eq!(stmt.code, vec![Op::Push as u8, 0, Op::Println as u8]);
    }

    #[test]
    fn pool_overflow_is_an_error() {
        let mut stmt = Statement::new(1, "1 REM");
        for _ in 0..MAX_LINE_MEMORY {
            stmt.push_const(Value::Int(0)).unwrap();
        }
        assert_eq!(
            stmt.push_const(Value::Int(0)),
            Err(CompileError::ConstantPoolFull(MAX_LINE_MEMORY))
        );
    }

    #[test]
    fn bytecode_overflow_is_an_error() {
        let mut stmt = Statement::new(1, "1 REM");
        for _ in 0..MAX_BYTECODE {
            stmt.emit(Op::No).unwrap();
        }
        assert_eq!(
            stmt.emit(Op::No),
            Err(CompileError::BytecodeFull(MAX_BYTECODE))
        );
    }

    #[test]
    fn from_byte_roundtrips_all_opcodes() {
        for b in 0..28u8 {
            assert!(Op::from_byte(b).is_some());
        }
        assert!(Op::from_byte(28).is_none());
    }
}
