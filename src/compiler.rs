//! The single-pass recursive-descent compiler: lexical line splitting,
//! Shunting-Yard expression compilation, and per-statement bytecode
//! emission, all in one pass with no intermediate AST.

use crate::bytecode::{Op, Statement, MAX_LINES};
use crate::command::CommandRegistry;
use crate::error::CompileError;
use crate::lexer::Lexer;
use crate::token::{Token, TokenWithSpan};
use crate::value::{var_index, Value};

const MAX_OPERATOR_STACK: usize = 128;

/// A compile error together with the line it occurred on (`None` for an
/// immediate command, matching spec §4.8's "no line active" case).
#[derive(Debug)]
pub struct LineError {
    pub line: Option<u32>,
    pub error: CompileError,
}

type CResult<T> = Result<T, CompileError>;

pub struct Compiler<'a> {
    tokens: Vec<TokenWithSpan>,
    pos: usize,
    line: u32,
    commands: &'a CommandRegistry,
}

impl<'a> Compiler<'a> {
    /// Compile one source line. Returns `Ok(None)` for a blank line or a
    /// `#`-comment line (ignored entirely, per spec §4.1), and
    /// `Ok(Some(stmt))` otherwise. `stmt.line == 0` marks an immediate
    /// command.
    pub fn compile_line(
        raw_line: &str,
        commands: &'a CommandRegistry,
    ) -> Result<Option<Statement>, LineError> {
        let (line, rest) = split_line_number(raw_line).map_err(|e| LineError {
            line: None,
            error: e,
        })?;
        let trimmed = rest.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let active_line = if line == 0 { None } else { Some(line) };
        let mut lexer = Lexer::new(trimmed);
        let tokens = lexer.tokenize().map_err(|msg| LineError {
            line: active_line,
            error: CompileError::Lex(msg),
        })?;

        let mut compiler = Compiler {
            tokens,
            pos: 0,
            line,
            commands,
        };
        let mut stmt = Statement::new(line, raw_line.to_string());
        compiler
            .compile_statement_chain(&mut stmt)
            .map_err(|error| LineError {
                line: active_line,
                error,
            })?;
        Ok(Some(stmt))
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_then(&mut self) -> CResult<()> {
        match self.advance() {
            Token::Ident(s) if s == "THEN" => Ok(()),
            _ => Err(CompileError::ExpectedThen),
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    /// `stmt := command (':' command)*`, with RUN/INPUT/LOAD only legal
    /// as the last command in the chain.
    fn compile_statement_chain(&mut self, stmt: &mut Statement) -> CResult<()> {
        loop {
            let terminal = self.compile_one_statement(stmt)?;
            match self.peek() {
                Token::Colon => {
                    if terminal {
                        return Err(CompileError::NonTerminalStatement);
                    }
                    self.advance();
                }
                Token::Eof => return Ok(()),
                _ => return Err(CompileError::ExpectedOperand),
            }
        }
    }

    /// Compiles one `:`-delimited command. Returns `true` if this command
    /// must be the last one on the line (RUN, INPUT, LOAD — or an IF whose
    /// THEN-branch is one of those).
    fn compile_one_statement(&mut self, stmt: &mut Statement) -> CResult<bool> {
        let name = match self.advance() {
            Token::Ident(s) => s,
            _ => return Err(CompileError::ExpectedOperand),
        };

        match name.as_str() {
            "LET" => {
                self.compile_let(stmt)?;
                Ok(false)
            }
            "PRINT" => {
                self.compile_print(stmt)?;
                Ok(false)
            }
            "IF" => self.compile_if(stmt),
            "GOTO" => {
                self.compile_expr(stmt)?;
                stmt.emit(Op::Jmp)?;
                Ok(false)
            }
            "GOSUB" => {
                self.compile_gosub(stmt)?;
                Ok(false)
            }
            "RETURN" => {
                stmt.emit(Op::Return)?;
                Ok(false)
            }
            "INPUT" => {
                self.compile_input(stmt)?;
                Ok(true)
            }
            "END" => {
                stmt.emit(Op::End)?;
                Ok(false)
            }
            "REM" => {
                // Rest of line ignored.
                while !self.at_eof() {
                    self.advance();
                }
                stmt.emit(Op::No)?;
                Ok(false)
            }
            "LIST" => {
                stmt.emit(Op::List)?;
                Ok(false)
            }
            "CLEAR" => {
                stmt.emit(Op::Clear)?;
                Ok(false)
            }
            "RUN" => {
                stmt.emit(Op::Run)?;
                Ok(true)
            }
            "LOAD" => {
                self.compile_expr(stmt)?;
                stmt.emit(Op::Load)?;
                Ok(true)
            }
            "SAVE" => {
                self.compile_expr(stmt)?;
                stmt.emit(Op::Save)?;
                Ok(false)
            }
            other => {
                if let Some(idx) = self.commands.find(other) {
                    self.compile_foreign_call(stmt, other, idx)?;
                    Ok(false)
                } else {
                    Err(CompileError::UnknownCommand(other.to_string()))
                }
            }
        }
    }

    fn compile_let(&mut self, stmt: &mut Statement) -> CResult<()> {
        let var = self.expect_variable()?;
        match self.advance() {
            Token::Eq => {}
            _ => return Err(CompileError::ExpectedAssign),
        }
        self.compile_expr(stmt)?;
        stmt.emit_byte(Op::Let, var)?;
        Ok(())
    }

    fn compile_print(&mut self, stmt: &mut Statement) -> CResult<()> {
        loop {
            self.compile_expr(stmt)?;
            match self.peek() {
                Token::Comma => {
                    stmt.emit(Op::Print)?;
                    self.advance();
                }
                _ => {
                    stmt.emit(Op::Println)?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// `IF e1 relop e2 THEN stmt`. Returns the nested statement's
    /// terminal-ness so a chain like `IF A=1 THEN RUN : PRINT 2` is still
    /// rejected.
    fn compile_if(&mut self, stmt: &mut Statement) -> CResult<bool> {
        self.compile_expr(stmt)?;
        let relop = self.compile_relop()?;
        self.compile_expr(stmt)?;
        stmt.emit(relop)?;
        self.expect_then()?;

        // Reserve a pool slot for the jump target, patched once the
        // then-branch has been emitted.
        let target_idx = stmt.push_const(Value::Int(0))?;
        stmt.emit_byte(Op::Push, target_idx)?;
        stmt.emit(Op::Jnz)?;

        let nested_terminal = self.compile_one_statement(stmt)?;
        stmt.emit(Op::No)?;

        let target = stmt.pos() as i64;
        stmt.patch_const(target_idx, Value::Int(target));
        Ok(nested_terminal)
    }

    fn compile_relop(&mut self) -> CResult<Op> {
        match self.advance() {
            Token::Lt => Ok(Op::Lt),
            Token::Gt => Ok(Op::Gt),
            Token::Eq => Ok(Op::Eq),
            Token::Neq => Ok(Op::Neq),
            Token::Leq => Ok(Op::Leq),
            Token::Geq => Ok(Op::Geq),
            _ => Err(CompileError::ExpectedRelop),
        }
    }

    fn compile_gosub(&mut self, stmt: &mut Statement) -> CResult<()> {
        // Return-line is computed at compile time as current-line + 1,
        // not the next stored line (spec §4.3).
        let return_line = self.line as i64 + 1;
        let idx = stmt.push_const(Value::Int(return_line))?;
        stmt.emit_byte(Op::Push, idx)?;
        stmt.emit(Op::Call)?;
        self.compile_expr(stmt)?;
        stmt.emit(Op::Jmp)?;
        Ok(())
    }

    fn compile_input(&mut self, stmt: &mut Statement) -> CResult<()> {
        let mut vars = Vec::new();
        loop {
            let v = self.expect_variable()?;
            if vars.contains(&v) {
                return Err(CompileError::DuplicateInputVariable(
                    crate::value::var_letter(v),
                ));
            }
            vars.push(v);
            match self.peek() {
                Token::Comma => {
                    self.advance();
                }
                _ => break,
            }
        }
        let n = vars.len() as u8;
        let mut operands = Vec::with_capacity(1 + vars.len());
        operands.push(n);
        operands.extend_from_slice(&vars);
        stmt.emit_bytes(Op::Input, &operands)?;
        Ok(())
    }

    fn compile_foreign_call(&mut self, stmt: &mut Statement, name: &str, idx: u8) -> CResult<()> {
        let arity = self.commands.entry(idx).map(|e| e.arity).unwrap_or(-1);
        let mut argc = 0usize;
        if !self.at_eof() && !matches!(self.peek(), Token::Colon) {
            loop {
                self.compile_expr(stmt)?;
                stmt.emit(Op::FfiArg)?;
                argc += 1;
                match self.peek() {
                    Token::Comma => {
                        self.advance();
                    }
                    _ => break,
                }
            }
        }
        let arity_ok = if arity < 0 { argc > 0 } else { argc == arity as usize };
        if !arity_ok {
            return Err(CompileError::ArityMismatch {
                name: name.to_string(),
                expected: arity,
                got: argc,
            });
        }
        let table_idx = stmt.push_const(Value::Int(idx as i64))?;
        stmt.emit_byte(Op::Push, table_idx)?;
        stmt.emit(Op::FfiCall)?;
        Ok(())
    }

    fn expect_variable(&mut self) -> CResult<u8> {
        match self.advance() {
            Token::Ident(s) if s.len() == 1 => {
                var_index(s.chars().next().unwrap()).ok_or(CompileError::NotAVariable(s))
            }
            Token::Ident(s) => Err(CompileError::NotAVariable(s)),
            _ => Err(CompileError::ExpectedOperand),
        }
    }

    // ---- Expression compiler (Shunting-Yard) ----
    //
    // expr := term (('+'|'-') term)*
    // term := factor (('*'|'/') factor)*
    // factor := var | integer | string | '(' expr ')'
    //
    // Implemented directly over the operator-precedence algorithm rather
    // than as two mutually-recursive `expr`/`term` functions, per spec
    // §4.2: operand mode consumes leading '(' then one factor; operator
    // mode consumes trailing ')' then zero-or-one binary operator. A `(`
    // shifts an `Op::No` sentinel onto the operator stack and is popped
    // only by its matching `)`.

    fn compile_expr(&mut self, stmt: &mut Statement) -> CResult<()> {
        let mut op_stack: Vec<Op> = Vec::new();
        let mut paren_depth = 0usize;
        let mut saw_operand = false;

        loop {
            loop {
                match self.peek() {
                    Token::LParen => {
                        if op_stack.len() >= MAX_OPERATOR_STACK {
                            return Err(CompileError::OperatorStackExhausted(MAX_OPERATOR_STACK));
                        }
                        op_stack.push(Op::No);
                        paren_depth += 1;
                        self.advance();
                    }
                    _ => break,
                }
            }
            self.compile_factor(stmt)?;
            saw_operand = true;

            loop {
                match self.peek() {
                    Token::RParen => {
                        if paren_depth == 0 {
                            return Err(CompileError::UnbalancedParens);
                        }
                        self.advance();
                        paren_depth -= 1;
                        while let Some(top) = op_stack.pop() {
                            if top == Op::No {
                                break;
                            }
                            stmt.emit(top)?;
                        }
                    }
                    _ => break,
                }
            }

            match self.peek() {
                Token::Plus | Token::Minus | Token::Star | Token::Slash => {
                    let op = match self.advance() {
                        Token::Plus => Op::Add,
                        Token::Minus => Op::Sub,
                        Token::Star => Op::Mul,
                        Token::Slash => Op::Div,
                        _ => unreachable!(),
                    };
                    while let Some(&top) = op_stack.last() {
                        if top != Op::No && precedence(top) >= precedence(op) {
                            stmt.emit(top)?;
                            op_stack.pop();
                        } else {
                            break;
                        }
                    }
                    if op_stack.len() >= MAX_OPERATOR_STACK {
                        return Err(CompileError::OperatorStackExhausted(MAX_OPERATOR_STACK));
                    }
                    op_stack.push(op);
                    saw_operand = false;
                }
                _ => break,
            }
        }

        if !saw_operand {
            return Err(CompileError::ExpectedOperand);
        }
        if paren_depth != 0 {
            return Err(CompileError::UnbalancedParens);
        }
        while let Some(op) = op_stack.pop() {
            if op == Op::No {
                return Err(CompileError::UnbalancedParens);
            }
            stmt.emit(op)?;
        }
        Ok(())
    }

    fn compile_factor(&mut self, stmt: &mut Statement) -> CResult<()> {
        let value = match self.advance() {
            Token::Integer(n) => Value::Int(n),
            Token::Minus => match self.advance() {
                Token::Integer(n) => Value::Int(-n),
                _ => return Err(CompileError::ExpectedOperand),
            },
            Token::Plus => match self.advance() {
                Token::Integer(n) => Value::Int(n),
                _ => return Err(CompileError::ExpectedOperand),
            },
            Token::String(s) => Value::Str(s),
            Token::Ident(s) if s.len() == 1 => {
                let idx =
                    var_index(s.chars().next().unwrap()).ok_or(CompileError::NotAVariable(s))?;
                Value::VarRef(idx)
            }
            Token::Ident(s) => return Err(CompileError::NotAVariable(s)),
            Token::Eof => return Err(CompileError::EmptyExpression),
            _ => return Err(CompileError::ExpectedOperand),
        };
        let idx = stmt.push_const(value)?;
        stmt.emit_byte(Op::Push, idx)
    }
}

fn precedence(op: Op) -> u8 {
    match op {
        Op::Mul | Op::Div => 2,
        Op::Add | Op::Sub => 1,
        _ => 0,
    }
}

/// Peels the optional leading line number off a raw source line, returning
/// `(0, rest)` when no line number is present (an immediate command).
fn split_line_number(raw: &str) -> CResult<(u32, &str)> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == 0 {
        return Ok((0, raw));
    }
    let digits = &raw[..i];
    let n: u64 = digits
        .parse()
        .map_err(|_| CompileError::LineNumberOutOfRange(MAX_LINES))?;
    if n == 0 || n >= MAX_LINES as u64 {
        return Err(CompileError::LineNumberOutOfRange(MAX_LINES));
    }
    Ok((n as u32, &raw[i..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> Statement {
        let commands = CommandRegistry::new();
        Compiler::compile_line(src, &commands).unwrap().unwrap()
    }

    #[test]
    fn blank_and_comment_lines_compile_to_nothing() {
        let commands = CommandRegistry::new();
        assert!(Compiler::compile_line("", &commands).unwrap().is_none());
        assert!(Compiler::compile_line("   ", &commands).unwrap().is_none());
        assert!(Compiler::compile_line("# a note", &commands)
            .unwrap()
            .is_none());
        assert!(Compiler::compile_line("10 # a note", &commands)
            .unwrap()
            .is_none());
    }

    #[test]
    fn immediate_command_has_line_zero() {
        let stmt = compile("PRINT 1");
        assert_eq!(stmt.line, 0);
    }

    #[test]
    fn arithmetic_precedence() {
        let stmt = compile("10 PRINT 1 + 2 * 3");
        assert_eq!(
            stmt.code,
            vec![
                Op::Push as u8,
                0,
                Op::Push as u8,
                1,
                Op::Push as u8,
                2,
                Op::Mul as u8,
                Op::Add as u8,
                Op::Println as u8,
            ]
        );
    }

    #[test]
    fn parens_override_precedence() {
        let stmt = compile("10 PRINT (1+2)*3");
        assert_eq!(
            stmt.code,
            vec![
                Op::Push as u8,
                0,
                Op::Push as u8,
                1,
                Op::Add as u8,
                Op::Push as u8,
                2,
                Op::Mul as u8,
                Op::Println as u8,
            ]
        );
    }

    #[test]
    fn unbalanced_parens_is_an_error() {
        let commands = CommandRegistry::new();
        assert!(Compiler::compile_line("10 PRINT (1+2", &commands).is_err());
        assert!(Compiler::compile_line("10 PRINT 1+2)", &commands).is_err());
    }

    #[test]
    fn duplicate_input_variable_is_an_error() {
        let commands = CommandRegistry::new();
        let err = Compiler::compile_line("10 INPUT A, A", &commands).unwrap_err();
        assert_eq!(err.error, CompileError::DuplicateInputVariable('A'));
    }

    #[test]
    fn run_must_be_terminal() {
        let commands = CommandRegistry::new();
        assert!(Compiler::compile_line("10 RUN : PRINT 1", &commands).is_err());
        assert!(Compiler::compile_line("10 PRINT 1 : RUN", &commands).is_ok());
    }

    #[test]
    fn gosub_return_line_is_current_plus_one() {
        let stmt = compile("10 GOSUB 100");
        assert_eq!(
            stmt.code,
            vec![
                Op::Push as u8,
                0,
                Op::Call as u8,
                Op::Push as u8,
                1,
                Op::Jmp as u8,
            ]
        );
        assert_eq!(stmt.pool[0], Value::Int(11));
        assert_eq!(stmt.pool[1], Value::Int(100));
    }

    #[test]
    fn line_number_out_of_range_is_an_error() {
        let commands = CommandRegistry::new();
        assert!(Compiler::compile_line("0 PRINT 1", &commands).is_err());
        assert!(Compiler::compile_line("99999 PRINT 1", &commands).is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let commands = CommandRegistry::new();
        let err = Compiler::compile_line("10 FROBNICATE", &commands).unwrap_err();
        assert_eq!(
            err.error,
            CompileError::UnknownCommand("FROBNICATE".to_string())
        );
    }

    #[test]
    fn nested_terminal_if_branch_rejects_further_chaining() {
        let commands = CommandRegistry::new();
        assert!(Compiler::compile_line("10 IF A=1 THEN RUN : PRINT 2", &commands).is_err());
    }
}
