//! Lexer for dbasic. Operates on one source line at a time: the compiler
//! peels off the leading line number itself before handing the remainder
//! here.

use crate::token::{Token, TokenWithSpan};

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            column: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.current();
        if c.is_some() {
            self.pos += 1;
            self.column += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Token {
        let mut num_str = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                num_str.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token::Integer(num_str.parse().unwrap_or(0))
    }

    fn read_string(&mut self) -> Result<Token, String> {
        self.advance(); // consume opening quote
        let mut s = String::new();
        loop {
            match self.current() {
                None => return Err("unterminated string literal".to_string()),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::String(s))
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c.to_ascii_uppercase());
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    pub fn next_token(&mut self) -> Result<TokenWithSpan, String> {
        self.skip_whitespace();
        let column = self.column;

        let token = match self.current() {
            None => Token::Eof,
            Some(c) => match c {
                '"' => self.read_string()?,
                '0'..='9' => self.read_number(),
                'a'..='z' | 'A'..='Z' => Token::Ident(self.read_ident()),

                '+' => {
                    self.advance();
                    Token::Plus
                }
                '-' => {
                    self.advance();
                    Token::Minus
                }
                '*' => {
                    self.advance();
                    Token::Star
                }
                '/' => {
                    self.advance();
                    Token::Slash
                }
                '(' => {
                    self.advance();
                    Token::LParen
                }
                ')' => {
                    self.advance();
                    Token::RParen
                }
                ',' => {
                    self.advance();
                    Token::Comma
                }
                ':' => {
                    self.advance();
                    Token::Colon
                }
                '=' => {
                    self.advance();
                    Token::Eq
                }
                '<' => {
                    self.advance();
                    match self.current() {
                        Some('=') => {
                            self.advance();
                            Token::Leq
                        }
                        Some('>') => {
                            self.advance();
                            Token::Neq
                        }
                        _ => Token::Lt,
                    }
                }
                '>' => {
                    self.advance();
                    match self.current() {
                        Some('=') => {
                            self.advance();
                            Token::Geq
                        }
                        Some('<') => {
                            self.advance();
                            Token::Neq
                        }
                        _ => Token::Gt,
                    }
                }
                other => return Err(format!("unexpected character '{}'", other)),
            },
        };

        Ok(TokenWithSpan { token, column })
    }

    /// Lookahead one character without consuming, used by the compiler to
    /// decide whether a leading `-`/`+` is a unary sign on an integer
    /// literal.
    pub fn peek_char(&self) -> Option<char> {
        self.peek()
    }

    pub fn current_char(&self) -> Option<char> {
        self.current()
    }

    pub fn tokenize(&mut self) -> Result<Vec<TokenWithSpan>, String> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.token == Token::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idents_are_uppercased() {
        let mut lexer = Lexer::new("print a");
        assert!(matches!(lexer.next_token().unwrap().token, Token::Ident(s) if s == "PRINT"));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Ident(s) if s == "A"));
    }

    #[test]
    fn test_string_literal() {
        let mut lexer = Lexer::new("\"hello world\"");
        assert!(matches!(lexer.next_token().unwrap().token, Token::String(s) if s == "hello world"));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let mut lexer = Lexer::new("\"hello");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_relops() {
        let mut lexer = Lexer::new("< > = <> >< <= >=");
        assert!(matches!(lexer.next_token().unwrap().token, Token::Lt));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Gt));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Eq));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Neq));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Neq));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Leq));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Geq));
    }

    #[test]
    fn test_arithmetic_and_delimiters() {
        let mut lexer = Lexer::new("(1+2)*3, :");
        assert!(matches!(lexer.next_token().unwrap().token, Token::LParen));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Integer(1)));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Plus));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Integer(2)));
        assert!(matches!(lexer.next_token().unwrap().token, Token::RParen));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Star));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Integer(3)));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Comma));
        assert!(matches!(lexer.next_token().unwrap().token, Token::Colon));
    }

    #[test]
    fn test_tokenize_ends_in_eof() {
        let mut lexer = Lexer::new("A");
        let toks = lexer.tokenize().unwrap();
        assert_eq!(toks.len(), 2);
        assert_eq!(toks.last().unwrap().token, Token::Eof);
    }
}
