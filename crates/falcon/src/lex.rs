//! Single-pass lexer for Falcon source text.
//!
//! Recognizes `//` line comments and `/* */` block comments, single- and
//! double-quoted strings with a small escape set, integer and float number
//! literals, identifiers with a keyword table, and the two-character
//! operators including the declaration operator `:=` and the method
//! accessor `::`. Every token carries the 1-based line and column of its
//! first character.

use crate::{
    ast::Lit,
    error::{CodeLoc, FalconError, RunResult},
    token::{Token, TokenKind},
};

fn keyword(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "var" => TokenKind::Var,
        "let" => TokenKind::Let,
        "const" => TokenKind::Const,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "loop" => TokenKind::Loop,
        "to" => TokenKind::To,
        "step" => TokenKind::Step,
        "break" => TokenKind::Break,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "function" => TokenKind::Function,
        "return" => TokenKind::Return,
        "match" => TokenKind::Match,
        "case" => TokenKind::Case,
        "try" => TokenKind::Try,
        "catch" => TokenKind::Catch,
        "throw" => TokenKind::Throw,
        "say" => TokenKind::Say,
        "set" => TokenKind::Set,
        "array" => TokenKind::Array,
        _ => return None,
    };
    Some(kind)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Character-stream lexer producing a token vector terminated by EOF.
pub struct Lexer {
    source: Vec<char>,
    start: usize,
    current: usize,
    line: u32,
    col: u32,
    start_line: u32,
    start_col: u32,
    tokens: Vec<Token>,
}

impl Lexer {
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            start: 0,
            current: 0,
            line: 1,
            col: 1,
            start_line: 1,
            start_col: 1,
            tokens: Vec::new(),
        }
    }

    /// Tokenizes the whole input.
    pub fn lex(mut self) -> RunResult<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_col = self.col;
            self.scan_token()?;
        }
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            literal: None,
            line: self.line,
            col: self.col,
        });
        Ok(self.tokens)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let ch = self.source[self.current];
        self.current += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn peek(&self) -> char {
        if self.is_at_end() { '\0' } else { self.source[self.current] }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.source.len() {
            '\0'
        } else {
            self.source[self.current + 1]
        }
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() != expected {
            return false;
        }
        self.advance();
        true
    }

    fn here(&self) -> CodeLoc {
        CodeLoc::new(self.line, self.col)
    }

    fn add_token(&mut self, kind: TokenKind) {
        self.add_token_literal(kind, None);
    }

    fn add_token_literal(&mut self, kind: TokenKind, literal: Option<Lit>) {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        self.tokens.push(Token {
            kind,
            lexeme,
            literal,
            line: self.start_line,
            col: self.start_col,
        });
    }

    fn scan_token(&mut self) -> RunResult<()> {
        let c = self.advance();
        match c {
            ' ' | '\r' | '\n' | '\t' => Ok(()),
            '/' => {
                if self.matches('/') {
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                    Ok(())
                } else if self.matches('*') {
                    self.block_comment()
                } else {
                    self.add_token(TokenKind::Slash);
                    Ok(())
                }
            }
            ':' => {
                if self.matches('=') {
                    self.add_token(TokenKind::Decl);
                } else if self.matches(':') {
                    self.add_token(TokenKind::MethodColon);
                } else {
                    self.add_token(TokenKind::Colon);
                }
                Ok(())
            }
            '{' => {
                self.add_token(TokenKind::LBrace);
                Ok(())
            }
            '}' => {
                self.add_token(TokenKind::RBrace);
                Ok(())
            }
            '(' => {
                self.add_token(TokenKind::LParen);
                Ok(())
            }
            ')' => {
                self.add_token(TokenKind::RParen);
                Ok(())
            }
            '[' => {
                self.add_token(TokenKind::LBracket);
                Ok(())
            }
            ']' => {
                self.add_token(TokenKind::RBracket);
                Ok(())
            }
            ';' => {
                self.add_token(TokenKind::Semi);
                Ok(())
            }
            ',' => {
                self.add_token(TokenKind::Comma);
                Ok(())
            }
            '.' => {
                self.add_token(TokenKind::Dot);
                Ok(())
            }
            '+' => {
                self.add_token(TokenKind::Plus);
                Ok(())
            }
            '-' => {
                self.add_token(TokenKind::Minus);
                Ok(())
            }
            '*' => {
                if self.matches('*') {
                    self.add_token(TokenKind::StarStar);
                } else {
                    self.add_token(TokenKind::Star);
                }
                Ok(())
            }
            '%' => {
                self.add_token(TokenKind::Perc);
                Ok(())
            }
            '!' => {
                if self.matches('=') {
                    self.add_token(TokenKind::BangEq);
                } else {
                    self.add_token(TokenKind::Bang);
                }
                Ok(())
            }
            '=' => {
                if self.matches('=') {
                    self.add_token(TokenKind::EqEq);
                } else if self.matches('>') {
                    self.add_token(TokenKind::Arrow);
                } else {
                    self.add_token(TokenKind::Eq);
                }
                Ok(())
            }
            '<' => {
                if self.matches('=') {
                    self.add_token(TokenKind::Lte);
                } else {
                    self.add_token(TokenKind::Lt);
                }
                Ok(())
            }
            '>' => {
                if self.matches('=') {
                    self.add_token(TokenKind::Gte);
                } else {
                    self.add_token(TokenKind::Gt);
                }
                Ok(())
            }
            '&' => {
                if self.matches('&') {
                    self.add_token(TokenKind::AndAnd);
                    Ok(())
                } else {
                    Err(FalconError::lexical("unexpected single '&'", self.here()))
                }
            }
            '|' => {
                if self.matches('|') {
                    self.add_token(TokenKind::OrOr);
                } else {
                    // single '|' is valid in type-union and or-pattern position
                    self.add_token(TokenKind::Pipe);
                }
                Ok(())
            }
            '"' | '\'' => self.string(c),
            c if c.is_ascii_digit() => self.number(),
            c if is_ident_start(c) => {
                self.identifier();
                Ok(())
            }
            c => Err(FalconError::lexical(format!("unexpected character '{c}'"), self.here())),
        }
    }

    fn block_comment(&mut self) -> RunResult<()> {
        while !(self.peek() == '*' && self.peek_next() == '/') {
            if self.is_at_end() {
                return Err(FalconError::lexical("unterminated block comment", self.here()));
            }
            self.advance();
        }
        self.advance();
        self.advance();
        Ok(())
    }

    fn string(&mut self, quote: char) -> RunResult<()> {
        let mut chars = String::new();
        while self.peek() != quote && !self.is_at_end() {
            let ch = self.advance();
            if ch == '\\' {
                if self.is_at_end() {
                    break;
                }
                let next = self.advance();
                match next {
                    'n' => chars.push('\n'),
                    't' => chars.push('\t'),
                    'r' => chars.push('\r'),
                    '\\' => chars.push('\\'),
                    c if c == quote => chars.push(quote),
                    // unknown escapes keep the escaped character
                    c => chars.push(c),
                }
            } else {
                chars.push(ch);
            }
        }
        if self.is_at_end() {
            return Err(FalconError::lexical("unterminated string", self.here()));
        }
        self.advance();
        self.add_token_literal(TokenKind::Str, Some(Lit::Str(chars)));
        Ok(())
    }

    fn number(&mut self) -> RunResult<()> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        let text: String = self.source[self.start..self.current].iter().collect();
        let literal = if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| FalconError::lexical(format!("invalid number literal '{text}'"), self.here()))?;
            Lit::Float(value)
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| FalconError::lexical(format!("integer literal '{text}' is too large"), self.here()))?;
            Lit::Int(value)
        };
        self.add_token_literal(TokenKind::Number, Some(literal));
        Ok(())
    }

    fn identifier(&mut self) {
        while is_ident_continue(self.peek()) {
            self.advance();
        }
        let text: String = self.source[self.start..self.current].iter().collect();
        match keyword(&text) {
            Some(TokenKind::True) => self.add_token_literal(TokenKind::True, Some(Lit::Bool(true))),
            Some(TokenKind::False) => self.add_token_literal(TokenKind::False, Some(Lit::Bool(false))),
            Some(TokenKind::Null) => self.add_token_literal(TokenKind::Null, Some(Lit::Null)),
            Some(kind) => self.add_token(kind),
            None => self.add_token(TokenKind::Ident),
        }
    }
}

/// Convenience wrapper: lex the whole source.
pub fn lex(source: &str) -> RunResult<Vec<Token>> {
    Lexer::new(source).lex()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_declaration_tokens() {
        assert_eq!(
            kinds("var x := 1;"),
            vec![
                TokenKind::Var,
                TokenKind::Ident,
                TokenKind::Decl,
                TokenKind::Number,
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("== != <= >= && || ** :: => :"),
            vec![
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::Lte,
                TokenKind::Gte,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::StarStar,
                TokenKind::MethodColon,
                TokenKind::Arrow,
                TokenKind::Colon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions_are_one_based() {
        let tokens = lex("var x\nshow").unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (1, 5));
        assert_eq!((tokens[2].line, tokens[2].col), (2, 1));
    }

    #[test]
    fn test_number_literals() {
        let tokens = lex("42 3.5 7.").unwrap();
        assert_eq!(tokens[0].literal, Some(Lit::Int(42)));
        assert_eq!(tokens[1].literal, Some(Lit::Float(3.5)));
        // a dot not followed by a digit is a separate token
        assert_eq!(tokens[2].literal, Some(Lit::Int(7)));
        assert_eq!(tokens[3].kind, TokenKind::Dot);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = lex(r#""a\nb\t\\\"q" 'it\'s'"#).unwrap();
        assert_eq!(tokens[0].literal, Some(Lit::Str("a\nb\t\\\"q".to_owned())));
        assert_eq!(tokens[1].literal, Some(Lit::Str("it's".to_owned())));
    }

    #[test]
    fn test_comments_produce_no_tokens() {
        assert_eq!(
            kinds("1 // trailing\n/* block\ncomment */ 2"),
            vec![TokenKind::Number, TokenKind::Number, TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_block_comment_is_error() {
        let err = lex("/* never closed").unwrap_err();
        assert!(err.message().contains("unterminated block comment"));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = lex("\"oops").unwrap_err();
        assert!(err.message().contains("unterminated string"));
    }

    #[test]
    fn test_lone_ampersand_is_error() {
        assert!(lex("a & b").is_err());
        // a lone pipe is fine: the parser uses it in union/or-pattern position
        assert!(lex("int | null").is_ok());
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = lex("match case _tmp $v say").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Match);
        assert_eq!(tokens[1].kind, TokenKind::Case);
        assert_eq!(tokens[2].kind, TokenKind::Ident);
        assert_eq!(tokens[3].kind, TokenKind::Ident);
        assert_eq!(tokens[4].kind, TokenKind::Say);
    }

    #[test]
    fn test_keyword_literals_carry_values() {
        let tokens = lex("true false null").unwrap();
        assert_eq!(tokens[0].literal, Some(Lit::Bool(true)));
        assert_eq!(tokens[1].literal, Some(Lit::Bool(false)));
        assert_eq!(tokens[2].literal, Some(Lit::Null));
    }
}
