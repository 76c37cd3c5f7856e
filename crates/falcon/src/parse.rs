//! Recursive-descent parser for Falcon.
//!
//! Produces a `Vec<Stmt>` from the token stream. Binary expressions use
//! precedence climbing over the table `|| < && < == != < comparisons <
//! + - < * / % < **`, with `**` right-associative. Assignment is
//! right-associative and accepts `Variable`, `Member`, and `Subscript`
//! targets. The parser reports the first error and does not recover.

use std::rc::Rc;

use crate::{
    ast::{
        ArmBody, BinOp, Expr, FunctionDecl, Lit, MatchArm, MatchNode, Param, Pattern, Stmt, TypePattern, UnOp,
    },
    error::{FalconError, RunResult},
    token::{Token, TokenKind},
};

fn binary_op(kind: TokenKind) -> Option<BinOp> {
    let op = match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::Perc => BinOp::Mod,
        TokenKind::StarStar => BinOp::Pow,
        TokenKind::EqEq => BinOp::Eq,
        TokenKind::BangEq => BinOp::Neq,
        TokenKind::Lt => BinOp::Lt,
        TokenKind::Lte => BinOp::Lte,
        TokenKind::Gt => BinOp::Gt,
        TokenKind::Gte => BinOp::Gte,
        TokenKind::AndAnd => BinOp::And,
        TokenKind::OrOr => BinOp::Or,
        _ => return None,
    };
    Some(op)
}

/// Precedence level; larger binds tighter.
fn precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        BinOp::Eq | BinOp::Neq => 3,
        BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => 4,
        BinOp::Add | BinOp::Sub => 5,
        BinOp::Mul | BinOp::Div | BinOp::Mod => 6,
        BinOp::Pow => 7,
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parses a whole module.
    pub fn parse(mut self) -> RunResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.is_at_end() {
            self.declaration_into(&mut stmts)?;
        }
        Ok(stmts)
    }

    // ---------------- declarations ----------------

    /// Parses one declaration, splicing multi-name declarations
    /// (`var a := 1, b := 2`) as consecutive statements.
    fn declaration_into(&mut self, out: &mut Vec<Stmt>) -> RunResult<()> {
        if self.matches(TokenKind::Var) {
            return self.var_or_const_into(out, false, true);
        }
        if self.matches(TokenKind::Let) {
            return self.var_or_const_into(out, false, false);
        }
        if self.matches(TokenKind::Const) {
            return self.var_or_const_into(out, true, false);
        }
        if self.check(TokenKind::Function) && self.peek_next().kind == TokenKind::Ident {
            self.advance();
            out.push(self.function_declaration()?);
            return Ok(());
        }
        // bare `IDENT := expr` is shorthand for a var declaration
        if self.check(TokenKind::Ident) && self.peek_next().kind == TokenKind::Decl {
            let name = self.advance().lexeme.clone();
            self.advance();
            let init = self.expression()?;
            self.optional_semicolon();
            out.push(Stmt::Let {
                name,
                init: Some(init),
                is_const: false,
                is_var: true,
                ann: None,
            });
            return Ok(());
        }
        out.push(self.statement()?);
        Ok(())
    }

    fn var_or_const_into(&mut self, out: &mut Vec<Stmt>, is_const: bool, is_var: bool) -> RunResult<()> {
        loop {
            let name = self.consume(TokenKind::Ident, "expect variable name after declaration")?.lexeme.clone();
            let ann = if self.matches(TokenKind::Colon) {
                Some(self.type_expression()?)
            } else {
                None
            };
            let init = if self.matches(TokenKind::Decl) || self.matches(TokenKind::Eq) {
                Some(self.expression()?)
            } else {
                None
            };
            out.push(Stmt::Let {
                name,
                init,
                is_const,
                is_var,
                ann,
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.optional_semicolon();
        Ok(())
    }

    fn function_declaration(&mut self) -> RunResult<Stmt> {
        let name = self.consume(TokenKind::Ident, "expect function name after 'function'")?.lexeme.clone();
        let (params, return_ann) = self.function_signature()?;
        let body = self.braced_block("function body")?;
        Ok(Stmt::Function(Rc::new(FunctionDecl {
            name: Some(name),
            params,
            return_ann,
            body,
        })))
    }

    /// Parses `(params) [":" type | "=>" type]`.
    fn function_signature(&mut self) -> RunResult<(Vec<Param>, Option<String>)> {
        self.consume(TokenKind::LParen, "expect '(' before parameter list")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let name = self.consume(TokenKind::Ident, "expect parameter name")?.lexeme.clone();
                let ann = if self.matches(TokenKind::Colon) {
                    Some(self.type_expression()?)
                } else {
                    None
                };
                params.push(Param { name, ann });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expect ')' after parameter list")?;
        let return_ann = if self.matches(TokenKind::Colon) || self.matches(TokenKind::Arrow) {
            Some(self.type_expression()?)
        } else {
            None
        };
        Ok((params, return_ann))
    }

    // ---------------- statements ----------------

    fn statement(&mut self) -> RunResult<Stmt> {
        if self.matches(TokenKind::Return) {
            let value = if self.check(TokenKind::Semi) || self.check(TokenKind::RBrace) || self.is_at_end() {
                None
            } else {
                Some(self.expression()?)
            };
            self.optional_semicolon();
            return Ok(Stmt::Return(value));
        }
        if self.matches(TokenKind::Say) {
            let value = self.expression()?;
            self.optional_semicolon();
            return Ok(Stmt::Say(value));
        }
        if self.matches(TokenKind::If) {
            return self.if_statement();
        }
        if self.matches(TokenKind::While) {
            return self.while_statement();
        }
        if self.matches(TokenKind::For) {
            return self.for_statement();
        }
        if self.matches(TokenKind::Loop) {
            return self.loop_statement();
        }
        if self.matches(TokenKind::Break) {
            let loc = self.previous().loc();
            self.optional_semicolon();
            return Ok(Stmt::Break(loc));
        }
        if self.matches(TokenKind::Throw) {
            let value = self.expression()?;
            self.optional_semicolon();
            return Ok(Stmt::Throw(value));
        }
        if self.matches(TokenKind::Try) {
            return self.try_statement();
        }
        if self.check(TokenKind::Match) {
            self.advance();
            let node = self.match_node()?;
            self.optional_semicolon();
            return Ok(Stmt::Match(node));
        }
        if self.matches(TokenKind::LBrace) {
            return Ok(Stmt::Block(self.block_body()?));
        }
        let expr = self.expression()?;
        self.optional_semicolon();
        Ok(Stmt::Expr(expr))
    }

    /// `if cond ... else ...`; parentheses around the condition are
    /// ordinary grouping, not required syntax.
    fn if_statement(&mut self) -> RunResult<Stmt> {
        let cond = self.expression()?;
        let then_branch = Box::new(self.block_or_statement()?);
        let else_branch = if self.matches(TokenKind::Else) {
            Some(Box::new(self.block_or_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> RunResult<Stmt> {
        let cond = self.expression()?;
        let body = Box::new(self.block_or_statement()?);
        Ok(Stmt::While { cond, body })
    }

    /// `for var i := START to END [step STEP] { ... }`; the `var` is
    /// conventional but optional.
    fn for_statement(&mut self) -> RunResult<Stmt> {
        self.matches(TokenKind::Var);
        let name = self.consume(TokenKind::Ident, "expect iterator name in for-loop")?.lexeme.clone();
        if !self.matches(TokenKind::Decl) && !self.matches(TokenKind::Eq) {
            return Err(self.error_here("expect ':=' or '=' after iterator name in for-loop"));
        }
        let start = self.expression()?;
        self.consume(TokenKind::To, "expect 'to' in for-loop header")?;
        let end = self.expression()?;
        let step = if self.matches(TokenKind::Step) {
            Some(self.expression()?)
        } else {
            None
        };
        let body = self.braced_block("for-loop body")?;
        Ok(Stmt::For {
            name,
            start,
            end,
            step,
            body,
        })
    }

    /// `loop { ... }` is infinite; `loop cond { ... }` is while-shaped.
    fn loop_statement(&mut self) -> RunResult<Stmt> {
        if self.matches(TokenKind::LBrace) {
            return Ok(Stmt::Loop {
                body: self.block_body()?,
            });
        }
        let cond = self.expression()?;
        let body = self.braced_block("loop body")?;
        Ok(Stmt::While {
            cond,
            body: Box::new(Stmt::Block(body)),
        })
    }

    fn try_statement(&mut self) -> RunResult<Stmt> {
        let body = self.braced_block("try body")?;
        self.consume(TokenKind::Catch, "expect 'catch' after try block")?;
        self.consume(TokenKind::LParen, "expect '(' after 'catch'")?;
        let name = self.consume(TokenKind::Ident, "expect catch binding name")?.lexeme.clone();
        self.consume(TokenKind::RParen, "expect ')' after catch binding")?;
        let handler = self.braced_block("catch body")?;
        Ok(Stmt::TryCatch { body, name, handler })
    }

    fn match_node(&mut self) -> RunResult<MatchNode> {
        let value = self.expression()?;
        self.consume(TokenKind::LBrace, "expect '{' after match value")?;
        let mut arms = Vec::new();
        while self.matches(TokenKind::Case) {
            let pattern = self.pattern()?;
            let guard = if self.matches(TokenKind::If) {
                Some(self.expression()?)
            } else {
                None
            };
            self.consume(TokenKind::Colon, "expect ':' after match pattern")?;
            let body = if self.matches(TokenKind::LBrace) {
                ArmBody::Block(self.block_body()?)
            } else {
                let expr = self.expression()?;
                self.optional_semicolon();
                ArmBody::Expr(expr)
            };
            arms.push(MatchArm { pattern, guard, body });
        }
        self.consume(TokenKind::RBrace, "expect '}' after match arms")?;
        Ok(MatchNode { value, arms })
    }

    fn block_or_statement(&mut self) -> RunResult<Stmt> {
        if self.matches(TokenKind::LBrace) {
            return Ok(Stmt::Block(self.block_body()?));
        }
        self.statement()
    }

    /// Consumes a required `{ ... }` block.
    fn braced_block(&mut self, what: &str) -> RunResult<Vec<Stmt>> {
        self.consume(TokenKind::LBrace, &format!("expect '{{' before {what}"))?;
        self.block_body()
    }

    /// Statements until the closing `}` (already past the `{`).
    fn block_body(&mut self) -> RunResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            self.declaration_into(&mut stmts)?;
        }
        self.consume(TokenKind::RBrace, "expect '}' after block")?;
        Ok(stmts)
    }

    // ---------------- patterns ----------------

    fn pattern(&mut self) -> RunResult<Pattern> {
        let first = self.primary_pattern()?;
        if !self.check(TokenKind::Pipe) {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while self.matches(TokenKind::Pipe) {
            alternatives.push(self.primary_pattern()?);
        }
        Ok(Pattern::Or(alternatives))
    }

    fn primary_pattern(&mut self) -> RunResult<Pattern> {
        if self.matches(TokenKind::Number) {
            return Ok(Pattern::Literal(self.previous_literal()?));
        }
        if self.matches(TokenKind::Minus) {
            let lit = match self.consume(TokenKind::Number, "expect number after '-' in pattern")?.literal.clone() {
                Some(Lit::Int(n)) => Lit::Int(-n),
                Some(Lit::Float(x)) => Lit::Float(-x),
                _ => return Err(self.error_here("expect number after '-' in pattern")),
            };
            return Ok(Pattern::Literal(lit));
        }
        if self.matches(TokenKind::Str)
            || self.matches(TokenKind::True)
            || self.matches(TokenKind::False)
            || self.matches(TokenKind::Null)
        {
            return Ok(Pattern::Literal(self.previous_literal()?));
        }
        if self.matches(TokenKind::LBracket) {
            let mut elements = Vec::new();
            if !self.check(TokenKind::RBracket) {
                loop {
                    elements.push(self.pattern()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RBracket, "expect ']' after list pattern")?;
            return Ok(Pattern::List(elements));
        }
        if self.matches(TokenKind::LParen) {
            let mut elements = Vec::new();
            if !self.check(TokenKind::RParen) {
                loop {
                    elements.push(self.pattern()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RParen, "expect ')' after tuple pattern")?;
            return Ok(Pattern::Tuple(elements));
        }
        if self.matches(TokenKind::LBrace) {
            let mut entries = Vec::new();
            if !self.check(TokenKind::RBrace) {
                loop {
                    let key = self.dict_key()?;
                    self.consume(TokenKind::Colon, "expect ':' after dict pattern key")?;
                    entries.push((key, self.pattern()?));
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RBrace, "expect '}' after dict pattern")?;
            return Ok(Pattern::Dict(entries));
        }
        if self.matches(TokenKind::Ident) {
            let name = self.previous().lexeme.clone();
            if name == "_" {
                return Ok(Pattern::Wildcard);
            }
            if let Some(type_pattern) = TypePattern::from_name(&name) {
                return Ok(Pattern::Type(type_pattern));
            }
            return Ok(Pattern::Binding(name));
        }
        Err(self.error_here("expect pattern"))
    }

    // ---------------- type annotations ----------------

    /// Parses a type expression into its canonical string form, e.g.
    /// `list[int]`, `dict[string, int]`, `int | null`.
    fn type_expression(&mut self) -> RunResult<String> {
        let mut parts = vec![self.type_atom()?];
        while self.matches(TokenKind::Pipe) {
            parts.push(self.type_atom()?);
        }
        Ok(parts.join(" | "))
    }

    fn type_atom(&mut self) -> RunResult<String> {
        // `set` and `function` are keywords but valid type names
        let name = if self.matches(TokenKind::Ident) {
            self.previous().lexeme.clone()
        } else if self.matches(TokenKind::Set) {
            "set".to_owned()
        } else if self.matches(TokenKind::Function) {
            "function".to_owned()
        } else if self.matches(TokenKind::Null) {
            "null".to_owned()
        } else {
            return Err(self.error_here("expect type name"));
        };
        if !self.matches(TokenKind::LBracket) {
            return Ok(name);
        }
        let mut args = vec![self.type_expression()?];
        while self.matches(TokenKind::Comma) {
            args.push(self.type_expression()?);
        }
        self.consume(TokenKind::RBracket, "expect ']' after type arguments")?;
        Ok(format!("{name}[{}]", args.join(", ")))
    }

    // ---------------- expressions ----------------

    fn expression(&mut self) -> RunResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> RunResult<Expr> {
        let expr = self.binary_expression(0)?;
        if self.matches(TokenKind::Eq) || self.matches(TokenKind::Decl) {
            let op_loc = self.previous().loc();
            let value = self.assignment()?;
            return match expr {
                Expr::Variable(_) | Expr::Member { .. } | Expr::Subscript { .. } => Ok(Expr::Assign {
                    target: Box::new(expr),
                    value: Box::new(value),
                }),
                _ => Err(FalconError::parse("invalid assignment target", op_loc)),
            };
        }
        Ok(expr)
    }

    fn binary_expression(&mut self, min_prec: u8) -> RunResult<Expr> {
        let mut expr = self.unary()?;
        loop {
            let Some(op) = binary_op(self.peek().kind) else { break };
            let prec = precedence(op);
            if prec < min_prec {
                break;
            }
            self.advance();
            // `**` is right-associative: same precedence recurses
            let next_min = if op == BinOp::Pow { prec } else { prec + 1 };
            let right = self.binary_expression(next_min)?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn unary(&mut self) -> RunResult<Expr> {
        if self.matches(TokenKind::Bang) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(operand),
            });
        }
        if self.matches(TokenKind::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    /// Postfix chaining: calls, `.name` / `::name` member access,
    /// `[index]` subscripts.
    fn postfix(&mut self) -> RunResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RParen, "expect ')' after arguments")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
                continue;
            }
            if self.matches(TokenKind::Dot) || self.matches(TokenKind::MethodColon) {
                let name = self.consume(TokenKind::Ident, "expect property name after '.'")?.lexeme.clone();
                expr = Expr::Member {
                    base: Box::new(expr),
                    name,
                };
                continue;
            }
            if self.matches(TokenKind::LBracket) {
                let index = self.expression()?;
                self.consume(TokenKind::RBracket, "expect ']' after subscript")?;
                expr = Expr::Subscript {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn primary(&mut self) -> RunResult<Expr> {
        if self.matches(TokenKind::Function) {
            let name = if self.check(TokenKind::Ident) {
                Some(self.advance().lexeme.clone())
            } else {
                None
            };
            let (params, return_ann) = self.function_signature()?;
            let body = self.braced_block("function body")?;
            return Ok(Expr::Function(Rc::new(FunctionDecl {
                name,
                params,
                return_ann,
                body,
            })));
        }
        if self.check(TokenKind::Match) {
            self.advance();
            let node = self.match_node()?;
            return Ok(Expr::Match(Box::new(node)));
        }
        if self.matches(TokenKind::Number)
            || self.matches(TokenKind::Str)
            || self.matches(TokenKind::True)
            || self.matches(TokenKind::False)
            || self.matches(TokenKind::Null)
        {
            return Ok(Expr::Literal(self.previous_literal()?));
        }
        if self.matches(TokenKind::Ident) {
            return Ok(Expr::Variable(self.previous().lexeme.clone()));
        }
        if self.matches(TokenKind::LParen) {
            return self.grouping_or_tuple();
        }
        if self.matches(TokenKind::LBracket) {
            let mut elements = Vec::new();
            if !self.check(TokenKind::RBracket) {
                loop {
                    elements.push(self.expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RBracket, "expect ']' after list literal")?;
            return Ok(Expr::ListLit(elements));
        }
        if self.matches(TokenKind::LBrace) {
            return self.dict_literal();
        }
        if self.matches(TokenKind::Set) {
            self.consume(TokenKind::LBrace, "expect '{' after 'set'")?;
            let mut elements = Vec::new();
            if !self.check(TokenKind::RBrace) {
                loop {
                    elements.push(self.expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RBrace, "expect '}' after set literal")?;
            return Ok(Expr::SetLit(elements));
        }
        if self.matches(TokenKind::Array) {
            self.consume(TokenKind::LBracket, "expect '[' after 'array'")?;
            let size = self.expression()?;
            self.consume(TokenKind::RBracket, "expect ']' after array size")?;
            return Ok(Expr::ArrayLit(Box::new(size)));
        }
        Err(self.error_here("unexpected token"))
    }

    /// `()` empty tuple, `(a)` grouping, `(a,)` and `(a, b)` tuples.
    fn grouping_or_tuple(&mut self) -> RunResult<Expr> {
        if self.matches(TokenKind::RParen) {
            return Ok(Expr::TupleLit(Vec::new()));
        }
        let first = self.expression()?;
        if self.matches(TokenKind::Comma) {
            let mut elements = vec![first];
            if !self.check(TokenKind::RParen) {
                loop {
                    elements.push(self.expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RParen, "expect ')' after tuple literal")?;
            return Ok(Expr::TupleLit(elements));
        }
        self.consume(TokenKind::RParen, "expect ')' after expression")?;
        Ok(Expr::Grouping(Box::new(first)))
    }

    fn dict_literal(&mut self) -> RunResult<Expr> {
        let mut entries = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                let key = self.dict_key()?;
                self.consume(TokenKind::Colon, "expect ':' after dict key")?;
                entries.push((key, self.expression()?));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBrace, "expect '}' after dict literal")?;
        Ok(Expr::DictLit(entries))
    }

    /// A dict key is a string literal or a bare identifier taken as one.
    fn dict_key(&mut self) -> RunResult<String> {
        if self.matches(TokenKind::Str) {
            match self.previous().literal.clone() {
                Some(Lit::Str(s)) => Ok(s),
                _ => Err(self.error_here("string token without literal")),
            }
        } else if self.matches(TokenKind::Ident) {
            Ok(self.previous().lexeme.clone())
        } else {
            Err(self.error_here("expect dict key (string or identifier)"))
        }
    }

    // ---------------- helpers ----------------

    fn previous_literal(&self) -> RunResult<Lit> {
        self.previous()
            .literal
            .clone()
            .ok_or_else(|| FalconError::parse("literal token without value", self.previous().loc()))
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> RunResult<&Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        Err(self.error_here(message))
    }

    fn error_here(&self, message: &str) -> FalconError {
        let token = self.peek();
        FalconError::parse(format!("{message}, found {token}"), token.loc())
    }

    fn optional_semicolon(&mut self) {
        self.matches(TokenKind::Semi);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_next(&self) -> &Token {
        self.tokens.get(self.current + 1).unwrap_or_else(|| {
            self.tokens.last().expect("token stream always ends with EOF")
        })
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }
}

/// Convenience wrapper: lex and parse a module.
pub fn parse_source(source: &str) -> RunResult<Vec<Stmt>> {
    Parser::new(crate::lex::lex(source)?).parse()
}
