use crate::lang::ast::{Arg, BinaryOp, Expr, ExprKind, Program, Stmt, StmtKind, UnaryOp};
use crate::lang::token::{tokenize, Token, TokenKind};
use crate::lang::EvalError;

/// Parse submission code into a program
pub fn parse(source: &str) -> Result<Program, EvalError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).program()
}

/// Deepest nesting of blocks, brackets and operators the parser accepts
const MAX_NESTING: usize = 100;

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            index: 0,
            depth: 0,
        }
    }

    /// Run `parse` one nesting level deeper, failing instead of recursing without bound
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(EvalError::new(
                self.line(),
                format!("code is nested more than {MAX_NESTING} levels deep"),
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.index.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.index + offset).min(self.tokens.len() - 1)].kind
    }

    fn line(&self) -> usize {
        self.tokens[self.index.min(self.tokens.len() - 1)].line
    }

    fn consume(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if kind != TokenKind::Eof {
            self.index += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.consume();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), EvalError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> EvalError {
        let found = match self.peek() {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            other => format!("{other:?}"),
        };
        EvalError::new(self.line(), format!("expected {what}, found {found}"))
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon) {
            self.consume();
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek() == &TokenKind::Newline {
            self.consume();
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, EvalError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.consume();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn program(mut self) -> Result<Program, EvalError> {
        let mut stmts = vec![];
        self.skip_separators();
        while self.peek() != &TokenKind::Eof {
            stmts.push(self.statement()?);
            self.end_of_statement()?;
            self.skip_separators();
        }
        Ok(Program { stmts })
    }

    fn end_of_statement(&mut self) -> Result<(), EvalError> {
        match self.peek() {
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, EvalError> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, EvalError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut stmts = vec![];
        self.skip_separators();
        while self.peek() != &TokenKind::RBrace {
            if self.peek() == &TokenKind::Eof {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.statement()?);
            self.end_of_statement()?;
            self.skip_separators();
        }
        self.consume();
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, EvalError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            TokenKind::Let => {
                self.consume();
                let name = self.ident("variable name after 'let'")?;
                self.expect(TokenKind::Assign, "'='")?;
                StmtKind::Assign {
                    name,
                    value: self.expression()?,
                }
            }
            TokenKind::Ident(name) if self.peek_at(1) == &TokenKind::Assign => {
                self.consume();
                self.consume();
                StmtKind::Assign {
                    name,
                    value: self.expression()?,
                }
            }
            TokenKind::For => {
                self.consume();
                let var = self.ident("loop variable")?;
                self.expect(TokenKind::In, "'in'")?;
                let iter = self.expression()?;
                let body = self.block()?;
                StmtKind::For { var, iter, body }
            }
            TokenKind::If => return self.if_statement(),
            _ => StmtKind::Expr(self.expression()?),
        };
        Ok(Stmt { kind, line })
    }

    fn if_statement(&mut self) -> Result<Stmt, EvalError> {
        let line = self.line();
        self.expect(TokenKind::If, "'if'")?;
        let cond = self.expression()?;
        let then = self.block()?;

        // `else` may sit on the line after the closing brace
        let mut lookahead = 0;
        while self.peek_at(lookahead) == &TokenKind::Newline {
            lookahead += 1;
        }
        let otherwise = if self.peek_at(lookahead) == &TokenKind::Else {
            self.skip_newlines();
            self.consume();
            if self.peek() == &TokenKind::If {
                vec![self.nested(Self::if_statement)?]
            } else {
                self.block()?
            }
        } else {
            vec![]
        };

        Ok(Stmt {
            kind: StmtKind::If {
                cond,
                then,
                otherwise,
            },
            line,
        })
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        self.nested(Self::or)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, EvalError>,
        ops: &[(TokenKind, BinaryOp)],
    ) -> Result<Expr, EvalError> {
        let mut expr = next(self)?;
        loop {
            let Some(op) = ops
                .iter()
                .find(|(kind, _)| kind == self.peek())
                .map(|(_, op)| *op)
            else {
                break;
            };
            let line = self.line();
            self.consume();
            let right = next(self)?;
            expr = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
                line,
            };
        }
        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Self::and, &[(TokenKind::OrOr, BinaryOp::Or)])
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Self::comparison, &[(TokenKind::AndAnd, BinaryOp::And)])
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            Self::additive,
            &[
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::NotEq, BinaryOp::Ne),
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Ge, BinaryOp::Ge),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            Self::multiplicative,
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            Self::unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let line = self.line();
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.consume();
        let operand = self.nested(Self::unary)?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        })
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            let line = self.line();
            match self.peek() {
                TokenKind::LParen => {
                    self.consume();
                    let args = self.arguments()?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        line,
                    };
                }
                TokenKind::LBracket => {
                    self.consume();
                    self.skip_newlines();
                    let index = self.expression()?;
                    self.skip_newlines();
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr {
                        kind: ExprKind::Index {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Call arguments after the opening parenthesis, consumes the closing one
    fn arguments(&mut self) -> Result<Vec<Arg>, EvalError> {
        let mut args = vec![];
        let mut seen_keyword = false;
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            let arg = match self.peek().clone() {
                TokenKind::Ident(name) if self.peek_at(1) == &TokenKind::Assign => {
                    self.consume();
                    self.consume();
                    seen_keyword = true;
                    Arg::Keyword(name, self.expression()?)
                }
                _ => {
                    if seen_keyword {
                        return Err(EvalError::new(
                            self.line(),
                            "positional argument after keyword argument",
                        ));
                    }
                    Arg::Positional(self.expression()?)
                }
            };
            args.push(arg);
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                self.skip_newlines();
                self.expect(TokenKind::RParen, "',' or ')'")?;
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            TokenKind::Int(value) => ExprKind::Int(value),
            TokenKind::Float(value) => ExprKind::Float(value),
            TokenKind::Str(value) => ExprKind::Str(value),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::Null => ExprKind::Null,
            TokenKind::Ident(name) => ExprKind::Var(name),
            TokenKind::LParen => {
                self.consume();
                self.skip_newlines();
                let inner = self.expression()?;
                self.skip_newlines();
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.consume();
                return Ok(Expr {
                    kind: ExprKind::List(self.list_items()?),
                    line,
                });
            }
            TokenKind::LBrace => {
                self.consume();
                return Ok(Expr {
                    kind: ExprKind::Map(self.map_entries()?),
                    line,
                });
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.consume();
        Ok(Expr { kind, line })
    }

    fn list_items(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut items = vec![];
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::RBracket) {
                return Ok(items);
            }
            items.push(self.expression()?);
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                self.skip_newlines();
                self.expect(TokenKind::RBracket, "',' or ']'")?;
                return Ok(items);
            }
        }
    }

    fn map_entries(&mut self) -> Result<Vec<(String, Expr)>, EvalError> {
        let mut entries = vec![];
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::RBrace) {
                return Ok(entries);
            }
            let key = match self.peek().clone() {
                TokenKind::Str(key) | TokenKind::Ident(key) => {
                    self.consume();
                    key
                }
                _ => return Err(self.unexpected("a map key")),
            };
            self.skip_newlines();
            self.expect(TokenKind::Colon, "':'")?;
            self.skip_newlines();
            entries.push((key, self.expression()?));
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                self.skip_newlines();
                self.expect(TokenKind::RBrace, "',' or '}'")?;
                return Ok(entries);
            }
        }
    }
}
