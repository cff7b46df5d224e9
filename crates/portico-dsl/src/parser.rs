//! Recursive-descent parser.
//!
//! Precedence ladder, loosest first: pipe, ternary, `||`, `&&`, equality,
//! comparison, additive, multiplicative, unary, postfix (member / index /
//! call), primary. Pipes are desugared during parsing: `x | f(a)` becomes
//! `f(x, a)` and `x | f` becomes `f(x)`.

use crate::DslError;
use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::lexer::{Token, TokenKind, tokenize};

/// Parse a template expression into an AST.
///
/// # Errors
///
/// Returns a [`DslError`] with the source offset of the failure.
pub fn parse(source: &str) -> Result<Expr, DslError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, current: 0 };
    let expr = parser.parse_pipe()?;
    let trailing = parser.current_token();
    if trailing.kind != TokenKind::Eof {
        return Err(DslError::at(
            format!("unexpected trailing input: {:?}", trailing.kind),
            trailing.pos,
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn current_token(&self) -> &Token {
        // The token vector always ends with Eof.
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current_token().clone();
        if token.kind != TokenKind::Eof {
            self.current += 1;
        }
        token
    }

    fn matches(&self, kind: &TokenKind) -> bool {
        &self.current_token().kind == kind
    }

    fn consume(&mut self, kind: &TokenKind, what: &str) -> Result<Token, DslError> {
        if self.matches(kind) {
            Ok(self.advance())
        } else {
            let token = self.current_token();
            Err(DslError::at(
                format!("expected {what}, got {:?}", token.kind),
                token.pos,
            ))
        }
    }

    fn parse_pipe(&mut self) -> Result<Expr, DslError> {
        let mut expr = self.parse_conditional()?;

        while self.matches(&TokenKind::Pipe) {
            let pipe_pos = self.advance().pos;
            let rhs = self.parse_conditional()?;
            expr = match rhs {
                Expr::Call { function, mut args } => {
                    args.insert(0, expr);
                    Expr::Call { function, args }
                }
                Expr::Ident(function) => Expr::Call {
                    function,
                    args: vec![expr],
                },
                _ => {
                    return Err(DslError::at(
                        "pipe target must be a function call",
                        pipe_pos,
                    ));
                }
            };
        }

        Ok(expr)
    }

    fn parse_conditional(&mut self) -> Result<Expr, DslError> {
        let expr = self.parse_binary(1)?;

        if self.matches(&TokenKind::Question) {
            self.advance();
            let then_expr = self.parse_conditional()?;
            self.consume(&TokenKind::Colon, "':' in ternary")?;
            let else_expr = self.parse_conditional()?;
            return Ok(Expr::Ternary {
                condition: Box::new(expr),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }

        Ok(expr)
    }

    fn binary_op_at(&self, min_precedence: u8) -> Option<BinaryOp> {
        let op = match self.current_token().kind {
            TokenKind::OrOr => BinaryOp::Or,
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            _ => return None,
        };
        (precedence_of(op) >= min_precedence).then_some(op)
    }

    /// Precedence-climbing loop over all left-associative binary operators.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, DslError> {
        let mut left = self.parse_unary()?;

        while let Some(op) = self.binary_op_at(min_precedence) {
            self.advance();
            let right = self.parse_binary(precedence_of(op) + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, DslError> {
        let op = match self.current_token().kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, DslError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.matches(&TokenKind::Dot) {
                self.advance();
                let token = self.advance();
                let TokenKind::Ident(name) = token.kind else {
                    return Err(DslError::at("expected property name after '.'", token.pos));
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: name,
                };
            } else if self.matches(&TokenKind::LBracket) {
                self.advance();
                let index = self.parse_pipe()?;
                self.consume(&TokenKind::RBracket, "']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.matches(&TokenKind::LParen) {
                let paren_pos = self.advance().pos;
                // Only named functions are callable; there are no function values.
                let Expr::Ident(function) = expr else {
                    return Err(DslError::at("only named functions can be called", paren_pos));
                };
                let mut args = Vec::new();
                if !self.matches(&TokenKind::RParen) {
                    args.push(self.parse_pipe()?);
                    while self.matches(&TokenKind::Comma) {
                        self.advance();
                        if self.matches(&TokenKind::RParen) {
                            break;
                        }
                        args.push(self.parse_pipe()?);
                    }
                }
                self.consume(&TokenKind::RParen, "')'")?;
                expr = Expr::Call { function, args };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, DslError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(lexeme) => {
                let value = if lexeme.contains('.') {
                    let n: f64 = lexeme
                        .parse()
                        .map_err(|_| DslError::at("invalid number literal", token.pos))?;
                    serde_json::Number::from_f64(n)
                        .ok_or_else(|| DslError::at("invalid number literal", token.pos))?
                } else {
                    let n: i64 = lexeme
                        .parse()
                        .map_err(|_| DslError::at("integer literal out of range", token.pos))?;
                    serde_json::Number::from(n)
                };
                Ok(Expr::Literal(serde_json::Value::Number(value)))
            }
            TokenKind::Str(s) => Ok(Expr::Literal(serde_json::Value::String(s))),
            TokenKind::Bool(b) => Ok(Expr::Literal(serde_json::Value::Bool(b))),
            TokenKind::Null => Ok(Expr::Literal(serde_json::Value::Null)),
            TokenKind::Ident(name) => Ok(Expr::Ident(name)),
            TokenKind::LParen => {
                let expr = self.parse_pipe()?;
                self.consume(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                let mut elements = Vec::new();
                if !self.matches(&TokenKind::RBracket) {
                    elements.push(self.parse_pipe()?);
                    while self.matches(&TokenKind::Comma) {
                        self.advance();
                        if self.matches(&TokenKind::RBracket) {
                            break;
                        }
                        elements.push(self.parse_pipe()?);
                    }
                }
                self.consume(&TokenKind::RBracket, "']'")?;
                Ok(Expr::Array(elements))
            }
            TokenKind::LBrace => {
                let mut properties = Vec::new();
                if !self.matches(&TokenKind::RBrace) {
                    properties.push(self.parse_object_property()?);
                    while self.matches(&TokenKind::Comma) {
                        self.advance();
                        if self.matches(&TokenKind::RBrace) {
                            break;
                        }
                        properties.push(self.parse_object_property()?);
                    }
                }
                self.consume(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::Object(properties))
            }
            other => Err(DslError::at(
                format!("unexpected token: {other:?}"),
                token.pos,
            )),
        }
    }

    fn parse_object_property(&mut self) -> Result<(String, Expr), DslError> {
        let token = self.advance();
        let key = match token.kind {
            TokenKind::Ident(name) => name,
            TokenKind::Str(s) => s,
            other => {
                return Err(DslError::at(
                    format!("expected property key, got {other:?}"),
                    token.pos,
                ));
            }
        };
        self.consume(&TokenKind::Colon, "':' after property key")?;
        let value = self.parse_pipe()?;
        Ok((key, value))
    }
}

fn precedence_of(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq | BinaryOp::Ne => 3,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
    }
}
