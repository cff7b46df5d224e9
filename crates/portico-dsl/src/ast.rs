//! Expression AST and its canonical textual form.
//!
//! `Display` prints an expression back to source text that re-parses to an
//! equivalent AST; printing is fully parenthesization-aware so no grouping
//! information is lost.

use crate::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Neg => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    /// Binding strength for printing; higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne => 3,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Mod => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

impl Expr {
    /// Binding strength of this node for parenthesization when printing.
    fn precedence(&self) -> u8 {
        match self {
            Self::Ternary { .. } => 0,
            Self::Binary { op, .. } => op.precedence(),
            Self::Unary { .. } => 7,
            Self::Literal(_)
            | Self::Ident(_)
            | Self::Member { .. }
            | Self::Index { .. }
            | Self::Call { .. }
            | Self::Array(_)
            | Self::Object(_) => 8,
        }
    }

    fn fmt_child(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        min_precedence: u8,
    ) -> std::fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

fn fmt_string_literal(f: &mut std::fmt::Formatter<'_>, s: &str) -> std::fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(Value::String(s)) => fmt_string_literal(f, s),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Ident(name) => f.write_str(name),
            Self::Member { object, property } => {
                object.fmt_child(f, 8)?;
                write!(f, ".{property}")
            }
            Self::Index { object, index } => {
                object.fmt_child(f, 8)?;
                write!(f, "[{index}]")
            }
            Self::Call { function, args } => {
                write!(f, "{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Unary { op, operand } => {
                f.write_str(op.as_str())?;
                operand.fmt_child(f, 7)
            }
            Self::Binary { op, left, right } => {
                // Left-associative: the right child needs strictly tighter binding.
                left.fmt_child(f, op.precedence())?;
                write!(f, " {} ", op.as_str())?;
                right.fmt_child(f, op.precedence() + 1)
            }
            Self::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                condition.fmt_child(f, 1)?;
                write!(f, " ? {then_expr} : {else_expr}")
            }
            Self::Array(elements) => {
                f.write_str("[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
            Self::Object(properties) => {
                f.write_str("{")?;
                for (i, (k, v)) in properties.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if k.chars().enumerate().all(|(i, c)| {
                        c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit())
                    }) && !k.is_empty()
                    {
                        write!(f, "{k}: {v}")?;
                    } else {
                        fmt_string_literal(f, k)?;
                        write!(f, ": {v}")?;
                    }
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BinaryOp, Expr};
    use serde_json::json;

    #[test]
    fn printing_parenthesizes_by_precedence() {
        // (a + b) * c must keep its grouping.
        let expr = Expr::Binary {
            op: BinaryOp::Mul,
            left: Box::new(Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::Ident("a".into())),
                right: Box::new(Expr::Ident("b".into())),
            }),
            right: Box::new(Expr::Ident("c".into())),
        };
        assert_eq!(expr.to_string(), "(a + b) * c");
    }

    #[test]
    fn printing_escapes_string_literals() {
        let expr = Expr::Literal(json!("he said \"hi\"\n"));
        assert_eq!(expr.to_string(), r#""he said \"hi\"\n""#);
    }
}
