//! Source-like rendering of expressions, used in diagnostics and IR annotations.

use std::fmt;

use super::{BoolOpKind, Expr, ExprKind, UnaryOp};

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Int(n) => write!(f, "{}", n),
            ExprKind::Decimal(s) | ExprKind::Hex(s) => f.write_str(s),
            ExprKind::Str(s) => write!(f, "{:?}", s),
            ExprKind::Bytes(b) => {
                f.write_str("b\"")?;
                for byte in b {
                    if byte.is_ascii_graphic() || *byte == b' ' {
                        write!(f, "{}", *byte as char)?;
                    } else {
                        write!(f, "\\x{:02x}", byte)?;
                    }
                }
                f.write_str("\"")
            }
            ExprKind::Bool(true) => f.write_str("True"),
            ExprKind::Bool(false) => f.write_str("False"),
            ExprKind::Name(n) => f.write_str(n),
            ExprKind::Attribute { value, attr } => write!(f, "{}.{}", value, attr.node),
            ExprKind::Subscript { value, index } => write!(f, "{}[{}]", value, index),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                write!(f, "{}(", func)?;
                let mut first = true;
                for arg in args {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{}", arg)?;
                }
                for kw in keywords {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{}={}", kw.name.node, kw.value)?;
                }
                f.write_str(")")
            }
            ExprKind::BinOp { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            ExprKind::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "not {}", operand),
                UnaryOp::Neg => write!(f, "-{}", operand),
                UnaryOp::Invert => write!(f, "~{}", operand),
            },
            ExprKind::Compare { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            ExprKind::BoolOp { op, values } => {
                let sep = match op {
                    BoolOpKind::And => " and ",
                    BoolOpKind::Or => " or ",
                };
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                f.write_str(&parts.join(sep))
            }
            ExprKind::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            ExprKind::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            ExprKind::Dict(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.node, v))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Span, Spanned};
    use num_bigint::BigInt;

    fn e(kind: ExprKind) -> Expr {
        Expr {
            id: 0,
            kind,
            span: Span::dummy(),
        }
    }

    #[test]
    fn renders_subscript_chain() {
        let expr = e(ExprKind::Subscript {
            value: Box::new(e(ExprKind::Attribute {
                value: Box::new(e(ExprKind::Name("self".into()))),
                attr: Spanned::dummy("balances".into()),
            })),
            index: Box::new(e(ExprKind::Name("x".into()))),
        });
        assert_eq!(expr.to_string(), "self.balances[x]");
    }

    #[test]
    fn renders_call_with_keywords() {
        let expr = e(ExprKind::Call {
            func: Box::new(e(ExprKind::Name("raw_call".into()))),
            args: vec![e(ExprKind::Name("to".into()))],
            keywords: vec![super::super::Keyword {
                name: Spanned::dummy("value".into()),
                value: e(ExprKind::Int(BigInt::from(5))),
            }],
        });
        assert_eq!(expr.to_string(), "raw_call(to, value=5)");
    }
}
