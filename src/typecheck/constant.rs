//! Compile-time evaluation of literal operator trees.
//!
//! Folding is exact (`BigInt`); range checks happen when the folded literal
//! is typed. Integer division truncates toward zero and `%` takes the sign
//! of the dividend, matching the EVM's signed opcodes.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use super::types::{decimal_divisor, parse_decimal, DECIMAL_PLACES};
use crate::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::diagnostic::{Diagnostic, ErrorKind};

/// Largest shift or exponent folded; anything larger overflows every type.
const MAX_FOLD_EXPONENT: u32 = 512;

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Int(BigInt),
    /// Scaled by `10^DECIMAL_PLACES`.
    Decimal(BigInt),
}

/// Render a scaled decimal back into literal text.
pub fn format_decimal(scaled: &BigInt) -> String {
    let divisor = decimal_divisor();
    let sign = if scaled.is_negative() { "-" } else { "" };
    let abs = scaled.abs();
    let int_part = &abs / &divisor;
    let frac = (&abs % &divisor).to_string();
    let frac = format!("{:0>width$}", frac, width = DECIMAL_PLACES as usize);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{}{}.0", sign, int_part)
    } else {
        format!("{}{}.{}", sign, int_part, frac)
    }
}

/// Fold `expr` to a literal when it is built only from literals, named
/// constants (resolved through `constant`) and arithmetic. Returns `None`
/// for anything that needs runtime evaluation.
pub fn fold(
    expr: &Expr,
    constant: &dyn Fn(&str) -> Option<Expr>,
) -> Result<Option<Expr>, Diagnostic> {
    if expr.is_literal() {
        return Ok(Some(expr.clone()));
    }
    if let ExprKind::Name(name) = &expr.kind {
        return Ok(constant(name).map(|value| Expr {
            id: expr.id,
            kind: value.kind,
            span: expr.span,
        }));
    }
    let value = match evaluate(expr, constant)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let kind = match value {
        Value::Int(v) => ExprKind::Int(v),
        Value::Decimal(v) => ExprKind::Decimal(format_decimal(&v)),
    };
    Ok(Some(Expr {
        id: expr.id,
        kind,
        span: expr.span,
    }))
}

fn evaluate(
    expr: &Expr,
    constant: &dyn Fn(&str) -> Option<Expr>,
) -> Result<Option<Value>, Diagnostic> {
    match &expr.kind {
        ExprKind::Int(v) => Ok(Some(Value::Int(v.clone()))),
        ExprKind::Decimal(text) => Ok(parse_decimal(text).map(Value::Decimal)),
        ExprKind::Name(name) => match constant(name) {
            Some(value) => evaluate(&value, constant),
            None => Ok(None),
        },
        ExprKind::UnaryOp {
            op: UnaryOp::Neg,
            operand,
        } => Ok(evaluate(operand, constant)?.map(|v| match v {
            Value::Int(v) => Value::Int(-v),
            Value::Decimal(v) => Value::Decimal(-v),
        })),
        ExprKind::BinOp { op, left, right } => {
            let (Some(l), Some(r)) = (evaluate(left, constant)?, evaluate(right, constant)?) else {
                return Ok(None);
            };
            binary(*op, l, r, expr)
        }
        _ => Ok(None),
    }
}

fn binary(op: BinOp, l: Value, r: Value, expr: &Expr) -> Result<Option<Value>, Diagnostic> {
    let divide_by_zero = || {
        Diagnostic::error(ErrorKind::InvalidLiteral, "cannot divide by zero", expr.span)
    };
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let v = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div | BinOp::Mod if b.is_zero() => return Err(divide_by_zero()),
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                BinOp::Pow => {
                    let Some(exp) = b.to_u32().filter(|e| *e <= MAX_FOLD_EXPONENT) else {
                        return if b.is_negative() {
                            Err(Diagnostic::error(
                                ErrorKind::InvalidLiteral,
                                "exponent cannot be negative",
                                expr.span,
                            ))
                        } else if a.abs() <= BigInt::from(1) {
                            Ok(Some(Value::Int(if a.is_negative() && (b % 2u32) == BigInt::from(1) {
                                a
                            } else {
                                a.abs()
                            })))
                        } else {
                            Err(Diagnostic::error(
                                ErrorKind::Overflow,
                                format!("{} ** {} overflows every integer type", a, b),
                                expr.span,
                            ))
                        };
                    };
                    a.pow(exp)
                }
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                BinOp::BitXor => a ^ b,
                BinOp::Shl | BinOp::Shr => {
                    let Some(shift) = b.to_usize().filter(|s| *s <= MAX_FOLD_EXPONENT as usize)
                    else {
                        return Ok(None);
                    };
                    if op == BinOp::Shl {
                        a << shift
                    } else {
                        a >> shift
                    }
                }
            };
            Ok(Some(Value::Int(v)))
        }
        (l, r) => {
            let scale = |v: Value| match v {
                Value::Int(i) => i * decimal_divisor(),
                Value::Decimal(d) => d,
            };
            let (a, b) = (scale(l), scale(r));
            let v = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b / decimal_divisor(),
                BinOp::Div | BinOp::Mod if b.is_zero() => return Err(divide_by_zero()),
                BinOp::Div => a * decimal_divisor() / b,
                BinOp::Mod => a % b,
                _ => return Ok(None),
            };
            Ok(Some(Value::Decimal(v)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn e(kind: ExprKind) -> Expr {
        Expr {
            id: 0,
            kind,
            span: Span::dummy(),
        }
    }

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        e(ExprKind::BinOp {
            op,
            left: Box::new(l),
            right: Box::new(r),
        })
    }

    fn int(v: i64) -> Expr {
        e(ExprKind::Int(BigInt::from(v)))
    }

    fn no_constants(_: &str) -> Option<Expr> {
        None
    }

    #[test]
    fn folds_integer_arithmetic() {
        let tree = bin(BinOp::Add, int(2), bin(BinOp::Mul, int(3), int(4)));
        let folded = fold(&tree, &no_constants).unwrap().unwrap();
        assert_eq!(folded.as_int(), Some(&BigInt::from(14)));
    }

    #[test]
    fn division_truncates_toward_zero() {
        let folded = fold(&bin(BinOp::Div, int(-7), int(2)), &no_constants)
            .unwrap()
            .unwrap();
        assert_eq!(folded.as_int(), Some(&BigInt::from(-3)));
        let folded = fold(&bin(BinOp::Mod, int(-7), int(2)), &no_constants)
            .unwrap()
            .unwrap();
        assert_eq!(folded.as_int(), Some(&BigInt::from(-1)));
    }

    #[test]
    fn division_by_zero_is_rejected() {
        let err = fold(&bin(BinOp::Div, int(1), int(0)), &no_constants).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidLiteral);
    }

    #[test]
    fn decimal_arithmetic_rescales() {
        let tree = bin(
            BinOp::Mul,
            e(ExprKind::Decimal("1.5".into())),
            e(ExprKind::Decimal("2.5".into())),
        );
        let folded = fold(&tree, &no_constants).unwrap().unwrap();
        assert_eq!(folded.kind, ExprKind::Decimal("3.75".into()));
        let tree = bin(BinOp::Add, e(ExprKind::Decimal("0.5".into())), int(1));
        let folded = fold(&tree, &no_constants).unwrap().unwrap();
        assert_eq!(folded.kind, ExprKind::Decimal("1.5".into()));
    }

    #[test]
    fn named_constants_are_substituted() {
        let lookup = |name: &str| (name == "TEN").then(|| int(10));
        let tree = bin(BinOp::Sub, e(ExprKind::Name("TEN".into())), int(3));
        let folded = fold(&tree, &lookup).unwrap().unwrap();
        assert_eq!(folded.as_int(), Some(&BigInt::from(7)));
        let runtime = bin(BinOp::Sub, e(ExprKind::Name("x".into())), int(3));
        assert!(fold(&runtime, &lookup).unwrap().is_none());
    }

    #[test]
    fn huge_powers_overflow() {
        let err = fold(&bin(BinOp::Pow, int(2), int(100_000)), &no_constants).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[test]
    fn format_decimal_trims() {
        assert_eq!(format_decimal(&BigInt::from(15_000_000_000u64)), "1.5");
        assert_eq!(format_decimal(&BigInt::from(-10_000_000_000i64)), "-1.0");
    }
}
