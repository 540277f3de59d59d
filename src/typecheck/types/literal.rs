use std::str::FromStr;

use alloy_primitives::Address;
use num_bigint::BigInt;
use num_traits::Num;

use super::{decimal_divisor, DataLocation, IntType, Type, TypeDef, DECIMAL_PLACES};
use crate::ast::{Expr, ExprKind};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::Span;

/// EIP-55 checksummed form of a hex address, if it parses as 20 bytes.
pub fn checksum_address(hex: &str) -> Option<String> {
    let addr = Address::from_str(hex).ok()?;
    Some(addr.to_checksum(None))
}

/// Parse decimal source text into its scaled integer representation.
/// Returns `None` for malformed text or more than `DECIMAL_PLACES` digits
/// after the point.
pub fn parse_decimal(text: &str) -> Option<BigInt> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    if frac_part.len() > DECIMAL_PLACES as usize {
        return None;
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let digits = format!(
        "{}{:0<width$}",
        int_part,
        frac_part,
        width = DECIMAL_PLACES as usize
    );
    let value = BigInt::from_str(&digits).ok()?;
    Some(if negative { -value } else { value })
}

pub(crate) fn hex_value(text: &str) -> Option<BigInt> {
    let digits = text.get(2..)?;
    if digits.is_empty() {
        return None;
    }
    BigInt::from_str_radix(digits, 16).ok()
}

fn invalid(message: String, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorKind::InvalidLiteral, message, span)
}

fn int_candidates(value: &BigInt, span: Span) -> Result<Vec<Type>, Diagnostic> {
    let out: Vec<Type> = IntType::all()
        .into_iter()
        .filter(|t| t.contains(value))
        .map(Type::Int)
        .collect();
    if out.is_empty() {
        return Err(Diagnostic::error(
            ErrorKind::Overflow,
            format!("integer literal {} does not fit in any integer type", value),
            span,
        ));
    }
    Ok(out)
}

/// Every type a literal may take, most preferred first.
pub fn literal_types(expr: &Expr) -> Result<Vec<Type>, Diagnostic> {
    match &expr.kind {
        ExprKind::Int(value) => int_candidates(value, expr.span),
        ExprKind::Decimal(_) => {
            Type::Decimal.from_literal(expr)?;
            Ok(vec![Type::Decimal])
        }
        ExprKind::Hex(text) => {
            if text.len() == 42 {
                check_address(text, expr.span)?;
                return Ok(vec![Type::Address, Type::BytesM(20)]);
            }
            let value = hex_value(text)
                .ok_or_else(|| invalid(format!("malformed hex literal {}", text), expr.span))?;
            let digits = text.len() - 2;
            let mut out = Vec::new();
            if digits % 2 == 0 && digits <= 64 {
                out.push(Type::BytesM((digits / 2) as u8));
            }
            out.extend(
                IntType::all()
                    .into_iter()
                    .filter(|t| !t.signed && t.contains(&value))
                    .map(Type::Int),
            );
            if out.is_empty() {
                return Err(invalid(
                    format!("hex literal {} is too long for any type", text),
                    expr.span,
                ));
            }
            Ok(out)
        }
        ExprKind::Str(s) => Ok(vec![Type::String(s.len() as u64)]),
        ExprKind::Bytes(b) => Ok(vec![Type::Bytes(b.len() as u64)]),
        ExprKind::Bool(_) => Ok(vec![Type::Bool]),
        _ => Err(Diagnostic::error(
            ErrorKind::Structure,
            format!("'{}' is not a literal", expr),
            expr.span,
        )),
    }
}

fn check_address(text: &str, span: Span) -> Result<(), Diagnostic> {
    if text.len() != 42 {
        return Err(invalid(
            format!(
                "address literal must be exactly 42 characters including the 0x prefix, got {}",
                text.len()
            ),
            span,
        ));
    }
    let correct = checksum_address(text)
        .ok_or_else(|| invalid(format!("{} is not a valid address", text), span))?;
    if correct != text {
        return Err(invalid(
            format!("address checksum mismatch for {}", text),
            span,
        )
        .with_help(format!("the correctly checksummed form is {}", correct)));
    }
    Ok(())
}

fn bound_text(typ: &Type, bound: &BigInt) -> String {
    match typ {
        Type::Decimal => (bound / decimal_divisor()).to_string(),
        _ => bound.to_string(),
    }
}

fn check_bounds(typ: &Type, value: &BigInt, shown: &str, span: Span) -> Result<(), Diagnostic> {
    let Some((lo, hi)) = typ.bounds() else {
        return Ok(());
    };
    if *value < lo {
        return Err(Diagnostic::error(
            ErrorKind::Overflow,
            format!(
                "value {} is below the lower bound of {} ({})",
                shown,
                typ,
                bound_text(typ, &lo)
            ),
            span,
        ));
    }
    if *value > hi {
        return Err(Diagnostic::error(
            ErrorKind::Overflow,
            format!(
                "value {} exceeds the upper bound of {} ({})",
                shown,
                typ,
                bound_text(typ, &hi)
            ),
            span,
        ));
    }
    Ok(())
}

impl Type {
    /// Type a literal as this type. Fails when the literal's class is not
    /// accepted by the type, or when its value is out of range.
    pub fn from_literal(&self, expr: &Expr) -> Result<TypeDef, Diagnostic> {
        self.check_literal(expr)?;
        Ok(TypeDef::new(self.clone(), DataLocation::Unset))
    }

    fn check_literal(&self, expr: &Expr) -> Result<(), Diagnostic> {
        let span = expr.span;
        match (&expr.kind, self) {
            (ExprKind::Int(v), Type::Int(_)) => check_bounds(self, v, &v.to_string(), span),
            (ExprKind::Int(v), Type::Decimal) => {
                check_bounds(self, &(v * decimal_divisor()), &v.to_string(), span)
            }
            (ExprKind::Decimal(text), Type::Decimal) => {
                let value = parse_decimal(text).ok_or_else(|| {
                    invalid(
                        format!(
                            "decimal literal {} has more than {} decimal places",
                            text, DECIMAL_PLACES
                        ),
                        span,
                    )
                })?;
                check_bounds(self, &value, text, span)
            }
            (ExprKind::Hex(text), Type::Address) => check_address(text, span),
            (ExprKind::Hex(text), Type::BytesM(m)) => {
                if text.len() == 42 {
                    check_address(text, span)?;
                }
                if text.len() - 2 != 2 * *m as usize {
                    return Err(invalid(
                        format!("{} is not a valid bytes{} literal", text, m),
                        span,
                    )
                    .with_note(format!("expected exactly {} hex digits", 2 * m)));
                }
                Ok(())
            }
            (ExprKind::Hex(text), Type::Int(it)) if !it.signed => {
                if text.len() == 42 {
                    check_address(text, span)?;
                }
                let value = hex_value(text)
                    .ok_or_else(|| invalid(format!("malformed hex literal {}", text), span))?;
                check_bounds(self, &value, text, span)
            }
            (ExprKind::Str(s), Type::String(n)) => {
                if s.len() as u64 > *n {
                    return Err(invalid(
                        format!("string literal of length {} does not fit in {}", s.len(), self),
                        span,
                    ));
                }
                Ok(())
            }
            (ExprKind::Bytes(b), Type::Bytes(n)) => {
                if b.len() as u64 > *n {
                    return Err(invalid(
                        format!("bytes literal of length {} does not fit in {}", b.len(), self),
                        span,
                    ));
                }
                Ok(())
            }
            (ExprKind::Bytes(b), Type::BytesM(m)) if b.len() == *m as usize => Ok(()),
            (ExprKind::Bool(_), Type::Bool) => Ok(()),
            _ => Err(invalid(
                format!("{} is not a valid literal for type {}", expr, self),
                span,
            )),
        }
    }
}
