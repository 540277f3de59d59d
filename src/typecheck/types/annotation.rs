use num_traits::ToPrimitive;

use super::{DataLocation, IntType, Type, TypeDef, TypeFlags};
use crate::ast::{Expr, ExprKind};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::typecheck::namespace::{Binding, Namespace, VarKind};

/// Names of the built-in value types (`uint8`..`uint256`, `bytes1`.., ...).
pub(crate) fn primitive_type(name: &str) -> Option<Type> {
    match name {
        "bool" => return Some(Type::Bool),
        "address" => return Some(Type::Address),
        "decimal" => return Some(Type::Decimal),
        _ => {}
    }
    let int = |rest: &str, signed: bool| -> Option<Type> {
        let bits: u16 = rest.parse().ok()?;
        (bits % 8 == 0 && (8..=256).contains(&bits)).then_some(Type::Int(IntType::new(bits, signed)))
    };
    if let Some(rest) = name.strip_prefix("uint") {
        return int(rest, false);
    }
    if let Some(rest) = name.strip_prefix("int") {
        return int(rest, true);
    }
    if let Some(rest) = name.strip_prefix("bytes") {
        let m: u8 = rest.parse().ok()?;
        return (1..=32).contains(&m).then_some(Type::BytesM(m));
    }
    None
}

fn structure(message: impl Into<String>, expr: &Expr) -> Diagnostic {
    Diagnostic::error(ErrorKind::Structure, message, expr.span)
}

/// Build a located type from an annotation expression.
pub fn from_annotation(
    expr: &Expr,
    ns: &Namespace,
    location: DataLocation,
    flags: TypeFlags,
) -> Result<TypeDef, Diagnostic> {
    let typ = type_from_annotation(expr, ns)?;
    if typ.contains_hashmap() && location != DataLocation::Storage {
        return Err(structure(
            "HashMap can only be declared as a storage variable",
            expr,
        ));
    }
    Ok(TypeDef::new(typ, location).with_flags(flags))
}

/// Resolve an annotation expression to a type, without location checks.
/// Types too large to lay out in memory or storage are rejected.
pub fn type_from_annotation(expr: &Expr, ns: &Namespace) -> Result<Type, Diagnostic> {
    let typ = resolve_annotation(expr, ns)?;
    if !typ.has_bounded_size() {
        return Err(Diagnostic::error(
            ErrorKind::Overflow,
            format!("type {} is too large", typ),
            expr.span,
        ));
    }
    Ok(typ)
}

fn resolve_annotation(expr: &Expr, ns: &Namespace) -> Result<Type, Diagnostic> {
    match &expr.kind {
        ExprKind::Name(name) => {
            if let Some(t) = primitive_type(name) {
                return Ok(t);
            }
            match name.as_str() {
                "Bytes" | "String" | "HashMap" | "DynArray" => {
                    return Err(structure(
                        format!("type '{}' requires parameters in square brackets", name),
                        expr,
                    ))
                }
                _ => {}
            }
            match ns.get(name, expr.span)? {
                Binding::Type(t) => Ok(t.clone()),
                Binding::Event(_) => Err(structure(
                    format!("event '{}' cannot be used as a type", name),
                    expr,
                )),
                _ => Err(structure(format!("'{}' is not a type", name), expr)),
            }
        }
        ExprKind::Subscript { value, index } => subscript_type(value, index, ns),
        ExprKind::Tuple(items) => {
            let members = items
                .iter()
                .map(|e| type_from_annotation(e, ns))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Type::Tuple(members))
        }
        ExprKind::Call { func, .. } => Err(structure(
            format!(
                "'{}' is not a valid type annotation; unit annotations are not supported",
                func
            ),
            expr,
        )),
        _ => Err(structure(format!("invalid type annotation '{}'", expr), expr)),
    }
}

fn subscript_type(value: &Expr, index: &Expr, ns: &Namespace) -> Result<Type, Diagnostic> {
    match value.as_name() {
        Some("Bytes") => return Ok(Type::Bytes(parse_length(index, ns)?)),
        Some("String") => return Ok(Type::String(parse_length(index, ns)?)),
        Some("HashMap") => {
            let [key, val] = two_args(index, "HashMap")?;
            let key_type = type_from_annotation(key, ns)?;
            if !(key_type.is_value_type() || key_type.is_bytestring()) {
                return Err(structure(
                    format!("{} cannot be used as a HashMap key", key_type),
                    key,
                ));
            }
            let val_type = type_from_annotation(val, ns)?;
            return Ok(Type::HashMap(Box::new(key_type), Box::new(val_type)));
        }
        Some("DynArray") => {
            let [elem, len] = two_args(index, "DynArray")?;
            let elem_type = type_from_annotation(elem, ns)?;
            if elem_type.contains_hashmap() {
                return Err(structure("HashMap cannot be an array element", elem));
            }
            return Ok(Type::DynArray(Box::new(elem_type), parse_length(len, ns)?));
        }
        _ => {}
    }
    if let ExprKind::Subscript { value: inner, .. } = &value.kind {
        if matches!(inner.as_name(), Some("Bytes" | "String")) {
            return Err(structure(
                "multidimensional Bytes and String types are not supported",
                value,
            ));
        }
    }
    let elem_type = type_from_annotation(value, ns)?;
    if elem_type.contains_hashmap() {
        return Err(structure("HashMap cannot be an array element", value));
    }
    Ok(Type::Array(Box::new(elem_type), parse_length(index, ns)?))
}

fn two_args<'a>(index: &'a Expr, what: &str) -> Result<[&'a Expr; 2], Diagnostic> {
    match &index.kind {
        ExprKind::Tuple(items) if items.len() == 2 => Ok([&items[0], &items[1]]),
        _ => Err(structure(
            format!("{} requires exactly two comma-separated arguments", what),
            index,
        )),
    }
}

/// A bracketed length: a positive integer literal or integer constant.
fn parse_length(expr: &Expr, ns: &Namespace) -> Result<u64, Diagnostic> {
    let value = match &expr.kind {
        ExprKind::Int(v) => v.clone(),
        ExprKind::Name(name) => match ns.get(name, expr.span)? {
            Binding::Variable(var) if var.kind == VarKind::Constant => {
                match var.value.as_ref().and_then(|v| v.as_int()) {
                    Some(v) => v.clone(),
                    None => {
                        return Err(structure(
                            format!("constant '{}' is not an integer", name),
                            expr,
                        ))
                    }
                }
            }
            _ => {
                return Err(structure(
                    "array length must be a literal or an integer constant",
                    expr,
                ))
            }
        },
        _ => {
            return Err(structure(
                "array length must be a literal or an integer constant",
                expr,
            ))
        }
    };
    let zero = num_bigint::BigInt::from(0);
    if value <= zero {
        return Err(Diagnostic::error(
            ErrorKind::InvalidLiteral,
            format!("array length must be positive, got {}", value),
            expr.span,
        ));
    }
    value.to_u64().ok_or_else(|| {
        Diagnostic::error(
            ErrorKind::Overflow,
            format!("array length {} is too large", value),
            expr.span,
        )
    })
}
