//! Import resolution: turning an imported module or JSON ABI into an
//! interface type usable in the importing contract.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::function::{ContractFunction, Mutability, Visibility};
use super::module::{analyze_with, AnalysisOptions};
use super::types::{IntType, Type};
use super::InterfaceType;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::Span;

/// Capacity given to dynamic ABI types, which carry no bound of their own.
pub const ABI_DYNAMIC_CAPACITY: u64 = 1024;

/// Where the contents of an imported path come from.
#[derive(Clone, Debug)]
pub enum ImportSource {
    /// Contract source code, analyzed on its own.
    Source(String),
    /// A JSON ABI array.
    AbiJson(Value),
}

/// Maps a dotted import path (`a.b.C`, or `.C` for relative imports) to
/// its contents.
pub trait ImportResolver {
    fn resolve(&self, path: &str) -> Option<ImportSource>;
}

impl<F> ImportResolver for F
where
    F: Fn(&str) -> Option<ImportSource>,
{
    fn resolve(&self, path: &str) -> Option<ImportSource> {
        self(path)
    }
}

fn import_error(message: impl Into<String>, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorKind::Namespace, message, span)
}

/// Resolve `path` and build the interface bound to `alias`.
pub fn resolve_import(
    path: &str,
    alias: &str,
    span: Span,
    options: &AnalysisOptions<'_>,
) -> Result<InterfaceType, Diagnostic> {
    if options.import_stack.iter().any(|p| p == path) {
        let mut chain = options.import_stack.clone();
        chain.push(path.to_string());
        return Err(Diagnostic::error(
            ErrorKind::Structure,
            format!("circular import: {}", chain.join(" -> ")),
            span,
        ));
    }
    let resolver = options
        .resolver
        .ok_or_else(|| import_error(format!("cannot resolve import '{}'", path), span))?;
    let source = resolver
        .resolve(path)
        .ok_or_else(|| import_error(format!("cannot resolve import '{}'", path), span))?;
    debug!(path, alias, "resolved import");
    match source {
        ImportSource::AbiJson(abi) => interface_from_abi(alias, &abi, span),
        ImportSource::Source(code) => {
            let mut nested = options.clone();
            nested.storage_layout = None;
            nested.import_stack.push(path.to_string());
            interface_from_source(alias, path, &code, &nested, span)
        }
    }
}

/// Analyze imported source under a fresh namespace and expose its external
/// functions.
fn interface_from_source(
    alias: &str,
    path: &str,
    code: &str,
    options: &AnalysisOptions<'_>,
    span: Span,
) -> Result<InterfaceType, Diagnostic> {
    let nested_error = |errors: Vec<Diagnostic>| {
        let first = errors
            .into_iter()
            .next()
            .map(|d| d.message)
            .unwrap_or_default();
        Diagnostic::error(
            ErrorKind::Namespace,
            format!("imported module '{}' failed to compile: {}", path, first),
            span,
        )
    };
    let module = crate::parse_source(code, 1).map_err(nested_error)?;
    let analysis = analyze_with(&module, options.clone()).map_err(nested_error)?;
    let functions = analysis
        .contract
        .functions
        .into_iter()
        .filter(|(_, f)| f.is_external() && !f.is_constructor && !f.is_fallback)
        .collect();
    Ok(InterfaceType {
        name: alias.to_string(),
        functions,
    })
}

/// Build an interface from a JSON ABI array. Only `function` entries are
/// callable; events and constructors are ignored.
pub fn interface_from_abi(alias: &str, abi: &Value, span: Span) -> Result<InterfaceType, Diagnostic> {
    let bad = |what: String| import_error(format!("invalid ABI for '{}': {}", alias, what), span);
    let entries = abi
        .as_array()
        .ok_or_else(|| bad("expected a JSON array".to_string()))?;
    let mut functions = BTreeMap::new();
    for entry in entries {
        if entry.get("type").and_then(Value::as_str) != Some("function") {
            continue;
        }
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| bad("function entry without a name".to_string()))?;
        let params = |key: &str| -> Result<Vec<(String, Type)>, Diagnostic> {
            let list = match entry.get(key) {
                Some(Value::Array(list)) => list.as_slice(),
                _ => &[],
            };
            list.iter()
                .enumerate()
                .map(|(i, p)| {
                    let typ = abi_param_type(p)
                        .ok_or_else(|| bad(format!("unsupported type in '{}'", name)))?;
                    let pname = p
                        .get("name")
                        .and_then(Value::as_str)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("arg{}", i));
                    Ok((pname, typ))
                })
                .collect()
        };
        let inputs = params("inputs")?;
        let mut outputs: Vec<Type> = params("outputs")?.into_iter().map(|(_, t)| t).collect();
        let return_type = match outputs.len() {
            0 => None,
            1 => outputs.pop(),
            _ => Some(Type::Tuple(outputs)),
        };
        let mutability = entry
            .get("stateMutability")
            .and_then(Value::as_str)
            .and_then(Mutability::from_name)
            .unwrap_or_else(|| {
                if entry.get("constant").and_then(Value::as_bool) == Some(true) {
                    Mutability::View
                } else if entry.get("payable").and_then(Value::as_bool) == Some(true) {
                    Mutability::Payable
                } else {
                    Mutability::Nonpayable
                }
            });
        let mut func = ContractFunction::empty(name, span);
        func.args = inputs;
        func.return_type = return_type;
        func.mutability = mutability;
        func.visibility = Visibility::External;
        functions.insert(name.to_string(), func);
    }
    Ok(InterfaceType {
        name: alias.to_string(),
        functions,
    })
}

/// Type of one ABI parameter object (`{"type": ..., "components": ...}`).
pub fn abi_param_type(param: &Value) -> Option<Type> {
    let typ = param.get("type")?.as_str()?;
    abi_type(typ, param.get("components"))
}

fn abi_type(typ: &str, components: Option<&Value>) -> Option<Type> {
    if let Some(inner) = typ.strip_suffix("[]") {
        let elem = abi_type(inner, components)?;
        return Some(Type::DynArray(Box::new(elem), ABI_DYNAMIC_CAPACITY));
    }
    if let Some(body) = typ.strip_suffix(']') {
        let i = body.rfind('[')?;
        let len: u64 = body[i + 1..].parse().ok()?;
        let elem = abi_type(&body[..i], components)?;
        return Some(Type::Array(Box::new(elem), len));
    }
    match typ {
        "bool" => Some(Type::Bool),
        "address" => Some(Type::Address),
        "bytes" => Some(Type::Bytes(ABI_DYNAMIC_CAPACITY)),
        "string" => Some(Type::String(ABI_DYNAMIC_CAPACITY)),
        "fixed168x10" => Some(Type::Decimal),
        "tuple" => {
            let members = components?
                .as_array()?
                .iter()
                .map(abi_param_type)
                .collect::<Option<Vec<_>>>()?;
            Some(Type::Tuple(members))
        }
        _ => {
            if let Some(bits) = typ.strip_prefix("uint") {
                return int_type(bits, false);
            }
            if let Some(bits) = typ.strip_prefix("int") {
                return int_type(bits, true);
            }
            let n: u8 = typ.strip_prefix("bytes")?.parse().ok()?;
            (1..=32).contains(&n).then_some(Type::BytesM(n))
        }
    }
}

fn int_type(bits: &str, signed: bool) -> Option<Type> {
    let bits: u16 = if bits.is_empty() { 256 } else { bits.parse().ok()? };
    (bits % 8 == 0 && (8..=256).contains(&bits)).then(|| Type::Int(IntType::new(bits, signed)))
}
