//! Function signatures: decorators, arguments, return type, method ids,
//! and the call-graph sets filled in by the module analyzer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use alloy_primitives::keccak256;

use super::namespace::{validate_identifier, Namespace};
use super::types::{abi_param, from_annotation, DataLocation, Type, TypeFlags};
use crate::ast::{Expr, ExprKind, FunctionDecl, InterfaceFn};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    External,
    Internal,
}

/// Ordered by increasing state-access privilege.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

impl Mutability {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pure" => Some(Mutability::Pure),
            "view" => Some(Mutability::View),
            "nonpayable" => Some(Mutability::Nonpayable),
            "payable" => Some(Mutability::Payable),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mutability::Pure => "pure",
            Mutability::View => "view",
            Mutability::Nonpayable => "nonpayable",
            Mutability::Payable => "payable",
        }
    }
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug)]
pub struct ContractFunction {
    pub name: String,
    pub args: Vec<(String, Type)>,
    /// Default values of the trailing `defaults.len()` arguments.
    pub defaults: Vec<Expr>,
    pub return_type: Option<Type>,
    pub visibility: Visibility,
    pub mutability: Mutability,
    pub nonreentrant: Option<String>,
    pub is_constructor: bool,
    pub is_fallback: bool,
    /// Auto-generated getter of a public storage variable.
    pub is_getter: bool,
    /// Internal functions called directly from this body.
    pub called_functions: BTreeSet<String>,
    /// Transitive closure of `called_functions`.
    pub reachable_internal_functions: BTreeSet<String>,
    pub span: Span,
}

/// First four bytes of keccak256 of a signature.
pub fn method_id(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn structure(message: impl Into<String>, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorKind::Structure, message, span)
}

impl ContractFunction {
    pub(crate) fn empty(name: &str, span: Span) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            defaults: Vec::new(),
            return_type: None,
            visibility: Visibility::External,
            mutability: Mutability::Nonpayable,
            nonreentrant: None,
            is_constructor: false,
            is_fallback: false,
            is_getter: false,
            called_functions: BTreeSet::new(),
            reachable_internal_functions: BTreeSet::new(),
            span,
        }
    }

    pub fn from_decl(decl: &FunctionDecl, ns: &Namespace) -> Result<Self, Diagnostic> {
        let name = &decl.name.node;
        let mut func = Self::empty(name, decl.name.span);
        func.is_constructor = name == "__init__";
        func.is_fallback = name == "__default__";
        if !func.is_constructor && !func.is_fallback {
            validate_identifier(name, decl.name.span)?;
        }

        let mut visibility = None;
        let mut mutability = None;
        for deco in &decorators(decl)? {
            match deco {
                Decorator::Visibility(v, span) => {
                    if let Some(prev) = visibility.replace(*v) {
                        return Err(structure(
                            format!(
                                "visibility is already set to @{}",
                                if prev == Visibility::External { "external" } else { "internal" }
                            ),
                            *span,
                        ));
                    }
                }
                Decorator::Mutability(m, span) => {
                    if let Some(prev) = mutability.replace(*m) {
                        return Err(structure(
                            format!("mutability is already set to @{}", prev),
                            *span,
                        ));
                    }
                }
                Decorator::Nonreentrant(key, span) => {
                    if func.nonreentrant.replace(key.clone()).is_some() {
                        return Err(structure("only one @nonreentrant decorator is allowed", *span));
                    }
                }
            }
        }
        func.visibility = visibility.ok_or_else(|| {
            structure(
                format!(
                    "function '{}' must declare its visibility with @external or @internal",
                    name
                ),
                decl.name.span,
            )
        })?;
        func.mutability = mutability.unwrap_or(Mutability::Nonpayable);

        if func.visibility == Visibility::Internal && func.mutability == Mutability::Payable {
            return Err(structure("internal functions cannot be payable", decl.name.span));
        }
        if func.nonreentrant.is_some() && func.mutability == Mutability::Pure {
            return Err(structure(
                "@nonreentrant cannot be used on a pure function",
                decl.name.span,
            ));
        }
        if func.is_constructor {
            if func.nonreentrant.is_some() {
                return Err(structure(
                    "@nonreentrant decorator is not allowed on __init__",
                    decl.name.span,
                ));
            }
            if func.visibility != Visibility::External {
                return Err(structure("__init__ must be @external", decl.name.span));
            }
            if func.mutability < Mutability::Nonpayable {
                return Err(structure(
                    format!("__init__ cannot be {}", func.mutability),
                    decl.name.span,
                ));
            }
            if decl.returns.is_some() {
                return Err(structure("__init__ cannot return a value", decl.name.span));
            }
        }
        if func.is_fallback {
            if func.visibility != Visibility::External {
                return Err(structure("__default__ must be @external", decl.name.span));
            }
            if !decl.args.is_empty() {
                return Err(structure(
                    "__default__ cannot receive arguments",
                    decl.args[0].name.span,
                ));
            }
        }

        let location = match func.visibility {
            Visibility::External => DataLocation::Calldata,
            Visibility::Internal => DataLocation::Memory,
        };
        let mut seen = BTreeSet::new();
        for arg in &decl.args {
            if !seen.insert(arg.name.node.as_str()) {
                return Err(Diagnostic::error(
                    ErrorKind::Namespace,
                    format!("duplicate argument name '{}'", arg.name.node),
                    arg.name.span,
                ));
            }
            let def = from_annotation(&arg.annotation, ns, location, TypeFlags::default())?;
            match (&arg.default, func.defaults.is_empty()) {
                (Some(default), _) => func.defaults.push(default.clone()),
                (None, false) => {
                    return Err(structure(
                        "non-default argument follows default argument",
                        arg.name.span,
                    ))
                }
                (None, true) => {}
            }
            func.args.push((arg.name.node.clone(), def.typ));
        }
        if func.is_constructor && !func.defaults.is_empty() {
            return Err(structure(
                "__init__ arguments cannot have default values",
                func.span,
            ));
        }
        if let Some(ret) = &decl.returns {
            func.return_type =
                Some(from_annotation(ret, ns, DataLocation::Memory, TypeFlags::default())?.typ);
        }
        Ok(func)
    }

    pub fn from_interface_fn(decl: &InterfaceFn, ns: &Namespace) -> Result<Self, Diagnostic> {
        let mut func = Self::empty(&decl.name.node, decl.name.span);
        func.mutability = Mutability::from_name(&decl.mutability.node).ok_or_else(|| {
            structure(
                format!(
                    "interface function mutability must be pure, view, nonpayable or payable, not '{}'",
                    decl.mutability.node
                ),
                decl.mutability.span,
            )
        })?;
        for arg in &decl.args {
            let def = from_annotation(
                &arg.annotation,
                ns,
                DataLocation::Calldata,
                TypeFlags::default(),
            )?;
            func.args.push((arg.name.node.clone(), def.typ));
        }
        if let Some(ret) = &decl.returns {
            func.return_type =
                Some(from_annotation(ret, ns, DataLocation::Memory, TypeFlags::default())?.typ);
        }
        Ok(func)
    }

    /// External view getter for a public storage variable.
    pub fn getter(name: &str, args: Vec<(String, Type)>, ret: Type, span: Span) -> Self {
        let mut func = Self::empty(name, span);
        func.args = args;
        func.return_type = Some(ret);
        func.mutability = Mutability::View;
        func.is_getter = true;
        func
    }

    pub fn min_args(&self) -> usize {
        self.args.len() - self.defaults.len()
    }

    pub fn is_external(&self) -> bool {
        self.visibility == Visibility::External
    }

    pub fn is_mutating(&self) -> bool {
        self.mutability > Mutability::View
    }

    /// Canonical signature using the first `arity` arguments.
    pub fn signature(&self, arity: usize) -> String {
        let types: Vec<String> = self.args[..arity]
            .iter()
            .map(|(_, t)| t.canonical())
            .collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// One `(signature, method id)` per callable arity, fewest arguments first.
    pub fn method_ids(&self) -> Vec<(String, [u8; 4])> {
        (self.min_args()..=self.args.len())
            .map(|arity| {
                let sig = self.signature(arity);
                let id = method_id(&sig);
                (sig, id)
            })
            .collect()
    }

    /// Map of signature to `0x`-prefixed method id.
    pub fn method_identifiers(&self) -> BTreeMap<String, String> {
        self.method_ids()
            .into_iter()
            .map(|(sig, id)| (sig, format!("0x{}", hex_string(&id))))
            .collect()
    }

    /// ABI entries, one per arity for functions with defaults.
    pub fn to_abi(&self) -> Vec<serde_json::Value> {
        if !self.is_external() {
            return Vec::new();
        }
        let mutability = self.mutability.name();
        if self.is_fallback {
            return vec![serde_json::json!({
                "type": "fallback",
                "stateMutability": mutability,
            })];
        }
        let outputs: Vec<serde_json::Value> = match &self.return_type {
            Some(Type::Tuple(ts)) => ts.iter().map(|t| abi_param("", t)).collect(),
            Some(t) => vec![abi_param("", t)],
            None => Vec::new(),
        };
        if self.is_constructor {
            let inputs: Vec<serde_json::Value> =
                self.args.iter().map(|(n, t)| abi_param(n, t)).collect();
            return vec![serde_json::json!({
                "type": "constructor",
                "inputs": inputs,
                "stateMutability": mutability,
            })];
        }
        (self.min_args()..=self.args.len())
            .map(|arity| {
                let inputs: Vec<serde_json::Value> = self.args[..arity]
                    .iter()
                    .map(|(n, t)| abi_param(n, t))
                    .collect();
                serde_json::json!({
                    "type": "function",
                    "name": self.name,
                    "inputs": inputs,
                    "outputs": outputs,
                    "stateMutability": mutability,
                })
            })
            .collect()
    }
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

enum Decorator {
    Visibility(Visibility, Span),
    Mutability(Mutability, Span),
    Nonreentrant(String, Span),
}

fn decorators(decl: &FunctionDecl) -> Result<Vec<Decorator>, Diagnostic> {
    decl.decorators.iter().map(parse_decorator).collect()
}

fn parse_decorator(expr: &Expr) -> Result<Decorator, Diagnostic> {
    match &expr.kind {
        ExprKind::Name(name) => match name.as_str() {
            "external" => Ok(Decorator::Visibility(Visibility::External, expr.span)),
            "internal" => Ok(Decorator::Visibility(Visibility::Internal, expr.span)),
            other => match Mutability::from_name(other) {
                Some(m) => Ok(Decorator::Mutability(m, expr.span)),
                None => Err(structure(format!("unknown decorator @{}", other), expr.span)),
            },
        },
        ExprKind::Call { func, args, keywords } if func.as_name() == Some("nonreentrant") => {
            match (args.as_slice(), keywords.is_empty()) {
                ([key], true) => match &key.kind {
                    ExprKind::Str(k) if !k.is_empty() => {
                        Ok(Decorator::Nonreentrant(k.clone(), expr.span))
                    }
                    _ => Err(structure(
                        "@nonreentrant requires a non-empty string literal key",
                        key.span,
                    )),
                },
                _ => Err(structure(
                    "@nonreentrant takes exactly one argument",
                    expr.span,
                )),
            }
        }
        _ => Err(structure(format!("unknown decorator @{}", expr), expr.span)),
    }
}
