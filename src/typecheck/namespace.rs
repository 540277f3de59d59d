//! Scoped symbol table for one compilation.
//!
//! The outermost scope is seeded with the primitive types, environment
//! variables and builtin functions. Each function body and each block pushes
//! a scope; popping it removes exactly the names that scope added.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};

use tracing::trace;

use super::builtins::Builtin;
use super::events::EventDef;
use super::types::{DataPosition, IntType, Type, TypeDef};
use crate::ast::Expr;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::ir::opcodes;
use crate::span::Span;

/// Words that can never be bound, compared case-insensitively.
const RESERVED_WORDS: &[&str] = &[
    "if", "elif", "else", "for", "in", "not", "and", "or", "def", "event", "struct",
    "interface", "enum", "import", "from", "as", "return", "pass", "break", "continue",
    "assert", "raise", "log", "true", "false", "none", "this", "range", "public",
    "constant", "immutable", "indexed", "external", "internal", "view", "pure", "payable",
    "nonpayable", "nonreentrant", "bytes", "string", "hashmap", "dynarray", "unreachable",
    "ether", "wei", "gwei", "finney", "szabo", "units", "zero_address", "empty_bytes32",
    "max_uint256", "max_int128", "min_int128", "max_decimal", "min_decimal", "while",
    "try", "except", "lambda", "with", "yield", "class", "global", "del",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Local,
    Argument,
    LoopVar,
    Constant,
    Immutable,
    Storage,
}

/// A variable visible in some scope, or a storage member of `self`.
#[derive(Clone, Debug)]
pub struct VarInfo {
    pub def: TypeDef,
    pub kind: VarKind,
    /// Folded initializer of a constant.
    pub value: Option<Expr>,
    pub position: Option<DataPosition>,
    pub span: Span,
}

impl VarInfo {
    pub fn new(def: TypeDef, kind: VarKind, span: Span) -> Self {
        Self {
            def,
            kind,
            value: None,
            position: None,
            span,
        }
    }

    pub fn typ(&self) -> &Type {
        &self.def.typ
    }
}

/// Environment objects: `block`, `msg`, `tx`, `chain`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvVar {
    Block,
    Msg,
    Tx,
    Chain,
}

impl EnvVar {
    pub fn name(self) -> &'static str {
        match self {
            EnvVar::Block => "block",
            EnvVar::Msg => "msg",
            EnvVar::Tx => "tx",
            EnvVar::Chain => "chain",
        }
    }

    pub fn member(self, attr: &str) -> Option<Type> {
        let t = match (self, attr) {
            (EnvVar::Block, "number" | "timestamp" | "difficulty" | "prevrandao" | "gaslimit")
            | (EnvVar::Block, "basefee") => Type::uint256(),
            (EnvVar::Block, "coinbase") => Type::Address,
            (EnvVar::Block, "prevhash") => Type::bytes32(),
            (EnvVar::Msg, "sender") => Type::Address,
            (EnvVar::Msg, "value" | "gas") => Type::uint256(),
            (EnvVar::Tx, "origin") => Type::Address,
            (EnvVar::Tx, "gasprice") => Type::uint256(),
            (EnvVar::Chain, "id") => Type::uint256(),
            _ => return None,
        };
        Some(t)
    }
}

#[derive(Clone, Debug)]
pub enum Binding {
    Type(Type),
    Variable(VarInfo),
    Builtin(Builtin),
    Event(EventDef),
    Environment(EnvVar),
    /// `self`: the contract address and its storage and function members.
    SelfRef,
}

impl Binding {
    fn describe(&self) -> &'static str {
        match self {
            Binding::Type(_) => "type",
            Binding::Variable(_) => "variable",
            Binding::Builtin(_) => "builtin function",
            Binding::Event(_) => "event",
            Binding::Environment(_) => "environment variable",
            Binding::SelfRef => "contract reference",
        }
    }
}

pub struct Namespace {
    bindings: BTreeMap<String, Binding>,
    /// Names added by each open scope, innermost last.
    scopes: Vec<BTreeSet<String>>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub fn new() -> Self {
        let mut bindings = BTreeMap::new();
        for it in IntType::all() {
            bindings.insert(it.to_string(), Binding::Type(Type::Int(it)));
        }
        for m in 1..=32u8 {
            bindings.insert(format!("bytes{}", m), Binding::Type(Type::BytesM(m)));
        }
        bindings.insert("bool".into(), Binding::Type(Type::Bool));
        bindings.insert("address".into(), Binding::Type(Type::Address));
        bindings.insert("decimal".into(), Binding::Type(Type::Decimal));
        for env in [EnvVar::Block, EnvVar::Msg, EnvVar::Tx, EnvVar::Chain] {
            bindings.insert(env.name().into(), Binding::Environment(env));
        }
        bindings.insert("self".into(), Binding::SelfRef);
        for b in Builtin::ALL {
            bindings.insert(b.name().into(), Binding::Builtin(*b));
        }
        Self {
            bindings,
            scopes: vec![BTreeSet::new()],
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Read a binding, failing with an undeclared-name error.
    pub fn get(&self, name: &str, span: Span) -> Result<&Binding, Diagnostic> {
        self.bindings
            .get(name)
            .ok_or_else(|| Diagnostic::undeclared(name, format!("'{}' has not been declared", name), span))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bind `name` in the innermost scope.
    pub fn insert(&mut self, name: &str, binding: Binding, span: Span) -> Result<(), Diagnostic> {
        if let Some(existing) = self.bindings.get(name) {
            return Err(Diagnostic::error(
                ErrorKind::Namespace,
                format!(
                    "'{}' has already been declared as a {}",
                    name,
                    existing.describe()
                ),
                span,
            ));
        }
        validate_identifier(name, span)?;
        trace!(name, kind = binding.describe(), depth = self.scopes.len(), "bind");
        self.bindings.insert(name.to_string(), binding);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
        Ok(())
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(BTreeSet::new());
    }

    /// Remove every binding added since the matching `push_scope`.
    /// The module scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() <= 1 {
            return;
        }
        if let Some(added) = self.scopes.pop() {
            for name in added {
                self.bindings.remove(&name);
            }
        }
    }

    pub fn enter_scope(&mut self) -> ScopeGuard<'_> {
        self.push_scope();
        ScopeGuard { ns: self }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(|k| k.as_str())
    }
}

/// Pops its scope when dropped.
pub struct ScopeGuard<'a> {
    ns: &'a mut Namespace,
}

impl Deref for ScopeGuard<'_> {
    type Target = Namespace;

    fn deref(&self) -> &Namespace {
        self.ns
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Namespace {
        self.ns
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.ns.pop_scope();
    }
}

/// Reject names that are malformed, reserved, or EVM opcode mnemonics.
pub fn validate_identifier(name: &str, span: Span) -> Result<(), Diagnostic> {
    let mut chars = name.chars();
    let well_formed = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !well_formed {
        return Err(Diagnostic::error(
            ErrorKind::Namespace,
            format!("'{}' contains invalid characters", name),
            span,
        ));
    }
    let lower = name.to_ascii_lowercase();
    if RESERVED_WORDS.contains(&lower.as_str()) {
        return Err(Diagnostic::error(
            ErrorKind::Namespace,
            format!("'{}' is a reserved keyword", name),
            span,
        ));
    }
    if opcodes::is_evm_opcode(&lower) {
        return Err(Diagnostic::error(
            ErrorKind::Namespace,
            format!("'{}' is a reserved keyword (EVM opcode)", name),
            span,
        ));
    }
    Ok(())
}
