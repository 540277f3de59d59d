//! Semantic analysis: types, scoping, mutability and call-graph checks.
//!
//! `analyze` turns a parsed `Module` into an `Analysis`: the contract's
//! declarations (`ContractInfo`), the function bodies to compile (including
//! synthesized getters), a `TypeMap` from expression ids to resolved types,
//! and the order in which codegen should emit functions.

mod annotate;
pub mod builtins;
pub mod call_graph;
pub mod constant;
pub mod events;
pub mod expr;
pub mod function;
pub mod imports;
pub mod layout;
mod module;
pub mod namespace;
mod stmt;
#[cfg(test)]
mod tests;
pub mod types;

use std::collections::BTreeMap;

use crate::ast::{Expr, FunctionDecl, NodeId};
use crate::span::Span;

pub use events::{EventDef, EventField};
pub use function::{ContractFunction, Mutability, Visibility};
pub use imports::{ImportResolver, ImportSource};
pub use layout::{LayoutEntry, StorageLayout, StorageLayoutOverride};
pub use module::{analyze, analyze_with, AnalysisOptions};
pub use namespace::{Namespace, VarInfo, VarKind};
pub use types::{DataLocation, Type, TypeDef};

/// Resolved type of every value expression, keyed by node id.
pub type TypeMap = BTreeMap<NodeId, Type>;

/// External functions reachable through an interface-typed address.
#[derive(Clone, Debug)]
pub struct InterfaceType {
    pub name: String,
    pub functions: BTreeMap<String, ContractFunction>,
}

/// Everything declared at module level.
#[derive(Clone, Debug, Default)]
pub struct ContractInfo {
    pub storage: BTreeMap<String, VarInfo>,
    pub storage_order: Vec<String>,
    pub immutables: BTreeMap<String, VarInfo>,
    pub immutable_order: Vec<String>,
    pub constants: BTreeMap<String, VarInfo>,
    pub functions: BTreeMap<String, ContractFunction>,
    /// Declaration order; getters follow the storage variable's position.
    pub function_order: Vec<String>,
    pub events: BTreeMap<String, EventDef>,
    pub interfaces: BTreeMap<String, InterfaceType>,
    pub layout: StorageLayout,
}

impl ContractInfo {
    /// Folded value of a named constant.
    pub fn constant_value(&self, name: &str) -> Option<Expr> {
        self.constants.get(name).and_then(|v| v.value.clone())
    }

    pub fn constructor(&self) -> Option<&ContractFunction> {
        self.functions.values().find(|f| f.is_constructor)
    }

    pub fn fallback(&self) -> Option<&ContractFunction> {
        self.functions.values().find(|f| f.is_fallback)
    }

    /// Total bytes of immutable data appended to the runtime code.
    pub fn immutables_size(&self) -> u64 {
        self.immutables
            .values()
            .fold(0u64, |acc, v| acc.saturating_add(v.typ().size_in_bytes()))
    }

    pub fn span_of(&self, name: &str) -> Option<Span> {
        self.storage
            .get(name)
            .or_else(|| self.immutables.get(name))
            .or_else(|| self.constants.get(name))
            .map(|v| v.span)
    }
}

/// Output of semantic analysis.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub contract: ContractInfo,
    /// Bodies to compile, in `contract.function_order`.
    pub functions: Vec<FunctionDecl>,
    pub types: TypeMap,
    /// Callees before callers, so internal gas totals are known at call sites.
    pub codegen_order: Vec<String>,
}

impl Analysis {
    pub fn function_decl(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name.node == name)
    }
}
