//! Stages shared by the public entry points: parse, analyze, and derive the
//! interface descriptions from an analysis.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::resolver::BuiltinInterfaces;
use super::CompileOptions;
use crate::ast::Module;
use crate::diagnostic::Diagnostic;
use crate::typecheck::{analyze_with, Analysis, AnalysisOptions, ImportResolver};

pub(super) fn parse(source: &str) -> Result<Module, Vec<Diagnostic>> {
    let module = crate::parse_source(source, 0)?;
    debug!(items = module.items.len(), nodes = module.node_count, "parsed module");
    Ok(module)
}

pub(super) fn analyze(module: &Module, options: &CompileOptions) -> Result<Analysis, Vec<Diagnostic>> {
    let builtin = BuiltinInterfaces;
    let resolver: &dyn ImportResolver = match &options.resolver {
        Some(resolver) => resolver.as_ref(),
        None => &builtin,
    };
    let analysis_options = AnalysisOptions {
        resolver: Some(resolver),
        storage_layout: options.storage_layout.as_ref(),
        import_stack: Vec::new(),
    };
    analyze_with(module, analysis_options)
}

/// Functions in declaration order, then events.
pub(super) fn abi(analysis: &Analysis) -> Value {
    let contract = &analysis.contract;
    let mut entries: Vec<Value> = contract
        .function_order
        .iter()
        .filter_map(|name| contract.functions.get(name))
        .flat_map(|f| f.to_abi())
        .collect();
    entries.extend(contract.events.values().map(|e| e.to_abi()));
    Value::Array(entries)
}

pub(super) fn method_identifiers(analysis: &Analysis) -> BTreeMap<String, String> {
    analysis
        .contract
        .functions
        .values()
        .filter(|f| f.is_external() && !f.is_constructor && !f.is_fallback)
        .flat_map(|f| f.method_identifiers())
        .collect()
}
