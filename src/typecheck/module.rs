//! Module analysis: declarations, signatures, layout and function bodies.
//!
//! Declarations are resolved with a worklist. A declaration that mentions a
//! name declared further down fails with an undeclared-name error; it is
//! retried on the next pass for as long as some other declaration made
//! progress, and a pass without progress reports every pending error.
//! Every other error, collisions included, is fatal immediately.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument};

use super::call_graph::CallGraph;
use super::constant;
use super::events::EventDef;
use super::expr::ExprTyper;
use super::function::ContractFunction;
use super::imports::{resolve_import, ImportResolver};
use super::layout::{self, StorageLayoutOverride};
use super::namespace::{validate_identifier, Binding, Namespace, VarInfo, VarKind};
use super::stmt::FunctionAnalyzer;
use super::types::{
    from_annotation, type_from_annotation, DataLocation, DataPosition, EnumType, StructType,
    Type, TypeFlags,
};
use super::{Analysis, ContractInfo, InterfaceType, TypeMap};
use crate::ast::navigate::{assignment_targets, self_calls};
use crate::ast::{
    Arg, EnumDecl, Expr, ExprKind, FunctionDecl, InterfaceDecl, Item, Module, NodeId, Stmt,
    StructDecl, VariableDecl,
};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::{Span, Spanned};

/// Most members an enum may have; each takes one bit of a uint256.
pub const MAX_ENUM_MEMBERS: usize = 256;

/// Inputs beyond the module itself.
#[derive(Clone, Default)]
pub struct AnalysisOptions<'a> {
    pub resolver: Option<&'a dyn ImportResolver>,
    pub storage_layout: Option<&'a StorageLayoutOverride>,
    /// Paths of the modules currently being imported, outermost first.
    pub import_stack: Vec<String>,
}

/// Analyze a module that has no imports and no layout override.
pub fn analyze(module: &Module) -> Result<Analysis, Vec<Diagnostic>> {
    analyze_with(module, AnalysisOptions::default())
}

#[instrument(skip_all, fields(items = module.items.len()))]
pub fn analyze_with(module: &Module, options: AnalysisOptions<'_>) -> Result<Analysis, Vec<Diagnostic>> {
    let mut analyzer = ModuleAnalyzer {
        ns: Namespace::new(),
        contract: ContractInfo::default(),
        options,
        next_id: module.node_count,
        functions: Vec::new(),
        types: TypeMap::new(),
    };
    analyzer.declare_items(module)?;
    analyzer.declare_functions(module).map_err(|e| vec![e])?;
    let codegen_order = analyzer.resolve_calls().map_err(|e| vec![e])?;
    analyzer.allocate_layout().map_err(|e| vec![e])?;
    analyzer.check_bodies()?;
    analyzer.check_immutables().map_err(|e| vec![e])?;
    info!(
        functions = analyzer.functions.len(),
        typed_nodes = analyzer.types.len(),
        "module analysis complete"
    );
    Ok(Analysis {
        contract: analyzer.contract,
        functions: analyzer.functions,
        types: analyzer.types,
        codegen_order,
    })
}

struct ModuleAnalyzer<'a> {
    ns: Namespace,
    contract: ContractInfo,
    options: AnalysisOptions<'a>,
    /// Next free node id for synthesized getter bodies.
    next_id: NodeId,
    functions: Vec<FunctionDecl>,
    types: TypeMap,
}

fn structure(message: impl Into<String>, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorKind::Structure, message, span)
}

fn namespace(message: impl Into<String>, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorKind::Namespace, message, span)
}

impl<'a> ModuleAnalyzer<'a> {
    // --- Declarations ---

    fn declare_items(&mut self, module: &Module) -> Result<(), Vec<Diagnostic>> {
        let mut pending: Vec<&Spanned<Item>> = module
            .items
            .iter()
            .filter(|item| !matches!(item.node, Item::Function(_)))
            .collect();
        let mut pass = 0;
        while !pending.is_empty() {
            pass += 1;
            let mut deferred = Vec::new();
            let mut errors = Vec::new();
            for item in &pending {
                match self.declare(&item.node) {
                    Ok(()) => {}
                    Err(err) if err.undeclared.is_some() => {
                        errors.push(err);
                        deferred.push(*item);
                    }
                    Err(err) => return Err(vec![err]),
                }
            }
            if deferred.len() == pending.len() {
                return Err(errors);
            }
            debug!(pass, deferred = deferred.len(), "declaration pass");
            pending = deferred;
        }

        // Deferral must not change the declaration order of storage.
        let position = |name: &String| {
            module.items.iter().position(|item| {
                matches!(&item.node, Item::Variable(v) if v.name.node == *name)
            })
        };
        self.contract.storage_order.sort_by_key(position);
        self.contract.immutable_order.sort_by_key(position);
        Ok(())
    }

    /// Declare one item. Nothing is recorded unless it succeeds.
    fn declare(&mut self, item: &Item) -> Result<(), Diagnostic> {
        match item {
            Item::Import(decl) => {
                let path = decl.dotted();
                let iface = resolve_import(&path, &decl.alias.node, decl.alias.span, &self.options)?;
                self.ns.insert(
                    &decl.alias.node,
                    Binding::Type(Type::Interface(decl.alias.node.clone())),
                    decl.alias.span,
                )?;
                self.contract.interfaces.insert(decl.alias.node.clone(), iface);
                Ok(())
            }
            Item::Interface(decl) => self.declare_interface(decl),
            Item::Event(decl) => {
                let event = EventDef::from_decl(decl, &self.ns)?;
                self.ns
                    .insert(&decl.name.node, Binding::Event(event.clone()), decl.name.span)?;
                self.contract.events.insert(decl.name.node.clone(), event);
                Ok(())
            }
            Item::Struct(decl) => self.declare_struct(decl),
            Item::Enum(decl) => self.declare_enum(decl),
            Item::Variable(decl) => self.declare_variable(decl),
            Item::Function(_) => Ok(()),
        }
    }

    fn declare_interface(&mut self, decl: &InterfaceDecl) -> Result<(), Diagnostic> {
        let mut functions = BTreeMap::new();
        for f in &decl.functions {
            let func = ContractFunction::from_interface_fn(f, &self.ns)?;
            if functions.insert(f.name.node.clone(), func).is_some() {
                return Err(namespace(
                    format!(
                        "interface '{}' declares '{}' more than once",
                        decl.name.node, f.name.node
                    ),
                    f.name.span,
                ));
            }
        }
        self.ns.insert(
            &decl.name.node,
            Binding::Type(Type::Interface(decl.name.node.clone())),
            decl.name.span,
        )?;
        self.contract.interfaces.insert(
            decl.name.node.clone(),
            InterfaceType {
                name: decl.name.node.clone(),
                functions,
            },
        );
        Ok(())
    }

    fn declare_struct(&mut self, decl: &StructDecl) -> Result<(), Diagnostic> {
        let mut members: Vec<(String, Type)> = Vec::new();
        for (name, annotation) in &decl.fields {
            if members.iter().any(|(n, _)| *n == name.node) {
                return Err(namespace(
                    format!("struct member '{}' has already been declared", name.node),
                    name.span,
                ));
            }
            let typ = type_from_annotation(annotation, &self.ns)?;
            if typ.contains_hashmap() {
                return Err(structure("structs cannot contain a HashMap", annotation.span));
            }
            members.push((name.node.clone(), typ));
        }
        if members.is_empty() {
            return Err(structure("structs must have at least one member", decl.name.span));
        }
        let typ = Type::Struct(StructType {
            name: decl.name.node.clone(),
            members,
        });
        if !typ.has_bounded_size() {
            return Err(Diagnostic::error(
                ErrorKind::Overflow,
                format!("struct '{}' is too large", decl.name.node),
                decl.name.span,
            ));
        }
        self.ns
            .insert(&decl.name.node, Binding::Type(typ), decl.name.span)
    }

    fn declare_enum(&mut self, decl: &EnumDecl) -> Result<(), Diagnostic> {
        if decl.members.is_empty() || decl.members.len() > MAX_ENUM_MEMBERS {
            return Err(structure(
                format!("enums must have between 1 and {} members", MAX_ENUM_MEMBERS),
                decl.name.span,
            ));
        }
        let mut members: Vec<String> = Vec::new();
        for m in &decl.members {
            if members.contains(&m.node) {
                return Err(namespace(
                    format!("enum member '{}' has already been declared", m.node),
                    m.span,
                ));
            }
            members.push(m.node.clone());
        }
        let typ = Type::Enum(EnumType {
            name: decl.name.node.clone(),
            members,
        });
        self.ns
            .insert(&decl.name.node, Binding::Type(typ), decl.name.span)
    }

    fn is_variable_declared(&self, name: &str) -> bool {
        self.contract.storage.contains_key(name)
            || self.contract.immutables.contains_key(name)
            || self.contract.constants.contains_key(name)
    }

    fn declare_variable(&mut self, decl: &VariableDecl) -> Result<(), Diagnostic> {
        let name = &decl.name.node;
        let span = decl.name.span;
        validate_identifier(name, span)?;
        if self.is_variable_declared(name) {
            return Err(namespace(
                format!("'{}' has already been declared as a variable", name),
                span,
            ));
        }
        let flags = TypeFlags {
            is_constant: decl.is_constant,
            is_public: decl.is_public,
            is_immutable: decl.is_immutable,
        };

        if decl.is_constant {
            let value = decl.value.as_ref().ok_or_else(|| {
                structure(format!("constant '{}' must have a value", name), span)
            })?;
            let def = from_annotation(&decl.annotation, &self.ns, DataLocation::Unset, flags)?;
            ExprTyper::new(&self.ns, &self.contract).validate_expected(value, &def.typ)?;
            let folded = self.fold_constant(value)?;
            let mut info = VarInfo::new(def, VarKind::Constant, span);
            info.value = Some(folded);
            self.ns.insert(name, Binding::Variable(info.clone()), span)?;
            self.contract.constants.insert(name.clone(), info);
            debug!(name = %name, "declared constant");
            return Ok(());
        }

        if let Some(value) = &decl.value {
            let what = if decl.is_immutable {
                "immutables are assigned in __init__"
            } else {
                "storage variables cannot have an initial value"
            };
            return Err(structure(what, value.span));
        }

        if decl.is_immutable {
            let def = from_annotation(&decl.annotation, &self.ns, DataLocation::Code, flags)?;
            let info = VarInfo::new(def, VarKind::Immutable, span);
            self.ns.insert(name, Binding::Variable(info.clone()), span)?;
            self.contract.immutables.insert(name.clone(), info);
            self.contract.immutable_order.push(name.clone());
        } else {
            let def = from_annotation(&decl.annotation, &self.ns, DataLocation::Storage, flags)?;
            let info = VarInfo::new(def, VarKind::Storage, span);
            self.contract.storage.insert(name.clone(), info);
            self.contract.storage_order.push(name.clone());
        }
        Ok(())
    }

    /// Reduce a constant initializer to literals. Lists fold element-wise.
    fn fold_constant(&self, value: &Expr) -> Result<Expr, Diagnostic> {
        if let ExprKind::List(items) | ExprKind::Tuple(items) = &value.kind {
            let folded = items
                .iter()
                .map(|item| self.fold_constant(item))
                .collect::<Result<Vec<_>, _>>()?;
            let kind = match value.kind {
                ExprKind::List(_) => ExprKind::List(folded),
                _ => ExprKind::Tuple(folded),
            };
            return Ok(Expr {
                id: value.id,
                kind,
                span: value.span,
            });
        }
        constant::fold(value, &|n| self.contract.constant_value(n))?.ok_or_else(|| {
            structure(
                "constant value must be a compile-time literal expression",
                value.span,
            )
        })
    }

    // --- Functions ---

    fn declare_functions(&mut self, module: &Module) -> Result<(), Diagnostic> {
        for item in &module.items {
            match &item.node {
                Item::Variable(decl) if decl.is_public => {
                    let (func, body) = self.getter(decl)?;
                    self.add_function(func, body)?;
                }
                Item::Function(decl) => {
                    let func = ContractFunction::from_decl(decl, &self.ns)?;
                    self.add_function(func, decl.clone())?;
                }
                _ => {}
            }
        }
        if self.contract.functions.values().filter(|f| f.is_constructor).count() > 1 {
            return Err(structure("only one __init__ function is allowed", Span::dummy()));
        }
        Ok(())
    }

    fn add_function(&mut self, func: ContractFunction, decl: FunctionDecl) -> Result<(), Diagnostic> {
        let name = func.name.clone();
        let clashes_with_variable = !func.is_getter && self.is_variable_declared(&name);
        if self.contract.functions.contains_key(&name) || clashes_with_variable {
            return Err(namespace(
                format!("'{}' has already been declared", name),
                func.span,
            ));
        }
        self.contract.function_order.push(name.clone());
        self.contract.functions.insert(name, func);
        self.functions.push(decl);
        Ok(())
    }

    fn fresh(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = self.next_id;
        self.next_id += 1;
        Expr { id, kind, span }
    }

    /// Synthesize `def name(arg0: K, ...) -> V: return self.name[arg0]...`.
    fn getter(&mut self, decl: &VariableDecl) -> Result<(ContractFunction, FunctionDecl), Diagnostic> {
        let name = &decl.name.node;
        let span = decl.name.span;
        let var = self
            .contract
            .storage
            .get(name)
            .or_else(|| self.contract.immutables.get(name))
            .or_else(|| self.contract.constants.get(name))
            .ok_or_else(|| namespace(format!("'{}' has not been declared", name), span))?;

        let mut typ = var.typ().clone();
        let mut arg_types = Vec::new();
        loop {
            match typ {
                Type::HashMap(key, value) => {
                    arg_types.push(*key);
                    typ = *value;
                }
                Type::Array(elem, _) | Type::DynArray(elem, _) => {
                    arg_types.push(Type::uint256());
                    typ = *elem;
                }
                other => {
                    typ = other;
                    break;
                }
            }
        }

        let mut target = if self.contract.storage.contains_key(name) {
            let receiver = self.fresh(ExprKind::Name("self".into()), span);
            self.fresh(
                ExprKind::Attribute {
                    value: Box::new(receiver),
                    attr: Spanned::new(name.clone(), span),
                },
                span,
            )
        } else {
            self.fresh(ExprKind::Name(name.clone()), span)
        };
        let mut args = Vec::new();
        let mut decl_args = Vec::new();
        for (i, t) in arg_types.into_iter().enumerate() {
            let arg_name = format!("arg{}", i);
            let index = self.fresh(ExprKind::Name(arg_name.clone()), span);
            target = self.fresh(
                ExprKind::Subscript {
                    value: Box::new(target),
                    index: Box::new(index),
                },
                span,
            );
            let annotation = self.fresh(ExprKind::Name(t.to_string()), span);
            decl_args.push(Arg {
                name: Spanned::new(arg_name.clone(), span),
                annotation,
                default: None,
            });
            args.push((arg_name, t));
        }
        let returns = self.fresh(ExprKind::Name(typ.to_string()), span);
        let decorators = vec![
            self.fresh(ExprKind::Name("external".into()), span),
            self.fresh(ExprKind::Name("view".into()), span),
        ];
        let body = vec![Spanned::new(Stmt::Return(Some(target)), span)];
        let func = ContractFunction::getter(name, args, typ, span);
        let decl = FunctionDecl {
            name: decl.name.clone(),
            decorators,
            args: decl_args,
            returns: Some(returns),
            body,
        };
        debug!(getter = %name, "synthesized public getter");
        Ok((func, decl))
    }

    /// Record direct internal calls, reject cycles, and compute reachability.
    fn resolve_calls(&mut self) -> Result<Vec<String>, Diagnostic> {
        for decl in &self.functions {
            let called = self_calls(&decl.body)
                .into_iter()
                .map(|(name, _)| name)
                .filter(|name| self.contract.functions.contains_key(name))
                .collect();
            if let Some(func) = self.contract.functions.get_mut(&decl.name.node) {
                func.called_functions = called;
            }
        }
        let graph = CallGraph::build(&self.contract);
        graph.check_acyclic(&self.contract)?;
        for (name, func) in self.contract.functions.iter_mut() {
            func.reachable_internal_functions = graph.reachable(name);
        }
        Ok(graph.codegen_order())
    }

    fn allocate_layout(&mut self) -> Result<(), Diagnostic> {
        let layout = layout::allocate(&self.contract, self.options.storage_layout)?;
        for (name, var) in self.contract.storage.iter_mut() {
            var.position = layout.slot_of(name).map(DataPosition::Storage);
        }
        for (name, var) in self.contract.immutables.iter_mut() {
            var.position = layout.code_offset(name).map(DataPosition::Code);
        }
        self.contract.layout = layout;
        Ok(())
    }

    /// Check every body; errors from different functions are reported together.
    fn check_bodies(&mut self) -> Result<(), Vec<Diagnostic>> {
        let bodies: BTreeMap<String, &FunctionDecl> = self
            .functions
            .iter()
            .map(|f| (f.name.node.clone(), f))
            .collect();
        let mut errors = Vec::new();
        for decl in &self.functions {
            let Some(func) = self.contract.functions.get(&decl.name.node) else {
                continue;
            };
            let mut scope = self.ns.enter_scope();
            let analyzer = FunctionAnalyzer {
                ns: &mut scope,
                contract: &self.contract,
                func,
                types: &mut self.types,
                bodies: &bodies,
                iterating: Vec::new(),
                loop_depth: 0,
            };
            if let Err(err) = analyzer.analyze(decl) {
                debug!(function = %decl.name.node, error = %err, "function rejected");
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The constructor assigns each immutable exactly once.
    fn check_immutables(&self) -> Result<(), Diagnostic> {
        let ctor = self.functions.iter().find(|f| f.name.node == "__init__");
        for name in &self.contract.immutable_order {
            let count = ctor
                .map(|c| {
                    assignment_targets(&c.body)
                        .into_iter()
                        .filter(|t| t.as_name() == Some(name.as_str()))
                        .count()
                })
                .unwrap_or(0);
            if count != 1 {
                let span = self.contract.span_of(name).unwrap_or_else(Span::dummy);
                return Err(Diagnostic::error(
                    ErrorKind::StateAccess,
                    format!(
                        "immutable '{}' must be assigned exactly once in __init__, found {} assignments",
                        name, count
                    ),
                    span,
                ));
            }
        }
        Ok(())
    }
}
