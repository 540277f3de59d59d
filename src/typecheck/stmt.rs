//! Function body analysis.
//!
//! One `FunctionAnalyzer` runs per function inside a fresh namespace scope
//! seeded with the arguments. It stops at the first error in the body.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};
use tracing::trace;

use super::annotate::Annotator;
use super::builtins::Builtin;
use super::expr::ExprTyper;
use super::function::{ContractFunction, Mutability};
use super::namespace::{Binding, Namespace, VarInfo, VarKind};
use super::types::{from_annotation, DataLocation, IntType, Type, TypeDef, TypeFlags};
use super::{ContractInfo, TypeMap};
use crate::ast::navigate::{block_modifies, same_expr, self_calls};
use crate::ast::{BinOp, Block, Expr, ExprKind, FunctionDecl, Stmt};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::{Span, Spanned};

/// Longest revert reason string.
pub const MAX_REASON_LENGTH: u64 = 1024;

fn structure(message: impl Into<String>, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorKind::Structure, message, span)
}

fn iterator(message: impl Into<String>, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorKind::Iterator, message, span)
}

/// Does control flow leave the function at the end of `block`?
pub(crate) fn block_terminates(block: &Block) -> bool {
    match block.last().map(|s| &s.node) {
        Some(Stmt::Return(_) | Stmt::Raise { .. }) => true,
        Some(Stmt::If { body, orelse, .. }) => {
            !orelse.is_empty() && block_terminates(body) && block_terminates(orelse)
        }
        _ => false,
    }
}

fn is_range_call(expr: &Expr, ns: &Namespace) -> bool {
    match &expr.kind {
        ExprKind::Call { func, .. } => {
            func.as_name() == Some("range")
                && matches!(ns.lookup("range"), Some(Binding::Builtin(Builtin::Range)))
        }
        _ => false,
    }
}

pub(super) struct FunctionAnalyzer<'a> {
    pub(super) ns: &'a mut Namespace,
    pub(super) contract: &'a ContractInfo,
    pub(super) func: &'a ContractFunction,
    pub(super) types: &'a mut TypeMap,
    /// Bodies of every function, for checks that follow internal calls.
    pub(super) bodies: &'a BTreeMap<String, &'a FunctionDecl>,
    pub(super) iterating: Vec<Expr>,
    pub(super) loop_depth: usize,
}

impl<'a> FunctionAnalyzer<'a> {
    fn typer(&self) -> ExprTyper<'_> {
        ExprTyper::new(&*self.ns, self.contract).in_function(self.func, &self.iterating)
    }

    fn annotate(&mut self, expr: &Expr, typ: &Type) -> Result<(), Diagnostic> {
        let typer = ExprTyper::new(&*self.ns, self.contract).in_function(self.func, &self.iterating);
        Annotator {
            typer: &typer,
            types: &mut *self.types,
        }
        .annotate(expr, typ)
    }

    fn annotate_stmt_call(&mut self, call: &Expr) -> Result<(), Diagnostic> {
        let typer = ExprTyper::new(&*self.ns, self.contract).in_function(self.func, &self.iterating);
        Annotator {
            typer: &typer,
            types: &mut *self.types,
        }
        .annotate_stmt_call(call)
    }

    /// Validate `expr` against `typ` and record its types.
    fn check(&mut self, expr: &Expr, typ: &Type) -> Result<(), Diagnostic> {
        self.typer().validate_expected(expr, typ)?;
        self.annotate(expr, typ)
    }

    pub(super) fn analyze(mut self, decl: &FunctionDecl) -> Result<(), Diagnostic> {
        let func = self.func;
        trace!(function = %func.name, "analyzing body");
        let location = if func.is_external() {
            DataLocation::Calldata
        } else {
            DataLocation::Memory
        };
        for (arg, (name, typ)) in decl.args.iter().zip(&func.args) {
            let def = TypeDef::new(typ.clone(), location);
            let info = VarInfo::new(def, VarKind::Argument, arg.name.span);
            self.ns.insert(name, Binding::Variable(info), arg.name.span)?;
            self.types.insert(arg.annotation.id, typ.clone());
        }
        for (default, (_, typ)) in func.defaults.iter().zip(&func.args[func.min_args()..]) {
            self.check_default(default)?;
            self.check(default, typ)?;
        }
        if let (Some(ret), Some(typ)) = (&decl.returns, &func.return_type) {
            self.types.insert(ret.id, typ.clone());
        }

        self.visit_block(&decl.body)?;

        if func.return_type.is_some() && !block_terminates(&decl.body) {
            return Err(structure(
                format!("missing return statement in function '{}'", func.name),
                decl.name.span,
            ));
        }
        Ok(())
    }

    fn check_default(&self, expr: &Expr) -> Result<(), Diagnostic> {
        let ok = expr.is_constant_tree()
            || expr
                .as_name()
                .is_some_and(|n| self.contract.constants.contains_key(n))
            || matches!(&expr.kind, ExprKind::Attribute { value, .. }
                if value.as_name().is_some_and(|n| matches!(self.ns.lookup(n), Some(Binding::Environment(_)))))
            || matches!(&expr.kind, ExprKind::List(items) | ExprKind::Tuple(items)
                if items.iter().all(|e| self.check_default(e).is_ok()));
        if !ok {
            return Err(structure(
                "default argument values must be literals, constants or environment variables",
                expr.span,
            ));
        }
        Ok(())
    }

    fn scoped(&mut self, block: &Block) -> Result<(), Diagnostic> {
        self.ns.push_scope();
        let result = self.visit_block(block);
        self.ns.pop_scope();
        result
    }

    fn visit_block(&mut self, block: &Block) -> Result<(), Diagnostic> {
        for (i, stmt) in block.iter().enumerate() {
            self.visit_stmt(stmt)?;
            let terminates = matches!(
                stmt.node,
                Stmt::Return(_) | Stmt::Raise { .. } | Stmt::Break | Stmt::Continue
            );
            if terminates {
                if let Some(next) = block.get(i + 1) {
                    return Err(structure("unreachable code", next.span));
                }
            }
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<(), Diagnostic> {
        let func = self.func;
        match &stmt.node {
            Stmt::AnnAssign {
                target,
                annotation,
                value,
            } => {
                let value = value.as_ref().ok_or_else(|| {
                    structure(
                        "memory variables must be declared with an initial value",
                        stmt.span,
                    )
                })?;
                let def = from_annotation(annotation, self.ns, DataLocation::Memory, TypeFlags::default())?;
                self.check(value, &def.typ)?;
                self.types.insert(annotation.id, def.typ.clone());
                let info = VarInfo::new(def, VarKind::Local, target.span);
                self.ns.insert(&target.node, Binding::Variable(info), target.span)
            }
            Stmt::Assign { target, value } => {
                let typ = self.target_type(target)?;
                self.typer().validate_modification(target)?;
                self.check(value, &typ)?;
                self.annotate(target, &typ)
            }
            Stmt::AugAssign { target, op, value } => {
                let typ = self.target_type(target)?;
                self.typer().validate_modification(target)?;
                let ok = match op {
                    BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                        matches!(typ, Type::Int(it) if !it.signed)
                    }
                    BinOp::Shl | BinOp::Shr => {
                        typ == Type::uint256() || typ == Type::Int(IntType::INT256)
                    }
                    _ => typ.is_numeric(),
                };
                if !ok {
                    return Err(Diagnostic::error(
                        ErrorKind::TypeMismatch,
                        format!("'{}=' is not supported for {}", op.symbol(), typ),
                        stmt.span,
                    ));
                }
                let value_type = match op {
                    BinOp::Shl | BinOp::Shr => Type::uint256(),
                    _ => typ.clone(),
                };
                if matches!(op, BinOp::Div | BinOp::Mod)
                    && value.as_int().is_some_and(|v| v.is_zero())
                {
                    return Err(Diagnostic::error(
                        ErrorKind::InvalidLiteral,
                        "cannot divide by zero",
                        value.span,
                    ));
                }
                self.check(value, &value_type)?;
                self.annotate(target, &typ)
            }
            Stmt::If { test, body, orelse } => {
                self.check(test, &Type::Bool)?;
                self.scoped(body)?;
                self.scoped(orelse)
            }
            Stmt::For { target, iter, body } => self.visit_for(target, iter, body),
            Stmt::Assert { test, msg } => {
                self.check(test, &Type::Bool)?;
                if let Some(msg) = msg {
                    self.check_reason(msg)?;
                }
                Ok(())
            }
            Stmt::Raise { msg } => match msg {
                Some(msg) => self.check_reason(msg),
                None => Ok(()),
            },
            Stmt::Return(value) => match (value, &func.return_type) {
                (None, None) => Ok(()),
                (Some(v), None) => Err(structure(
                    format!("function '{}' does not return a value", func.name),
                    v.span,
                )),
                (None, Some(t)) => Err(structure(
                    format!("return statement is missing a value of type {}", t),
                    stmt.span,
                )),
                (Some(v), Some(t)) => self.check(v, t),
            },
            Stmt::Log(call) => self.visit_log(call, stmt.span),
            Stmt::Expr(expr) => self.visit_expr_stmt(expr),
            Stmt::Pass => Ok(()),
            Stmt::Break | Stmt::Continue => {
                if self.loop_depth == 0 {
                    let word = if matches!(stmt.node, Stmt::Break) { "break" } else { "continue" };
                    return Err(structure(
                        format!("'{}' can only be used inside a loop", word),
                        stmt.span,
                    ));
                }
                Ok(())
            }
        }
    }

    /// Type of an assignment target. A bare HashMap cannot be assigned.
    fn target_type(&self, target: &Expr) -> Result<Type, Diagnostic> {
        let typ = self.typer().exact_type(target)?;
        if typ.contains_hashmap() {
            return Err(structure(
                "a HashMap cannot be assigned to; assign to one of its keys instead",
                target.span,
            ));
        }
        Ok(typ)
    }

    fn check_reason(&mut self, msg: &Expr) -> Result<(), Diagnostic> {
        match &msg.kind {
            ExprKind::Name(name) if name == "UNREACHABLE" => Ok(()),
            ExprKind::Str(s) if s.is_empty() => {
                Err(structure("revert reason cannot be empty", msg.span))
            }
            ExprKind::Str(s) => self.check(msg, &Type::String(s.len() as u64)),
            _ => {
                let typ = self.typer().exact_type(msg)?;
                match typ {
                    Type::String(n) if n <= MAX_REASON_LENGTH => self.check(msg, &typ),
                    _ => Err(structure(
                        format!(
                            "revert reason must be a string literal, UNREACHABLE or String[N] with N <= {}",
                            MAX_REASON_LENGTH
                        ),
                        msg.span,
                    )),
                }
            }
        }
    }

    fn visit_log(&mut self, call: &Expr, span: Span) -> Result<(), Diagnostic> {
        if self.func.mutability <= Mutability::View {
            return Err(Diagnostic::error(
                ErrorKind::StateAccess,
                format!("cannot emit logs from a {} function", self.func.mutability),
                span,
            ));
        }
        let ExprKind::Call { func, args, keywords } = &call.kind else {
            return Err(structure("log must be followed by an event call", call.span));
        };
        let event = match func.as_name().map(|n| self.ns.get(n, func.span)).transpose()? {
            Some(Binding::Event(ev)) => ev.clone(),
            _ => {
                return Err(structure(
                    format!("'{}' is not an event", func),
                    func.span,
                ))
            }
        };
        let values: Vec<&Expr> = if keywords.is_empty() {
            args.iter().collect()
        } else {
            if !args.is_empty() {
                return Err(structure(
                    "event arguments must be all positional or all keyword",
                    call.span,
                ));
            }
            let mut ordered = Vec::with_capacity(event.fields.len());
            for field in &event.fields {
                let kw = keywords.iter().find(|k| k.name.node == field.name).ok_or_else(|| {
                    structure(format!("missing event argument '{}'", field.name), call.span)
                })?;
                ordered.push(&kw.value);
            }
            ordered
        };
        if values.len() != event.fields.len() || keywords.len() > event.fields.len() {
            return Err(structure(
                format!(
                    "event '{}' expects {} arguments, got {}",
                    event.name,
                    event.fields.len(),
                    values.len().max(keywords.len())
                ),
                call.span,
            ));
        }
        for (value, field) in values.into_iter().zip(&event.fields) {
            self.check(value, &field.typ)?;
        }
        Ok(())
    }

    fn visit_expr_stmt(&mut self, expr: &Expr) -> Result<(), Diagnostic> {
        let ExprKind::Call { func, .. } = &expr.kind else {
            return Err(structure(
                "expressions without assignment are not allowed",
                expr.span,
            ));
        };
        if let Some(name) = func.as_name() {
            match self.ns.lookup(name) {
                Some(Binding::Builtin(b)) if !b.is_side_effecting() && *b != Builtin::Range => {
                    return Err(structure(
                        format!("'{}()' has no side effects; its result must be used", name),
                        expr.span,
                    ))
                }
                Some(Binding::Type(Type::Struct(_))) => {
                    return Err(structure(
                        "struct creation without assignment is not allowed",
                        expr.span,
                    ))
                }
                Some(Binding::Type(_)) => {
                    return Err(structure(
                        "type conversion without assignment is not allowed",
                        expr.span,
                    ))
                }
                _ => {}
            }
        }
        self.typer().call_return(expr)?;
        self.annotate_stmt_call(expr)
    }

    // --- Loops ---

    fn visit_for(&mut self, target: &Spanned<String>, iter: &Expr, body: &Block) -> Result<(), Diagnostic> {
        if is_range_call(iter, self.ns) {
            let candidates = self.range_types(iter)?;
            return self.try_loop_types(target, iter, body, candidates, false);
        }

        if let ExprKind::List(items) = &iter.kind {
            if items.is_empty() {
                return Err(iterator("cannot iterate over an empty list", iter.span));
            }
            if items.iter().any(|e| matches!(e.kind, ExprKind::List(_))) {
                return Err(iterator("cannot iterate over a nested list literal", iter.span));
            }
        }
        let typer = self.typer();
        let candidates: Vec<Type> = typer
            .possible_types(iter)?
            .into_iter()
            .filter_map(|t| match t {
                Type::Array(elem, _) | Type::DynArray(elem, _) => Some(*elem),
                _ => None,
            })
            .collect();
        if candidates.is_empty() {
            let t = typer.exact_type(iter)?;
            return Err(iterator(format!("cannot iterate over {}", t), iter.span));
        }

        if let Some(span) = block_modifies(body, iter) {
            return Err(Diagnostic::error(
                ErrorKind::StateAccess,
                format!("cannot modify '{}' while iterating over it", iter),
                span,
            ));
        }
        if self.is_storage_path(iter) {
            self.check_callees_preserve(iter, body)?;
        }
        self.try_loop_types(target, iter, body, candidates, true)
    }

    fn is_storage_path(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Attribute { value, .. } if value.as_name() == Some("self") => true,
            ExprKind::Attribute { value, .. } | ExprKind::Subscript { value, .. } => {
                self.is_storage_path(value)
            }
            _ => false,
        }
    }

    /// No internal function reachable from the loop body may write the
    /// iterated storage path.
    fn check_callees_preserve(&self, iter: &Expr, body: &Block) -> Result<(), Diagnostic> {
        for (name, span) in self_calls(body) {
            let Some(callee) = self.contract.functions.get(&name) else {
                continue;
            };
            let reachable = std::iter::once(&name).chain(callee.reachable_internal_functions.iter());
            for fname in reachable {
                let Some(decl) = self.bodies.get(fname) else {
                    continue;
                };
                if block_modifies(&decl.body, iter).is_some() {
                    return Err(Diagnostic::error(
                        ErrorKind::StateAccess,
                        format!(
                            "cannot call '{}' inside a loop over '{}': '{}' modifies it",
                            name, iter, fname
                        ),
                        span,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Candidate loop-variable types of a `range(..)` call.
    fn range_types(&self, iter: &Expr) -> Result<Vec<Type>, Diagnostic> {
        let ExprKind::Call { args, keywords, .. } = &iter.kind else {
            return Err(structure("expected a range() call", iter.span));
        };
        if !keywords.is_empty() {
            return Err(structure("range() does not accept keyword arguments", iter.span));
        }
        let literal = |e: &Expr| -> Result<Option<BigInt>, Diagnostic> {
            let folded = super::constant::fold(e, &|n| self.contract.constant_value(n))?;
            Ok(folded.and_then(|f| f.as_int().cloned()))
        };
        let ints_containing = |lo: &BigInt, hi: &BigInt| -> Vec<Type> {
            IntType::all()
                .into_iter()
                .filter(|t| t.contains(lo) && t.contains(hi))
                .map(Type::Int)
                .collect()
        };
        match args.as_slice() {
            [stop] => {
                let n = literal(stop)?.ok_or_else(|| {
                    iterator("range() with one argument requires a literal bound", stop.span)
                })?;
                if !n.is_positive() {
                    return Err(iterator(
                        format!("range() bound must be positive, got {}", n),
                        stop.span,
                    ));
                }
                Ok(ints_containing(&BigInt::from(0), &(n - BigInt::one())))
            }
            [start, stop] => match (literal(start)?, literal(stop)?) {
                (Some(a), Some(b)) => {
                    if a >= b {
                        return Err(structure(
                            "second value must be greater than first value",
                            stop.span,
                        ));
                    }
                    Ok(ints_containing(&a, &(b - BigInt::one())))
                }
                _ => {
                    let ok = match &stop.kind {
                        ExprKind::BinOp {
                            op: BinOp::Add,
                            left,
                            right,
                        } => {
                            same_expr(left, start)
                                && literal(right)?.is_some_and(|n| n.is_positive())
                        }
                        _ => false,
                    };
                    if !ok {
                        return Err(iterator(
                            "two-argument range() requires the second argument to be the first plus a positive literal",
                            stop.span,
                        ));
                    }
                    let types: Vec<Type> = self
                        .typer()
                        .possible_types(start)?
                        .into_iter()
                        .filter(|t| matches!(t, Type::Int(_)))
                        .collect();
                    if types.is_empty() {
                        return Err(Diagnostic::error(
                            ErrorKind::TypeMismatch,
                            "range() bounds must be integers",
                            start.span,
                        ));
                    }
                    Ok(types)
                }
            },
            _ => Err(structure("range() expects one or two arguments", iter.span)),
        }
    }

    /// Analyze the body with each candidate loop type until one succeeds.
    fn try_loop_types(
        &mut self,
        target: &Spanned<String>,
        iter: &Expr,
        body: &Block,
        candidates: Vec<Type>,
        over_container: bool,
    ) -> Result<(), Diagnostic> {
        let mut first_err = None;
        for typ in candidates {
            self.ns.push_scope();
            let result = self.loop_body(target, iter, body, &typ, over_container);
            self.ns.pop_scope();
            match result {
                Ok(()) => {
                    self.annotate_loop(iter, &typ, over_container)?;
                    return Ok(());
                }
                Err(err) => {
                    trace!(loop_type = %typ, error = %err, "retrying loop with next type");
                    first_err.get_or_insert(err);
                }
            }
        }
        Err(first_err.unwrap_or_else(|| iterator("cannot determine the loop variable type", iter.span)))
    }

    fn loop_body(
        &mut self,
        target: &Spanned<String>,
        iter: &Expr,
        body: &Block,
        typ: &Type,
        over_container: bool,
    ) -> Result<(), Diagnostic> {
        let def = TypeDef::new(typ.clone(), DataLocation::Memory);
        let info = VarInfo::new(def, VarKind::LoopVar, target.span);
        self.ns.insert(&target.node, Binding::Variable(info), target.span)?;
        if over_container {
            self.iterating.push(iter.clone());
        }
        self.loop_depth += 1;
        let result = self.visit_block(body);
        self.loop_depth -= 1;
        if over_container {
            self.iterating.pop();
        }
        result
    }

    fn annotate_loop(&mut self, iter: &Expr, typ: &Type, over_container: bool) -> Result<(), Diagnostic> {
        if over_container {
            let container = match &iter.kind {
                ExprKind::List(items) => Type::Array(Box::new(typ.clone()), items.len() as u64),
                _ => self.typer().exact_type(iter)?,
            };
            return self.annotate(iter, &container);
        }
        // The loop variable type is recorded on the range() call itself.
        self.types.insert(iter.id, typ.clone());
        if let ExprKind::Call { args, .. } = &iter.kind {
            for arg in args {
                self.annotate(arg, typ)?;
            }
        }
        Ok(())
    }
}
