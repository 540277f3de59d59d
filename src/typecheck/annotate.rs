//! Second pass over a validated statement: records the resolved type of
//! every value expression in the `TypeMap`. It only reads types the
//! validator already accepted, so it never hides a type error.

use super::expr::ExprTyper;
use super::namespace::Binding;
use super::types::Type;
use super::TypeMap;
use crate::ast::{BinOp, CmpOp, Expr, ExprKind, UnaryOp};
use crate::diagnostic::Diagnostic;

pub(super) struct Annotator<'t, 'a> {
    pub(super) typer: &'t ExprTyper<'a>,
    pub(super) types: &'t mut TypeMap,
}

impl Annotator<'_, '_> {
    /// Type for a child whose parent expects `preferred`. Literal trees and
    /// collections adopt it; other expressions keep their own type unless
    /// `preferred` is among their candidates.
    fn pick(&self, expr: &Expr, preferred: &Type) -> Result<Type, Diagnostic> {
        if expr.is_constant_tree() || matches!(expr.kind, ExprKind::List(_) | ExprKind::Tuple(_)) {
            return Ok(preferred.clone());
        }
        let types = self.typer.possible_types(expr)?;
        if types.contains(preferred) {
            return Ok(preferred.clone());
        }
        self.typer.exact_type(expr)
    }

    fn own(&mut self, expr: &Expr) -> Result<(), Diagnostic> {
        let t = self.typer.exact_type(expr)?;
        self.annotate(expr, &t)
    }

    pub(super) fn annotate(&mut self, expr: &Expr, typ: &Type) -> Result<(), Diagnostic> {
        self.types.insert(expr.id, typ.clone());
        match &expr.kind {
            ExprKind::Attribute { value, .. } => {
                let is_namespace_object = value.as_name().is_some_and(|n| {
                    matches!(
                        self.typer.ns.lookup(n),
                        Some(Binding::SelfRef | Binding::Environment(_) | Binding::Type(_))
                    )
                });
                if !is_namespace_object {
                    self.own(value)?;
                }
            }
            ExprKind::Subscript { value, index } => {
                let base = self.typer.exact_type(value)?;
                self.annotate(value, &base)?;
                let index_type = match &base {
                    Type::HashMap(key, _) => self.pick(index, key)?,
                    _ => self.pick(index, &Type::uint256())?,
                };
                self.annotate(index, &index_type)?;
            }
            ExprKind::Call { .. } => self.annotate_call(expr)?,
            ExprKind::BinOp { op, left, right } => {
                let left_type = self.pick(left, typ)?;
                self.annotate(left, &left_type)?;
                let right_type = match op {
                    BinOp::Shl | BinOp::Shr => Type::uint256(),
                    _ => self.pick(right, typ)?,
                };
                self.annotate(right, &right_type)?;
            }
            ExprKind::UnaryOp { op, operand } => {
                let t = match op {
                    UnaryOp::Not => Type::Bool,
                    _ => self.pick(operand, typ)?,
                };
                self.annotate(operand, &t)?;
            }
            ExprKind::Compare { op, left, right } => {
                let operand = self.typer.compare(expr, *op, left, right)?;
                let left_type = self.pick(left, &operand)?;
                self.annotate(left, &left_type)?;
                match (op, &right.kind) {
                    (CmpOp::In | CmpOp::NotIn, ExprKind::List(items)) => {
                        let list = Type::Array(Box::new(operand), items.len() as u64);
                        self.annotate(right, &list)?;
                    }
                    (CmpOp::In | CmpOp::NotIn, _) => self.own(right)?,
                    _ => {
                        let right_type = self.pick(right, &operand)?;
                        self.annotate(right, &right_type)?;
                    }
                }
            }
            ExprKind::BoolOp { values, .. } => {
                for v in values {
                    self.annotate(v, &Type::Bool)?;
                }
            }
            ExprKind::Tuple(items) => match typ {
                Type::Tuple(types) if types.len() == items.len() => {
                    for (item, t) in items.iter().zip(types) {
                        let t = self.pick(item, t)?;
                        self.annotate(item, &t)?;
                    }
                }
                _ => {
                    for item in items {
                        self.own(item)?;
                    }
                }
            },
            ExprKind::List(items) => {
                if let Type::Array(elem, _) | Type::DynArray(elem, _) = typ {
                    for item in items {
                        let t = self.pick(item, elem)?;
                        self.annotate(item, &t)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Record a statement-level call that may not produce a value.
    pub(super) fn annotate_stmt_call(&mut self, call: &Expr) -> Result<(), Diagnostic> {
        if let Some(t) = self.typer.call_return(call)? {
            self.types.insert(call.id, t);
        }
        self.annotate_call(call)
    }

    fn annotate_call(&mut self, call: &Expr) -> Result<(), Diagnostic> {
        let ExprKind::Call { func, args, keywords } = &call.kind else {
            return Ok(());
        };
        let typer = self.typer;
        match &func.kind {
            ExprKind::Name(name) => match typer.ns.lookup(name) {
                Some(Binding::Builtin(b)) => {
                    let sig = b.signature(typer, call, args, keywords)?;
                    for (arg, t) in args.iter().zip(&sig.args) {
                        if let Some(t) = t {
                            let t = self.pick(arg, t)?;
                            self.annotate(arg, &t)?;
                        }
                    }
                    for kw in keywords {
                        let t = sig
                            .kwargs
                            .iter()
                            .find(|(n, _)| *n == kw.name.node)
                            .and_then(|(_, t)| t.clone());
                        if let Some(t) = t {
                            self.annotate(&kw.value, &t)?;
                        }
                    }
                }
                Some(Binding::Type(Type::Struct(s))) => {
                    if let Some(ExprKind::Dict(entries)) = args.first().map(|a| &a.kind) {
                        for ((_, value), (_, t)) in entries.iter().zip(&s.members) {
                            let t = self.pick(value, t)?;
                            self.annotate(value, &t)?;
                        }
                    }
                }
                Some(Binding::Type(Type::Interface(_))) => {
                    if let Some(arg) = args.first() {
                        self.annotate(arg, &Type::Address)?;
                    }
                }
                _ => {}
            },
            ExprKind::Attribute { value, attr } => {
                if value.as_name() == Some("self") {
                    if let Some(callee) = typer.contract.functions.get(&attr.node) {
                        for (arg, (_, t)) in args.iter().zip(&callee.args) {
                            let t = self.pick(arg, t)?;
                            self.annotate(arg, &t)?;
                        }
                    }
                    return Ok(());
                }
                let base = typer.exact_type(value)?;
                self.annotate(value, &base)?;
                match &base {
                    Type::Interface(iface) => {
                        let callee = typer
                            .contract
                            .interfaces
                            .get(iface)
                            .and_then(|i| i.functions.get(&attr.node));
                        if let Some(callee) = callee {
                            for (arg, (_, t)) in args.iter().zip(&callee.args) {
                                let t = self.pick(arg, t)?;
                                self.annotate(arg, &t)?;
                            }
                        }
                        for kw in keywords {
                            if matches!(kw.name.node.as_str(), "value" | "gas") {
                                self.annotate(&kw.value, &Type::uint256())?;
                            }
                        }
                    }
                    Type::DynArray(elem, _) => {
                        if let Some(arg) = args.first() {
                            let t = self.pick(arg, elem)?;
                            self.annotate(arg, &t)?;
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }
}
