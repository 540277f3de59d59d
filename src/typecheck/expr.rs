//! Expression typing.
//!
//! `possible_types` returns every type an expression could take, most
//! preferred first (literals are ambiguous until an expected type pins them
//! down). `validate_expected` checks an expression against a known type.
//! Both also enforce the state-access and call-mutability rules of the
//! enclosing function.

use num_traits::{Signed, ToPrimitive, Zero};

use super::builtins::Builtin;
use super::constant;
use super::function::{ContractFunction, Mutability};
use super::namespace::{Binding, EnvVar, Namespace, VarInfo, VarKind};
use super::types::{literal_types, IntType, StructType, Type};
use super::ContractInfo;
use crate::ast::navigate::is_within;
use crate::ast::{BinOp, CmpOp, Expr, ExprKind, Keyword, UnaryOp};
use crate::diagnostic::{Diagnostic, ErrorKind};

fn structure(message: impl Into<String>, expr: &Expr) -> Diagnostic {
    Diagnostic::error(ErrorKind::Structure, message, expr.span)
}

fn mismatch(message: impl Into<String>, expr: &Expr) -> Diagnostic {
    Diagnostic::error(ErrorKind::TypeMismatch, message, expr.span)
}

fn state_access(message: impl Into<String>, expr: &Expr) -> Diagnostic {
    Diagnostic::error(ErrorKind::StateAccess, message, expr.span)
}

pub struct ExprTyper<'a> {
    pub ns: &'a Namespace,
    pub contract: &'a ContractInfo,
    /// Function whose body is being checked; `None` at module level.
    pub func: Option<&'a ContractFunction>,
    /// Containers currently being iterated by enclosing `for` loops.
    pub iterating: &'a [Expr],
}

impl<'a> ExprTyper<'a> {
    pub fn new(ns: &'a Namespace, contract: &'a ContractInfo) -> Self {
        Self {
            ns,
            contract,
            func: None,
            iterating: &[],
        }
    }

    pub fn in_function(mut self, func: &'a ContractFunction, iterating: &'a [Expr]) -> Self {
        self.func = Some(func);
        self.iterating = iterating;
        self
    }

    fn mutability(&self) -> Option<Mutability> {
        self.func.map(|f| f.mutability)
    }

    /// Fold a pure literal tree.
    pub fn fold_literal(&self, expr: &Expr) -> Result<Option<Expr>, Diagnostic> {
        if !expr.is_constant_tree() {
            return Ok(None);
        }
        constant::fold(expr, &|_| None)
    }

    /// The preferred type of an expression.
    pub fn exact_type(&self, expr: &Expr) -> Result<Type, Diagnostic> {
        let types = self.possible_types(expr)?;
        types
            .into_iter()
            .next()
            .ok_or_else(|| mismatch(format!("cannot determine the type of '{}'", expr), expr))
    }

    pub fn possible_types(&self, expr: &Expr) -> Result<Vec<Type>, Diagnostic> {
        if expr.is_literal() {
            return literal_types(expr);
        }
        if let Some(folded) = self.fold_literal(expr)? {
            return literal_types(&folded);
        }
        match &expr.kind {
            ExprKind::Name(name) => self.name_types(name, expr),
            ExprKind::Attribute { value, attr } => self.attribute_types(expr, value, &attr.node),
            ExprKind::Subscript { value, index } => self.subscript_types(value, index).map(|t| vec![t]),
            ExprKind::Call { .. } => match self.call_return(expr)? {
                Some(t) => Ok(vec![t]),
                None => Err(structure(
                    format!("'{}' does not return a value", expr),
                    expr,
                )),
            },
            ExprKind::BinOp { op, left, right } => self.binop_types(expr, *op, left, right),
            ExprKind::UnaryOp { op, operand } => self.unary_types(expr, *op, operand),
            ExprKind::Compare { op, left, right } => {
                self.compare(expr, *op, left, right)?;
                Ok(vec![Type::Bool])
            }
            ExprKind::BoolOp { values, .. } => {
                for v in values {
                    self.validate_expected(v, &Type::Bool)?;
                }
                Ok(vec![Type::Bool])
            }
            ExprKind::Tuple(items) => {
                let types = items
                    .iter()
                    .map(|e| self.exact_type(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(vec![Type::Tuple(types)])
            }
            ExprKind::List(items) => {
                if items.is_empty() {
                    return Err(structure("cannot determine the type of an empty list", expr));
                }
                let n = items.len() as u64;
                Ok(self
                    .common_types(items)?
                    .into_iter()
                    .map(|t| Type::Array(Box::new(t), n))
                    .collect())
            }
            ExprKind::Dict(_) => Err(structure(
                "dict literals are only valid as struct constructor arguments",
                expr,
            )),
            _ => literal_types(expr),
        }
    }

    /// Check `expr` against a known type. Literals are range-checked.
    pub fn validate_expected(&self, expr: &Expr, expected: &Type) -> Result<(), Diagnostic> {
        if expr.is_literal() {
            return expected.from_literal(expr).map(|_| ());
        }
        if let Some(folded) = self.fold_literal(expr)? {
            return expected.from_literal(&folded).map(|_| ());
        }
        match (&expr.kind, expected) {
            (ExprKind::Tuple(items), Type::Tuple(types)) => {
                if items.len() != types.len() {
                    return Err(mismatch(
                        format!(
                            "tuple length mismatch: expected {} values, got {}",
                            types.len(),
                            items.len()
                        ),
                        expr,
                    ));
                }
                items
                    .iter()
                    .zip(types)
                    .try_for_each(|(e, t)| self.validate_expected(e, t))
            }
            (ExprKind::List(items), Type::Array(elem, n)) => {
                if items.len() as u64 != *n {
                    return Err(mismatch(
                        format!("expected a list of {} elements, got {}", n, items.len()),
                        expr,
                    ));
                }
                items.iter().try_for_each(|e| self.validate_expected(e, elem))
            }
            (ExprKind::List(items), Type::DynArray(elem, n)) => {
                if items.len() as u64 > *n {
                    return Err(mismatch(
                        format!("list of {} elements exceeds the capacity of {}", items.len(), expected),
                        expr,
                    ));
                }
                items.iter().try_for_each(|e| self.validate_expected(e, elem))
            }
            (ExprKind::List(_), _) => Err(mismatch(
                format!("a list cannot be used as {}", expected),
                expr,
            )),
            _ => {
                let types = self.possible_types(expr)?;
                if types.iter().any(|t| expected.compare_type(t)) {
                    return Ok(());
                }
                let given = types
                    .first()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "no value".into());
                Err(mismatch(
                    format!("given reference has type {}, expected {}", given, expected),
                    expr,
                ))
            }
        }
    }

    /// Types every expression in `exprs` can share, seeded by the first
    /// non-literal expression.
    pub fn common_types(&self, exprs: &[Expr]) -> Result<Vec<Type>, Diagnostic> {
        if exprs.is_empty() {
            return Ok(Vec::new());
        }
        let seed = exprs.iter().position(|e| !e.is_constant_tree()).unwrap_or(0);
        let mut candidates = self.possible_types(&exprs[seed])?;
        for (i, e) in exprs.iter().enumerate() {
            if i == seed {
                continue;
            }
            if e.is_constant_tree() {
                self.possible_types(e)?;
                let preferred = candidates.first().cloned();
                candidates.retain(|t| self.validate_expected(e, t).is_ok());
                // A literal out of range for the seed's type is an overflow,
                // not a type mismatch.
                if let (true, Some(t)) = (candidates.is_empty(), preferred) {
                    if let Err(err) = self.validate_expected(e, &t) {
                        if err.kind == ErrorKind::Overflow {
                            return Err(err);
                        }
                    }
                }
            } else {
                let others = self.possible_types(e)?;
                candidates.retain(|t| {
                    others
                        .iter()
                        .any(|o| o == t || t.compare_type(o) || o.compare_type(t))
                });
            }
        }
        Ok(candidates)
    }

    // --- Names and attributes ---

    fn name_types(&self, name: &str, expr: &Expr) -> Result<Vec<Type>, Diagnostic> {
        match self.ns.get(name, expr.span)? {
            Binding::Variable(var) => {
                self.check_var_read(var, expr)?;
                Ok(vec![var.typ().clone()])
            }
            Binding::SelfRef => {
                self.check_state_read("self", expr)?;
                Ok(vec![Type::Address])
            }
            Binding::Environment(env) => Err(structure(
                format!("'{}' cannot be used as a value on its own", env.name()),
                expr,
            )),
            Binding::Type(t) => Err(structure(format!("'{}' is a type, not a value", t), expr)),
            Binding::Builtin(b) => Err(structure(
                format!("builtin '{}' must be called", b.name()),
                expr,
            )),
            Binding::Event(ev) => Err(structure(
                format!("event '{}' can only be used in a log statement", ev.name),
                expr,
            )),
        }
    }

    fn check_var_read(&self, var: &VarInfo, expr: &Expr) -> Result<(), Diagnostic> {
        if var.kind == VarKind::Immutable {
            self.check_state_read("immutable variables", expr)?;
        }
        Ok(())
    }

    fn check_state_read(&self, what: &str, expr: &Expr) -> Result<(), Diagnostic> {
        if self.mutability() == Some(Mutability::Pure) {
            return Err(state_access(
                format!("cannot access {} from a pure function", what),
                expr,
            ));
        }
        Ok(())
    }

    fn attribute_types(&self, expr: &Expr, value: &Expr, attr: &str) -> Result<Vec<Type>, Diagnostic> {
        if let Some(name) = value.as_name() {
            match self.ns.lookup(name) {
                Some(Binding::SelfRef) => return self.self_member(expr, attr).map(|t| vec![t]),
                Some(Binding::Environment(env)) => {
                    let t = env.member(attr).ok_or_else(|| {
                        structure(format!("'{}' has no member '{}'", env.name(), attr), expr)
                    })?;
                    self.check_state_read(&format!("{}.{}", env.name(), attr), expr)?;
                    if *env == EnvVar::Msg && attr == "value" {
                        self.check_msg_value(expr)?;
                    }
                    return Ok(vec![t]);
                }
                Some(Binding::Type(Type::Enum(e))) => {
                    if e.value_of(attr).is_none() {
                        return Err(structure(format!("enum {} has no member '{}'", e.name, attr), expr));
                    }
                    return Ok(vec![Type::Enum(e.clone())]);
                }
                _ => {}
            }
        }
        let base = self.exact_type(value)?;
        match (&base, attr) {
            (Type::Struct(s), member) => s
                .member(member)
                .map(|(_, t)| vec![t.clone()])
                .ok_or_else(|| structure(format!("struct {} has no member '{}'", s.name, member), expr)),
            (Type::Address | Type::Interface(_), "balance" | "codesize") => {
                self.check_state_read(&format!("address.{}", attr), expr)?;
                Ok(vec![Type::uint256()])
            }
            (Type::Address | Type::Interface(_), "is_contract") => {
                self.check_state_read("address.is_contract", expr)?;
                Ok(vec![Type::Bool])
            }
            (Type::Address | Type::Interface(_), "codehash") => {
                self.check_state_read("address.codehash", expr)?;
                Ok(vec![Type::bytes32()])
            }
            _ => Err(structure(format!("{} has no member '{}'", base, attr), expr)),
        }
    }

    fn check_msg_value(&self, expr: &Expr) -> Result<(), Diagnostic> {
        match self.func {
            Some(f) if f.is_external() && f.mutability != Mutability::Payable => Err(state_access(
                "msg.value can only be accessed in payable or internal functions",
                expr,
            )),
            _ => Ok(()),
        }
    }

    /// Type of `self.<name>`.
    pub fn self_member(&self, expr: &Expr, name: &str) -> Result<Type, Diagnostic> {
        if name == "balance" {
            self.check_state_read("self.balance", expr)?;
            return Ok(Type::uint256());
        }
        if let Some(var) = self.contract.storage.get(name) {
            self.check_state_read("contract storage", expr)?;
            return Ok(var.typ().clone());
        }
        if self.contract.immutables.contains_key(name) {
            return Err(state_access(
                format!("immutable '{}' must be accessed without 'self.'", name),
                expr,
            ));
        }
        if self.contract.constants.contains_key(name) {
            return Err(state_access(
                format!("constant '{}' must be accessed without 'self.'", name),
                expr,
            ));
        }
        if self.contract.functions.contains_key(name) {
            return Err(structure(format!("function 'self.{}' must be called", name), expr));
        }
        Err(Diagnostic::error(
            ErrorKind::Namespace,
            format!("storage variable 'self.{}' has not been declared", name),
            expr.span,
        ))
    }

    /// Element type produced by indexing `value` with `index`.
    pub fn subscript_types(&self, value: &Expr, index: &Expr) -> Result<Type, Diagnostic> {
        let base = self.exact_type(value)?;
        match &base {
            Type::HashMap(key, val) => {
                self.validate_expected(index, key)?;
                Ok((**val).clone())
            }
            Type::Array(elem, n) | Type::DynArray(elem, n) => {
                self.check_index(index, *n)?;
                Ok((**elem).clone())
            }
            Type::Tuple(types) => {
                let i = index
                    .as_int()
                    .and_then(|v| v.to_usize())
                    .filter(|i| *i < types.len())
                    .ok_or_else(|| {
                        structure("tuple index must be an integer literal within range", index)
                    })?;
                Ok(types[i].clone())
            }
            _ => Err(structure(format!("{} is not subscriptable", base), value)),
        }
    }

    fn check_index(&self, index: &Expr, bound: u64) -> Result<(), Diagnostic> {
        if let Some(v) = index.as_int() {
            if v.is_negative() || v.to_u64().map_or(true, |i| i >= bound) {
                return Err(Diagnostic::error(
                    ErrorKind::InvalidLiteral,
                    format!("index {} is out of range for length {}", v, bound),
                    index.span,
                ));
            }
            return Ok(());
        }
        let types = self.possible_types(index)?;
        if !types.iter().any(|t| matches!(t, Type::Int(_))) {
            return Err(mismatch("array index must be an integer", index));
        }
        Ok(())
    }

    // --- Operators ---

    fn binop_types(&self, expr: &Expr, op: BinOp, left: &Expr, right: &Expr) -> Result<Vec<Type>, Diagnostic> {
        if matches!(op, BinOp::Div | BinOp::Mod) {
            if let Some(zero) = self.fold_literal(right)? {
                let is_zero = match &zero.kind {
                    ExprKind::Int(v) => v.is_zero(),
                    ExprKind::Decimal(text) => {
                        super::types::parse_decimal(text).is_some_and(|v| v.is_zero())
                    }
                    _ => false,
                };
                if is_zero {
                    return Err(Diagnostic::error(
                        ErrorKind::InvalidLiteral,
                        "cannot divide by zero",
                        right.span,
                    ));
                }
            }
        }
        let operands = [left.clone(), right.clone()];
        let candidates: Vec<Type> = match op {
            BinOp::Shl | BinOp::Shr => {
                self.validate_expected(right, &Type::uint256())?;
                self.possible_types(left)?
                    .into_iter()
                    .filter(|t| {
                        matches!(t, Type::BytesM(32))
                            || *t == Type::uint256()
                            || *t == Type::Int(IntType::INT256)
                    })
                    .collect()
            }
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => self
                .common_types(&operands)?
                .into_iter()
                .filter(|t| matches!(t, Type::Int(it) if !it.signed) || matches!(t, Type::Enum(_)))
                .collect(),
            BinOp::Pow => {
                let is_const = |e: &Expr| {
                    e.is_constant_tree()
                        || e.as_name().is_some_and(|n| self.contract.constants.contains_key(n))
                };
                if !is_const(left) && !is_const(right) {
                    return Err(structure(
                        "cannot determine the bounds of '**': the base or the exponent must be a literal",
                        expr,
                    ));
                }
                self.common_types(&operands)?
                    .into_iter()
                    .filter(|t| matches!(t, Type::Int(_)))
                    .collect()
            }
            _ => self
                .common_types(&operands)?
                .into_iter()
                .filter(|t| t.is_numeric())
                .collect(),
        };
        if candidates.is_empty() {
            let lt = self.exact_type(left)?;
            let rt = self.exact_type(right)?;
            return Err(mismatch(
                format!("unsupported operand types for {}: {} and {}", op.symbol(), lt, rt),
                expr,
            ));
        }
        Ok(candidates)
    }

    fn unary_types(&self, expr: &Expr, op: UnaryOp, operand: &Expr) -> Result<Vec<Type>, Diagnostic> {
        match op {
            UnaryOp::Not => {
                self.validate_expected(operand, &Type::Bool)?;
                Ok(vec![Type::Bool])
            }
            UnaryOp::Neg => {
                let types: Vec<Type> = self
                    .possible_types(operand)?
                    .into_iter()
                    .filter(|t| t.is_numeric() && t.is_signed())
                    .collect();
                if types.is_empty() {
                    return Err(mismatch("unary '-' requires a signed number", expr));
                }
                Ok(types)
            }
            UnaryOp::Invert => {
                let types: Vec<Type> = self
                    .possible_types(operand)?
                    .into_iter()
                    .filter(|t| matches!(t, Type::Int(it) if !it.signed) || matches!(t, Type::Enum(_)))
                    .collect();
                if types.is_empty() {
                    return Err(mismatch("'~' requires an unsigned integer", expr));
                }
                Ok(types)
            }
        }
    }

    /// Operand type of a comparison.
    pub fn compare(&self, expr: &Expr, op: CmpOp, left: &Expr, right: &Expr) -> Result<Type, Diagnostic> {
        match op {
            CmpOp::In | CmpOp::NotIn => {
                if let ExprKind::List(items) = &right.kind {
                    let mut operands = vec![left.clone()];
                    operands.extend(items.iter().cloned());
                    return self.common_types(&operands)?.into_iter().next().ok_or_else(|| {
                        mismatch(format!("'{}' is not an element type of the list", left), left)
                    });
                }
                let container = self.exact_type(right)?;
                let elem = match &container {
                    Type::Array(elem, _) | Type::DynArray(elem, _) => (**elem).clone(),
                    Type::Enum(_) => container.clone(),
                    _ => {
                        return Err(mismatch(
                            format!("'{}' requires an array, not {}", op.symbol(), container),
                            right,
                        ))
                    }
                };
                self.validate_expected(left, &elem)?;
                Ok(elem)
            }
            _ => {
                let operands = [left.clone(), right.clone()];
                let candidates: Vec<Type> = self
                    .common_types(&operands)?
                    .into_iter()
                    .filter(|t| {
                        if op.is_ordering() {
                            t.is_numeric()
                        } else {
                            t.is_value_type() || t.is_bytestring()
                        }
                    })
                    .collect();
                match candidates.into_iter().next() {
                    Some(t) => Ok(t),
                    None => {
                        let lt = self.exact_type(left)?;
                        let rt = self.exact_type(right)?;
                        Err(mismatch(
                            format!("cannot compare {} and {} with '{}'", lt, rt, op.symbol()),
                            expr,
                        ))
                    }
                }
            }
        }
    }

    // --- Calls ---

    /// Return type of a call, `None` for calls that produce no value.
    pub fn call_return(&self, call: &Expr) -> Result<Option<Type>, Diagnostic> {
        let ExprKind::Call { func, args, keywords } = &call.kind else {
            return Err(structure(format!("'{}' is not a call", call), call));
        };
        match &func.kind {
            ExprKind::Name(name) => match self.ns.get(name, func.span)? {
                Binding::Builtin(b) => {
                    self.check_builtin_mutability(*b, keywords, call)?;
                    Ok(b.signature(self, call, args, keywords)?.ret)
                }
                Binding::Type(Type::Struct(s)) => {
                    self.struct_constructor(s, args, keywords, call)?;
                    Ok(Some(Type::Struct(s.clone())))
                }
                Binding::Type(Type::Interface(iface)) => {
                    if args.len() != 1 || !keywords.is_empty() {
                        return Err(structure(
                            format!("{}() takes exactly one address argument", iface),
                            call,
                        ));
                    }
                    self.validate_expected(&args[0], &Type::Address)?;
                    Ok(Some(Type::Interface(iface.clone())))
                }
                Binding::Event(ev) => Err(structure(
                    format!("event '{}' must be emitted with a log statement", ev.name),
                    call,
                )
                .with_help(format!("use `log {}`", call))),
                _ => Err(structure(format!("'{}' is not callable", name), func)),
            },
            ExprKind::Attribute { value, attr } => {
                if value.as_name() == Some("self")
                    && matches!(self.ns.lookup("self"), Some(Binding::SelfRef))
                {
                    return self.internal_call(call, &attr.node, args, keywords);
                }
                let base = self.exact_type(value)?;
                match &base {
                    Type::Interface(iface) => self.external_call(call, iface, &attr.node, args, keywords),
                    Type::DynArray(elem, _) => match attr.node.as_str() {
                        "append" => {
                            if args.len() != 1 || !keywords.is_empty() {
                                return Err(structure("append() takes exactly one argument", call));
                            }
                            self.validate_modification(value)?;
                            self.validate_expected(&args[0], elem)?;
                            Ok(None)
                        }
                        "pop" => {
                            if !args.is_empty() || !keywords.is_empty() {
                                return Err(structure("pop() takes no arguments", call));
                            }
                            self.validate_modification(value)?;
                            Ok(Some((**elem).clone()))
                        }
                        other => Err(structure(format!("{} has no method '{}'", base, other), func)),
                    },
                    _ => Err(structure(format!("{} has no method '{}'", base, attr.node), func)),
                }
            }
            _ => Err(structure(format!("'{}' is not callable", func), func)),
        }
    }

    fn check_builtin_mutability(&self, b: Builtin, keywords: &[Keyword], call: &Expr) -> Result<(), Diagnostic> {
        let (Some(caller), required) = (self.mutability(), b.mutability(keywords)) else {
            return Ok(());
        };
        if caller < required {
            return Err(state_access(
                format!("{}() cannot be called from a {} function", b.name(), caller),
                call,
            ));
        }
        Ok(())
    }

    fn check_args(
        &self,
        call: &Expr,
        callee: &ContractFunction,
        args: &[Expr],
    ) -> Result<(), Diagnostic> {
        if args.len() < callee.min_args() || args.len() > callee.args.len() {
            let expected = if callee.min_args() == callee.args.len() {
                callee.args.len().to_string()
            } else {
                format!("{} to {}", callee.min_args(), callee.args.len())
            };
            return Err(structure(
                format!(
                    "'{}' expects {} arguments, got {}",
                    callee.name,
                    expected,
                    args.len()
                ),
                call,
            ));
        }
        args.iter()
            .zip(&callee.args)
            .try_for_each(|(arg, (_, t))| self.validate_expected(arg, t))
    }

    fn internal_call(
        &self,
        call: &Expr,
        name: &str,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> Result<Option<Type>, Diagnostic> {
        let Some(caller) = self.func else {
            return Err(structure("internal calls are only allowed inside functions", call));
        };
        let callee = self.contract.functions.get(name).ok_or_else(|| {
            if self.contract.storage.contains_key(name) {
                structure(format!("'self.{}' is a storage variable, not a function", name), call)
            } else {
                Diagnostic::error(
                    ErrorKind::Namespace,
                    format!("function 'self.{}' has not been declared", name),
                    call.span,
                )
            }
        })?;
        if callee.is_external() {
            return Err(Diagnostic::error(
                ErrorKind::CallViolation,
                format!("cannot call external function '{}' through 'self'", name),
                call.span,
            ));
        }
        if caller.mutability <= Mutability::View && callee.is_mutating() {
            return Err(Diagnostic::error(
                ErrorKind::CallViolation,
                format!(
                    "cannot call mutating function '{}' from a {} function",
                    name, caller.mutability
                ),
                call.span,
            ));
        }
        if caller.mutability == Mutability::Pure && callee.mutability != Mutability::Pure {
            return Err(Diagnostic::error(
                ErrorKind::CallViolation,
                format!("cannot call non-pure function '{}' from a pure function", name),
                call.span,
            ));
        }
        if let Some(kw) = keywords.first() {
            return Err(structure("internal calls do not accept keyword arguments", &kw.value));
        }
        self.check_args(call, callee, args)?;
        Ok(callee.return_type.clone())
    }

    fn external_call(
        &self,
        call: &Expr,
        iface: &str,
        name: &str,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> Result<Option<Type>, Diagnostic> {
        let interface = self.contract.interfaces.get(iface).ok_or_else(|| {
            Diagnostic::undeclared(
                iface,
                format!("interface '{}' has not been declared", iface),
                call.span,
            )
        })?;
        let callee = interface.functions.get(name).ok_or_else(|| {
            Diagnostic::error(
                ErrorKind::Namespace,
                format!("interface {} has no function '{}'", iface, name),
                call.span,
            )
        })?;
        if let Some(caller) = self.mutability() {
            if caller == Mutability::Pure {
                return Err(state_access(
                    "cannot call external contracts from a pure function",
                    call,
                ));
            }
            if caller <= Mutability::View && callee.is_mutating() {
                return Err(Diagnostic::error(
                    ErrorKind::CallViolation,
                    format!(
                        "cannot call mutating function '{}.{}' from a {} function",
                        iface, name, caller
                    ),
                    call.span,
                ));
            }
        }
        for kw in keywords {
            match kw.name.node.as_str() {
                "value" => {
                    if !callee.is_mutating() || self.mutability().is_some_and(|m| m <= Mutability::View) {
                        return Err(state_access(
                            "value can only be sent with a mutating call",
                            &kw.value,
                        ));
                    }
                    self.validate_expected(&kw.value, &Type::uint256())?;
                }
                "gas" => self.validate_expected(&kw.value, &Type::uint256())?,
                "skip_contract_check" => {
                    if !matches!(kw.value.kind, ExprKind::Bool(_)) {
                        return Err(structure("skip_contract_check must be True or False", &kw.value));
                    }
                }
                other => {
                    return Err(Diagnostic::error(
                        ErrorKind::Structure,
                        format!("unexpected keyword argument '{}' for an external call", other),
                        kw.name.span,
                    ))
                }
            }
        }
        self.check_args(call, callee, args)?;
        Ok(callee.return_type.clone())
    }

    fn struct_constructor(
        &self,
        s: &StructType,
        args: &[Expr],
        keywords: &[Keyword],
        call: &Expr,
    ) -> Result<(), Diagnostic> {
        let entries = match (args, keywords.is_empty()) {
            ([arg], true) => match &arg.kind {
                ExprKind::Dict(entries) => entries,
                _ => return Err(structure(format!("{}() expects a dict of members", s.name), arg)),
            },
            _ => return Err(structure(format!("{}() expects a dict of members", s.name), call)),
        };
        for (key, _) in entries {
            if s.member(&key.node).is_none() {
                return Err(Diagnostic::error(
                    ErrorKind::Structure,
                    format!("struct {} has no member '{}'", s.name, key.node),
                    key.span,
                ));
            }
        }
        for (i, (name, typ)) in s.members.iter().enumerate() {
            match entries.get(i) {
                Some((key, value)) if key.node == *name => self.validate_expected(value, typ)?,
                Some((key, _)) => {
                    return Err(Diagnostic::error(
                        ErrorKind::Structure,
                        format!(
                            "struct {} members must be given in declaration order: expected '{}', found '{}'",
                            s.name, name, key.node
                        ),
                        key.span,
                    ))
                }
                None => {
                    return Err(structure(
                        format!("struct {} is missing member '{}'", s.name, name),
                        call,
                    ))
                }
            }
        }
        if entries.len() > s.members.len() {
            return Err(structure(format!("struct {} has duplicate members", s.name), call));
        }
        Ok(())
    }

    // --- Writes ---

    /// Can `target` be written from the current function?
    pub fn validate_modification(&self, target: &Expr) -> Result<(), Diagnostic> {
        if let Some(root) = self.iterating.iter().find(|root| is_within(target, root)) {
            return Err(state_access(
                format!("cannot modify '{}' while iterating over it", root),
                target,
            ));
        }
        match &target.kind {
            ExprKind::Name(name) => match self.ns.get(name, target.span)? {
                Binding::Variable(var) => match var.kind {
                    VarKind::Local => Ok(()),
                    VarKind::Argument => Err(state_access(
                        format!("cannot modify function argument '{}'", name),
                        target,
                    )),
                    VarKind::LoopVar => Err(state_access(
                        format!("cannot modify loop variable '{}'", name),
                        target,
                    )),
                    VarKind::Constant => Err(state_access(
                        format!("constant '{}' cannot be written to", name),
                        target,
                    )),
                    VarKind::Immutable if self.func.is_some_and(|f| f.is_constructor) => Ok(()),
                    VarKind::Immutable => Err(state_access(
                        format!("immutable '{}' can only be written in the constructor", name),
                        target,
                    )),
                    VarKind::Storage => self.check_storage_write(target),
                },
                _ => Err(structure(format!("'{}' cannot be assigned to", name), target)),
            },
            ExprKind::Attribute { value, attr } => {
                if let Some(name) = value.as_name() {
                    match self.ns.lookup(name) {
                        Some(Binding::SelfRef) => {
                            self.self_member(target, &attr.node)?;
                            if attr.node == "balance" {
                                return Err(state_access("self.balance cannot be written to", target));
                            }
                            return self.check_storage_write(target);
                        }
                        Some(Binding::Environment(env)) => {
                            return Err(state_access(
                                format!("environment variable '{}' cannot be written to", env.name()),
                                target,
                            ))
                        }
                        _ => {}
                    }
                }
                self.validate_modification(value)
            }
            ExprKind::Subscript { value, .. } => self.validate_modification(value),
            ExprKind::Tuple(items) => items.iter().try_for_each(|e| self.validate_modification(e)),
            _ => Err(structure(format!("'{}' is not a valid assignment target", target), target)),
        }
    }

    fn check_storage_write(&self, target: &Expr) -> Result<(), Diagnostic> {
        match self.mutability() {
            Some(m) if m <= Mutability::View => Err(state_access(
                format!("cannot modify storage in a {} function", m),
                target,
            )),
            _ => Ok(()),
        }
    }
}
