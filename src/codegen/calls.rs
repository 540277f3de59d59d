//! Calls: internal functions, external contracts, struct and interface
//! constructors, and dynamic array methods.

use num_bigint::BigInt;

use super::abi::Source;
use super::copy::stride;
use super::{
    add_offset, int, internal_error, op, seq, unsupported, var, with, CgResult, Codegen, Operand,
};
use crate::ast::{Expr, ExprKind, Keyword};
use crate::ir::IrNode;
use crate::typecheck::builtins::{bool_keyword, Builtin};
use crate::typecheck::function::method_id;
use crate::typecheck::{ContractFunction, DataLocation, Mutability, Type};

fn keyword<'k>(keywords: &'k [Keyword], name: &str) -> Option<&'k Expr> {
    keywords.iter().find(|k| k.name.node == name).map(|k| &k.value)
}

impl<'a> Codegen<'a> {
    /// Lower any call expression. Calls without a return value produce a
    /// zero-valency `Word`.
    pub(crate) fn call(&mut self, e: &Expr) -> CgResult<Operand> {
        let ExprKind::Call { func, args, keywords } = &e.kind else {
            return Err(internal_error("expected a call", e));
        };
        match &func.kind {
            ExprKind::Name(name) => {
                match self.types.get(&e.id) {
                    Some(Type::Struct(s)) if s.name == *name => return self.struct_constructor(e, args),
                    Some(Type::Interface(i)) if i == name => {
                        let addr = args.first().ok_or_else(|| internal_error("missing address", e))?;
                        return Ok(Operand::Word(self.word(addr)?));
                    }
                    _ => {}
                }
                let builtin = Builtin::ALL
                    .iter()
                    .copied()
                    .find(|b| b.name() == name)
                    .ok_or_else(|| unsupported(format!("calling '{}'", name), func))?;
                self.builtin(builtin, e, args, keywords)
            }
            ExprKind::Attribute { value, attr } => {
                if value.as_name() == Some("self") && self.local("self").is_none() {
                    return self.internal_call(e, &attr.node, args);
                }
                match self.type_of(value)? {
                    Type::Interface(iface) => self.external_call(e, &iface, &attr.node, value, args, keywords),
                    Type::DynArray(..) if attr.node == "append" => self.append(e, value, args),
                    Type::DynArray(..) if attr.node == "pop" => self.pop(e, value),
                    other => Err(unsupported(format!("method '{}' of {}", attr.node, other), func)),
                }
            }
            _ => Err(unsupported(format!("calling '{}'", func), func)),
        }
    }

    fn struct_constructor(&mut self, e: &Expr, args: &[Expr]) -> CgResult<Operand> {
        let Some(ExprKind::Dict(entries)) = args.first().map(|a| &a.kind) else {
            return Err(internal_error("struct constructor without members", e));
        };
        let members = entries
            .iter()
            .map(|(_, value)| self.expr(value))
            .collect::<CgResult<Vec<_>>>()?;
        Ok(Operand::Members(members))
    }

    // ── Internal calls ──

    /// Argument for position `i`: the caller's expression or the callee's
    /// default.
    fn argument(&mut self, callee: &ContractFunction, args: &[Expr], i: usize, at: &Expr) -> CgResult<Operand> {
        if let Some(arg) = args.get(i) {
            return self.expr(arg);
        }
        let (_, typ) = &callee.args[i];
        let default = i
            .checked_sub(callee.min_args())
            .and_then(|d| callee.defaults.get(d))
            .ok_or_else(|| internal_error(format!("argument {} of '{}' has no value", i, callee.name), at))?;
        if self.types.contains_key(&default.id) && !default.is_literal() {
            return self.expr(default);
        }
        self.literal(default, typ)
    }

    fn internal_call(&mut self, e: &Expr, name: &str, args: &[Expr]) -> CgResult<Operand> {
        let contract = self.contract;
        let callee = contract
            .functions
            .get(name)
            .ok_or_else(|| internal_error(format!("unknown function '{}'", name), e))?;
        let frame = self.frame(name)?.clone();

        // Every argument is evaluated before the frame is written: a later
        // argument may call the same function.
        let mut bindings = Vec::new();
        let mut writes = Vec::new();
        for (i, (_, typ)) in callee.args.iter().enumerate() {
            let dst = int(frame.args[i]);
            match self.argument(callee, args, i, e)? {
                Operand::Zero => writes.push(self.zero(dst, DataLocation::Memory, typ)?),
                Operand::Word(word) => {
                    let n = self.fresh("arg");
                    writes.push(op("mstore", vec![dst, var(&n)])?);
                    bindings.push((n, word));
                }
                operand => {
                    let (node, loc, actual) = match operand {
                        Operand::Ptr { node, loc, typ } => (node, loc, typ),
                        other => {
                            let (node, actual) = self.in_memory(other, typ)?;
                            (node, DataLocation::Memory, actual)
                        }
                    };
                    let n = self.fresh("arg");
                    writes.push(self.copy(dst, DataLocation::Memory, typ, var(&n), loc, &actual)?);
                    bindings.push((n, node));
                }
            }
        }
        let mut setup = if writes.is_empty() { IrNode::pass() } else { seq(writes)? };
        for (n, value) in bindings.into_iter().rev() {
            setup = with(&n, value, setup)?;
        }

        let back = self.fresh("ret");
        let gas = self.internal_gas.get(name).copied().unwrap_or(0);
        let label = self.function_label(name);
        let mut body = vec![
            setup,
            op("mstore", vec![int(frame.ret_pc), op("symbol", vec![var(&back)])?])?,
            op("goto", vec![var(&label)])?.with_add_gas(gas),
            op("label", vec![var(&back)])?,
        ];
        let Some(ret) = &callee.return_type else {
            return Ok(Operand::Word(seq(body)?.with_annotation(format!("self.{}", name))));
        };
        let buf = frame
            .ret_buf
            .ok_or_else(|| internal_error(format!("'{}' has no return buffer", name), e))?;
        if ret.is_value_type() {
            body.push(op("mload", vec![int(buf)])?);
            return Ok(Operand::Word(seq(body)?.with_annotation(format!("self.{}", name))));
        }
        // Copied out so a later call to the same function cannot clobber it.
        let tmp = self.alloc_for(ret);
        body.push(self.copy(int(tmp), DataLocation::Memory, ret, int(buf), DataLocation::Memory, ret)?);
        body.push(int(tmp));
        Ok(Operand::memory(seq(body)?.with_annotation(format!("self.{}", name)), ret.clone()))
    }

    // ── External calls ──

    fn external_call(
        &mut self,
        e: &Expr,
        iface: &str,
        fname: &str,
        target: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> CgResult<Operand> {
        let contract = self.contract;
        let callee = contract
            .interfaces
            .get(iface)
            .and_then(|i| i.functions.get(fname))
            .ok_or_else(|| internal_error(format!("unknown function {}.{}", iface, fname), e))?;
        let caller = self.current_function(e)?;
        let selector = method_id(&callee.signature(args.len()));

        let addr = self.word(target)?;
        let mut items = Vec::with_capacity(args.len());
        for (i, (_, typ)) in callee.args.iter().enumerate().take(args.len()) {
            items.push((self.argument(callee, args, i, e)?, typ.clone()));
        }
        let args_size: u64 = items
            .iter()
            .map(|(_, t)| t.abi_head_size() + if t.is_dynamic() { t.abi_max_size() } else { 0 })
            .sum();
        let ret_size = callee.return_type.as_ref().map_or(0, Type::abi_max_size);
        let buf = self.alloc(32 + args_size.max(ret_size) + 32);

        let a = self.fresh("target");
        let len = self.fresh("args_len");
        let gas = match keyword(keywords, "gas") {
            Some(g) => self.word(g)?,
            None => op("gas", vec![])?,
        };
        let input = vec![int(buf + 28), op("add", vec![int(4), var(&len)])?, int(0), int(0)];
        let is_static = caller.mutability <= Mutability::View || !callee.is_mutating();
        let call = if is_static {
            let mut operands = vec![gas, var(&a)];
            operands.extend(input);
            op("staticcall", operands)?
        } else {
            let value = match keyword(keywords, "value") {
                Some(v) => self.word(v)?,
                None => int(0),
            };
            let mut operands = vec![gas, var(&a), value];
            operands.extend(input);
            op("call", operands)?
        };
        let encoded = self.abi_encode(int(buf + 32), items)?;

        let mut body = Vec::new();
        if bool_keyword(keywords, "skip_contract_check") != Some(true) {
            body.push(op("assert", vec![op("extcodesize", vec![var(&a)])?])?);
            body.push(op(
                "assert",
                vec![op("iszero", vec![op("eq", vec![var(&a), op("address", vec![])?])?])?],
            )?);
        }
        body.push(op("mstore", vec![int(buf), int(BigInt::from(u32::from_be_bytes(selector)))])?);
        body.push(with(&len, encoded, op("if", vec![op("iszero", vec![call])?, bubble_revert()?])?)?);

        let Some(ret) = &callee.return_type else {
            return Ok(Operand::Word(with(&a, addr, seq(body)?)?));
        };
        let head = match ret {
            Type::Tuple(ts) => ts.iter().map(Type::abi_head_size).sum(),
            _ => ret.abi_head_size(),
        };
        let size = op("returndatasize", vec![])?;
        body.push(op("assert", vec![op("ge", vec![size.clone(), int(head)])?])?);
        let r = self.fresh("rsize");
        let clamped = op("if", vec![op("gt", vec![var(&r), int(ret_size)])?, int(ret_size), var(&r)])?;
        body.push(with(&r, size, op("returndatacopy", vec![int(buf), int(0), clamped])?)?);
        let tmp = self.alloc_for(ret);
        body.push(self.abi_decode_tuple(int(tmp), ret, int(buf), Source::Memory)?);
        if ret.is_value_type() {
            body.push(op("mload", vec![int(tmp)])?);
            return Ok(Operand::Word(with(&a, addr, seq(body)?)?));
        }
        body.push(int(tmp));
        Ok(Operand::memory(with(&a, addr, seq(body)?)?, ret.clone()))
    }

    // ── DynArray methods ──

    fn append(&mut self, e: &Expr, array: &Expr, args: &[Expr]) -> CgResult<Operand> {
        let (base, loc, typ) = self.place(array)?;
        let Type::DynArray(elem, cap) = &typ else {
            return Err(internal_error(format!("append() on {}", typ), e));
        };
        let item = args.first().ok_or_else(|| internal_error("append() without an argument", e))?;
        let value = self.expr(item)?;
        let b = self.fresh("arr");
        let l = self.fresh("len");
        let slot = op(
            "add",
            vec![
                add_offset(var(&b), stride(loc))?,
                op("mul", vec![var(&l), int(elem.size_in_words() * stride(loc))])?,
            ],
        )?;
        let body = seq(vec![
            op("assert", vec![op("lt", vec![var(&l), int(*cap)])?])?,
            self.store(slot, loc, elem, value)?,
            self.store_word(var(&b), loc, op("add", vec![var(&l), int(1)])?)?,
        ])?;
        let length = self.load(var(&b), loc)?;
        Ok(Operand::Word(with(&b, base, with(&l, length, body)?)?))
    }

    fn pop(&mut self, e: &Expr, array: &Expr) -> CgResult<Operand> {
        let (base, loc, typ) = self.place(array)?;
        let Type::DynArray(elem, _) = &typ else {
            return Err(internal_error(format!("pop() on {}", typ), e));
        };
        let b = self.fresh("arr");
        let n = self.fresh("last");
        let last = op("sub", vec![op("clamp_nonzero", vec![self.load(var(&b), loc)?])?, int(1)])?;
        let slot = op(
            "add",
            vec![
                add_offset(var(&b), stride(loc))?,
                op("mul", vec![var(&n), int(elem.size_in_words() * stride(loc))])?,
            ],
        )?;
        let shrink = self.store_word(var(&b), loc, var(&n))?;
        let result = if elem.is_value_type() {
            seq(vec![shrink, self.load(slot, loc)?])?
        } else {
            let tmp = self.alloc_for(elem);
            let copy = self.copy(int(tmp), DataLocation::Memory, elem, slot, loc, elem)?;
            seq(vec![shrink, copy, int(tmp)])?
        };
        let node = with(&b, base, with(&n, last, result)?)?;
        if elem.is_value_type() {
            Ok(Operand::Word(node))
        } else {
            Ok(Operand::memory(node, (**elem).clone()))
        }
    }
}

/// Forward the callee's revert data.
pub(crate) fn bubble_revert() -> CgResult<IrNode> {
    let size = || op("returndatasize", vec![]);
    seq(vec![
        op("returndatacopy", vec![int(0), int(0), size()?])?,
        op("revert", vec![int(0), size()?])?,
    ])
}
