//! Statement lowering.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use super::copy::{member_offset, stride};
use super::{
    add_offset, int, internal_error, op, seq, unsupported, var, with, CgResult, Codegen, Exit, Operand,
};
use crate::ast::{BinOp, Block, Expr, ExprKind, Stmt};
use crate::ir::IrNode;
use crate::span::Spanned;
use crate::typecheck::{constant, DataLocation, Type};

use super::context::CTOR_EXIT_LABEL;

impl<'a> Codegen<'a> {
    /// Lower a block in its own scope.
    pub(crate) fn block(&mut self, stmts: &Block) -> CgResult<IrNode> {
        self.push_scope();
        let lowered = stmts.iter().map(|s| self.stmt(s)).collect::<CgResult<Vec<_>>>();
        self.pop_scope();
        let mut lowered = lowered?;
        if lowered.is_empty() {
            lowered.push(IrNode::pass());
        }
        seq(lowered)
    }

    fn stmt(&mut self, s: &Spanned<Stmt>) -> CgResult<IrNode> {
        let node = match &s.node {
            Stmt::AnnAssign { target, annotation, value } => {
                let typ = self.type_of(annotation)?;
                let init = match value {
                    Some(v) => self.expr(v)?,
                    None => Operand::Zero,
                };
                let pos = self.new_local(&target.node, &typ);
                self.store(int(pos), DataLocation::Memory, &typ, init)?
            }
            Stmt::Assign { target, value } => self.assign(target, value)?,
            Stmt::AugAssign { target, op: bop, value } => self.aug_assign(target, *bop, value)?,
            Stmt::If { test, body, orelse } => {
                let test = self.word(test)?;
                let then = self.block(body)?;
                if orelse.is_empty() {
                    op("if", vec![test, then])?
                } else {
                    let otherwise = self.block(orelse)?;
                    op("if", vec![test, then, otherwise])?
                }
            }
            Stmt::For { target, iter, body } => self.for_loop(&target.node, iter, body)?,
            Stmt::Assert { test, msg } => {
                let test = self.word(test)?;
                match msg {
                    None => op("assert", vec![test])?,
                    Some(m) if m.as_name() == Some("UNREACHABLE") => op("assert_unreachable", vec![test])?,
                    Some(m) => {
                        let revert = self.revert_reason(m)?;
                        op("if", vec![op("iszero", vec![test])?, revert])?
                    }
                }
            }
            Stmt::Raise { msg } => match msg {
                None => op("revert", vec![int(0), int(0)])?,
                Some(m) if m.as_name() == Some("UNREACHABLE") => op("invalid", vec![])?,
                Some(m) => self.revert_reason(m)?,
            },
            Stmt::Return(value) => self.return_stmt(value.as_ref(), s)?,
            Stmt::Log(call) => self.log(call)?,
            Stmt::Expr(e) => {
                let operand = match &e.kind {
                    ExprKind::Call { .. } => self.call(e)?,
                    _ => self.expr(e)?,
                };
                discard(operand)?
            }
            Stmt::Pass => IrNode::pass(),
            Stmt::Break => op("break", vec![])?,
            Stmt::Continue => op("continue", vec![])?,
        };
        Ok(node.with_span(s.span))
    }

    fn assign(&mut self, target: &Expr, value: &Expr) -> CgResult<IrNode> {
        let ExprKind::Tuple(targets) = &target.kind else {
            let operand = self.expr(value)?;
            let (ptr, loc, typ) = self.place(target)?;
            return self.store(ptr, loc, &typ, operand);
        };
        // Materialize the source first: targets may appear on the right.
        let typ = self.type_of(value)?;
        let operand = self.expr(value)?;
        let (src, actual) = self.in_memory(operand, &typ)?;
        let Type::Tuple(members) = &actual else {
            return Err(internal_error(format!("cannot unpack {}", actual), value));
        };
        let s = self.fresh("unpack");
        let mut body = Vec::with_capacity(targets.len());
        for (i, (t, member)) in targets.iter().zip(members).enumerate() {
            let from = add_offset(var(&s), member_offset(members, i) * 32)?;
            let part = self.read(from, DataLocation::Memory, member.clone())?;
            let (ptr, loc, typ) = self.place(t)?;
            body.push(self.store(ptr, loc, &typ, part)?);
        }
        with(&s, src, seq(body)?)
    }

    fn aug_assign(&mut self, target: &Expr, bop: BinOp, value: &Expr) -> CgResult<IrNode> {
        let (ptr, loc, typ) = self.place(target)?;
        let rhs = self.word(value)?;
        self.bind("target", ptr, |cg, ptr| {
            let current = cg.load(ptr.clone(), loc)?;
            let updated = cg.arith(bop, &typ, current, rhs, value)?;
            cg.store_word(ptr, loc, updated)
        })
    }

    // ── Loops ──

    fn for_loop(&mut self, target: &str, iter: &Expr, body: &Block) -> CgResult<IrNode> {
        if let ExprKind::Call { func, args, .. } = &iter.kind {
            if func.as_name() == Some("range") && self.local("range").is_none() {
                return self.range_loop(target, iter, args, body);
            }
        }
        self.container_loop(target, iter, body)
    }

    fn literal_int(&self, e: &Expr) -> CgResult<Option<BigInt>> {
        let contract = self.contract;
        let folded = constant::fold(e, &|n| contract.constant_value(n))?;
        Ok(folded.and_then(|f| f.as_int().cloned()))
    }

    fn range_loop(&mut self, target: &str, iter: &Expr, args: &[Expr], body: &Block) -> CgResult<IrNode> {
        let typ = self.type_of(iter)?;
        let (start, rounds) = match args {
            [stop] => {
                let n = self.literal_int(stop)?.ok_or_else(|| unsupported("a non-literal range bound", stop))?;
                (int(0), n)
            }
            [start, stop] => match (self.literal_int(start)?, self.literal_int(stop)?) {
                (Some(a), Some(b)) => (int(a.clone()), b - a),
                _ => {
                    let ExprKind::BinOp { right, .. } = &stop.kind else {
                        return Err(unsupported("this range() form", stop));
                    };
                    let n = self
                        .literal_int(right)?
                        .ok_or_else(|| unsupported("a non-literal range length", right))?;
                    let first = self.word(start)?;
                    // The last value must still fit in the loop variable type.
                    let first = match typ.bounds() {
                        Some((lo, hi)) if typ.is_signed() => {
                            op("clamp", vec![int(lo), first, int(hi - &n)])?
                        }
                        Some((_, hi)) => op("uclample", vec![first, int(hi - &n)])?,
                        None => first,
                    };
                    (first, n)
                }
            },
            _ => return Err(unsupported("range() with these arguments", iter)),
        };
        if !rounds.is_positive() {
            return Ok(IrNode::pass());
        }
        let rounds = rounds.to_u64().ok_or_else(|| unsupported("a range this long", iter))?;
        self.push_scope();
        let counter = self.new_local(target, &typ);
        let lowered = self.block(body);
        self.pop_scope();
        op("repeat", vec![int(counter), start, int(rounds), lowered?])
    }

    fn container_loop(&mut self, target: &str, iter: &Expr, body: &Block) -> CgResult<IrNode> {
        let container = self.type_of(iter)?;
        let (elem, count, dynamic) = match &container {
            Type::Array(elem, n) => ((**elem).clone(), *n, false),
            Type::DynArray(elem, n) => ((**elem).clone(), *n, true),
            other => return Err(unsupported(format!("iterating over {}", other), iter)),
        };
        let (base, loc, _) = self.place(iter)?;
        // Kept in memory rather than on the stack so the body may return.
        let base_slot = self.alloc(32);
        let counter = self.alloc(32);
        let b = || op("mload", vec![int(base_slot)]);
        let i = || op("mload", vec![int(counter)]);

        self.push_scope();
        let var_pos = self.new_local(target, &elem);
        let first = if dynamic { add_offset(b()?, stride(loc))? } else { b()? };
        let at = op("add", vec![first, op("mul", vec![i()?, int(elem.size_in_words() * stride(loc))])?])?;
        let element = self.read(at, loc, elem.clone())?;
        let mut round = Vec::with_capacity(3);
        if dynamic {
            let length = self.load(b()?, loc)?;
            round.push(op("if", vec![op("ge", vec![i()?, length])?, op("break", vec![])?])?);
        }
        round.push(self.store(int(var_pos), DataLocation::Memory, &elem, element)?);
        let lowered = self.block(body);
        self.pop_scope();
        round.push(lowered?);

        seq(vec![
            op("mstore", vec![int(base_slot), base])?,
            op("repeat", vec![int(counter), int(0), int(count), seq(round)?])?,
        ])
    }

    // ── Return ──

    /// Release the reentrancy lock of the current function, if it holds one.
    pub(crate) fn unlock(&self) -> CgResult<Option<IrNode>> {
        let Some(func) = self.func else {
            return Ok(None);
        };
        let Some(key) = &func.nonreentrant else {
            return Ok(None);
        };
        match self.contract.layout.lock_slot(key) {
            Some(slot) => Ok(Some(op("sstore", vec![int(slot), int(0)])?)),
            None => Ok(None),
        }
    }

    fn return_stmt(&mut self, value: Option<&Expr>, s: &Spanned<Stmt>) -> CgResult<IrNode> {
        let func = self.func.ok_or_else(|| {
            crate::diagnostic::Diagnostic::error(
                crate::diagnostic::ErrorKind::Panic,
                "return outside of a function",
                s.span,
            )
        })?;
        if self.exit == Exit::Constructor {
            return op("goto", vec![var(CTOR_EXIT_LABEL)]);
        }
        let unlock = self.unlock()?;
        let mut body = Vec::new();
        match (value, &func.return_type) {
            (Some(v), Some(typ)) => {
                let operand = self.expr(v)?;
                let frame = self.frame(&func.name)?;
                let buf = frame
                    .ret_buf
                    .ok_or_else(|| internal_error(format!("'{}' has no return buffer", func.name), v))?;
                if self.exit == Exit::Internal {
                    body.push(self.store(int(buf), DataLocation::Memory, typ, operand)?);
                    body.extend(unlock);
                    body.push(self.return_jump(&func.name)?);
                    return seq(body);
                }
                let exit = self.external_return(buf, typ, operand, unlock)?;
                body.push(exit);
            }
            (None, None) | (Some(_), None) | (None, Some(_)) => {
                body.extend(unlock);
                match self.exit {
                    Exit::Internal => body.push(self.return_jump(&func.name)?),
                    _ => body.push(op("stop", vec![])?),
                }
            }
        }
        seq(body)
    }

    /// `(jump (mload ret_pc))`
    pub(crate) fn return_jump(&self, name: &str) -> CgResult<IrNode> {
        let frame = self.frame(name)?;
        op("jump", vec![op("mload", vec![int(frame.ret_pc)])?])
    }

    /// Encode `operand` into the external return buffer and `return` it.
    pub(crate) fn external_return(
        &mut self,
        buf: u64,
        typ: &Type,
        operand: Operand,
        unlock: Option<IrNode>,
    ) -> CgResult<IrNode> {
        let mut body = Vec::new();
        if typ.is_value_type() {
            let word = self.to_word(operand)?;
            body.push(op("mstore", vec![int(buf), word])?);
            body.extend(unlock);
            body.push(op("return", vec![int(buf), int(32)])?);
            return seq(body);
        }
        let encoded = match typ {
            // A returned tuple is the top-level ABI tuple itself.
            Type::Tuple(_) => {
                let typ = typ.clone();
                self.with_members(operand, &typ, |cg, members| cg.abi_encode(int(buf), members))?
            }
            _ => self.abi_encode(int(buf), vec![(operand, typ.clone())])?,
        };
        let len = self.fresh("ret_len");
        body.extend(unlock);
        body.push(op("return", vec![int(buf), var(&len)])?);
        with(&len, encoded, seq(body)?)
    }
}

/// Drop whatever an expression statement leaves on the stack.
fn discard(operand: Operand) -> CgResult<IrNode> {
    match operand {
        Operand::Word(node) | Operand::Ptr { node, .. } if node.valency == 0 => Ok(node),
        Operand::Word(node) | Operand::Ptr { node, .. } => op("pop", vec![node]),
        Operand::Members(ms) => {
            let parts = ms.into_iter().map(discard).collect::<CgResult<Vec<_>>>()?;
            if parts.is_empty() {
                return Ok(IrNode::pass());
            }
            seq(parts)
        }
        Operand::Zero => Ok(IrNode::pass()),
    }
}
