//! IR peephole optimizer.
//!
//! Rewrites a tree bottom-up: children are optimized first, then the node
//! itself is matched against a small set of rules. The input is never
//! mutated. Every rule produces a node whose gas bound is no larger than
//! the one it replaces.

#[cfg(test)]
mod tests;

use alloy_primitives::U256;
use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, Zero};
use tracing::{debug, instrument};

use super::{IrError, IrNode, IrValue};

/// Optimize a tree.
#[instrument(skip_all, fields(gas_before = node.gas))]
pub fn optimize(node: &IrNode) -> Result<IrNode, IrError> {
    let mut opt = Optimizer::default();
    let out = opt.visit(node)?;
    debug!(rewrites = opt.rewrites, gas_after = out.gas, "optimized IR");
    Ok(out)
}

#[derive(Default)]
struct Optimizer {
    rewrites: usize,
}

impl Optimizer {
    fn visit(&mut self, node: &IrNode) -> Result<IrNode, IrError> {
        let IrValue::Op(name) = &node.value else {
            return Ok(node.clone());
        };
        let args = node
            .args
            .iter()
            .map(|a| self.visit(a))
            .collect::<Result<Vec<_>, _>>()?;
        // Nodes that stand for gas spent elsewhere are rebuilt, never replaced.
        let rewritten = if node.add_gas_estimate == 0 {
            self.rewrite(name, &args)?
        } else {
            None
        };
        let out = match rewritten {
            Some(new) => {
                self.rewrites += 1;
                new
            }
            None => {
                let args = if name == "seq" { self.flatten_seq(args) } else { args };
                IrNode::op(name, args)?.with_add_gas(node.add_gas_estimate)
            }
        };
        Ok(carry_metadata(node, out))
    }

    fn rewrite(&mut self, name: &str, args: &[IrNode]) -> Result<Option<IrNode>, IrError> {
        if let Some(folded) = fold_binary(name, args) {
            return Ok(Some(folded));
        }
        match name {
            "add" => Ok(drop_zero_add(args).or_else(|| merge_adds(args))),
            "clamp" | "uclamplt" | "uclample" | "uclampgt" | "uclampge" | "clamplt"
            | "clample" | "clampgt" | "clampge" => fold_clamp(name, args),
            "clamp_nonzero" => fold_nonzero(args),
            "seq" if args.len() == 1 && is_plain_seq_child(&args[0]) => Ok(Some(args[0].clone())),
            _ => Ok(None),
        }
    }

    /// Splice nested `seq` nodes into their parent and drop `pass`.
    fn flatten_seq(&mut self, args: Vec<IrNode>) -> Vec<IrNode> {
        let mut spliced = Vec::with_capacity(args.len());
        for arg in args {
            if arg.is_op("seq") && !arg.args.is_empty() && is_plain_seq_child(&arg) {
                self.rewrites += 1;
                spliced.extend(arg.args);
            } else {
                spliced.push(arg);
            }
        }
        // Only the last child decides the valency; empty statements before it go.
        let last = spliced.len().saturating_sub(1);
        let mut out = Vec::with_capacity(spliced.len());
        for (i, arg) in spliced.into_iter().enumerate() {
            if i != last && (arg.is_op("pass") || (arg.is_op("seq") && arg.args.is_empty())) {
                self.rewrites += 1;
                continue;
            }
            out.push(arg);
        }
        out
    }
}

/// A `seq` that carries no bookkeeping of its own.
fn is_plain_seq_child(node: &IrNode) -> bool {
    node.add_gas_estimate == 0 && node.func_name.is_none() && node.typ.is_none() && node.location.is_none()
}

/// Keep the replaced node's type, location and function bookkeeping.
fn carry_metadata(old: &IrNode, mut new: IrNode) -> IrNode {
    if old.typ.is_some() {
        new.typ = old.typ.clone();
    }
    if old.location.is_some() {
        new.location = old.location;
    }
    if new.span.is_none() {
        new.span = old.span;
    }
    if new.annotation.is_none() {
        new.annotation = old.annotation.clone();
    }
    if let Some(total) = old.total_gas {
        new.total_gas = Some(total.saturating_sub(old.gas).saturating_add(new.gas));
        new.func_name = old.func_name.clone();
    }
    new
}

// ─── 256-bit words ─────────────────────────────────────────────────

fn modulus() -> BigInt {
    BigInt::one() << 256usize
}

/// Two's complement word of a literal, if it fits in 256 bits either way.
fn to_word(v: &BigInt) -> Option<U256> {
    let m = modulus();
    if *v >= m || *v < -(BigInt::one() << 255usize) {
        return None;
    }
    let w = if v.is_negative() { v + m } else { v.clone() };
    let (_, bytes) = w.to_bytes_be();
    U256::try_from_be_slice(&bytes)
}

fn from_word(w: U256, signed: bool) -> BigInt {
    let v = BigInt::from_bytes_be(Sign::Plus, &w.to_be_bytes::<32>());
    if signed && w.bit(255) {
        v - modulus()
    } else {
        v
    }
}

fn sign_bit() -> U256 {
    U256::from(1u8) << 255usize
}

fn negate(w: U256) -> U256 {
    (!w).wrapping_add(U256::from(1u8))
}

fn abs(w: U256) -> U256 {
    if w.bit(255) {
        negate(w)
    } else {
        w
    }
}

fn signed_lt(a: U256, b: U256) -> bool {
    (a ^ sign_bit()) < (b ^ sign_bit())
}

fn flag(b: bool) -> U256 {
    if b {
        U256::from(1u8)
    } else {
        U256::ZERO
    }
}

fn shift_amount(s: U256) -> Option<usize> {
    (s < U256::from(256u16)).then(|| s.to::<usize>())
}

/// EVM semantics of a binary operation.
fn eval(op: &str, a: U256, b: U256) -> Option<U256> {
    let zero = U256::ZERO;
    let v = match op {
        "add" => a.wrapping_add(b),
        "sub" => a.wrapping_sub(b),
        "mul" => a.wrapping_mul(b),
        "div" => a.checked_div(b).unwrap_or(zero),
        "mod" => a.checked_rem(b).unwrap_or(zero),
        "sdiv" => {
            if b.is_zero() {
                zero
            } else {
                let q = abs(a) / abs(b);
                if a.bit(255) != b.bit(255) {
                    negate(q)
                } else {
                    q
                }
            }
        }
        "smod" => {
            if b.is_zero() {
                zero
            } else {
                let r = abs(a) % abs(b);
                if a.bit(255) {
                    negate(r)
                } else {
                    r
                }
            }
        }
        "exp" => a.wrapping_pow(b),
        "lt" => flag(a < b),
        "gt" => flag(a > b),
        "le" => flag(a <= b),
        "ge" => flag(a >= b),
        "slt" => flag(signed_lt(a, b)),
        "sgt" => flag(signed_lt(b, a)),
        "sle" => flag(!signed_lt(b, a)),
        "sge" => flag(!signed_lt(a, b)),
        "eq" => flag(a == b),
        "ne" => flag(a != b),
        "and" => a & b,
        "or" => a | b,
        "xor" => a ^ b,
        // Shifts take the shift amount first.
        "shl" => shift_amount(a).map_or(zero, |s| b << s),
        "shr" => shift_amount(a).map_or(zero, |s| b >> s),
        "sar" => match (shift_amount(a), b.bit(255)) {
            (Some(s), true) => !((!b) >> s),
            (Some(s), false) => b >> s,
            (None, true) => !zero,
            (None, false) => zero,
        },
        _ => return None,
    };
    Some(v)
}

fn symbol(op: &str) -> Option<&'static str> {
    let s = match op {
        "add" => "+",
        "sub" => "-",
        "mul" => "*",
        "div" | "sdiv" => "/",
        "mod" | "smod" => "%",
        "exp" => "**",
        "lt" | "slt" => "<",
        "gt" | "sgt" => ">",
        "le" | "sle" => "<=",
        "ge" | "sge" => ">=",
        "eq" => "==",
        "ne" => "!=",
        "and" => "&",
        "or" => "|",
        "xor" => "^",
        "shl" => "<<",
        "shr" | "sar" => ">>",
        _ => return None,
    };
    Some(s)
}

fn describe(node: &IrNode) -> String {
    match (&node.annotation, node.as_int()) {
        (Some(a), _) => a.clone(),
        (None, Some(v)) => v.to_string(),
        (None, None) => node.to_string(),
    }
}

// ─── Rules ─────────────────────────────────────────────────────────

/// (a) Fold a binary operation on two literals.
fn fold_binary(op: &str, args: &[IrNode]) -> Option<IrNode> {
    let sym = symbol(op)?;
    let [l, r] = args else {
        return None;
    };
    let (lv, rv) = (l.as_int()?, r.as_int()?);
    let result = eval(op, to_word(lv)?, to_word(rv)?)?;
    let signed = op.starts_with('s') || lv.is_negative() || rv.is_negative();
    let annotation = format!("{} {} {}", describe(l), sym, describe(r));
    Some(IrNode::int(from_word(result, signed)).with_annotation(annotation))
}

/// (b) `x + 0` is `x`.
fn drop_zero_add(args: &[IrNode]) -> Option<IrNode> {
    let [l, r] = args else {
        return None;
    };
    if r.as_int().is_some_and(|v| v.is_zero()) {
        return Some(l.clone());
    }
    if l.as_int().is_some_and(|v| v.is_zero()) {
        return Some(r.clone());
    }
    None
}

/// (c) `(add (add x a) b)` becomes `(add x a+b)`.
fn merge_adds(args: &[IrNode]) -> Option<IrNode> {
    let [l, r] = args else {
        return None;
    };
    let (inner, outer_const) = match (l.as_int(), r.as_int()) {
        (None, Some(c)) => (l, c),
        (Some(c), None) => (r, c),
        _ => return None,
    };
    if !inner.is_op("add") || inner.add_gas_estimate != 0 {
        return None;
    }
    let (x, inner_const) = match (inner.args[0].as_int(), inner.args[1].as_int()) {
        (None, Some(c)) => (&inner.args[0], c),
        (Some(c), None) => (&inner.args[1], c),
        _ => return None,
    };
    let sum = to_word(inner_const)?.wrapping_add(to_word(outer_const)?);
    let signed = inner_const.is_negative() || outer_const.is_negative();
    IrNode::op("add", vec![x.clone(), IrNode::int(from_word(sum, signed))]).ok()
}

/// (d) Decide a bounds check whose operands are all literals.
fn fold_clamp(op: &str, args: &[IrNode]) -> Result<Option<IrNode>, IrError> {
    let Some(values) = args
        .iter()
        .map(|a| a.as_int().and_then(to_word))
        .collect::<Option<Vec<U256>>>()
    else {
        return Ok(None);
    };
    let (checked, ok) = match (op, values.as_slice()) {
        ("clamp", [lo, x, hi]) => (1, !signed_lt(*x, *lo) && !signed_lt(*hi, *x)),
        ("uclamplt", [x, b]) => (0, x < b),
        ("uclample", [x, b]) => (0, x <= b),
        ("uclampgt", [x, b]) => (0, x > b),
        ("uclampge", [x, b]) => (0, x >= b),
        ("clamplt", [x, b]) => (0, signed_lt(*x, *b)),
        ("clample", [x, b]) => (0, !signed_lt(*b, *x)),
        ("clampgt", [x, b]) => (0, signed_lt(*b, *x)),
        ("clampge", [x, b]) => (0, !signed_lt(*x, *b)),
        _ => return Ok(None),
    };
    if !ok {
        let shown: Vec<String> = args.iter().map(describe).collect();
        return Err(IrError::ClampFailure(format!("({} {})", op, shown.join(" "))));
    }
    Ok(Some(args[checked].clone()))
}

/// (e) `clamp_nonzero` of a literal.
fn fold_nonzero(args: &[IrNode]) -> Result<Option<IrNode>, IrError> {
    match args.first().and_then(|a| a.as_int()) {
        Some(v) if v.is_zero() => Err(IrError::ClampFailure(format!(
            "(clamp_nonzero {})",
            describe(&args[0])
        ))),
        Some(_) => Ok(Some(args[0].clone())),
        None => Ok(None),
    }
}
