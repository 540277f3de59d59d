//! Checked arithmetic. Every operation either produces a value inside the
//! bounds of its type or reverts.

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::{int, op, seq, unsupported, var, with, CgResult, Codegen};
use crate::ast::{BinOp, Expr};
use crate::ir::{IrNode, IrValue};
use crate::typecheck::types::decimal_divisor;
use crate::typecheck::Type;

fn is_trivial(node: &IrNode) -> bool {
    node.args.is_empty() && matches!(node.value, IrValue::Int(_) | IrValue::Name(_))
}

fn int256_min() -> BigInt {
    -(BigInt::one() << 255usize)
}

/// Largest `e` with `lo <= base**e <= hi`, capped at 256.
fn max_exponent(base: &BigInt, lo: &BigInt, hi: &BigInt) -> u64 {
    let mut e = 0u64;
    let mut acc = BigInt::one();
    while e < 256 {
        let next = &acc * base;
        if next > *hi || next < *lo {
            break;
        }
        acc = next;
        e += 1;
    }
    e
}

impl<'a> Codegen<'a> {
    /// Bind `node` to a fresh name unless it is already a literal or a name.
    pub(crate) fn bind(
        &mut self,
        hint: &str,
        node: IrNode,
        body: impl FnOnce(&mut Self, IrNode) -> CgResult<IrNode>,
    ) -> CgResult<IrNode> {
        if is_trivial(&node) {
            return body(self, node);
        }
        let name = self.fresh(hint);
        let inner = body(self, var(&name))?;
        with(&name, node, inner)
    }

    /// Revert unless `x` fits in `typ`.
    pub(crate) fn bounded(&self, x: IrNode, typ: &Type) -> CgResult<IrNode> {
        match typ {
            // Full-width results are guarded by the overflow asserts of
            // each operation instead; there is no wider value to clamp.
            Type::Int(it) if it.bits == 256 => Ok(x),
            Type::Int(it) if !it.signed => op("uclample", vec![x, int(it.bounds().1)]),
            Type::Int(_) | Type::Decimal => match typ.bounds() {
                Some((lo, hi)) => op("clamp", vec![int(lo), x, int(hi)]),
                None => Ok(x),
            },
            _ => Ok(x),
        }
    }

    /// `-x`, reverting when the result does not fit.
    pub(crate) fn negate(&self, x: IrNode, typ: &Type) -> CgResult<IrNode> {
        match typ {
            Type::Int(it) if it.bits == 256 => {
                op("sub", vec![int(0), op("clampgt", vec![x, int(int256_min())])?])
            }
            _ => self.bounded(op("sub", vec![int(0), x])?, typ),
        }
    }

    pub(crate) fn arith(&mut self, bop: BinOp, typ: &Type, l: IrNode, r: IrNode, at: &Expr) -> CgResult<IrNode> {
        let signed = typ.is_signed();
        match bop {
            BinOp::BitAnd => return op("and", vec![l, r]),
            BinOp::BitOr => return op("or", vec![l, r]),
            BinOp::BitXor => return op("xor", vec![l, r]),
            BinOp::Shl => {
                let shifted = op("shl", vec![r, l])?;
                return self.bounded(shifted, typ);
            }
            BinOp::Shr => return op(if signed { "sar" } else { "shr" }, vec![r, l]),
            BinOp::Pow => return self.pow(typ, l, r, at),
            _ => {}
        }
        match typ {
            Type::Decimal => self.decimal(bop, typ, l, r, at),
            Type::Int(it) if it.bits <= 128 => {
                let raw = self.narrow(bop, signed, l, r, at)?;
                self.bounded(raw, typ)
            }
            Type::Int(it) => {
                let raw = if it.signed {
                    self.int256(bop, l, r, at)?
                } else {
                    self.uint256(bop, l, r, at)?
                };
                self.bounded(raw, typ)
            }
            other => Err(unsupported(format!("arithmetic on {}", other), at)),
        }
    }

    /// Operands of at most 128 bits: the raw result fits in a word, so only
    /// the final bounds check is needed.
    fn narrow(&mut self, bop: BinOp, signed: bool, l: IrNode, r: IrNode, at: &Expr) -> CgResult<IrNode> {
        match (bop, signed) {
            (BinOp::Add, _) => op("add", vec![l, r]),
            (BinOp::Sub, _) => op("sub", vec![l, r]),
            (BinOp::Mul, _) => op("mul", vec![l, r]),
            (BinOp::Div, true) => op("sdiv", vec![l, op("clamp_nonzero", vec![r])?]),
            (BinOp::Div, false) => op("div", vec![l, op("clamp_nonzero", vec![r])?]),
            (BinOp::Mod, true) => op("smod", vec![l, op("clamp_nonzero", vec![r])?]),
            (BinOp::Mod, false) => op("mod", vec![l, op("clamp_nonzero", vec![r])?]),
            _ => Err(unsupported(format!("operator {}", bop.symbol()), at)),
        }
    }

    fn uint256(&mut self, bop: BinOp, l: IrNode, r: IrNode, at: &Expr) -> CgResult<IrNode> {
        match bop {
            BinOp::Div => op("div", vec![l, op("clamp_nonzero", vec![r])?]),
            BinOp::Mod => op("mod", vec![l, op("clamp_nonzero", vec![r])?]),
            BinOp::Add => self.bind("l", l, |cg, l| {
                cg.bind("r", r, |_, r| op("uclampge", vec![op("add", vec![l.clone(), r])?, l]))
            }),
            BinOp::Sub => self.bind("l", l, |cg, l| {
                cg.bind("r", r, |_, r| op("sub", vec![l.clone(), op("uclample", vec![r, l])?]))
            }),
            BinOp::Mul => self.bind("l", l, |cg, l| cg.bind("r", r, |cg, r| cg.checked_mul(l, r, false))),
            _ => Err(unsupported(format!("operator {}", bop.symbol()), at)),
        }
    }

    fn int256(&mut self, bop: BinOp, l: IrNode, r: IrNode, at: &Expr) -> CgResult<IrNode> {
        match bop {
            BinOp::Mod => op("smod", vec![l, op("clamp_nonzero", vec![r])?]),
            BinOp::Add | BinOp::Sub => self.bind("l", l, |cg, l| {
                cg.bind("r", r, |cg, r| {
                    let s = cg.fresh("sum");
                    // The result moves away from `l` exactly when `r` is negative.
                    let (name, moved) = if bop == BinOp::Add { ("add", "slt") } else { ("sub", "sgt") };
                    let flipped = op(
                        "xor",
                        vec![op("slt", vec![r.clone(), int(0)])?, op(moved, vec![var(&s), l.clone()])?],
                    )?;
                    let body = seq(vec![op("assert", vec![op("iszero", vec![flipped])?])?, var(&s)])?;
                    with(&s, op(name, vec![l, r])?, body)
                })
            }),
            BinOp::Mul => self.bind("l", l, |cg, l| cg.bind("r", r, |cg, r| cg.checked_mul(l, r, true))),
            BinOp::Div => self.bind("l", l, |cg, l| {
                cg.bind("r", r, |_, r| {
                    let wraps = op(
                        "and",
                        vec![op("eq", vec![l.clone(), int(int256_min())])?, op("eq", vec![r.clone(), int(-1)])?],
                    )?;
                    seq(vec![
                        op("assert", vec![op("iszero", vec![wraps])?])?,
                        op("sdiv", vec![l, op("clamp_nonzero", vec![r])?])?,
                    ])
                })
            }),
            _ => Err(unsupported(format!("operator {}", bop.symbol()), at)),
        }
    }

    /// `l * r` checked through division. Operands must already be bound.
    fn checked_mul(&mut self, l: IrNode, r: IrNode, signed: bool) -> CgResult<IrNode> {
        let z = self.fresh("prod");
        let quotient = op(if signed { "sdiv" } else { "div" }, vec![var(&z), l.clone()])?;
        let ok = op("or", vec![op("iszero", vec![l.clone()])?, op("eq", vec![quotient, r.clone()])?])?;
        let mut body = vec![op("assert", vec![ok])?];
        if signed {
            // MIN * -1 wraps to MIN and survives the division check.
            let wraps = op(
                "and",
                vec![op("eq", vec![l.clone(), int(-1)])?, op("eq", vec![r.clone(), int(int256_min())])?],
            )?;
            body.push(op("assert", vec![op("iszero", vec![wraps])?])?);
        }
        body.push(var(&z));
        with(&z, op("mul", vec![l, r])?, seq(body)?)
    }

    fn decimal(&mut self, bop: BinOp, typ: &Type, l: IrNode, r: IrNode, at: &Expr) -> CgResult<IrNode> {
        let Some((lo, hi)) = typ.bounds() else {
            return Err(unsupported("decimal without bounds", at));
        };
        match bop {
            BinOp::Add | BinOp::Sub => {
                let raw = op(if bop == BinOp::Add { "add" } else { "sub" }, vec![l, r])?;
                self.bounded(raw, typ)
            }
            BinOp::Mul => self.bind("l", l, |cg, l| {
                cg.bind("r", r, |cg, r| {
                    let z = cg.fresh("prod");
                    let quotient = op("sdiv", vec![var(&z), l.clone()])?;
                    let ok = op("or", vec![op("iszero", vec![l.clone()])?, op("eq", vec![quotient, r.clone()])?])?;
                    let scaled = op("sdiv", vec![var(&z), int(decimal_divisor())])?;
                    let body = seq(vec![
                        op("assert", vec![ok])?,
                        op("clamp", vec![int(lo), scaled, int(hi)])?,
                    ])?;
                    with(&z, op("mul", vec![l, r])?, body)
                })
            }),
            BinOp::Div => {
                let num = op("mul", vec![l, int(decimal_divisor())])?;
                let q = op("sdiv", vec![num, op("clamp_nonzero", vec![r])?])?;
                op("clamp", vec![int(lo), q, int(hi)])
            }
            BinOp::Mod => op("smod", vec![l, op("clamp_nonzero", vec![r])?]),
            _ => Err(unsupported(format!("operator {} on decimals", bop.symbol()), at)),
        }
    }

    /// One side of `**` must be a literal; the other is bounded so the
    /// result cannot leave the type.
    fn pow(&mut self, typ: &Type, l: IrNode, r: IrNode, at: &Expr) -> CgResult<IrNode> {
        let Type::Int(it) = typ else {
            return Err(unsupported(format!("exponentiation of {}", typ), at));
        };
        let (lo, hi) = it.bounds();
        match (l.as_int().cloned(), r.as_int().cloned()) {
            (Some(_), Some(_)) => {
                let raw = op("exp", vec![l, r])?;
                self.bounded(raw, typ)
            }
            (Some(base), None) => {
                if base.is_zero() || base.abs().is_one() {
                    return op("exp", vec![l, r]);
                }
                let max = max_exponent(&base, &lo, &hi);
                let e = if it.signed {
                    op("clamp", vec![int(0), r, int(max)])?
                } else {
                    op("uclample", vec![r, int(max)])?
                };
                op("exp", vec![l, e])
            }
            (None, Some(e)) => {
                let Some(e) = e.to_u32().filter(|e| *e > 0) else {
                    return Ok(int(1));
                };
                if e == 1 {
                    return Ok(l);
                }
                let max = hi.nth_root(e);
                let base = if it.signed {
                    op("clamp", vec![int(-max.clone()), l, int(max)])?
                } else {
                    op("uclample", vec![l, int(max)])?
                };
                op("exp", vec![base, r])
            }
            (None, None) => Err(unsupported("exponentiation without a literal base or exponent", at)),
        }
    }
}
