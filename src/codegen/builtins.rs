//! Builtin functions.

use num_bigint::BigInt;
use num_traits::One;

use super::calls::bubble_revert;
use super::copy::identity_copy;
use super::expr::left_aligned;
use super::{
    int, internal_error, op, seq, unsupported, var, with, CgResult, Codegen, Operand, FREE_VAR_SPACE,
};
use crate::ast::{BinOp, Expr, ExprKind, Keyword};
use crate::ir::{opcodes, IrNode};
use crate::typecheck::builtins::{bool_keyword, literal_u64, wei_denomination, Builtin};
use crate::typecheck::function::method_id;
use crate::typecheck::types::{decimal_divisor, IntType};
use crate::typecheck::Type;

fn address_max() -> BigInt {
    (BigInt::one() << 160usize) - 1
}

/// Revert unless `start..start+len` lies within `total` bytes, without
/// overflowing on large operands. All three must be bound.
fn range_check(start: &IrNode, len: &IrNode, total: &IrNode) -> CgResult<IrNode> {
    let past = op("gt", vec![start.clone(), total.clone()])?;
    let long = op("gt", vec![len.clone(), op("sub", vec![total.clone(), start.clone()])?])?;
    op("assert", vec![op("iszero", vec![op("or", vec![past, long])?])?])
}

/// Right-aligned integer made of the first `length` bytes at `data`.
fn leading_bytes_as_int(data: IrNode, length: IrNode) -> CgResult<IrNode> {
    let shift = op("mul", vec![int(8), op("sub", vec![int(32), length])?])?;
    op("shr", vec![shift, op("mload", vec![data])?])
}

impl<'a> Codegen<'a> {
    pub(crate) fn builtin(&mut self, b: Builtin, e: &Expr, args: &[Expr], keywords: &[Keyword]) -> CgResult<Operand> {
        let arg = |i: usize| args.get(i).ok_or_else(|| internal_error(format!("{}() is missing an argument", b.name()), e));
        let word = match b {
            Builtin::Len => {
                let (ptr, loc, _) = self.place(arg(0)?)?;
                self.load(ptr, loc)?
            }
            Builtin::Concat => return self.concat(e, args),
            Builtin::Slice => return self.slice(e, arg(0)?, arg(1)?, arg(2)?),
            Builtin::Keccak256 => match self.type_of(arg(0)?)? {
                Type::BytesM(_) => {
                    let w = self.word(arg(0)?)?;
                    seq(vec![
                        op("mstore", vec![int(FREE_VAR_SPACE), w])?,
                        op("sha3", vec![int(FREE_VAR_SPACE), int(32)])?,
                    ])?
                }
                _ => self.content_hash(arg(0)?)?,
            },
            Builtin::Sha256 => self.sha256(arg(0)?)?,
            Builtin::Convert => return self.convert(e, arg(0)?),
            Builtin::Min | Builtin::Max => {
                let typ = self.type_of(e)?;
                let l = self.word(arg(0)?)?;
                let r = self.word(arg(1)?)?;
                let cmp = match (b, typ.is_signed()) {
                    (Builtin::Min, true) => "slt",
                    (Builtin::Min, false) => "lt",
                    (_, true) => "sgt",
                    (_, false) => "gt",
                };
                self.bind("a", l, |cg, l| {
                    cg.bind("b", r, |_, r| op("if", vec![op(cmp, vec![l.clone(), r.clone()])?, l, r]))
                })?
            }
            Builtin::Abs => {
                let typ = self.type_of(e)?;
                let x = self.word(arg(0)?)?;
                self.bind("x", x, |cg, x| {
                    let negative = op("slt", vec![x.clone(), int(0)])?;
                    op("if", vec![negative, cg.negate(x.clone(), &typ)?, x])
                })?
            }
            Builtin::Floor | Builtin::Ceil => {
                let x = self.word(arg(0)?)?;
                let divisor = decimal_divisor();
                let nudge = &divisor - 1;
                self.bind("x", x, |_, x| {
                    let truncated = op("sdiv", vec![x.clone(), int(divisor.clone())])?;
                    let negative = op("slt", vec![x.clone(), int(0)])?;
                    if b == Builtin::Floor {
                        let lowered = op("sdiv", vec![op("sub", vec![x, int(nudge)])?, int(divisor)])?;
                        op("if", vec![negative, lowered, truncated])
                    } else {
                        let raised = op("sdiv", vec![op("add", vec![x, int(nudge)])?, int(divisor)])?;
                        op("if", vec![negative, truncated, raised])
                    }
                })?
            }
            Builtin::Empty => {
                let typ = self.type_of(e)?;
                if typ.is_value_type() {
                    int(0)
                } else {
                    return Ok(Operand::Zero);
                }
            }
            Builtin::Uint256Addmod | Builtin::Uint256Mulmod => {
                let a = self.word(arg(0)?)?;
                let m = self.word(arg(1)?)?;
                let n = self.word(arg(2)?)?;
                let name = if b == Builtin::Uint256Addmod { "addmod" } else { "mulmod" };
                op(name, vec![a, m, op("clamp_nonzero", vec![n])?])?
            }
            Builtin::AsWeiValue => self.as_wei_value(e, arg(0)?, arg(1)?)?,
            Builtin::MethodId => {
                let ExprKind::Str(signature) = &arg(0)?.kind else {
                    return Err(internal_error("method_id() expects a string literal", e));
                };
                let selector = method_id(signature);
                match self.type_of(e)? {
                    Type::BytesM(_) => int(left_aligned(&selector)),
                    typ => return self.bytestring(&selector, &typ),
                }
            }
            Builtin::Extract32 => self.extract32(e, arg(0)?, arg(1)?)?,
            Builtin::Blockhash => {
                let n = self.word(arg(0)?)?;
                op("blockhash", vec![n])?
            }
            Builtin::Send => {
                let to = self.word(arg(0)?)?;
                let value = self.word(arg(1)?)?;
                let call = op("call", vec![int(0), to, value, int(0), int(0), int(0), int(0)])?;
                op("assert", vec![call])?
            }
            Builtin::Selfdestruct => {
                let to = self.word(arg(0)?)?;
                op("selfdestruct", vec![to])?
            }
            Builtin::RawCall => return self.raw_call(e, arg(0)?, arg(1)?, keywords),
            Builtin::RawLog => self.raw_log(e, arg(0)?, arg(1)?)?,
            Builtin::Range => return Err(unsupported("range() outside a for loop", e)),
        };
        Ok(Operand::Word(word))
    }

    /// Pointer to a bytestring argument in memory.
    fn bytes_in_memory(&mut self, e: &Expr) -> CgResult<IrNode> {
        let typ = self.type_of(e)?;
        let operand = self.expr(e)?;
        Ok(self.in_memory(operand, &typ)?.0)
    }

    fn concat(&mut self, e: &Expr, args: &[Expr]) -> CgResult<Operand> {
        let out = self.type_of(e)?;
        // A trailing bytesM store may write up to a word past the end.
        let tmp = self.alloc(out.size_in_bytes() + 32);
        let pos = self.alloc(32);
        let current = || op("mload", vec![int(pos)]);
        let data = |at: IrNode| op("add", vec![int(tmp + 32), at]);
        let mut body = vec![op("mstore", vec![int(pos), int(0)])?];
        for a in args {
            match self.type_of(a)? {
                Type::BytesM(m) => {
                    let w = self.word(a)?;
                    body.push(op("mstore", vec![data(current()?)?, w])?);
                    body.push(op("mstore", vec![int(pos), op("add", vec![current()?, int(m)])?])?);
                }
                _ => {
                    let ptr = self.bytes_in_memory(a)?;
                    let p = self.fresh("part");
                    let len = op("mload", vec![var(&p)])?;
                    let append = seq(vec![
                        identity_copy(data(current()?)?, op("add", vec![var(&p), int(32)])?, len.clone())?,
                        op("mstore", vec![int(pos), op("add", vec![current()?, len])?])?,
                    ])?;
                    body.push(with(&p, ptr, append)?);
                }
            }
        }
        body.push(op("mstore", vec![int(tmp), current()?])?);
        body.push(int(tmp));
        Ok(Operand::memory(seq(body)?, out))
    }

    fn slice(&mut self, e: &Expr, src: &Expr, start: &Expr, len: &Expr) -> CgResult<Operand> {
        let out = self.type_of(e)?;
        let tmp = self.alloc_for(&out);
        let s = self.fresh("start");
        let l = self.fresh("len");
        let p = self.fresh("src");
        let (source, data, total) = match self.type_of(src)? {
            Type::BytesM(_) => {
                let scratch = self.alloc(32);
                let w = self.word(src)?;
                let source = seq(vec![op("mstore", vec![int(scratch), w])?, int(scratch)])?;
                (source, var(&p), int(32))
            }
            _ => {
                let ptr = self.bytes_in_memory(src)?;
                (ptr, op("add", vec![var(&p), int(32)])?, op("mload", vec![var(&p)])?)
            }
        };
        let body = seq(vec![
            range_check(&var(&s), &var(&l), &total)?,
            op("mstore", vec![int(tmp), var(&l)])?,
            identity_copy(int(tmp + 32), op("add", vec![data, var(&s)])?, var(&l))?,
            int(tmp),
        ])?;
        let start = self.word(start)?;
        let length = self.word(len)?;
        let node = with(&p, source, with(&s, start, with(&l, length, body)?)?)?;
        Ok(Operand::memory(node, out))
    }

    fn sha256(&mut self, a: &Expr) -> CgResult<IrNode> {
        let gas = op("gas", vec![])?;
        let out = int(FREE_VAR_SPACE);
        let result = op("mload", vec![int(FREE_VAR_SPACE)])?;
        if let Type::BytesM(_) = self.type_of(a)? {
            let w = self.word(a)?;
            let call = op("staticcall", vec![gas, int(2), int(FREE_VAR_SPACE), int(32), out, int(32)])?;
            return seq(vec![
                op("mstore", vec![int(FREE_VAR_SPACE), w])?,
                op("assert", vec![call])?,
                result,
            ]);
        }
        let ptr = self.bytes_in_memory(a)?;
        let p = self.fresh("data");
        let call = op(
            "staticcall",
            vec![
                gas,
                int(2),
                op("add", vec![var(&p), int(32)])?,
                op("mload", vec![var(&p)])?,
                out,
                int(32),
            ],
        )?;
        with(&p, ptr, seq(vec![op("assert", vec![call])?, result])?)
    }

    fn as_wei_value(&mut self, e: &Expr, value: &Expr, unit: &Expr) -> CgResult<IrNode> {
        let ExprKind::Str(unit) = &unit.kind else {
            return Err(internal_error("as_wei_value() unit must be a string literal", e));
        };
        let denomination =
            wei_denomination(unit).ok_or_else(|| internal_error(format!("unknown denomination '{}'", unit), e))?;
        let typ = self.type_of(value)?;
        let mut x = self.word(value)?;
        if typ.is_signed() {
            x = op("clampge", vec![x, int(0)])?;
        }
        let wei = self.arith(BinOp::Mul, &Type::uint256(), x, int(denomination), e)?;
        if typ == Type::Decimal {
            return op("div", vec![wei, int(decimal_divisor())]);
        }
        Ok(wei)
    }

    fn extract32(&mut self, e: &Expr, src: &Expr, start: &Expr) -> CgResult<IrNode> {
        let out = self.type_of(e)?;
        let ptr = self.bytes_in_memory(src)?;
        let p = self.fresh("src");
        let s = self.fresh("start");
        let total = op("mload", vec![var(&p)])?;
        let at = op("add", vec![op("add", vec![var(&p), int(32)])?, var(&s)])?;
        let loaded = op("mload", vec![at])?;
        let checked = seq(vec![range_check(&var(&s), &int(32), &total)?, self.validate(loaded, &out)?])?;
        let start = self.word(start)?;
        with(&p, ptr, with(&s, start, checked)?)
    }

    fn raw_call(&mut self, e: &Expr, to: &Expr, data: &Expr, keywords: &[Keyword]) -> CgResult<Operand> {
        let kw = |name: &str| keywords.iter().find(|k| k.name.node == name).map(|k| &k.value);
        let max_out = match kw("max_outsize") {
            Some(size) => literal_u64(size)
                .ok_or_else(|| internal_error("raw_call() max_outsize is not a literal", e))?,
            None => 0,
        };
        let revert = bool_keyword(keywords, "revert_on_failure").unwrap_or(true);
        let delegate = bool_keyword(keywords, "is_delegate_call") == Some(true);
        let is_static = bool_keyword(keywords, "is_static_call") == Some(true);

        // Success flag, then the output bytestring.
        let out = self.alloc(64 + max_out.div_ceil(32) * 32);
        let target = self.word(to)?;
        let input = self.bytes_in_memory(data)?;
        let gas = match kw("gas") {
            Some(g) => self.word(g)?,
            None => op("gas", vec![])?,
        };
        let p = self.fresh("calldata");
        let a = self.fresh("target");
        let args_in = vec![op("add", vec![var(&p), int(32)])?, op("mload", vec![var(&p)])?];
        let args_out = vec![int(out + 64), int(max_out)];
        let call = if delegate || is_static {
            let mut operands = vec![gas, var(&a)];
            operands.extend(args_in);
            operands.extend(args_out);
            op(if delegate { "delegatecall" } else { "staticcall" }, operands)?
        } else {
            let value = match kw("value") {
                Some(v) => self.word(v)?,
                None => int(0),
            };
            let mut operands = vec![gas, var(&a), value];
            operands.extend(args_in);
            operands.extend(args_out);
            op("call", operands)?
        };
        let mut body = if revert {
            vec![op("if", vec![op("iszero", vec![call])?, bubble_revert()?])?]
        } else {
            vec![op("mstore", vec![int(out), call])?]
        };
        if max_out > 0 {
            let r = self.fresh("rsize");
            let size = op("if", vec![op("gt", vec![var(&r), int(max_out)])?, int(max_out), var(&r)])?;
            body.push(with(&r, op("returndatasize", vec![])?, op("mstore", vec![int(out + 32), size])?)?);
        }
        let (result, typ) = match (revert, max_out) {
            (true, 0) => (None, None),
            (true, n) => (Some(int(out + 32)), Some(Type::Bytes(n))),
            (false, 0) => (Some(op("mload", vec![int(out)])?), Some(Type::Bool)),
            (false, n) => (Some(int(out)), Some(Type::Tuple(vec![Type::Bool, Type::Bytes(n)]))),
        };
        body.extend(result);
        let node = with(&a, target, with(&p, input, seq(body)?)?)?;
        Ok(match typ {
            Some(t) if !t.is_value_type() => Operand::memory(node, t),
            _ => Operand::Word(node),
        })
    }

    fn raw_log(&mut self, e: &Expr, topics: &Expr, data: &Expr) -> CgResult<IrNode> {
        let ExprKind::List(items) = &topics.kind else {
            return Err(internal_error("raw_log() topics must be a list literal", e));
        };
        let topics = items.iter().map(|t| self.word(t)).collect::<CgResult<Vec<_>>>()?;
        let opcode = opcodes::log_opcode(topics.len())
            .ok_or_else(|| internal_error("raw_log() accepts at most 4 topics", e))?;
        if let Type::BytesM(_) = self.type_of(data)? {
            let scratch = self.alloc(32);
            let w = self.word(data)?;
            let mut operands = vec![int(scratch), int(32)];
            operands.extend(topics);
            return seq(vec![op("mstore", vec![int(scratch), w])?, op(opcode, operands)?]);
        }
        let ptr = self.bytes_in_memory(data)?;
        let p = self.fresh("data");
        let mut operands = vec![op("add", vec![var(&p), int(32)])?, op("mload", vec![var(&p)])?];
        operands.extend(topics);
        with(&p, ptr, op(opcode, operands)?)
    }

    // ── convert ──

    fn convert(&mut self, e: &Expr, value: &Expr) -> CgResult<Operand> {
        let from = self.type_of(value)?;
        let to = self.type_of(e)?;
        if let Type::Bytes(cap) | Type::String(cap) = &to {
            return self.convert_to_bytestring(value, &from, &to, *cap);
        }
        let x = if from.is_bytestring() {
            let ptr = self.bytes_in_memory(value)?;
            let p = self.fresh("src");
            let len = op("mload", vec![var(&p)])?;
            let data = op("add", vec![var(&p), int(32)])?;
            let body = match &to {
                Type::BytesM(m) => {
                    let k = self.fresh("pad");
                    let shift = op("mul", vec![int(8), op("sub", vec![int(32), len.clone()])?])?;
                    let masked = op("shl", vec![var(&k), op("shr", vec![var(&k), op("mload", vec![data])?])?])?;
                    seq(vec![
                        op("assert", vec![op("le", vec![len, int(*m)])?])?,
                        with(&k, shift, masked)?,
                    ])?
                }
                _ => {
                    let raw = leading_bytes_as_int(data, len)?;
                    self.convert_word(raw, &Type::uint256(), &to, e)?
                }
            };
            with(&p, ptr, body)?
        } else {
            let w = self.word(value)?;
            self.convert_word(w, &from, &to, e)?
        };
        Ok(Operand::Word(x))
    }

    fn convert_to_bytestring(&mut self, value: &Expr, from: &Type, to: &Type, cap: u64) -> CgResult<Operand> {
        if let Type::BytesM(m) = from {
            let tmp = self.alloc_for(to);
            let w = self.word(value)?;
            let node = seq(vec![
                op("mstore", vec![int(tmp), int(*m)])?,
                op("mstore", vec![int(tmp + 32), w])?,
                int(tmp),
            ])?;
            return Ok(Operand::memory(node, to.clone()));
        }
        let ptr = self.bytes_in_memory(value)?;
        if from.capacity().unwrap_or(0) <= cap {
            return Ok(Operand::memory(ptr, to.clone()));
        }
        let p = self.fresh("src");
        let checked = seq(vec![
            op("assert", vec![op("le", vec![op("mload", vec![var(&p)])?, int(cap)])?])?,
            var(&p),
        ])?;
        Ok(Operand::memory(with(&p, ptr, checked)?, to.clone()))
    }

    /// Convert a value-type word.
    fn convert_word(&mut self, x: IrNode, from: &Type, to: &Type, at: &Expr) -> CgResult<IrNode> {
        match (from, to) {
            (Type::Interface(_), Type::Address) | (Type::Address, Type::Interface(_)) => Ok(x),
            (Type::Enum(_), Type::Int(_)) => Ok(x),
            (Type::Int(_), Type::Enum(en)) => {
                op("uclamplt", vec![x, int(BigInt::one() << en.members.len())])
            }
            (_, Type::Bool) => op("iszero", vec![op("iszero", vec![x])?]),
            (Type::BytesM(m), _) if !matches!(to, Type::BytesM(_)) => {
                let shift = int(8 * (32 - u64::from(*m)));
                let raw = if to.is_signed() {
                    op("sar", vec![shift, x])?
                } else {
                    op("shr", vec![shift, x])?
                };
                let as_int = if to.is_signed() { Type::Int(IntType::INT256) } else { Type::uint256() };
                self.convert_word(raw, &as_int, to, at)
            }
            (Type::Decimal, Type::Int(_)) => {
                let truncated = op("sdiv", vec![x, int(decimal_divisor())])?;
                self.convert_word(truncated, &Type::Int(IntType::INT256), to, at)
            }
            (_, Type::Decimal) => {
                let (lo, hi) = to.bounds().ok_or_else(|| internal_error("decimal without bounds", at))?;
                let divisor = decimal_divisor();
                let checked = if from.is_signed() {
                    op("clamp", vec![int(&lo / &divisor), x, int(&hi / &divisor)])?
                } else {
                    op("uclample", vec![x, int(&hi / &divisor)])?
                };
                op("mul", vec![checked, int(divisor)])
            }
            (_, Type::Int(target)) => {
                let (lo, hi) = target.bounds();
                match (from.is_signed(), target.signed) {
                    (true, false) => {
                        let nonneg = op("clampge", vec![x, int(0)])?;
                        self.bounded(nonneg, to)
                    }
                    (false, true) => op("uclample", vec![x, int(hi)]),
                    (true, true) if target.bits < 256 => op("clamp", vec![int(lo), x, int(hi)]),
                    _ => self.bounded(x, to),
                }
            }
            (_, Type::Address) => {
                let nonneg = if from.is_signed() { op("clampge", vec![x, int(0)])? } else { x };
                op("uclample", vec![nonneg, int(address_max())])
            }
            (Type::BytesM(k), Type::BytesM(m)) => {
                if k <= m {
                    Ok(x)
                } else {
                    self.validate(x, to)
                }
            }
            (_, Type::BytesM(m)) => {
                if *m == 32 {
                    return Ok(x);
                }
                let fits = op("uclamplt", vec![x, int(BigInt::one() << (8 * usize::from(*m)))])?;
                op("shl", vec![int(8 * (32 - u64::from(*m))), fits])
            }
            _ => Err(unsupported(format!("converting {} to {}", from, to), at)),
        }
    }
}
