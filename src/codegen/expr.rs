//! Expression lowering.

use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;

use super::copy::{member_offset, stride};
use super::{
    add_offset, int, internal_error, op, seq, unsupported, var, with, CgResult, Codegen, Operand,
    CODE_END_SYMBOL, FREE_VAR_SPACE, RESERVED_MEMORY,
};
use crate::ast::{BoolOpKind, CmpOp, Expr, ExprKind, UnaryOp};
use crate::ir::IrNode;
use crate::typecheck::constant;
use crate::typecheck::types::{decimal_divisor, parse_decimal};
use crate::typecheck::{DataLocation, Type};

/// Left-align up to 32 bytes in a word, as `bytesM` values are stored.
pub(crate) fn left_aligned(bytes: &[u8]) -> BigInt {
    let mut word = [0u8; 32];
    let n = bytes.len().min(32);
    word[..n].copy_from_slice(&bytes[..n]);
    BigInt::from_bytes_be(Sign::Plus, &word)
}

fn hex_digits(text: &str) -> Option<Vec<u8>> {
    let digits = text.get(2..)?;
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

fn environment(env: &str, attr: &str) -> Option<&'static str> {
    let name = match (env, attr) {
        ("block", "number") => "number",
        ("block", "timestamp") => "timestamp",
        ("block", "coinbase") => "coinbase",
        ("block", "difficulty") => "difficulty",
        ("block", "prevrandao") => "prevrandao",
        ("block", "gaslimit") => "gaslimit",
        ("block", "basefee") => "basefee",
        ("msg", "sender") => "caller",
        ("msg", "value") => "callvalue",
        ("msg", "gas") => "gas",
        ("tx", "origin") => "origin",
        ("tx", "gasprice") => "gasprice",
        ("chain", "id") => "chainid",
        _ => return None,
    };
    Some(name)
}

impl<'a> Codegen<'a> {
    /// Lower a value expression.
    pub(crate) fn expr(&mut self, e: &Expr) -> CgResult<Operand> {
        let typ = self.type_of(e)?;
        if typ.is_value_type() && matches!(e.kind, ExprKind::BinOp { .. } | ExprKind::UnaryOp { .. }) {
            let contract = self.contract;
            if let Some(folded) = constant::fold(e, &|n| contract.constant_value(n))? {
                return self.literal(&folded, &typ);
            }
        }
        match &e.kind {
            ExprKind::Int(_)
            | ExprKind::Decimal(_)
            | ExprKind::Hex(_)
            | ExprKind::Str(_)
            | ExprKind::Bytes(_)
            | ExprKind::Bool(_) => self.literal(e, &typ),
            ExprKind::Name(name) => self.name(e, name, &typ),
            ExprKind::Attribute { value, attr } => self.attribute(e, value, &attr.node, &typ),
            ExprKind::Subscript { .. } => {
                let (ptr, loc, actual) = self.place(e)?;
                self.read(ptr, loc, actual)
            }
            ExprKind::Call { .. } => self.call(e),
            ExprKind::BinOp { op, left, right } => {
                let l = self.word(left)?;
                let r = self.word(right)?;
                Ok(Operand::Word(self.arith(*op, &typ, l, r, e)?))
            }
            ExprKind::UnaryOp { op, operand } => self.unary(e, *op, operand, &typ),
            ExprKind::Compare { op, left, right } => self.compare(e, *op, left, right),
            ExprKind::BoolOp { op, values } => self.bool_op(e, *op, values),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let members = items.iter().map(|i| self.expr(i)).collect::<CgResult<Vec<_>>>()?;
                Ok(Operand::Members(members))
            }
            ExprKind::Dict(_) => Err(unsupported("a dict outside a struct constructor", e)),
        }
    }

    /// Lower a value-type expression to a stack word.
    pub(crate) fn word(&mut self, e: &Expr) -> CgResult<IrNode> {
        let operand = self.expr(e)?;
        let node = self.to_word(operand)?;
        Ok(node.with_span(e.span))
    }

    /// Read the value at a location: a word for value types, else a pointer.
    pub(crate) fn read(&self, ptr: IrNode, loc: DataLocation, typ: Type) -> CgResult<Operand> {
        if typ.is_value_type() {
            return Ok(Operand::Word(self.load(ptr, loc)?));
        }
        Ok(Operand::Ptr { node: ptr, loc, typ })
    }

    // ── Literals ──

    /// Lower a literal (or a folded constant) as `typ`, without consulting
    /// the type map.
    pub(crate) fn literal(&mut self, e: &Expr, typ: &Type) -> CgResult<Operand> {
        let word = match (&e.kind, typ) {
            (ExprKind::Int(v), Type::Decimal) => v * decimal_divisor(),
            (ExprKind::Int(v), _) => v.clone(),
            (ExprKind::Decimal(text), _) => parse_decimal(text)
                .ok_or_else(|| internal_error(format!("malformed decimal {}", text), e))?,
            (ExprKind::Hex(text), Type::BytesM(_)) => {
                let bytes = hex_digits(text)
                    .ok_or_else(|| internal_error(format!("malformed hex literal {}", text), e))?;
                left_aligned(&bytes)
            }
            (ExprKind::Hex(text), _) => {
                let bytes = hex_digits(text)
                    .ok_or_else(|| internal_error(format!("malformed hex literal {}", text), e))?;
                BigInt::from_bytes_be(Sign::Plus, &bytes)
            }
            (ExprKind::Bool(b), _) => BigInt::from(u8::from(*b)),
            (ExprKind::Str(s), Type::BytesM(_)) => left_aligned(s.as_bytes()),
            (ExprKind::Bytes(b), Type::BytesM(_)) => left_aligned(b),
            (ExprKind::Str(s), _) => return self.bytestring(s.as_bytes(), typ),
            (ExprKind::Bytes(b), _) => return self.bytestring(b, typ),
            (ExprKind::List(items) | ExprKind::Tuple(items), _) => {
                let member_types: Vec<Type> = match typ {
                    Type::Array(elem, _) | Type::DynArray(elem, _) => vec![(**elem).clone(); items.len()],
                    Type::Tuple(ts) => ts.clone(),
                    _ => return Err(internal_error(format!("a list cannot be lowered as {}", typ), e)),
                };
                let mut members = Vec::with_capacity(items.len());
                for (item, t) in items.iter().zip(&member_types) {
                    members.push(self.literal(item, t)?);
                }
                return Ok(Operand::Members(members));
            }
            (ExprKind::Name(n), _) => match self.contract.constant_value(n) {
                Some(value) => return self.literal(&value, typ),
                None => return Err(internal_error(format!("'{}' is not a constant", n), e)),
            },
            _ => {
                let contract = self.contract;
                return match constant::fold(e, &|n| contract.constant_value(n))? {
                    Some(folded) if folded.is_literal() => self.literal(&folded, typ),
                    _ => Err(internal_error(format!("'{}' is not a literal", e), e)),
                };
            }
        };
        Ok(Operand::Word(int(word)))
    }

    /// Write a bytestring literal into fresh memory.
    pub(crate) fn bytestring(&mut self, bytes: &[u8], typ: &Type) -> CgResult<Operand> {
        let cap = typ.capacity().unwrap_or(bytes.len() as u64).max(bytes.len() as u64);
        let layout = match typ {
            Type::String(_) => Type::String(cap),
            _ => Type::Bytes(cap),
        };
        let tmp = self.alloc_for(&layout);
        let mut body = vec![op("mstore", vec![int(tmp), int(bytes.len() as u64)])?];
        for (i, chunk) in bytes.chunks(32).enumerate() {
            let at = tmp + 32 + 32 * i as u64;
            body.push(op("mstore", vec![int(at), int(left_aligned(chunk))])?);
        }
        body.push(int(tmp));
        Ok(Operand::memory(seq(body)?, layout))
    }

    // ── Names ──

    fn name(&mut self, e: &Expr, name: &str, typ: &Type) -> CgResult<Operand> {
        if let Some(local) = self.local(name) {
            let (pos, actual) = (local.pos, local.typ.clone());
            return self.read(int(pos), DataLocation::Memory, actual);
        }
        if name == "self" {
            return Ok(Operand::Word(op("address", vec![])?));
        }
        if let Some(value) = self.contract.constant_value(name) {
            return self.literal(&value, typ);
        }
        if self.contract.immutables.contains_key(name) {
            return self.immutable(e, name);
        }
        Err(internal_error(format!("'{}' has no storage location", name), e))
    }

    fn immutable(&mut self, e: &Expr, name: &str) -> CgResult<Operand> {
        let contract = self.contract;
        let (Some(var), Some(offset)) = (contract.immutables.get(name), contract.layout.code_offset(name)) else {
            return Err(internal_error(format!("immutable '{}' has no code offset", name), e));
        };
        let typ = var.typ().clone();
        if self.in_constructor {
            return self.read(int(RESERVED_MEMORY + offset), DataLocation::Memory, typ);
        }
        let at = op(
            "add",
            vec![op("symbol", vec![IrNode::name(CODE_END_SYMBOL)])?, int(offset)],
        )?;
        if typ.is_value_type() {
            let copy = op("codecopy", vec![int(FREE_VAR_SPACE), at, int(32)])?;
            return Ok(Operand::Word(seq(vec![copy, op("mload", vec![int(FREE_VAR_SPACE)])?])?));
        }
        let tmp = self.alloc_for(&typ);
        let copy = op("codecopy", vec![int(tmp), at, int(typ.size_in_bytes())])?;
        Ok(Operand::memory(seq(vec![copy, int(tmp)])?, typ))
    }

    fn storage_slot(&self, name: &str) -> Option<u64> {
        self.contract.layout.slot_of(name)
    }

    // ── Attributes ──

    fn attribute(&mut self, e: &Expr, value: &Expr, attr: &str, typ: &Type) -> CgResult<Operand> {
        if let Some(base) = value.as_name().filter(|n| self.local(n).is_none()) {
            if base == "self" {
                if attr == "balance" {
                    return Ok(Operand::Word(op("selfbalance", vec![])?));
                }
                let (ptr, loc, actual) = self.place(e)?;
                return self.read(ptr, loc, actual);
            }
            if let Some(opcode) = environment(base, attr) {
                return Ok(Operand::Word(op(opcode, vec![])?));
            }
            if (base, attr) == ("block", "prevhash") {
                let prev = op("sub", vec![op("number", vec![])?, int(1)])?;
                return Ok(Operand::Word(op("blockhash", vec![prev])?));
            }
            if let Type::Enum(en) = typ {
                if en.name == base {
                    let v = en
                        .value_of(attr)
                        .ok_or_else(|| internal_error(format!("enum {} has no member {}", base, attr), e))?;
                    return Ok(Operand::Word(int(v)));
                }
            }
        }
        match self.type_of(value)? {
            Type::Struct(_) => {
                let (ptr, loc, actual) = self.place(e)?;
                self.read(ptr, loc, actual)
            }
            Type::Address | Type::Interface(_) => {
                let addr = self.word(value)?;
                let node = match attr {
                    "balance" => op("balance", vec![addr])?,
                    "codesize" => op("extcodesize", vec![addr])?,
                    "is_contract" => op("gt", vec![op("extcodesize", vec![addr])?, int(0)])?,
                    "codehash" => op("extcodehash", vec![addr])?,
                    _ => return Err(unsupported(format!("address member '{}'", attr), e)),
                };
                Ok(Operand::Word(node))
            }
            other => Err(unsupported(format!("member '{}' of {}", attr, other), e)),
        }
    }

    // ── Places ──

    /// Pointer, location and layout of an assignable or indexable
    /// expression. Anything else is evaluated into memory first.
    pub(crate) fn place(&mut self, e: &Expr) -> CgResult<(IrNode, DataLocation, Type)> {
        match &e.kind {
            ExprKind::Name(name) => {
                if let Some(local) = self.local(name) {
                    return Ok((int(local.pos), DataLocation::Memory, local.typ.clone()));
                }
                if self.in_constructor {
                    let contract = self.contract;
                    if let (Some(v), Some(off)) = (contract.immutables.get(name), contract.layout.code_offset(name)) {
                        return Ok((int(RESERVED_MEMORY + off), DataLocation::Memory, v.typ().clone()));
                    }
                }
            }
            ExprKind::Attribute { value, attr } => {
                if value.as_name() == Some("self") && self.local("self").is_none() {
                    if let (Some(slot), Some(v)) = (self.storage_slot(&attr.node), self.contract.storage.get(&attr.node)) {
                        return Ok((int(slot), DataLocation::Storage, v.typ().clone()));
                    }
                } else if let Ok(Type::Struct(_)) = self.type_of(value) {
                    let (base, loc, actual) = self.place(value)?;
                    let Type::Struct(s) = &actual else {
                        return Err(internal_error(format!("{} is not a struct", actual), value));
                    };
                    let (index, member) = s
                        .member(&attr.node)
                        .ok_or_else(|| internal_error(format!("struct {} has no member {}", s.name, attr.node), e))?;
                    let offset = member_offset(&s.member_types(), index) * stride(loc);
                    return Ok((add_offset(base, offset)?, loc, member.clone()));
                }
            }
            ExprKind::Subscript { value, index } => {
                let (base, loc, actual) = self.place(value)?;
                return self.index(base, loc, &actual, index);
            }
            _ => {}
        }
        let typ = self.type_of(e)?;
        match self.expr(e)? {
            Operand::Ptr { node, loc, typ } => Ok((node, loc, typ)),
            other => {
                let (node, actual) = self.in_memory(other, &typ)?;
                Ok((node, DataLocation::Memory, actual))
            }
        }
    }

    fn index(&mut self, base: IrNode, loc: DataLocation, typ: &Type, index: &Expr) -> CgResult<(IrNode, DataLocation, Type)> {
        match typ {
            Type::HashMap(key, value) => {
                let key = self.hash_key(index, key)?;
                Ok((op("sha3_64", vec![base, key])?, DataLocation::Storage, (**value).clone()))
            }
            Type::Array(elem, n) => {
                let size = elem.size_in_words() * stride(loc);
                let ptr = match index.as_int().and_then(|v| v.to_u64()) {
                    Some(i) if i < *n => add_offset(base, i * size)?,
                    _ => {
                        let idx = self.word(index)?;
                        let checked = op("uclamplt", vec![idx, int(*n)])?;
                        op("add", vec![base, op("mul", vec![checked, int(size)])?])?
                    }
                };
                Ok((ptr, loc, (**elem).clone()))
            }
            Type::DynArray(elem, _) => {
                let size = elem.size_in_words() * stride(loc);
                let b = self.fresh("arr");
                let idx = self.word(index)?;
                let length = self.load(var(&b), loc)?;
                let checked = op("uclamplt", vec![idx, length])?;
                let first = add_offset(var(&b), stride(loc))?;
                let ptr = op("add", vec![first, op("mul", vec![checked, int(size)])?])?;
                Ok((with(&b, base, ptr)?, loc, (**elem).clone()))
            }
            Type::Tuple(types) => {
                let i = index
                    .as_int()
                    .and_then(|v| v.to_usize())
                    .filter(|i| *i < types.len())
                    .ok_or_else(|| internal_error("tuple index must be a literal", index))?;
                let ptr = add_offset(base, member_offset(types, i) * stride(loc))?;
                Ok((ptr, loc, types[i].clone()))
            }
            other => Err(unsupported(format!("indexing {}", other), index)),
        }
    }

    /// Word used to derive a mapping slot. Bytestring keys hash their
    /// contents.
    fn hash_key(&mut self, index: &Expr, key: &Type) -> CgResult<IrNode> {
        if key.is_value_type() {
            return self.word(index);
        }
        let operand = self.expr(index)?;
        let (ptr, _) = self.in_memory(operand, key)?;
        let p = self.fresh("key");
        let data = op("add", vec![var(&p), int(32)])?;
        let hash = op("sha3", vec![data, op("mload", vec![var(&p)])?])?;
        with(&p, ptr, hash)
    }

    // ── Operators ──

    fn unary(&mut self, e: &Expr, uop: UnaryOp, operand: &Expr, typ: &Type) -> CgResult<Operand> {
        let x = self.word(operand)?;
        let node = match (uop, typ) {
            (UnaryOp::Not, _) => op("iszero", vec![x])?,
            (UnaryOp::Neg, Type::Int(_) | Type::Decimal) => self.negate(x, typ)?,
            (UnaryOp::Invert, Type::Int(it)) if !it.signed && it.bits == 256 => op("not", vec![x])?,
            (UnaryOp::Invert, Type::Int(it)) if !it.signed => {
                let mask = (BigInt::from(1) << it.bits as usize) - 1;
                op("xor", vec![x, int(mask)])?
            }
            (UnaryOp::Invert, Type::Enum(en)) => {
                let mask = (BigInt::from(1) << en.members.len()) - 1;
                op("xor", vec![x, int(mask)])?
            }
            _ => return Err(unsupported(format!("unary operator on {}", typ), e)),
        };
        Ok(Operand::Word(node))
    }

    fn compare(&mut self, e: &Expr, cop: CmpOp, left: &Expr, right: &Expr) -> CgResult<Operand> {
        if matches!(cop, CmpOp::In | CmpOp::NotIn) {
            let found = self.contains(left, right)?;
            let node = if cop == CmpOp::NotIn { op("iszero", vec![found])? } else { found };
            return Ok(Operand::Word(node));
        }
        let typ = self.type_of(left)?;
        if typ.is_bytestring() {
            let l = self.content_hash(left)?;
            let r = self.content_hash(right)?;
            let eq = op("eq", vec![l, r])?;
            return match cop {
                CmpOp::Eq => Ok(Operand::Word(eq)),
                CmpOp::NotEq => Ok(Operand::Word(op("iszero", vec![eq])?)),
                _ => Err(unsupported("ordering of strings", e)),
            };
        }
        if !typ.is_value_type() {
            return Err(unsupported(format!("comparison of {}", typ), e));
        }
        let l = self.word(left)?;
        let r = self.word(right)?;
        let signed = typ.is_signed();
        let name = match cop {
            CmpOp::Eq => "eq",
            CmpOp::NotEq => "ne",
            CmpOp::Lt if signed => "slt",
            CmpOp::Lt => "lt",
            CmpOp::LtE if signed => "sle",
            CmpOp::LtE => "le",
            CmpOp::Gt if signed => "sgt",
            CmpOp::Gt => "gt",
            CmpOp::GtE if signed => "sge",
            CmpOp::GtE => "ge",
            CmpOp::In | CmpOp::NotIn => return Err(internal_error("membership test in an ordering", e)),
        };
        Ok(Operand::Word(op(name, vec![l, r])?))
    }

    /// keccak256 of a bytestring's contents.
    pub(crate) fn content_hash(&mut self, e: &Expr) -> CgResult<IrNode> {
        let typ = self.type_of(e)?;
        let operand = self.expr(e)?;
        let (ptr, _) = self.in_memory(operand, &typ)?;
        let p = self.fresh("str");
        let data = op("add", vec![var(&p), int(32)])?;
        with(&p, ptr, op("sha3", vec![data, op("mload", vec![var(&p)])?])?)
    }

    /// `left in right`, as a 0/1 word.
    fn contains(&mut self, left: &Expr, right: &Expr) -> CgResult<IrNode> {
        let container = self.type_of(right)?;
        if let Type::Enum(_) = container {
            let l = self.word(left)?;
            let r = self.word(right)?;
            return op("iszero", vec![op("iszero", vec![op("and", vec![l, r])?])?]);
        }
        let needle = self.word(left)?;
        let x = self.fresh("needle");
        if let ExprKind::List(items) = &right.kind {
            let mut words = items.iter().map(|i| self.word(i)).collect::<CgResult<Vec<_>>>()?;
            let mut acc = match words.pop() {
                Some(last) => op("eq", vec![var(&x), last])?,
                None => int(0),
            };
            while let Some(w) = words.pop() {
                acc = op("or", vec![op("eq", vec![var(&x), w])?, acc])?;
            }
            return with(&x, needle, acc);
        }
        let (elem, count, dynamic) = match &container {
            Type::Array(elem, n) => ((**elem).clone(), *n, false),
            Type::DynArray(elem, n) => ((**elem).clone(), *n, true),
            other => return Err(unsupported(format!("'in' over {}", other), right)),
        };
        if !elem.is_value_type() {
            return Err(unsupported(format!("'in' over a list of {}", elem), right));
        }
        let (base, loc, _) = self.place(right)?;
        let b = self.fresh("list");
        let result = self.alloc(32);
        let counter = self.alloc(32);
        let i = op("mload", vec![int(counter)])?;
        let first = if dynamic { add_offset(var(&b), stride(loc))? } else { var(&b) };
        let at = op("add", vec![first, op("mul", vec![i.clone(), int(stride(loc))])?])?;
        let mut body = Vec::new();
        if dynamic {
            let past_end = op("ge", vec![i, self.load(var(&b), loc)?])?;
            body.push(op("if", vec![past_end, op("break", vec![])?])?);
        }
        let hit = op("eq", vec![var(&x), self.load(at, loc)?])?;
        let found = seq(vec![op("mstore", vec![int(result), int(1)])?, op("break", vec![])?])?;
        body.push(op("if", vec![hit, found])?);
        let search = seq(vec![
            op("mstore", vec![int(result), int(0)])?,
            op("repeat", vec![int(counter), int(0), int(count), seq(body)?])?,
            op("mload", vec![int(result)])?,
        ])?;
        with(&x, needle, with(&b, base, search)?)
    }

    fn bool_op(&mut self, e: &Expr, kind: BoolOpKind, values: &[Expr]) -> CgResult<Operand> {
        let mut words = values.iter().map(|v| self.word(v)).collect::<CgResult<Vec<_>>>()?;
        let mut acc = words
            .pop()
            .ok_or_else(|| internal_error("boolean operator without operands", e))?;
        while let Some(w) = words.pop() {
            acc = match kind {
                BoolOpKind::And => op("if", vec![w, acc, int(0)])?,
                BoolOpKind::Or => op("if", vec![w, int(1), acc])?,
            };
        }
        Ok(Operand::Word(acc))
    }
}
