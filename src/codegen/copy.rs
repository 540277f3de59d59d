//! Loads, stores and aggregate copies between memory and storage.
//!
//! Memory and storage share one word layout: a value of `size_in_words`
//! words occupies that many consecutive memory words or storage slots.
//! Bytestrings and dynamic arrays start with their length word. Copies
//! between two memory regions go through the identity precompile; copies
//! touching storage walk words in a loop bounded by the static size.

use super::{add_offset, int, op, seq, var, with, CgResult, Codegen, Operand};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::ir::IrNode;
use crate::span::Span;
use crate::typecheck::{DataLocation, Type};

/// Static copies up to this many words are unrolled.
pub(crate) const UNROLL_WORDS: u64 = 8;

/// Address units per word: bytes in memory, slots in storage.
pub(crate) fn stride(loc: DataLocation) -> u64 {
    match loc {
        DataLocation::Storage => 1,
        _ => 32,
    }
}

fn panic(message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(ErrorKind::Panic, message, Span::dummy())
}

/// Memory layout word offsets of the members of a tuple-like type.
pub(crate) fn member_types(typ: &Type) -> Option<Vec<Type>> {
    match typ {
        Type::Tuple(ts) => Some(ts.clone()),
        Type::Struct(s) => Some(s.member_types()),
        Type::Array(elem, n) => Some(vec![(**elem).clone(); *n as usize]),
        _ => None,
    }
}

/// Word offset of member `index`.
pub(crate) fn member_offset(types: &[Type], index: usize) -> u64 {
    types[..index].iter().map(Type::size_in_words).sum()
}

/// Two types whose values can be copied word for word.
fn same_layout(dst: &Type, src: &Type) -> bool {
    match (dst, src) {
        (Type::Bytes(_) | Type::String(_), Type::Bytes(_) | Type::String(_)) => true,
        (Type::DynArray(a, _), Type::DynArray(b, _)) => a == b,
        _ => dst == src,
    }
}

impl<'a> Codegen<'a> {
    pub(crate) fn load(&self, ptr: IrNode, loc: DataLocation) -> CgResult<IrNode> {
        match loc {
            DataLocation::Storage => op("sload", vec![ptr]),
            _ => op("mload", vec![ptr]),
        }
    }

    pub(crate) fn store_word(&self, ptr: IrNode, loc: DataLocation, value: IrNode) -> CgResult<IrNode> {
        match loc {
            DataLocation::Storage => op("sstore", vec![ptr, value]),
            _ => op("mstore", vec![ptr, value]),
        }
    }

    /// Reduce a value-type operand to a stack word.
    pub(crate) fn to_word(&self, operand: Operand) -> CgResult<IrNode> {
        match operand {
            Operand::Word(n) => Ok(n),
            Operand::Ptr { node, loc, .. } => self.load(node, loc),
            Operand::Zero => Ok(int(0)),
            Operand::Members(_) => Err(panic("a list or tuple was used as a single value")),
        }
    }

    /// The members of a tuple, struct or static array operand.
    pub(crate) fn split(&self, operand: Operand, typ: &Type) -> CgResult<Vec<(Operand, Type)>> {
        let types = member_types(typ).ok_or_else(|| panic(format!("{} has no members", typ)))?;
        match operand {
            Operand::Members(ms) => Ok(ms.into_iter().zip(types).collect()),
            Operand::Zero => Ok(types.into_iter().map(|t| (Operand::Zero, t)).collect()),
            Operand::Ptr { node, loc, typ: actual } => {
                let actual = member_types(&actual).unwrap_or_else(|| types.clone());
                let mut out = Vec::with_capacity(types.len());
                for (i, t) in types.into_iter().enumerate() {
                    let at = actual.get(i).cloned().unwrap_or_else(|| t.clone());
                    let ptr = add_offset(node.clone(), member_offset(&actual, i) * stride(loc))?;
                    let member = if t.is_value_type() {
                        Operand::Word(self.load(ptr, loc)?)
                    } else {
                        Operand::Ptr { node: ptr, loc, typ: at }
                    };
                    out.push((member, t));
                }
                Ok(out)
            }
            Operand::Word(_) => Err(panic(format!("a single word cannot hold {}", typ))),
        }
    }

    /// Split `operand` into members, binding a pointer first so each
    /// member reads from a single evaluation of it.
    pub(crate) fn with_members(
        &mut self,
        operand: Operand,
        typ: &Type,
        body: impl FnOnce(&mut Self, Vec<(Operand, Type)>) -> CgResult<IrNode>,
    ) -> CgResult<IrNode> {
        match operand {
            Operand::Ptr { node, loc, typ: actual } => self.bind("tup", node, |cg, node| {
                let members = cg.split(Operand::Ptr { node, loc, typ: actual }, typ)?;
                body(cg, members)
            }),
            other => {
                let members = self.split(other, typ)?;
                body(self, members)
            }
        }
    }

    /// Write `src` into a `typ` slot at `dst`.
    pub(crate) fn store(&mut self, dst: IrNode, loc: DataLocation, typ: &Type, src: Operand) -> CgResult<IrNode> {
        if typ.is_value_type() {
            let word = self.to_word(src)?;
            return self.store_word(dst, loc, word);
        }
        match src {
            Operand::Zero => self.zero(dst, loc, typ),
            Operand::Members(ms) if ms.iter().all(Operand::is_literal) => {
                self.store_members(dst, loc, typ, ms)
            }
            Operand::Members(ms) => {
                // Members may read the destination; build the value aside first.
                let tmp = self.alloc_for(typ);
                let build = self.store_members(int(tmp), DataLocation::Memory, typ, ms)?;
                let copy = self.copy(dst, loc, typ, int(tmp), DataLocation::Memory, typ)?;
                seq(vec![build, copy])
            }
            Operand::Ptr { node, loc: src_loc, typ: src_typ } => {
                self.copy(dst, loc, typ, node, src_loc, &src_typ)
            }
            Operand::Word(_) => Err(panic(format!("a single word cannot hold {}", typ))),
        }
    }

    fn store_members(&mut self, dst: IrNode, loc: DataLocation, typ: &Type, members: Vec<Operand>) -> CgResult<IrNode> {
        let name = self.fresh("dst");
        let base = var(&name);
        let mut body = Vec::with_capacity(members.len() + 1);
        let (types, start) = match typ {
            Type::DynArray(elem, cap) => {
                if members.len() as u64 > *cap {
                    return Err(panic(format!("{} members do not fit in {}", members.len(), typ)));
                }
                body.push(self.store_word(base.clone(), loc, int(members.len() as u64))?);
                (vec![(**elem).clone(); members.len()], 1)
            }
            _ => (
                member_types(typ).ok_or_else(|| panic(format!("{} cannot be built from members", typ)))?,
                0,
            ),
        };
        if types.len() != members.len() {
            return Err(panic(format!("{} expects {} members", typ, types.len())));
        }
        for (i, (member, t)) in members.into_iter().zip(&types).enumerate() {
            let ptr = add_offset(base.clone(), (start + member_offset(&types, i)) * stride(loc))?;
            body.push(self.store(ptr, loc, t, member)?);
        }
        with(&name, dst, seq(body)?)
    }

    /// Zero a `typ` slot.
    pub(crate) fn zero(&mut self, dst: IrNode, loc: DataLocation, typ: &Type) -> CgResult<IrNode> {
        if typ.is_value_type() || typ.has_length_word() {
            return self.store_word(dst, loc, int(0));
        }
        let words = typ.size_in_words();
        if loc != DataLocation::Storage {
            // Reading past the end of calldata yields zeros.
            let size = op("calldatasize", vec![])?;
            return op("calldatacopy", vec![dst, size, int(words * 32)]);
        }
        let name = self.fresh("dst");
        let base = var(&name);
        let body = if words <= UNROLL_WORDS {
            let stores = (0..words)
                .map(|i| self.store_word(add_offset(base.clone(), i)?, loc, int(0)))
                .collect::<CgResult<Vec<_>>>()?;
            seq(stores)?
        } else {
            let counter = self.alloc(32);
            let i = op("mload", vec![int(counter)])?;
            let store = self.store_word(op("add", vec![base.clone(), i])?, loc, int(0))?;
            op("repeat", vec![int(counter), int(0), int(words), store])?
        };
        with(&name, dst, body)
    }

    /// Copy a `src_typ` value at `src` into a `typ` slot at `dst`.
    pub(crate) fn copy(
        &mut self,
        dst: IrNode,
        dst_loc: DataLocation,
        typ: &Type,
        src: IrNode,
        src_loc: DataLocation,
        src_typ: &Type,
    ) -> CgResult<IrNode> {
        if typ.is_value_type() {
            let word = self.load(src, src_loc)?;
            return self.store_word(dst, dst_loc, word);
        }
        let d = self.fresh("dst");
        let s = self.fresh("src");
        let body = if !same_layout(typ, src_typ) {
            self.copy_members(var(&d), dst_loc, typ, var(&s), src_loc, src_typ)?
        } else if dst_loc != DataLocation::Storage && src_loc != DataLocation::Storage {
            self.copy_memory(var(&d), var(&s), typ, src_typ)?
        } else {
            self.copy_words(var(&d), dst_loc, typ, var(&s), src_loc, src_typ)?
        };
        with(&s, src, with(&d, dst, body)?)
    }

    fn copy_members(
        &mut self,
        dst: IrNode,
        dst_loc: DataLocation,
        typ: &Type,
        src: IrNode,
        src_loc: DataLocation,
        src_typ: &Type,
    ) -> CgResult<IrNode> {
        let (Some(dst_types), Some(src_types)) = (member_types(typ), member_types(src_typ)) else {
            return Err(panic(format!("cannot copy {} into {}", src_typ, typ)));
        };
        let mut body = Vec::with_capacity(dst_types.len());
        for (i, (dt, st)) in dst_types.iter().zip(&src_types).enumerate() {
            let d = add_offset(dst.clone(), member_offset(&dst_types, i) * stride(dst_loc))?;
            let s = add_offset(src.clone(), member_offset(&src_types, i) * stride(src_loc))?;
            body.push(self.copy(d, dst_loc, dt, s, src_loc, st)?);
        }
        seq(body)
    }

    /// Memory to memory through the identity precompile.
    fn copy_memory(&mut self, dst: IrNode, src: IrNode, typ: &Type, src_typ: &Type) -> CgResult<IrNode> {
        let len = match src_typ {
            Type::Bytes(_) | Type::String(_) => op("add", vec![int(32), op("mload", vec![src.clone()])?])?,
            Type::DynArray(elem, _) => op(
                "add",
                vec![
                    int(32),
                    op("mul", vec![op("mload", vec![src.clone()])?, int(elem.size_in_bytes())])?,
                ],
            )?,
            _ => {
                let words = typ.size_in_words();
                if words <= UNROLL_WORDS {
                    let moves = (0..words)
                        .map(|i| {
                            let word = op("mload", vec![add_offset(src.clone(), i * 32)?])?;
                            op("mstore", vec![add_offset(dst.clone(), i * 32)?, word])
                        })
                        .collect::<CgResult<Vec<_>>>()?;
                    return seq(moves);
                }
                int(words * 32)
            }
        };
        let mut checks = Vec::new();
        if let (Some(cap), Some(src_cap)) = (typ.capacity(), src_typ.capacity()) {
            if src_cap > cap {
                let length = op("mload", vec![src.clone()])?;
                checks.push(op("assert", vec![op("le", vec![length, int(cap)])?])?);
            }
        }
        let l = self.fresh("len");
        let call = identity_copy(dst, src, var(&l))?;
        checks.push(with(&l, len, call)?);
        seq(checks)
    }

    /// Word loop for copies touching storage, capped at the static size of
    /// the destination and cut short once the runtime length is covered.
    fn copy_words(
        &mut self,
        dst: IrNode,
        dst_loc: DataLocation,
        typ: &Type,
        src: IrNode,
        src_loc: DataLocation,
        src_typ: &Type,
    ) -> CgResult<IrNode> {
        let words = typ.size_in_words().min(src_typ.size_in_words());
        let move_word = |this: &Self, i: IrNode| -> CgResult<IrNode> {
            let d = op("add", vec![dst.clone(), op("mul", vec![i.clone(), int(stride(dst_loc))])?])?;
            let s = op("add", vec![src.clone(), op("mul", vec![i, int(stride(src_loc))])?])?;
            let word = this.load(s, src_loc)?;
            this.store_word(d, dst_loc, word)
        };
        if !typ.has_length_word() && words <= UNROLL_WORDS {
            let moves = (0..words)
                .map(|i| {
                    let word = self.load(add_offset(src.clone(), i * stride(src_loc))?, src_loc)?;
                    self.store_word(add_offset(dst.clone(), i * stride(dst_loc))?, dst_loc, word)
                })
                .collect::<CgResult<Vec<_>>>()?;
            return seq(moves);
        }
        let counter = self.alloc(32);
        let i = op("mload", vec![int(counter)])?;
        let mut body = Vec::new();
        if let Some(needed) = self.words_needed(src.clone(), src_loc, src_typ)? {
            let done = op("ge", vec![i.clone(), needed])?;
            body.push(op("if", vec![done, op("break", vec![])?])?);
        }
        body.push(move_word(self, i)?);
        let mut out = Vec::new();
        if let (Some(cap), Some(src_cap)) = (typ.capacity(), src_typ.capacity()) {
            if src_cap > cap {
                let length = self.load(src.clone(), src_loc)?;
                out.push(op("assert", vec![op("le", vec![length, int(cap)])?])?);
            }
        }
        out.push(op("repeat", vec![int(counter), int(0), int(words), seq(body)?])?);
        seq(out)
    }

    /// Words actually in use by a length-prefixed value, including the
    /// length word itself.
    fn words_needed(&self, src: IrNode, loc: DataLocation, typ: &Type) -> CgResult<Option<IrNode>> {
        let length = || self.load(src.clone(), loc);
        let payload = match typ {
            Type::Bytes(_) | Type::String(_) => {
                op("div", vec![op("add", vec![length()?, int(31)])?, int(32)])?
            }
            Type::DynArray(elem, _) => op("mul", vec![length()?, int(elem.size_in_words())])?,
            _ => return Ok(None),
        };
        Ok(Some(op("add", vec![int(1), payload])?))
    }

    /// Place an operand in memory, copying it out of storage or building
    /// it from members when needed. Returns the pointer and its layout.
    pub(crate) fn in_memory(&mut self, operand: Operand, typ: &Type) -> CgResult<(IrNode, Type)> {
        match operand {
            Operand::Ptr {
                node,
                loc: DataLocation::Memory,
                typ: actual,
            } => Ok((node, actual)),
            other => {
                let tmp = self.alloc_for(typ);
                let fill = self.store(int(tmp), DataLocation::Memory, typ, other)?;
                Ok((seq(vec![fill, int(tmp)])?, typ.clone()))
            }
        }
    }
}

/// `(pop (staticcall gas 4 src len dst len))`
pub(crate) fn identity_copy(dst: IrNode, src: IrNode, len: IrNode) -> CgResult<IrNode> {
    let gas = op("gas", vec![])?;
    let call = op("staticcall", vec![gas, int(4), src, len.clone(), dst, len])?;
    op("pop", vec![call])
}
