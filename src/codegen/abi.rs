//! ABI encoding into memory buffers and decoding from calldata or memory.
//!
//! Static values share their memory layout with the ABI head, so they are
//! written with the ordinary store routines. Dynamic values go to the tail:
//! a position word tracks where the next tail starts, the head receives the
//! offset and the tail encoder returns the number of bytes it wrote.

use num_bigint::BigInt;
use num_traits::One;

use super::copy::{identity_copy, member_offset, member_types, UNROLL_WORDS};
use super::{add_offset, int, op, seq, var, with, CgResult, Codegen, Operand};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::ir::IrNode;
use crate::span::Span;
use crate::typecheck::{DataLocation, Type};

/// Where encoded data is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Source {
    Calldata,
    Memory,
}

fn panic(message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(ErrorKind::Panic, message, Span::dummy())
}

/// Byte offsets of the members of a tuple-like type within its ABI head.
fn head_offsets(types: &[Type]) -> Vec<u64> {
    let mut at = 0;
    types
        .iter()
        .map(|t| {
            let here = at;
            at += t.abi_head_size();
            here
        })
        .collect()
}

fn load_from(src: Source, ptr: IrNode) -> CgResult<IrNode> {
    match src {
        Source::Calldata => op("calldataload", vec![ptr]),
        Source::Memory => op("mload", vec![ptr]),
    }
}

fn copy_from(src: Source, dst: IrNode, from: IrNode, len: IrNode) -> CgResult<IrNode> {
    match src {
        Source::Calldata => op("calldatacopy", vec![dst, from, len]),
        Source::Memory => identity_copy(dst, from, len),
    }
}

impl<'a> Codegen<'a> {
    // ── Encoding ──

    /// Encode `items` as one ABI tuple at `buf`. The returned node writes
    /// the encoding and evaluates to its length in bytes.
    pub(crate) fn abi_encode(&mut self, buf: IrNode, items: Vec<(Operand, Type)>) -> CgResult<IrNode> {
        self.bind("buf", buf, |cg, buf| cg.encode_tuple(buf, items))
    }

    fn encode_tuple(&mut self, buf: IrNode, items: Vec<(Operand, Type)>) -> CgResult<IrNode> {
        let head: u64 = items.iter().map(|(_, t)| t.abi_head_size()).sum();
        let mut body = Vec::with_capacity(items.len() + 2);
        let pos = if items.iter().any(|(_, t)| t.is_dynamic()) {
            let pos = self.alloc(32);
            body.push(op("mstore", vec![int(pos), int(head)])?);
            Some(pos)
        } else {
            None
        };
        let mut offset = 0;
        for (operand, typ) in items {
            let at = add_offset(buf.clone(), offset)?;
            offset += typ.abi_head_size();
            match pos {
                Some(pos) if typ.is_dynamic() => {
                    let current = || op("mload", vec![int(pos)]);
                    body.push(op("mstore", vec![at, current()?])?);
                    let dst = op("add", vec![buf.clone(), current()?])?;
                    let written = self.encode_tail(dst, operand, &typ)?;
                    body.push(op("mstore", vec![int(pos), op("add", vec![current()?, written])?])?);
                }
                _ => body.push(self.store(at, DataLocation::Memory, &typ, operand)?),
            }
        }
        body.push(match pos {
            Some(pos) => op("mload", vec![int(pos)])?,
            None => int(head),
        });
        seq(body)
    }

    /// Write the tail of a dynamic value at `dst`; evaluates to its size.
    fn encode_tail(&mut self, dst: IrNode, operand: Operand, typ: &Type) -> CgResult<IrNode> {
        let (src, actual) = self.in_memory(operand, typ)?;
        let s = self.fresh("enc_src");
        let d = self.fresh("enc_dst");
        let body = match &actual {
            Type::Bytes(_) | Type::String(_) => {
                let l = self.fresh("len");
                let data = op("add", vec![var(&d), int(32)])?;
                let end = op("add", vec![data.clone(), var(&l)])?;
                let body = seq(vec![
                    op("mstore", vec![var(&d), var(&l)])?,
                    identity_copy(data, op("add", vec![var(&s), int(32)])?, var(&l))?,
                    // Zero the padding of the last word.
                    op("mstore", vec![end, int(0)])?,
                    op("add", vec![int(32), op("ceil32", vec![var(&l)])?])?,
                ])?;
                with(&l, op("mload", vec![var(&s)])?, body)?
            }
            Type::DynArray(elem, _) if !elem.is_dynamic() => {
                let z = self.fresh("size");
                let size = op("mul", vec![op("mload", vec![var(&s)])?, int(elem.size_in_bytes())])?;
                // Length word and packed elements, exactly as in memory.
                let total = op("add", vec![int(32), var(&z)])?;
                let body = seq(vec![
                    identity_copy(var(&d), var(&s), total.clone())?,
                    total,
                ])?;
                with(&z, size, body)?
            }
            Type::DynArray(elem, cap) => self.encode_dynamic_elements(&d, &s, elem, *cap)?,
            Type::Tuple(_) | Type::Struct(_) | Type::Array(..) => {
                let types = member_types(&actual).ok_or_else(|| panic(format!("cannot encode {}", actual)))?;
                let mut items = Vec::with_capacity(types.len());
                for (i, t) in types.iter().enumerate() {
                    let ptr = add_offset(var(&s), member_offset(&types, i) * 32)?;
                    items.push((self.read(ptr, DataLocation::Memory, t.clone())?, t.clone()));
                }
                self.encode_tuple(var(&d), items)?
            }
            other => return Err(panic(format!("{} has no ABI tail", other))),
        };
        with(&s, src, with(&d, dst, body)?)
    }

    /// `DynArray` of dynamic elements: a head of offsets followed by the
    /// element tails, written in a loop.
    fn encode_dynamic_elements(&mut self, d: &str, s: &str, elem: &Type, cap: u64) -> CgResult<IrNode> {
        let l = self.fresh("len");
        let pos = self.alloc(32);
        let counter = self.alloc(32);
        let i = || op("mload", vec![int(counter)]);
        let current = || op("mload", vec![int(pos)]);
        let heads = op("add", vec![var(d), int(32)])?;
        let element = op(
            "add",
            vec![op("add", vec![var(s), int(32)])?, op("mul", vec![i()?, int(elem.size_in_bytes())])?],
        )?;
        let written = self.encode_tail(
            op("add", vec![heads.clone(), current()?])?,
            Operand::memory(element, elem.clone()),
            elem,
        )?;
        let body = seq(vec![
            op("if", vec![op("ge", vec![i()?, var(&l)])?, op("break", vec![])?])?,
            op("mstore", vec![op("add", vec![heads, op("mul", vec![i()?, int(32)])?])?, current()?])?,
            op("mstore", vec![int(pos), op("add", vec![current()?, written])?])?,
        ])?;
        let encode = seq(vec![
            op("mstore", vec![var(d), var(&l)])?,
            op("mstore", vec![int(pos), op("mul", vec![var(&l), int(32)])?])?,
            op("repeat", vec![int(counter), int(0), int(cap), body])?,
            op("add", vec![int(32), current()?])?,
        ])?;
        with(&l, op("mload", vec![var(s)])?, encode)
    }

    // ── Decoding ──

    /// Decode a `typ` whose head word sits at `head` into memory at `dst`.
    /// Offsets of dynamic values are relative to `base`. Every value is
    /// validated against its type.
    pub(crate) fn abi_decode(
        &mut self,
        dst: IrNode,
        typ: &Type,
        head: IrNode,
        base: IrNode,
        src: Source,
    ) -> CgResult<IrNode> {
        if typ.is_value_type() {
            let word = load_from(src, head)?;
            return op("mstore", vec![dst, self.validate(word, typ)?]);
        }
        if typ.is_dynamic() {
            let a = self.fresh("abi");
            let at = op("add", vec![base, load_from(src, head)?])?;
            let body = self.bind("dst", dst, |cg, dst| cg.decode_tail(dst, typ, var(&a), src))?;
            return with(&a, at, body);
        }
        self.bind("dst", dst, |cg, dst| {
            cg.bind("head", head, |cg, head| {
                cg.bind("base", base, |cg, base| cg.decode_static(dst, typ, head, base, src))
            })
        })
    }

    /// Decode an encoded argument or return tuple starting at `at`. A
    /// tuple type stands for the members themselves, anything else for a
    /// one-member tuple.
    pub(crate) fn abi_decode_tuple(&mut self, dst: IrNode, typ: &Type, at: IrNode, src: Source) -> CgResult<IrNode> {
        match typ {
            Type::Tuple(_) if typ.is_dynamic() => self.decode_tail(dst, typ, at, src),
            Type::Tuple(_) => self.bind("at", at, |cg, at| cg.decode_static(dst, typ, at.clone(), at, src)),
            _ => self.bind("at", at, |cg, at| cg.abi_decode(dst, typ, at.clone(), at, src)),
        }
    }

    /// Static aggregates: memory layout and ABI head coincide, but each
    /// member still needs validation.
    fn decode_static(&mut self, dst: IrNode, typ: &Type, head: IrNode, base: IrNode, src: Source) -> CgResult<IrNode> {
        if let Type::Array(elem, n) = typ {
            if *n * elem.size_in_words() > UNROLL_WORDS {
                let counter = self.alloc(32);
                let offset = op("mul", vec![op("mload", vec![int(counter)])?, int(elem.size_in_bytes())])?;
                let body = self.abi_decode(
                    op("add", vec![dst, offset.clone()])?,
                    elem,
                    op("add", vec![head, offset])?,
                    base,
                    src,
                )?;
                return op("repeat", vec![int(counter), int(0), int(*n), body]);
            }
        }
        let types = member_types(typ).ok_or_else(|| panic(format!("cannot decode {}", typ)))?;
        let mut body = Vec::with_capacity(types.len());
        for (i, t) in types.iter().enumerate() {
            let offset = member_offset(&types, i) * 32;
            body.push(self.abi_decode(
                add_offset(dst.clone(), offset)?,
                t,
                add_offset(head.clone(), offset)?,
                base.clone(),
                src,
            )?);
        }
        seq(body)
    }

    /// Decode the tail of a dynamic value starting at `a`.
    fn decode_tail(&mut self, dst: IrNode, typ: &Type, a: IrNode, src: Source) -> CgResult<IrNode> {
        match typ {
            Type::Bytes(cap) | Type::String(cap) => {
                let l = self.fresh("len");
                let length = op("uclample", vec![load_from(src, a.clone())?, int(*cap)])?;
                let body = seq(vec![
                    op("mstore", vec![dst.clone(), var(&l)])?,
                    copy_from(src, op("add", vec![dst, int(32)])?, op("add", vec![a, int(32)])?, var(&l))?,
                ])?;
                with(&l, length, body)
            }
            Type::DynArray(elem, cap) => {
                let l = self.fresh("len");
                let length = op("uclample", vec![load_from(src, a.clone())?, int(*cap)])?;
                let counter = self.alloc(32);
                let i = || op("mload", vec![int(counter)]);
                let first = op("add", vec![a, int(32)])?;
                let element = self.abi_decode(
                    op(
                        "add",
                        vec![op("add", vec![dst.clone(), int(32)])?, op("mul", vec![i()?, int(elem.size_in_bytes())])?],
                    )?,
                    elem,
                    op("add", vec![first.clone(), op("mul", vec![i()?, int(elem.abi_head_size())])?])?,
                    first,
                    src,
                )?;
                let body = seq(vec![
                    op("if", vec![op("ge", vec![i()?, var(&l)])?, op("break", vec![])?])?,
                    element,
                ])?;
                let decode = seq(vec![
                    op("mstore", vec![dst, var(&l)])?,
                    op("repeat", vec![int(counter), int(0), int(*cap), body])?,
                ])?;
                with(&l, length, decode)
            }
            Type::Tuple(_) | Type::Struct(_) | Type::Array(..) => {
                let types = member_types(typ).ok_or_else(|| panic(format!("cannot decode {}", typ)))?;
                let heads = head_offsets(&types);
                let mut body = Vec::with_capacity(types.len());
                for (i, t) in types.iter().enumerate() {
                    body.push(self.abi_decode(
                        add_offset(dst.clone(), member_offset(&types, i) * 32)?,
                        t,
                        add_offset(a.clone(), heads[i])?,
                        a.clone(),
                        src,
                    )?);
                }
                seq(body)
            }
            other => Err(panic(format!("{} has no ABI tail", other))),
        }
    }

    /// Revert unless `x` is a well-formed encoding of a `typ` word.
    pub(crate) fn validate(&mut self, x: IrNode, typ: &Type) -> CgResult<IrNode> {
        match typ {
            Type::Int(_) | Type::Decimal => self.bounded(x, typ),
            Type::Bool => op("uclample", vec![x, int(1)]),
            Type::Address | Type::Interface(_) => {
                op("uclample", vec![x, int((BigInt::one() << 160usize) - 1)])
            }
            Type::Enum(en) => op("uclamplt", vec![x, int(BigInt::one() << en.members.len())]),
            Type::BytesM(m) if *m < 32 => self.bind("word", x, |_, w| {
                let low = op("shl", vec![int(8 * u64::from(*m)), w.clone()])?;
                seq(vec![op("assert", vec![op("iszero", vec![low])?])?, w])
            }),
            _ => Ok(x),
        }
    }
}
