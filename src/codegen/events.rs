//! `log` statements and revert reasons.

use num_bigint::{BigInt, Sign};

use super::{int, internal_error, op, seq, unsupported, var, with, CgResult, Codegen, Operand};
use crate::ast::{Expr, ExprKind};
use crate::ir::{opcodes, IrNode};
use crate::typecheck::Type;

/// Selector of `Error(string)`.
const ERROR_STRING_SELECTOR: u64 = 0x08c3_79a0;

impl<'a> Codegen<'a> {
    /// `log Event(..)`: indexed fields become topics after the event id,
    /// the rest is ABI-encoded as the log data.
    pub(crate) fn log(&mut self, call: &Expr) -> CgResult<IrNode> {
        let ExprKind::Call { func, args, keywords } = &call.kind else {
            return Err(internal_error("log expects an event call", call));
        };
        let name = func.as_name().ok_or_else(|| unsupported("this log target", func))?;
        let event = self
            .contract
            .events
            .get(name)
            .ok_or_else(|| internal_error(format!("unknown event '{}'", name), func))?;

        let values: Vec<&Expr> = if keywords.is_empty() {
            args.iter().collect()
        } else {
            event
                .fields
                .iter()
                .map(|f| {
                    keywords
                        .iter()
                        .find(|k| k.name.node == f.name)
                        .map(|k| &k.value)
                        .ok_or_else(|| internal_error(format!("missing event member '{}'", f.name), call))
                })
                .collect::<CgResult<_>>()?
        };
        if values.len() != event.fields.len() {
            return Err(internal_error(format!("event '{}' expects {} members", name, event.fields.len()), call));
        }

        let mut topics = vec![int(BigInt::from_bytes_be(Sign::Plus, event.event_id().as_slice()))];
        let mut data = Vec::new();
        for (field, value) in event.fields.iter().zip(values) {
            if !field.indexed {
                data.push((self.expr(value)?, field.typ.clone()));
            } else if field.typ.is_value_type() {
                topics.push(self.word(value)?);
            } else if field.typ.is_bytestring() {
                topics.push(self.short_bytes_topic(value, &field.typ)?);
            } else {
                return Err(unsupported(format!("an indexed {}", field.typ), value));
            }
        }

        let size: u64 = data
            .iter()
            .map(|(_, t)| t.abi_head_size() + if t.is_dynamic() { t.abi_max_size() } else { 0 })
            .sum();
        let buf = self.alloc(size + 32);
        let encoded = self.abi_encode(int(buf), data)?;
        let opcode = opcodes::log_opcode(topics.len() - 1)
            .ok_or_else(|| internal_error("too many indexed event members", call))?;
        let len = self.fresh("log_len");
        let mut operands = vec![int(buf), var(&len)];
        operands.extend(topics);
        with(&len, encoded, op(opcode, operands)?)
    }

    /// An indexed bytestring of at most 32 bytes is logged as its padded
    /// first data word.
    fn short_bytes_topic(&mut self, value: &Expr, typ: &Type) -> CgResult<IrNode> {
        let operand = self.expr(value)?;
        let (ptr, _) = self.in_memory(operand, typ)?;
        let p = self.fresh("topic");
        let k = self.fresh("pad");
        let word = op("mload", vec![op("add", vec![var(&p), int(32)])?])?;
        let masked = op("shl", vec![var(&k), op("shr", vec![var(&k), word])?])?;
        let pad = op("mul", vec![int(8), op("sub", vec![int(32), op("mload", vec![var(&p)])?])?])?;
        with(&p, ptr, with(&k, pad, masked)?)
    }

    /// Revert with `Error(string)` carrying `msg`.
    pub(crate) fn revert_reason(&mut self, msg: &Expr) -> CgResult<IrNode> {
        let typ = match (&msg.kind, self.types.get(&msg.id)) {
            (_, Some(t @ Type::String(_))) => t.clone(),
            (ExprKind::Str(s), _) => Type::String(s.len() as u64),
            _ => self.type_of(msg)?,
        };
        let operand = match &msg.kind {
            ExprKind::Str(_) => self.literal(msg, &typ)?,
            _ => self.expr(msg)?,
        };
        self.revert_with_string(operand, typ)
    }

    pub(crate) fn revert_with_string(&mut self, operand: Operand, typ: Type) -> CgResult<IrNode> {
        let buf = self.alloc(64 + typ.abi_max_size());
        let encoded = self.abi_encode(int(buf + 32), vec![(operand, typ)])?;
        let len = self.fresh("reason_len");
        let revert = op("revert", vec![int(buf + 28), op("add", vec![int(4), var(&len)])?])?;
        seq(vec![
            op("mstore", vec![int(buf), int(ERROR_STRING_SELECTOR)])?,
            with(&len, encoded, revert)?,
        ])
    }
}
