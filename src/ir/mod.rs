//! Intermediate representation between the annotated AST and EVM assembly.
//!
//! The IR is an S-expression tree. Every `IrNode` is validated when it is
//! built: the child count must match the opcode's arity, consumed children
//! must leave a value on the stack, and control constructs (`seq`, `if`,
//! `with`, `repeat`, ...) enforce their own shape. Construction also computes
//! a conservative upper bound on the gas the subtree can spend, so an
//! `IrNode` is never observed in an invalid state.

pub mod opcodes;
mod optimize;
mod parse;
#[cfg(test)]
mod tests;

use std::fmt;

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};
use thiserror::Error;

use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::Span;
use crate::typecheck::{DataLocation, Type};

use self::opcodes::OpInfo;

pub use optimize::optimize;
pub use parse::parse_ir;

/// Gas charged for pushing an integer literal.
pub const LITERAL_GAS: u64 = 5;
/// Gas charged for reading a `with`-bound name.
pub const NAME_GAS: u64 = 3;
/// Charge for a memory or calldata copy whose length is only known at runtime.
pub const DYNAMIC_SIZE_GAS: u64 = 34000;
/// Extra cost of a storage write that may turn a zero slot nonzero.
pub const SSTORE_SET_GAS: u64 = 15000;
/// Extra cost of a call that may transfer value.
pub const CALL_VALUE_GAS: u64 = 34000;
/// Per-iteration overhead of `repeat`.
pub const REPEAT_ITERATION_GAS: u64 = 50;
/// Dispatch overhead of a one-armed `if`.
pub const IF_GAS: u64 = 17;
/// Dispatch overhead of a two-armed `if`.
pub const IF_ELSE_GAS: u64 = 3;

// ─── Errors ────────────────────────────────────────────────────────

/// A malformed IR tree. These are compiler bugs, or (for `ClampFailure`)
/// code that is statically known to revert; compilation stops at once.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("unknown IR operation '{0}'")]
    UnknownOp(String),
    #[error("'{op}' takes {expected} arguments, got {got}")]
    Arity {
        op: String,
        expected: String,
        got: usize,
    },
    #[error("argument {index} of '{op}' must leave exactly one value on the stack")]
    Valency { op: String, index: usize },
    #[error("malformed '{op}': {reason}")]
    Malformed { op: String, reason: String },
    #[error("repeat count must be a positive integer literal, got {0}")]
    RepeatCount(String),
    #[error("assertion can never succeed: {0}")]
    ClampFailure(String),
    #[error("IR text, byte {pos}: {message}")]
    Parse { pos: usize, message: String },
}

impl IrError {
    fn malformed(op: &str, reason: impl Into<String>) -> Self {
        IrError::Malformed {
            op: op.to_string(),
            reason: reason.into(),
        }
    }

    fn arity(op: &str, expected: impl ToString, got: usize) -> Self {
        IrError::Arity {
            op: op.to_string(),
            expected: expected.to_string(),
            got,
        }
    }
}

impl From<IrError> for Diagnostic {
    fn from(err: IrError) -> Self {
        Diagnostic::error(ErrorKind::Panic, err.to_string(), Span::dummy())
    }
}

// ─── Nodes ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrValue {
    Int(BigInt),
    /// An opcode, pseudo-opcode or control keyword from the opcode table.
    Op(String),
    /// A name bound by `with`, or a label.
    Name(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct IrNode {
    pub value: IrValue,
    pub args: Vec<IrNode>,
    /// Language type of the value this node produces, if any.
    pub typ: Option<Type>,
    /// When set, the node evaluates to a pointer into this location.
    pub location: Option<DataLocation>,
    pub span: Option<Span>,
    pub annotation: Option<String>,
    /// Stack values left behind after execution.
    pub valency: u8,
    /// Upper bound on the gas spent executing this subtree.
    pub gas: u64,
    /// Gas not visible in the tree, such as the body of a called function.
    pub add_gas_estimate: u64,
    /// Whole-function bound, carried on the root node of a function body.
    pub total_gas: Option<u64>,
    pub func_name: Option<String>,
}

impl IrNode {
    fn raw(value: IrValue, args: Vec<IrNode>, valency: u8, gas: u64) -> Self {
        Self {
            value,
            args,
            typ: None,
            location: None,
            span: None,
            annotation: None,
            valency,
            gas,
            add_gas_estimate: 0,
            total_gas: None,
            func_name: None,
        }
    }

    pub fn int(value: impl Into<BigInt>) -> Self {
        Self::raw(IrValue::Int(value.into()), Vec::new(), 1, LITERAL_GAS)
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::raw(IrValue::Name(name.into()), Vec::new(), 1, NAME_GAS)
    }

    /// Build and validate an operation node.
    pub fn op(name: &str, args: Vec<IrNode>) -> Result<Self, IrError> {
        let info = opcodes::lookup(name).ok_or_else(|| IrError::UnknownOp(name.to_string()))?;
        let (valency, gas) = if info.is_control() {
            control_rules(info, &args)?
        } else {
            fixed_rules(info, &args)?
        };
        Ok(Self::raw(IrValue::Op(info.name.to_string()), args, valency, gas))
    }

    pub fn seq(args: Vec<IrNode>) -> Result<Self, IrError> {
        Self::op("seq", args)
    }

    /// `(with name value body)`
    pub fn with(name: &str, value: IrNode, body: IrNode) -> Result<Self, IrError> {
        Self::op("with", vec![Self::name(name), value, body])
    }

    pub fn pass() -> Self {
        Self::raw(IrValue::Op("pass".into()), Vec::new(), 0, 0)
    }

    // ── Builder-pattern metadata ──────────────────────────────────

    pub fn with_typ(mut self, typ: Type) -> Self {
        self.typ = Some(typ);
        self
    }

    pub fn with_location(mut self, location: DataLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Charge gas spent outside this subtree.
    pub fn with_add_gas(mut self, gas: u64) -> Self {
        self.add_gas_estimate = self.add_gas_estimate.saturating_add(gas);
        self.gas = self.gas.saturating_add(gas);
        self
    }

    /// Mark this node as the body of `name`, recording its gas bound.
    pub fn with_function(mut self, name: &str) -> Self {
        self.func_name = Some(name.to_string());
        self.total_gas = Some(self.gas);
        self
    }

    // ── Inspection ────────────────────────────────────────────────

    pub fn as_int(&self) -> Option<&BigInt> {
        match &self.value {
            IrValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn op_name(&self) -> Option<&str> {
        match &self.value {
            IrValue::Op(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_op(&self, name: &str) -> bool {
        self.op_name() == Some(name)
    }

    /// Every node of the tree, parents before children.
    pub fn iter(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

pub struct Walk<'a> {
    stack: Vec<&'a IrNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a IrNode;

    fn next(&mut self) -> Option<&'a IrNode> {
        let node = self.stack.pop()?;
        self.stack.extend(node.args.iter().rev());
        Some(node)
    }
}

// ─── Validation and gas ────────────────────────────────────────────

fn children_gas(args: &[IrNode]) -> u64 {
    args.iter().fold(0u64, |acc, a| acc.saturating_add(a.gas))
}

fn require_valent(op: &str, args: &[IrNode], indices: impl IntoIterator<Item = usize>) -> Result<(), IrError> {
    for index in indices {
        if args[index].valency != 1 {
            return Err(IrError::Valency {
                op: op.to_string(),
                index,
            });
        }
    }
    Ok(())
}

fn require_name<'a>(op: &str, arg: &'a IrNode) -> Result<&'a str, IrError> {
    match &arg.value {
        IrValue::Name(name) => Ok(name),
        _ => Err(IrError::malformed(op, format!("expected a plain name, found {}", arg))),
    }
}

fn fixed_rules(info: &OpInfo, args: &[IrNode]) -> Result<(u8, u64), IrError> {
    if args.len() != info.inputs as usize {
        return Err(IrError::arity(info.name, info.inputs, args.len()));
    }
    require_valent(info.name, args, 0..args.len())?;
    let gas = info
        .gas
        .saturating_add(children_gas(args))
        .saturating_add(2 * info.outputs as u64)
        .saturating_sub(2 * info.inputs as u64)
        .saturating_add(dynamic_gas(info.name, args));
    Ok((info.outputs, gas))
}

/// Extra cost that depends on operand values.
fn dynamic_gas(op: &str, args: &[IrNode]) -> u64 {
    let words = |size: &IrNode, per_word: u64| match size.as_int().and_then(|v| v.to_u64()) {
        Some(n) => n.div_ceil(32).saturating_mul(per_word).min(DYNAMIC_SIZE_GAS),
        None => DYNAMIC_SIZE_GAS,
    };
    let nonzero = |arg: &IrNode| arg.as_int().map_or(true, |v| !v.is_zero());
    match op {
        "sstore" if nonzero(&args[1]) => SSTORE_SET_GAS,
        "call" | "callcode" if nonzero(&args[2]) => CALL_VALUE_GAS,
        "calldatacopy" | "codecopy" | "returndatacopy" => words(&args[2], 3),
        "extcodecopy" => words(&args[3], 3),
        "sha3" => words(&args[1], 6),
        "log0" | "log1" | "log2" | "log3" | "log4" => match args[1].as_int().and_then(|v| v.to_u64()) {
            Some(n) => n.saturating_mul(8).min(DYNAMIC_SIZE_GAS),
            None => DYNAMIC_SIZE_GAS,
        },
        _ => 0,
    }
}

fn control_rules(info: &OpInfo, args: &[IrNode]) -> Result<(u8, u64), IrError> {
    let op = info.name;
    let expect = |n: usize| -> Result<(), IrError> {
        if args.len() != n {
            return Err(IrError::arity(op, n, args.len()));
        }
        Ok(())
    };
    match op {
        "seq" => {
            let valency = args.last().map_or(0, |a| a.valency);
            Ok((valency, children_gas(args)))
        }
        "multi" => {
            require_valent(op, args, 0..args.len())?;
            let valency = u8::try_from(args.len())
                .map_err(|_| IrError::malformed(op, "too many values"))?;
            Ok((valency, children_gas(args)))
        }
        "if" => {
            if args.len() != 2 && args.len() != 3 {
                return Err(IrError::arity(op, "2 or 3", args.len()));
            }
            require_valent(op, args, [0])?;
            let test = args[0].gas;
            if args.len() == 2 {
                if args[1].valency != 0 {
                    return Err(IrError::malformed(op, "the body of a one-armed if must not leave a value"));
                }
                Ok((0, test.saturating_add(args[1].gas).saturating_add(IF_GAS)))
            } else {
                if args[1].valency != args[2].valency {
                    return Err(IrError::malformed(
                        op,
                        format!(
                            "branches leave different numbers of values ({} and {})",
                            args[1].valency, args[2].valency
                        ),
                    ));
                }
                let branch = args[1].gas.max(args[2].gas);
                Ok((args[1].valency, test.saturating_add(branch).saturating_add(IF_ELSE_GAS)))
            }
        }
        "with" => {
            expect(3)?;
            let name = require_name(op, &args[0])?;
            if opcodes::lookup(name).is_some() {
                return Err(IrError::malformed(op, format!("'{}' is an opcode and cannot be bound", name)));
            }
            require_valent(op, args, [1])?;
            let gas = args[1].gas.saturating_add(args[2].gas).saturating_add(info.gas);
            Ok((args[2].valency, gas))
        }
        "repeat" => {
            expect(4)?;
            require_valent(op, args, [0, 1])?;
            let rounds = match args[2].as_int() {
                Some(n) if n.is_positive() => n.to_u64().unwrap_or(u64::MAX),
                _ => return Err(IrError::RepeatCount(args[2].to_string())),
            };
            if args[3].valency != 0 {
                return Err(IrError::malformed(op, "the loop body must not leave a value"));
            }
            let per_round = args[3].gas.saturating_add(REPEAT_ITERATION_GAS);
            let gas = args[0]
                .gas
                .saturating_add(args[1].gas)
                .saturating_add(rounds.saturating_mul(per_round))
                .saturating_add(info.gas);
            Ok((0, gas))
        }
        "set" => {
            expect(2)?;
            require_name(op, &args[0])?;
            require_valent(op, args, [1])?;
            Ok((0, args[1].gas.saturating_add(info.gas)))
        }
        "label" | "goto" => {
            expect(1)?;
            require_name(op, &args[0])?;
            Ok((0, info.gas))
        }
        "symbol" => {
            expect(1)?;
            require_name(op, &args[0])?;
            Ok((1, info.gas))
        }
        "deploy" => {
            expect(3)?;
            if args[0].valency != 0 {
                return Err(IrError::malformed(op, "runtime code must not leave a value"));
            }
            require_valent(op, args, [1, 2])?;
            // The runtime is returned as data, not executed here.
            Ok((0, args[1].gas.saturating_add(args[2].gas)))
        }
        _ => Err(IrError::UnknownOp(op.to_string())),
    }
}

// ─── Printing ──────────────────────────────────────────────────────

fn fmt_int(v: &BigInt) -> String {
    if !v.is_negative() && *v > (BigInt::one() << 32usize) {
        format!("0x{:x}", v)
    } else {
        v.to_string()
    }
}

impl IrNode {
    fn write_compact(&self, out: &mut String) {
        let head = match &self.value {
            IrValue::Int(v) => fmt_int(v),
            IrValue::Op(name) | IrValue::Name(name) => name.clone(),
        };
        if self.args.is_empty() {
            out.push_str(&head);
            return;
        }
        out.push('(');
        out.push_str(&head);
        for arg in &self.args {
            out.push(' ');
            arg.write_compact(out);
        }
        out.push(')');
    }

    fn write_pretty(&self, out: &mut String, indent: usize) {
        let mut compact = String::new();
        self.write_compact(&mut compact);
        let comment = self
            .annotation
            .as_ref()
            .map(|a| format!(" /* {} */", a.replace("*/", "* /")))
            .unwrap_or_default();
        if self.args.is_empty() || indent + compact.len() <= 80 {
            out.push_str(&compact);
            out.push_str(&comment);
            return;
        }
        out.push('(');
        out.push_str(self.op_name().unwrap_or_default());
        out.push_str(&comment);
        for arg in &self.args {
            out.push('\n');
            out.push_str(&" ".repeat(indent + 2));
            arg.write_pretty(out, indent + 2);
        }
        out.push(')');
    }
}

/// `{}` prints one line; `{:#}` indents long nodes and shows annotations.
impl fmt::Display for IrNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        if f.alternate() {
            self.write_pretty(&mut out, 0);
        } else {
            self.write_compact(&mut out);
        }
        f.write_str(&out)
    }
}
