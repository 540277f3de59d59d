//! Lowering from the analyzed AST to IR.
//!
//! `Codegen` walks every function body with the `TypeMap` produced by
//! analysis and builds one `IrNode` tree per contract:
//!
//! ```text
//! (seq <constructor> (deploy <runtime> 320 <immutables size>))
//! ```
//!
//! The runtime starts with the method-id dispatcher, followed by the
//! fallback and every internal function reachable from an external one.
//! Internal functions own a fixed memory frame (return pc, arguments,
//! return buffer) and are entered with `goto` and left with `jump`.

mod abi;
mod arith;
mod builtins;
mod calls;
mod context;
mod copy;
mod events;
mod expr;
mod module;
mod stmt;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use num_bigint::BigInt;
use tracing::{debug, instrument};

use crate::ast::Expr;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::ir::IrNode;
use crate::typecheck::{Analysis, ContractFunction, ContractInfo, DataLocation, Type, TypeMap};

pub(crate) use context::{Exit, Frame, LocalVar};

// ─── Memory map ────────────────────────────────────────────────────

// 0..192 belongs to the assembler's own pseudo-ops (`sha3_64`, clamps).

/// Scratch word for single-value hashing and immutable reads. Nothing may
/// be kept here across another expression.
pub const FREE_VAR_SPACE: u64 = 192;
/// First byte available to variables. Constructor-time immutables live here.
pub const RESERVED_MEMORY: u64 = 320;

/// Symbol marking the end of the runtime code, where immutables are appended.
pub const CODE_END_SYMBOL: &str = "_sym_code_end";
/// Symbol marking the end of the init code, where constructor args are appended.
pub const INITCODE_END_SYMBOL: &str = "_sym_initcode_end";

pub(crate) type CgResult<T> = Result<T, Diagnostic>;

/// Generated contract.
#[derive(Clone, Debug)]
pub struct Program {
    /// Root of the deploy tree; the runtime tree is its `deploy` operand.
    pub ir: IrNode,
    /// Upper gas bound of every function body, by name.
    pub function_gas: BTreeMap<String, u64>,
}

impl Program {
    /// The runtime tree, inside `deploy`.
    pub fn runtime(&self) -> Option<&IrNode> {
        self.ir.iter().find(|n| n.is_op("deploy")).and_then(|d| d.args.first())
    }
}

/// Generate IR for an analyzed contract.
#[instrument(skip_all)]
pub fn generate(analysis: &Analysis) -> Result<Program, Diagnostic> {
    let mut cg = Codegen::new(analysis);
    let ir = cg.contract()?;
    debug!(
        functions = cg.function_gas.len(),
        memory = cg.free_memory,
        gas = ir.gas,
        "generated IR"
    );
    Ok(Program {
        ir,
        function_gas: cg.function_gas,
    })
}

/// A lowered expression.
///
/// Value types become a stack word. Everything else stays a pointer into
/// memory or storage until a consumer decides how to copy it, and literal
/// lists, tuples and struct constructors keep their members apart so they
/// can be written straight into their destination.
#[derive(Clone, Debug)]
pub(crate) enum Operand {
    Word(IrNode),
    /// `typ` is the layout at `node`, which may be smaller than the
    /// destination it is copied into.
    Ptr {
        node: IrNode,
        loc: DataLocation,
        typ: Type,
    },
    Members(Vec<Operand>),
    /// `empty(T)`
    Zero,
}

impl Operand {
    pub(crate) fn memory(node: IrNode, typ: Type) -> Self {
        Operand::Ptr {
            node,
            loc: DataLocation::Memory,
            typ,
        }
    }

    /// Built only from literals, so writing members in place cannot read
    /// the destination it is overwriting.
    pub(crate) fn is_literal(&self) -> bool {
        match self {
            Operand::Word(n) => n.as_int().is_some(),
            Operand::Zero => true,
            Operand::Members(ms) => ms.iter().all(Operand::is_literal),
            Operand::Ptr { .. } => false,
        }
    }
}

// ─── IR helpers ────────────────────────────────────────────────────

pub(crate) fn op(name: &str, args: Vec<IrNode>) -> CgResult<IrNode> {
    Ok(IrNode::op(name, args)?)
}

pub(crate) fn seq(args: Vec<IrNode>) -> CgResult<IrNode> {
    Ok(IrNode::seq(args)?)
}

pub(crate) fn with(name: &str, value: IrNode, body: IrNode) -> CgResult<IrNode> {
    Ok(IrNode::with(name, value, body)?)
}

pub(crate) fn int(value: impl Into<BigInt>) -> IrNode {
    IrNode::int(value)
}

pub(crate) fn var(name: &str) -> IrNode {
    IrNode::name(name)
}

/// `(add node offset)`, or `node` itself for a zero offset.
pub(crate) fn add_offset(node: IrNode, offset: u64) -> CgResult<IrNode> {
    if offset == 0 {
        return Ok(node);
    }
    op("add", vec![node, int(offset)])
}

pub(crate) fn unsupported(what: impl Into<String>, expr: &Expr) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::Structure,
        format!("{} is not supported by the code generator", what.into()),
        expr.span,
    )
}

pub(crate) fn internal_error(message: impl Into<String>, expr: &Expr) -> Diagnostic {
    Diagnostic::error(ErrorKind::Panic, message, expr.span)
}

// ─── Builder ───────────────────────────────────────────────────────

/// Lowers one contract.
///
/// State is split between contract-wide bookkeeping (memory allocator,
/// frames, gas of generated functions) and the function currently being
/// generated (scopes, exit strategy, constructor flag).
pub(crate) struct Codegen<'a> {
    pub(crate) analysis: &'a Analysis,
    pub(crate) contract: &'a ContractInfo,
    pub(crate) types: &'a TypeMap,
    /// Next unallocated memory byte.
    pub(crate) free_memory: u64,
    /// Counter for fresh `with` names and labels.
    pub(crate) counter: u32,
    /// Fixed memory frame of every function.
    pub(crate) frames: BTreeMap<String, Frame>,
    /// Gas of generated internal bodies, charged at their call sites.
    pub(crate) internal_gas: BTreeMap<String, u64>,
    pub(crate) function_gas: BTreeMap<String, u64>,
    // ── Current function ──
    pub(crate) func: Option<&'a ContractFunction>,
    pub(crate) scopes: Vec<BTreeMap<String, LocalVar>>,
    pub(crate) exit: Exit,
    /// Generating constructor code: immutables live in memory and
    /// internal functions use constructor-local labels.
    pub(crate) in_constructor: bool,
}

impl<'a> Codegen<'a> {
    pub(crate) fn new(analysis: &'a Analysis) -> Self {
        Self {
            analysis,
            contract: &analysis.contract,
            types: &analysis.types,
            free_memory: RESERVED_MEMORY + analysis.contract.immutables_size(),
            counter: 0,
            frames: BTreeMap::new(),
            internal_gas: BTreeMap::new(),
            function_gas: BTreeMap::new(),
            func: None,
            scopes: Vec::new(),
            exit: Exit::External,
            in_constructor: false,
        }
    }

    /// Resolved type of a value expression.
    pub(crate) fn type_of(&self, expr: &Expr) -> CgResult<Type> {
        self.types
            .get(&expr.id)
            .cloned()
            .ok_or_else(|| internal_error(format!("no type was resolved for '{}'", expr), expr))
    }
}
