//! Contract-level layout: dispatcher, function bodies, constructor and the
//! deploy wrapper.

use std::collections::BTreeSet;

use num_bigint::{BigInt, Sign};
use tracing::{debug, trace};

use super::abi::Source;
use super::context::CTOR_EXIT_LABEL;
use super::{
    int, op, seq, var, with, CgResult, Codegen, Exit, INITCODE_END_SYMBOL, RESERVED_MEMORY,
};
use crate::ast::FunctionDecl;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::ir::IrNode;
use crate::typecheck::{ContractFunction, DataLocation, Mutability};

/// Name the selector is bound to while dispatching.
const SELECTOR: &str = "_calldata_method_id";

fn missing_body(func: &ContractFunction) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::Panic,
        format!("no body was recorded for '{}'", func.name),
        func.span,
    )
}

fn nonpayable_check() -> CgResult<IrNode> {
    op("assert", vec![op("iszero", vec![op("callvalue", vec![])?])?])
}

impl<'a> Codegen<'a> {
    /// `(seq <constructor> (deploy <runtime> 320 <immutables size>))`
    pub(crate) fn contract(&mut self) -> CgResult<IrNode> {
        self.allocate_frames();
        let runtime = self.runtime()?;
        let constructor = self.constructor()?;
        let immutables = self.contract.immutables_size();
        let deploy = op("deploy", vec![runtime, int(RESERVED_MEMORY), int(immutables)])?;
        seq(vec![constructor, deploy])
    }

    fn decl(&self, func: &ContractFunction) -> CgResult<&'a FunctionDecl> {
        let analysis = self.analysis;
        analysis.function_decl(&func.name).ok_or_else(|| missing_body(func))
    }

    // ── Runtime ──

    fn runtime(&mut self) -> CgResult<IrNode> {
        let contract = self.contract;
        let entry_points: Vec<&ContractFunction> = contract
            .function_order
            .iter()
            .filter_map(|name| contract.functions.get(name))
            .filter(|f| f.is_external() && !f.is_constructor)
            .collect();
        let reachable: BTreeSet<String> = entry_points
            .iter()
            .flat_map(|f| f.reachable_internal_functions.iter().cloned())
            .collect();

        // Callees first, so every call site knows the gas of its target.
        let internals = self.internal_functions(&reachable)?;

        let mut branches = Vec::new();
        for func in entry_points.iter().copied().filter(|f| !f.is_fallback) {
            branches.extend(self.external_function(func)?);
        }
        let fallback = match contract.fallback() {
            Some(func) => self.fallback(func)?,
            None => op("revert", vec![int(0), int(0)])?,
        };
        let selector = op("shr", vec![int(224), op("calldataload", vec![int(0)])?])?;
        let dispatch = if branches.is_empty() {
            IrNode::pass()
        } else {
            with(SELECTOR, selector, seq(branches)?)?
        };

        let mut body = vec![dispatch, fallback];
        body.extend(internals);
        seq(body)
    }

    /// Bodies of the internal functions in `names`, in code generation order.
    fn internal_functions(&mut self, names: &BTreeSet<String>) -> CgResult<Vec<IrNode>> {
        let analysis = self.analysis;
        let contract = self.contract;
        let mut out = Vec::new();
        for name in analysis.codegen_order.iter().filter(|n| names.contains(*n)) {
            let Some(func) = contract.functions.get(name) else {
                continue;
            };
            let node = self.internal_function(func)?;
            trace!(function = %name, gas = node.gas, "internal function");
            self.internal_gas.insert(name.clone(), node.gas);
            self.function_gas.insert(name.clone(), node.gas);
            out.push(node);
        }
        Ok(out)
    }

    /// `(seq (label internal_f) <body> (jump (mload ret_pc)))`
    fn internal_function(&mut self, func: &'a ContractFunction) -> CgResult<IrNode> {
        let decl = self.decl(func)?;
        self.begin_function(func, Exit::Internal)?;
        let label = self.function_label(&func.name);
        let mut body = vec![op("label", vec![var(&label)])?];
        body.extend(self.lock()?);
        body.push(self.block(&decl.body)?);
        body.extend(self.unlock()?);
        body.push(self.return_jump(&func.name)?);
        Ok(seq(body)?.with_function(&func.name))
    }

    /// Acquire the reentrancy lock of the current function, if it holds one.
    fn lock(&self) -> CgResult<Option<IrNode>> {
        let Some(func) = self.func else {
            return Ok(None);
        };
        let Some(slot) = func.nonreentrant.as_ref().and_then(|k| self.contract.layout.lock_slot(k)) else {
            return Ok(None);
        };
        Ok(Some(seq(vec![
            op("assert", vec![op("iszero", vec![op("sload", vec![int(slot)])?])?])?,
            op("sstore", vec![int(slot), int(1)])?,
        ])?))
    }

    /// Dispatcher branches of one external function, one per arity. Every
    /// arity decodes what the caller supplied, fills in the defaults and
    /// continues at the shared body.
    fn external_function(&mut self, func: &'a ContractFunction) -> CgResult<Vec<IrNode>> {
        let decl = self.decl(func)?;
        self.begin_function(func, Exit::External)?;
        let frame = self.frame(&func.name)?.clone();
        let common = format!("ext_{}_common", func.name);
        let ids = func.method_ids();
        let last = ids.len().saturating_sub(1);

        let mut branches = Vec::with_capacity(ids.len());
        for (n, (signature, id)) in ids.iter().enumerate() {
            let arity = func.min_args() + n;
            let mut body = Vec::new();
            if func.mutability != Mutability::Payable {
                body.push(nonpayable_check()?);
            }
            let head: u64 = func.args[..arity].iter().map(|(_, t)| t.abi_head_size()).sum();
            body.push(op("assert", vec![op("ge", vec![op("calldatasize", vec![])?, int(4 + head)])?])?);

            let mut at = 4;
            for (i, (_, typ)) in func.args[..arity].iter().enumerate() {
                body.push(self.abi_decode(int(frame.args[i]), typ, int(at), int(4), Source::Calldata)?);
                at += typ.abi_head_size();
            }
            for i in arity..func.args.len() {
                let (_, typ) = &func.args[i];
                let d = i - func.min_args();
                let default = func.defaults.get(d).ok_or_else(|| {
                    Diagnostic::error(
                        ErrorKind::Panic,
                        format!("argument {} of '{}' has no default", i, func.name),
                        func.span,
                    )
                })?;
                let value = self.literal(default, typ)?;
                body.push(self.store(int(frame.args[i]), DataLocation::Memory, typ, value)?);
            }

            if n == last {
                body.push(op("label", vec![var(&common)])?);
                let start = body.len();
                body.extend(self.lock()?);
                body.push(self.block(&decl.body)?);
                body.extend(self.unlock()?);
                body.push(op("stop", vec![])?);
                let gas = body[start..].iter().fold(0u64, |acc, b| acc.saturating_add(b.gas));
                self.function_gas.insert(func.name.clone(), gas);
            } else {
                body.push(op("goto", vec![var(&common)])?);
            }

            let id = int(BigInt::from_bytes_be(Sign::Plus, id));
            let test = op("eq", vec![var(SELECTOR), id])?;
            let branch = op("if", vec![test, seq(body)?])?.with_annotation(signature.clone());
            branches.push(branch);
        }
        debug!(function = %func.name, arities = branches.len(), "external function");
        Ok(branches)
    }

    fn fallback(&mut self, func: &'a ContractFunction) -> CgResult<IrNode> {
        let decl = self.decl(func)?;
        self.begin_function(func, Exit::External)?;
        let mut body = Vec::new();
        if func.mutability != Mutability::Payable {
            body.push(nonpayable_check()?);
        }
        body.extend(self.lock()?);
        body.push(self.block(&decl.body)?);
        body.extend(self.unlock()?);
        body.push(op("stop", vec![])?);
        let node = seq(body)?.with_function(&func.name);
        self.function_gas.insert(func.name.clone(), node.gas);
        Ok(node)
    }

    // ── Constructor ──

    /// Constructor code. Arguments are ABI-encoded after the init code;
    /// internal functions it calls get their own copies, since the runtime
    /// ones are not part of the init code.
    fn constructor(&mut self) -> CgResult<IrNode> {
        let contract = self.contract;
        let Some(func) = contract.constructor() else {
            return Ok(IrNode::pass());
        };
        let decl = self.decl(func)?;
        self.in_constructor = true;
        let internals = self.internal_functions(&func.reachable_internal_functions)?;
        self.begin_function(func, Exit::Constructor)?;
        let frame = self.frame(&func.name)?.clone();

        let mut body = Vec::new();
        if func.mutability != Mutability::Payable {
            body.push(nonpayable_check()?);
        }
        if !func.args.is_empty() {
            let size: u64 = func
                .args
                .iter()
                .map(|(_, t)| t.abi_head_size() + if t.is_dynamic() { t.abi_max_size() } else { 0 })
                .sum();
            let buf = self.alloc(size);
            let start = op("symbol", vec![var(INITCODE_END_SYMBOL)])?;
            body.push(op("codecopy", vec![int(buf), start, int(size)])?);
            let mut at = buf;
            for (i, (_, typ)) in func.args.iter().enumerate() {
                body.push(self.abi_decode(int(frame.args[i]), typ, int(at), int(buf), Source::Memory)?);
                at += typ.abi_head_size();
            }
        }
        body.push(self.block(&decl.body)?);
        let gas = body.iter().fold(0u64, |acc, b| acc.saturating_add(b.gas));
        self.function_gas.insert(func.name.clone(), gas);
        body.push(op("goto", vec![var(CTOR_EXIT_LABEL)])?);
        body.extend(internals);
        body.push(op("label", vec![var(CTOR_EXIT_LABEL)])?);
        self.in_constructor = false;
        Ok(seq(body)?.with_function(&func.name))
    }
}
