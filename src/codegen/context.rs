//! Per-function state: memory frames, scoped locals, fresh names and labels.

use std::collections::BTreeMap;

use super::{CgResult, Codegen};
use crate::ast::Expr;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::typecheck::{ContractFunction, Type};

/// A variable living in memory.
#[derive(Clone, Debug)]
pub(crate) struct LocalVar {
    pub(crate) typ: Type,
    pub(crate) pos: u64,
}

/// Fixed memory owned by one function.
#[derive(Clone, Debug, Default)]
pub(crate) struct Frame {
    /// Return address, written by the caller of an internal function.
    pub(crate) ret_pc: u64,
    pub(crate) args: Vec<u64>,
    /// Internal functions: where the result is left for the caller.
    /// External functions: the ABI encoding buffer.
    pub(crate) ret_buf: Option<u64>,
}

/// How a `return` leaves the current function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Exit {
    /// ABI-encode and `return`, or `stop`.
    External,
    /// Leave the result in the frame and jump back to the caller.
    Internal,
    /// Jump to the deploy epilogue.
    Constructor,
}

/// Label the constructor epilogue lives at.
pub(crate) const CTOR_EXIT_LABEL: &str = "_ctor_exit";

impl<'a> Codegen<'a> {
    // ── Memory ──

    /// Reserve `size` bytes, rounded up to whole words. Saturates; such
    /// frames cannot be paid for and fail at runtime on memory expansion.
    pub(crate) fn alloc(&mut self, size: u64) -> u64 {
        let pos = self.free_memory;
        let words = size.div_ceil(32).max(1);
        self.free_memory = self.free_memory.saturating_add(words.saturating_mul(32));
        pos
    }

    /// Reserve room for a value of `typ`.
    pub(crate) fn alloc_for(&mut self, typ: &Type) -> u64 {
        self.alloc(typ.size_in_bytes())
    }

    /// Lay out the frame of every function. Frames never overlap, so a
    /// caller's locals survive any call it makes.
    pub(crate) fn allocate_frames(&mut self) {
        let contract = self.contract;
        for name in &contract.function_order {
            let Some(func) = contract.functions.get(name) else {
                continue;
            };
            let ret_pc = if func.is_external() { 0 } else { self.alloc(32) };
            let args = func.args.iter().map(|(_, t)| self.alloc_for(t)).collect();
            let ret_buf = func.return_type.as_ref().map(|t| {
                if func.is_external() {
                    // Head word plus one word of padding slack.
                    self.alloc(t.abi_max_size().saturating_add(64))
                } else {
                    self.alloc_for(t)
                }
            });
            self.frames.insert(
                name.clone(),
                Frame {
                    ret_pc,
                    args,
                    ret_buf,
                },
            );
        }
    }

    pub(crate) fn frame(&self, name: &str) -> CgResult<&Frame> {
        self.frames.get(name).ok_or_else(|| {
            Diagnostic::error(
                ErrorKind::Panic,
                format!("no memory frame was allocated for '{}'", name),
                crate::span::Span::dummy(),
            )
        })
    }

    // ── Names ──

    /// A `with` name no user variable can shadow.
    pub(crate) fn fresh(&mut self, hint: &str) -> String {
        self.counter += 1;
        format!("_{}{}", hint, self.counter)
    }

    /// Label of an internal function in the current code segment.
    pub(crate) fn function_label(&self, name: &str) -> String {
        if self.in_constructor {
            format!("ctor_internal_{}", name)
        } else {
            format!("internal_{}", name)
        }
    }

    // ── Scopes ──

    pub(crate) fn begin_function(&mut self, func: &'a ContractFunction, exit: Exit) -> CgResult<()> {
        self.func = Some(func);
        self.exit = exit;
        self.scopes = vec![BTreeMap::new()];
        let positions = self.frame(&func.name)?.args.clone();
        for ((name, typ), pos) in func.args.iter().zip(positions) {
            self.declare(name, typ.clone(), pos);
        }
        Ok(())
    }

    pub(crate) fn current_function(&self, at: &Expr) -> CgResult<&'a ContractFunction> {
        self.func
            .ok_or_else(|| super::internal_error("expression outside of a function", at))
    }

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(BTreeMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn declare(&mut self, name: &str, typ: Type, pos: u64) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), LocalVar { typ, pos });
        }
    }

    /// Allocate and declare a new local.
    pub(crate) fn new_local(&mut self, name: &str, typ: &Type) -> u64 {
        let pos = self.alloc_for(typ);
        self.declare(name, typ.clone(), pos);
        pos
    }

    pub(crate) fn local(&self, name: &str) -> Option<&LocalVar> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }
}
