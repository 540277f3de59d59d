//! Storage slot and code offset allocation.
//!
//! Reentrancy locks take the first slots, one per distinct key in the order
//! the keys are first seen. Storage variables follow sequentially, each
//! occupying `size_in_words` slots. Immutables get consecutive offsets into
//! the data appended to the runtime code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::ContractInfo;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::Span;

/// Layout names of reentrancy locks are `nonreentrant.<key>`.
pub const LOCK_PREFIX: &str = "nonreentrant.";

const LOCK_TYPE: &str = "nonreentrant lock";

fn default_location() -> String {
    "storage".to_string()
}

/// One entry of a layout, as read from or written to JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEntry {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl LayoutEntry {
    fn storage(typ: impl Into<String>, slot: u64) -> Self {
        Self {
            typ: typ.into(),
            location: "storage".to_string(),
            slot: Some(slot),
            offset: None,
            length: None,
        }
    }

    fn code(typ: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            typ: typ.into(),
            location: "code".to_string(),
            slot: None,
            offset: Some(offset),
            length: Some(length),
        }
    }
}

/// Externally supplied slots, keyed by variable or lock name.
pub type StorageLayoutOverride = BTreeMap<String, LayoutEntry>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageLayout {
    /// Lock key (without the prefix) to slot.
    pub locks: BTreeMap<String, u64>,
    pub storage: BTreeMap<String, LayoutEntry>,
    pub code: BTreeMap<String, LayoutEntry>,
}

impl StorageLayout {
    pub fn slot_of(&self, name: &str) -> Option<u64> {
        self.storage.get(name).and_then(|e| e.slot)
    }

    pub fn lock_slot(&self, key: &str) -> Option<u64> {
        self.locks.get(key).copied()
    }

    pub fn code_offset(&self, name: &str) -> Option<u64> {
        self.code.get(name).and_then(|e| e.offset)
    }

    /// Number of slots reserved ahead of the storage variables.
    pub fn reserved_prefix(&self) -> u64 {
        self.locks.len() as u64
    }

    pub fn to_json(&self) -> Value {
        let mut storage = serde_json::Map::new();
        for (key, slot) in &self.locks {
            storage.insert(
                format!("{}{}", LOCK_PREFIX, key),
                json!({ "type": LOCK_TYPE, "location": "storage", "slot": slot }),
            );
        }
        for (name, entry) in &self.storage {
            storage.insert(name.clone(), json!(entry));
        }
        json!({ "storage_layout": storage, "code_layout": self.code })
    }
}

fn collision(message: impl Into<String>, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorKind::Structure, message, span)
}

fn out_of_space(what: &str, name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::Overflow,
        format!("'{}' does not fit in the {} address space", name, what),
        span,
    )
}

/// Lock keys in first-seen order across the declared functions.
fn lock_keys(contract: &ContractInfo) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for name in &contract.function_order {
        let key = contract
            .functions
            .get(name)
            .and_then(|f| f.nonreentrant.as_ref());
        if let Some(key) = key {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

/// Assign slots and offsets, honoring `overrides` when given.
pub fn allocate(
    contract: &ContractInfo,
    overrides: Option<&StorageLayoutOverride>,
) -> Result<StorageLayout, Diagnostic> {
    let mut layout = StorageLayout::default();
    for (slot, key) in lock_keys(contract).into_iter().enumerate() {
        layout.locks.insert(key, slot as u64);
    }

    match overrides {
        None => {
            let mut next = layout.reserved_prefix();
            for name in &contract.storage_order {
                let Some(var) = contract.storage.get(name) else {
                    continue;
                };
                layout
                    .storage
                    .insert(name.clone(), LayoutEntry::storage(var.typ().to_string(), next));
                next = next
                    .checked_add(var.typ().size_in_words())
                    .ok_or_else(|| out_of_space("storage", name, var.span))?;
            }
            debug!(slots = next, "allocated storage sequentially");
        }
        Some(overrides) => apply_override(contract, overrides, &mut layout)?,
    }

    let mut offset = 0u64;
    for name in &contract.immutable_order {
        let Some(var) = contract.immutables.get(name) else {
            continue;
        };
        let size = var.typ().size_in_bytes();
        layout
            .code
            .insert(name.clone(), LayoutEntry::code(var.typ().to_string(), offset, size));
        offset = offset
            .checked_add(size)
            .ok_or_else(|| out_of_space("code", name, var.span))?;
    }
    Ok(layout)
}

fn apply_override(
    contract: &ContractInfo,
    overrides: &StorageLayoutOverride,
    layout: &mut StorageLayout,
) -> Result<(), Diagnostic> {
    let span_of = |name: &str| contract.span_of(name).unwrap_or_else(Span::dummy);
    let prefix = layout.reserved_prefix();

    for (name, entry) in overrides {
        if let Some(key) = name.strip_prefix(LOCK_PREFIX) {
            match layout.locks.get(key) {
                Some(slot) if entry.slot == Some(*slot) => continue,
                Some(slot) => {
                    return Err(collision(
                        format!(
                            "storage layout override moves lock '{}' away from its reserved slot {}",
                            key, slot
                        ),
                        Span::dummy(),
                    ))
                }
                None => {
                    return Err(collision(
                        format!("storage layout override names unknown lock '{}'", key),
                        Span::dummy(),
                    ))
                }
            }
        }
        if !contract.storage.contains_key(name) {
            return Err(collision(
                format!("storage layout override names unknown variable '{}'", name),
                Span::dummy(),
            ));
        }
    }

    let mut occupied: Vec<(u64, u64, &str)> = Vec::new();
    for name in &contract.storage_order {
        let Some(var) = contract.storage.get(name) else {
            continue;
        };
        let span = span_of(name);
        let entry = overrides.get(name).ok_or_else(|| {
            collision(
                format!("storage layout override does not place '{}'", name),
                span,
            )
        })?;
        let declared = var.typ().to_string();
        if entry.typ != declared {
            return Err(Diagnostic::error(
                ErrorKind::TypeMismatch,
                format!(
                    "storage layout override gives '{}' type {}, but it is declared as {}",
                    name, entry.typ, declared
                ),
                span,
            ));
        }
        if entry.location != "storage" {
            return Err(collision(
                format!(
                    "storage layout override places '{}' in {}, expected storage",
                    name, entry.location
                ),
                span,
            ));
        }
        let start = entry.slot.ok_or_else(|| {
            collision(
                format!("storage layout override for '{}' has no slot", name),
                span,
            )
        })?;
        let end = start.checked_add(var.typ().size_in_words()).ok_or_else(|| {
            collision(
                format!(
                    "storage collision: '{}' at slot {} runs past the last slot",
                    name, start
                ),
                span,
            )
        })?;
        if start < prefix {
            return Err(collision(
                format!(
                    "storage collision: '{}' at slot {} overlaps the reserved lock slots 0..{}",
                    name, start, prefix
                ),
                span,
            ));
        }
        if let Some((_, _, other)) = occupied.iter().find(|(s, e, _)| start < *e && *s < end) {
            return Err(collision(
                format!(
                    "storage collision: '{}' at slots {}..{} overlaps '{}'",
                    name, start, end, other
                ),
                span,
            ));
        }
        occupied.push((start, end, name));
        layout
            .storage
            .insert(name.clone(), LayoutEntry::storage(declared, start));
    }
    debug!(variables = occupied.len(), "applied storage layout override");
    Ok(())
}
