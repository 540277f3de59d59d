use alloy_primitives::{keccak256, B256};
use std::collections::BTreeSet;

use super::namespace::Namespace;
use super::types::{abi_param, type_from_annotation, Type};
use crate::ast::EventDecl;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::Span;

/// Maximum number of indexed fields; topic0 is always the event id.
pub const MAX_INDEXED: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventField {
    pub name: String,
    pub typ: Type,
    pub indexed: bool,
}

#[derive(Clone, Debug)]
pub struct EventDef {
    pub name: String,
    pub fields: Vec<EventField>,
    pub span: Span,
}

impl EventDef {
    pub fn from_decl(decl: &EventDecl, ns: &Namespace) -> Result<Self, Diagnostic> {
        let mut seen = BTreeSet::new();
        let mut fields = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            if !seen.insert(field.name.node.as_str()) {
                return Err(Diagnostic::error(
                    ErrorKind::Namespace,
                    format!("event member '{}' is declared twice", field.name.node),
                    field.name.span,
                ));
            }
            let typ = type_from_annotation(&field.annotation, ns)?;
            if typ.contains_hashmap() {
                return Err(Diagnostic::error(
                    ErrorKind::Structure,
                    "HashMap cannot be an event member",
                    field.annotation.span,
                ));
            }
            if field.indexed && typ.is_bytestring() && typ.capacity().unwrap_or(0) > 32 {
                return Err(Diagnostic::error(
                    ErrorKind::TypeMismatch,
                    format!("indexed event member '{}' cannot exceed 32 bytes", field.name.node),
                    field.annotation.span,
                ));
            }
            fields.push(EventField {
                name: field.name.node.clone(),
                typ,
                indexed: field.indexed,
            });
        }
        let indexed = fields.iter().filter(|f| f.indexed).count();
        if indexed > MAX_INDEXED {
            return Err(Diagnostic::error(
                ErrorKind::Structure,
                format!(
                    "event '{}' has {} indexed members, at most {} are allowed",
                    decl.name.node, indexed, MAX_INDEXED
                ),
                decl.name.span,
            ));
        }
        Ok(Self {
            name: decl.name.node.clone(),
            fields,
            span: decl.name.span,
        })
    }

    /// `Transfer(address,address,uint256)`
    pub fn signature(&self) -> String {
        let parts: Vec<String> = self.fields.iter().map(|f| f.typ.canonical()).collect();
        format!("{}({})", self.name, parts.join(","))
    }

    /// topic0: keccak256 of the signature.
    pub fn event_id(&self) -> B256 {
        keccak256(self.signature().as_bytes())
    }

    pub fn indexed(&self) -> impl Iterator<Item = &EventField> {
        self.fields.iter().filter(|f| f.indexed)
    }

    pub fn data_fields(&self) -> impl Iterator<Item = &EventField> {
        self.fields.iter().filter(|f| !f.indexed)
    }

    pub fn to_abi(&self) -> serde_json::Value {
        let inputs: Vec<serde_json::Value> = self
            .fields
            .iter()
            .map(|f| {
                let mut param = abi_param(&f.name, &f.typ);
                param["indexed"] = serde_json::Value::Bool(f.indexed);
                param
            })
            .collect();
        serde_json::json!({
            "type": "event",
            "name": self.name,
            "inputs": inputs,
            "anonymous": false,
        })
    }
}
