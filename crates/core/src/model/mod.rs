//! Declarative layout data model.
//!
//! These types describe a hand-maintained catalogue of struct layouts: field
//! offsets, vtable slots, and sizes. Snapshots are produced by an external
//! layout parser (or written by hand as JSON/YAML) and consumed by the drift
//! detector, the extractor, and the cross-verifier.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One version of the declared layout catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    /// Free-form version label (build number, date, game patch).
    pub version: String,
    /// SHA-256 of the binary this snapshot was authored against, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_hash: Option<String>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
}

/// A single declared struct (or class) layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    /// Single-inheritance base struct, by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub vfuncs: Vec<VirtualFunctionDef>,
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
}

/// A declared field. Unnamed fields (padding, unknown members) are keyed by
/// their offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub offset: u64,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, offset: u64) -> Self {
        Self { name: Some(name.into()), offset, type_name: None, size: None }
    }

    /// Builder-style helper to attach a type name and size.
    pub fn with_type(mut self, type_name: impl Into<String>, size: u64) -> Self {
        self.type_name = Some(type_name.into());
        self.size = Some(size);
        self
    }

    /// Name used to match this field across snapshots.
    pub fn key(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => synthetic_field_key(self.offset),
        }
    }
}

/// Key for a field that has no declared name.
pub fn synthetic_field_key(offset: u64) -> String {
    format!("field_0x{offset:x}")
}

/// A virtual function occupying a vtable slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFunctionDef {
    pub name: String,
    pub slot: u32,
}

/// A non-virtual member function, optionally pinned to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
}

/// Flattened `(struct, field, offset)` triple fed to signature extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredField {
    pub struct_name: String,
    pub field_name: String,
    pub offset: u64,
}

impl DeclaredField {
    pub fn new(struct_name: impl Into<String>, field_name: impl Into<String>, offset: u64) -> Self {
        Self { struct_name: struct_name.into(), field_name: field_name.into(), offset }
    }
}

impl StructDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_vfunc(mut self, name: impl Into<String>, slot: u32) -> Self {
        self.vfuncs.push(VirtualFunctionDef { name: name.into(), slot });
        self
    }

    /// Find a field by its matching key (declared name or synthetic offset key).
    pub fn field_by_key(&self, key: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.key() == key)
    }
}

impl LayoutSnapshot {
    pub fn new(version: impl Into<String>, structs: Vec<StructDef>) -> Self {
        Self { version: version.into(), binary_hash: None, structs }
    }

    pub fn struct_by_name(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.name == name)
    }

    /// Every declared field as an extraction input, in declaration order.
    pub fn declared_fields(&self) -> Vec<DeclaredField> {
        self.structs
            .iter()
            .flat_map(|s| {
                s.fields.iter().map(move |f| DeclaredField::new(&s.name, f.key(), f.offset))
            })
            .collect()
    }

    /// Resolve the root of the single-inheritance chain containing `name`.
    ///
    /// The walk stops at a struct with no base, at a base that is not declared
    /// in this snapshot, or when a cycle is detected.
    pub fn hierarchy_root(&self, name: &str) -> String {
        let mut current = name.to_string();
        let mut seen = HashSet::new();
        seen.insert(current.clone());
        while let Some(base) = self.struct_by_name(&current).and_then(|s| s.base.clone()) {
            if self.struct_by_name(&base).is_none() || !seen.insert(base.clone()) {
                break;
            }
            current = base;
        }
        current
    }
}
