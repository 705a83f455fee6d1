// src/schema/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column type of a loaded table. Every CSV column is loaded as text.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Eq, Hash)]
pub enum FieldType {
    /// Serialized as the warehouse's `STRING` type.
    #[serde(rename = "STRING")]
    Text,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "STRING",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column definition as derived from a CSV header.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

impl Field {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Text,
        }
    }
}

/// Ordered column list, index-aligned with the header row it came from.
///
/// Serializes to the `{"fields": [...]}` shape the tables API expects.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}
