//! Field definitions for collections.

use super::types::FieldType;
use rkyv::{Archive, Deserialize, Serialize};

/// A field definition within a collection.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name (unique within its collection).
    pub name: String,
    /// Field data type.
    pub field_type: FieldType,
    /// Whether a value is required on every record.
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create an optional field (required = false).
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Check if this field references another collection.
    pub fn is_relation(&self) -> bool {
        self.field_type.is_relation()
    }
}
