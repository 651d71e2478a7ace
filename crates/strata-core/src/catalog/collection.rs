//! Collection definitions.

use super::field::FieldDef;
use rkyv::{Archive, Deserialize, Serialize};

/// A collection definition (named group of typed fields).
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct CollectionDef {
    /// Collection name (unique within the store).
    pub name: String,
    /// Field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
}

impl CollectionDef {
    /// Create a new empty collection definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field to the collection.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check if a field with the given name exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// Iterate over the relation fields of this collection.
    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_relation())
    }

    /// Serialize the definition to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::error::Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| crate::error::Error::Serialization(e.to_string()))
    }

    /// Deserialize a definition from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::error::Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| crate::error::Error::Deserialization(e.to_string()))
    }
}
