//! Field type tags for the catalog.

use rkyv::{Archive, Deserialize, Serialize};

/// The type of a field on a collection.
///
/// Relation fields carry their constraints inline: the target collection and
/// the selection cardinality bounds.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum FieldType {
    /// UTF-8 text.
    Text,
    /// 64-bit floating point number.
    Number,
    /// Boolean value.
    Bool,
    /// Timestamp (microseconds since Unix epoch).
    Date,
    /// Arbitrary JSON payload.
    Json,
    /// Reference to records of another collection.
    Relation {
        /// Name of the target collection.
        target: String,
        /// Minimum number of referenced records.
        min_select: u32,
        /// Maximum number of referenced records (`None` = unbounded).
        max_select: Option<u32>,
    },
}

impl FieldType {
    /// Create a single-valued relation to the given collection.
    pub fn relation(target: impl Into<String>) -> Self {
        FieldType::Relation {
            target: target.into(),
            min_select: 0,
            max_select: Some(1),
        }
    }

    /// Create a multi-valued relation with explicit cardinality bounds.
    pub fn relation_many(
        target: impl Into<String>,
        min_select: u32,
        max_select: Option<u32>,
    ) -> Self {
        FieldType::Relation {
            target: target.into(),
            min_select,
            max_select,
        }
    }

    /// Check if this is a relation type.
    pub fn is_relation(&self) -> bool {
        matches!(self, FieldType::Relation { .. })
    }

    /// Get the target collection name if this is a relation.
    pub fn relation_target(&self) -> Option<&str> {
        match self {
            FieldType::Relation { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Short tag for display ("text", "relation", ...).
    pub fn tag(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Json => "json",
            FieldType::Relation { .. } => "relation",
        }
    }
}
