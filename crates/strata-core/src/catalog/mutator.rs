//! The schema mutation interface migrations execute against.

use super::collection::CollectionDef;
use super::field::FieldDef;
use thiserror::Error;

/// Failures reported by a schema mutation call.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// No collection with the given name.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// The missing collection name.
        name: String,
    },

    /// A collection with the given name already exists.
    #[error("collection already exists: {name}")]
    CollectionExists {
        /// The conflicting collection name.
        name: String,
    },

    /// No field with the given name on the collection.
    #[error("field not found: {collection}.{field}")]
    FieldNotFound {
        /// The collection that was searched.
        collection: String,
        /// The missing field name.
        field: String,
    },

    /// A field with the given name already exists on the collection.
    #[error("duplicate field: {collection}.{field}")]
    DuplicateField {
        /// The collection holding the conflict.
        collection: String,
        /// The conflicting field name.
        field: String,
    },

    /// A relation field references a collection that does not exist.
    #[error("relation field {field} targets unknown collection {target}")]
    UnknownRelationTarget {
        /// The relation field name.
        field: String,
        /// The missing target collection.
        target: String,
    },

    /// A collection cannot be dropped while relation fields reference it.
    #[error("collection {name} is still referenced by {referrer}")]
    CollectionInUse {
        /// The collection being dropped.
        name: String,
        /// A collection holding a relation field that targets it.
        referrer: String,
    },

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

/// Schema mutation operations.
///
/// Migration actions receive this handle explicitly; nothing in the engine
/// reaches for a global store. Each call either mutates the store and returns
/// success, or leaves it untouched and returns a descriptive failure.
pub trait SchemaMutator {
    /// Create a new collection. The name must be unused.
    fn create_collection(&mut self, collection: CollectionDef) -> Result<(), SchemaError>;

    /// Remove a collection and its field definitions.
    fn drop_collection(&mut self, name: &str) -> Result<(), SchemaError>;

    /// Rename a collection. The new name must be unused.
    fn rename_collection(&mut self, from: &str, to: &str) -> Result<(), SchemaError>;

    /// Add a field to an existing collection. Relation fields must target an
    /// existing collection.
    fn add_field(&mut self, collection: &str, field: FieldDef) -> Result<(), SchemaError>;

    /// Remove a field from a collection.
    fn remove_field(&mut self, collection: &str, field: &str) -> Result<(), SchemaError>;

    /// Rename a field on a collection. The new name must be unused there.
    fn rename_field(&mut self, collection: &str, from: &str, to: &str)
        -> Result<(), SchemaError>;
}
