//! Schema catalog: collection/field descriptors and the mutation interface.

mod catalog;
mod collection;
mod field;
mod mutator;
mod types;

pub use catalog::Catalog;
pub use collection::CollectionDef;
pub use field::FieldDef;
pub use mutator::{SchemaError, SchemaMutator};
pub use types::FieldType;
