//! Sled-backed catalog implementing the schema mutation interface.

use super::collection::CollectionDef;
use super::field::FieldDef;
use super::mutator::{SchemaError, SchemaMutator};
use crate::error::Error;
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::collections::BTreeMap;

/// Tree name for collection definitions.
const COLLECTIONS_TREE: &str = "catalog:collections";

/// The catalog: the store's current schema, one persisted definition per
/// collection, with an in-memory cache for reads.
///
/// All mutations go through [`SchemaMutator`]; the cache and the sled tree
/// are updated together, cache last, so readers never observe a definition
/// that was not durably written.
pub struct Catalog {
    tree: Tree,
    cache: RwLock<BTreeMap<String, CollectionDef>>,
}

impl Catalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let tree = db.open_tree(COLLECTIONS_TREE)?;

        let mut cache = BTreeMap::new();
        for result in tree.iter() {
            let (_, value) = result?;
            let def = CollectionDef::from_bytes(&value)?;
            cache.insert(def.name.clone(), def);
        }

        Ok(Self {
            tree,
            cache: RwLock::new(cache),
        })
    }

    /// Get a collection definition by name.
    pub fn get_collection(&self, name: &str) -> Option<CollectionDef> {
        self.cache.read().get(name).cloned()
    }

    /// List all collection names, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        self.cache.read().keys().cloned().collect()
    }

    /// Number of collections.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Check if the catalog holds no collections.
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }

    fn persist(&self, def: &CollectionDef) -> Result<(), SchemaError> {
        let value = def.to_bytes().map_err(SchemaError::Storage)?;
        self.tree
            .insert(def.name.as_bytes(), value)
            .map_err(|e| SchemaError::Storage(Error::Storage(e)))?;
        Ok(())
    }

    fn erase(&self, name: &str) -> Result<(), SchemaError> {
        self.tree
            .remove(name.as_bytes())
            .map_err(|e| SchemaError::Storage(Error::Storage(e)))?;
        Ok(())
    }

    /// Validate that a relation field targets a known collection.
    ///
    /// `defining` is the collection the field is being added to; a
    /// self-relation is allowed before the definition lands in the cache.
    fn check_relation_target(
        cache: &BTreeMap<String, CollectionDef>,
        defining: &str,
        field: &FieldDef,
    ) -> Result<(), SchemaError> {
        if let Some(target) = field.field_type.relation_target() {
            if target != defining && !cache.contains_key(target) {
                return Err(SchemaError::UnknownRelationTarget {
                    field: field.name.clone(),
                    target: target.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl SchemaMutator for Catalog {
    fn create_collection(&mut self, collection: CollectionDef) -> Result<(), SchemaError> {
        let mut cache = self.cache.write();
        if cache.contains_key(&collection.name) {
            return Err(SchemaError::CollectionExists {
                name: collection.name,
            });
        }
        for field in &collection.fields {
            Self::check_relation_target(&cache, &collection.name, field)?;
        }

        self.persist(&collection)?;
        cache.insert(collection.name.clone(), collection);
        Ok(())
    }

    fn drop_collection(&mut self, name: &str) -> Result<(), SchemaError> {
        let mut cache = self.cache.write();
        if !cache.contains_key(name) {
            return Err(SchemaError::CollectionNotFound {
                name: name.to_string(),
            });
        }
        // Refuse while relation fields elsewhere still target it.
        for def in cache.values() {
            if def.name == name {
                continue;
            }
            if def
                .relation_fields()
                .any(|f| f.field_type.relation_target() == Some(name))
            {
                return Err(SchemaError::CollectionInUse {
                    name: name.to_string(),
                    referrer: def.name.clone(),
                });
            }
        }

        self.erase(name)?;
        cache.remove(name);
        Ok(())
    }

    fn rename_collection(&mut self, from: &str, to: &str) -> Result<(), SchemaError> {
        let mut cache = self.cache.write();
        if cache.contains_key(to) {
            return Err(SchemaError::CollectionExists {
                name: to.to_string(),
            });
        }
        let mut def = match cache.remove(from) {
            Some(def) => def,
            None => {
                return Err(SchemaError::CollectionNotFound {
                    name: from.to_string(),
                })
            }
        };
        def.name = to.to_string();

        // Relation fields across the catalog follow the rename.
        let mut touched = vec![def];
        for other in cache.values() {
            let mut updated = other.clone();
            let mut changed = false;
            for field in &mut updated.fields {
                if let super::FieldType::Relation { target, .. } = &mut field.field_type {
                    if target == from {
                        *target = to.to_string();
                        changed = true;
                    }
                }
            }
            if changed {
                touched.push(updated);
            }
        }

        for def in &touched {
            self.persist(def)?;
        }
        self.erase(from)?;
        for def in touched {
            cache.insert(def.name.clone(), def);
        }
        Ok(())
    }

    fn add_field(&mut self, collection: &str, field: FieldDef) -> Result<(), SchemaError> {
        let mut cache = self.cache.write();
        let def = cache
            .get(collection)
            .ok_or_else(|| SchemaError::CollectionNotFound {
                name: collection.to_string(),
            })?;
        if def.has_field(&field.name) {
            return Err(SchemaError::DuplicateField {
                collection: collection.to_string(),
                field: field.name,
            });
        }
        Self::check_relation_target(&cache, collection, &field)?;

        let mut updated = def.clone();
        updated.fields.push(field);
        self.persist(&updated)?;
        cache.insert(updated.name.clone(), updated);
        Ok(())
    }

    fn remove_field(&mut self, collection: &str, field: &str) -> Result<(), SchemaError> {
        let mut cache = self.cache.write();
        let def = cache
            .get(collection)
            .ok_or_else(|| SchemaError::CollectionNotFound {
                name: collection.to_string(),
            })?;
        if !def.has_field(field) {
            return Err(SchemaError::FieldNotFound {
                collection: collection.to_string(),
                field: field.to_string(),
            });
        }

        let mut updated = def.clone();
        updated.fields.retain(|f| f.name != field);
        self.persist(&updated)?;
        cache.insert(updated.name.clone(), updated);
        Ok(())
    }

    fn rename_field(
        &mut self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<(), SchemaError> {
        let mut cache = self.cache.write();
        let def = cache
            .get(collection)
            .ok_or_else(|| SchemaError::CollectionNotFound {
                name: collection.to_string(),
            })?;
        if !def.has_field(from) {
            return Err(SchemaError::FieldNotFound {
                collection: collection.to_string(),
                field: from.to_string(),
            });
        }
        if def.has_field(to) {
            return Err(SchemaError::DuplicateField {
                collection: collection.to_string(),
                field: to.to_string(),
            });
        }

        let mut updated = def.clone();
        for f in &mut updated.fields {
            if f.name == from {
                f.name = to.to_string();
            }
        }
        self.persist(&updated)?;
        cache.insert(updated.name.clone(), updated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn measurements() -> CollectionDef {
        CollectionDef::new("measurements").with_field(FieldDef::new("name_en", FieldType::Text))
    }

    fn ingredients() -> CollectionDef {
        CollectionDef::new("ingredients")
            .with_field(FieldDef::new("name_en", FieldType::Text))
            .with_field(FieldDef::optional(
                "measurement_id",
                FieldType::relation("measurements"),
            ))
    }

    #[test]
    fn test_create_and_get() {
        let db = test_db();
        let mut catalog = Catalog::open(&db).unwrap();

        catalog.create_collection(measurements()).unwrap();
        catalog.create_collection(ingredients()).unwrap();

        assert_eq!(catalog.len(), 2);
        let def = catalog.get_collection("ingredients").unwrap();
        assert!(def.has_field("measurement_id"));
    }

    #[test]
    fn test_create_duplicate() {
        let db = test_db();
        let mut catalog = Catalog::open(&db).unwrap();

        catalog.create_collection(measurements()).unwrap();
        let err = catalog.create_collection(measurements()).unwrap_err();
        assert!(matches!(err, SchemaError::CollectionExists { .. }));
    }

    #[test]
    fn test_relation_target_must_exist() {
        let db = test_db();
        let mut catalog = Catalog::open(&db).unwrap();

        let err = catalog.create_collection(ingredients()).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRelationTarget { .. }));

        catalog.create_collection(measurements()).unwrap();
        catalog.create_collection(ingredients()).unwrap();

        let err = catalog
            .add_field("ingredients", FieldDef::optional("bad", FieldType::relation("nowhere")))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRelationTarget { .. }));
    }

    #[test]
    fn test_drop_refused_while_referenced() {
        let db = test_db();
        let mut catalog = Catalog::open(&db).unwrap();
        catalog.create_collection(measurements()).unwrap();
        catalog.create_collection(ingredients()).unwrap();

        let err = catalog.drop_collection("measurements").unwrap_err();
        assert!(matches!(err, SchemaError::CollectionInUse { .. }));

        catalog
            .remove_field("ingredients", "measurement_id")
            .unwrap();
        catalog.drop_collection("measurements").unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_rename_collection_updates_relations() {
        let db = test_db();
        let mut catalog = Catalog::open(&db).unwrap();
        catalog.create_collection(measurements()).unwrap();
        catalog.create_collection(ingredients()).unwrap();

        catalog
            .rename_collection("measurements", "measurements_master")
            .unwrap();

        assert!(catalog.get_collection("measurements").is_none());
        assert!(catalog.get_collection("measurements_master").is_some());

        let def = catalog.get_collection("ingredients").unwrap();
        let field = def.get_field("measurement_id").unwrap();
        assert_eq!(
            field.field_type.relation_target(),
            Some("measurements_master")
        );
    }

    #[test]
    fn test_field_mutations() {
        let db = test_db();
        let mut catalog = Catalog::open(&db).unwrap();
        catalog.create_collection(measurements()).unwrap();

        catalog
            .add_field("measurements", FieldDef::optional("name_de", FieldType::Text))
            .unwrap();
        let err = catalog
            .add_field("measurements", FieldDef::optional("name_de", FieldType::Text))
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));

        catalog
            .rename_field("measurements", "name_de", "label_de")
            .unwrap();
        let def = catalog.get_collection("measurements").unwrap();
        assert!(def.has_field("label_de"));
        assert!(!def.has_field("name_de"));

        let err = catalog
            .remove_field("measurements", "name_de")
            .unwrap_err();
        assert!(matches!(err, SchemaError::FieldNotFound { .. }));
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let config = sled::Config::new().path(dir.path());

        {
            let db = config.clone().open().unwrap();
            let mut catalog = Catalog::open(&db).unwrap();
            catalog.create_collection(measurements()).unwrap();
            catalog.flush().unwrap();
        }

        {
            let db = config.open().unwrap();
            let catalog = Catalog::open(&db).unwrap();
            assert_eq!(catalog.collection_names(), vec!["measurements"]);
        }
    }
}
