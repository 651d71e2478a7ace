//! The migration set shipped with this binary.
//!
//! One entry per schema change of the recipe store, ordered by the sequence
//! number stamped when the change was authored. New migrations go at the end
//! with a fresh sequence number; never edit an entry that may already be
//! applied somewhere.

use strata_core::catalog::{CollectionDef, FieldDef, FieldType};
use strata_core::migration::{MigrationError, MigrationId, MigrationRecord, MigrationRegistry};

/// Build the registry of all known migrations.
pub fn registry() -> Result<MigrationRegistry, MigrationError> {
    MigrationRegistry::build([
        MigrationRecord::new(
            MigrationId::new(1740324151, "create_measurements"),
            |store| {
                store.create_collection(
                    CollectionDef::new("measurements")
                        .with_field(FieldDef::new("name", FieldType::Text)),
                )
            },
            |store| store.drop_collection("measurements"),
        ),
        MigrationRecord::new(
            MigrationId::new(1740324512, "create_ingredients"),
            |store| {
                store.create_collection(
                    CollectionDef::new("ingredients")
                        .with_field(FieldDef::new("name", FieldType::Text))
                        .with_field(FieldDef::optional(
                            "measurement_id",
                            FieldType::relation("measurements"),
                        )),
                )
            },
            |store| store.drop_collection("ingredients"),
        ),
        MigrationRecord::new(
            MigrationId::new(1740324710, "create_recipes"),
            |store| {
                store.create_collection(
                    CollectionDef::new("recipes")
                        .with_field(FieldDef::new("title", FieldType::Text))
                        .with_field(FieldDef::optional("instructions", FieldType::Text))
                        .with_field(FieldDef::optional("servings", FieldType::Number)),
                )
            },
            |store| store.drop_collection("recipes"),
        ),
        MigrationRecord::new(
            MigrationId::new(1740346810, "link_recipes_to_ingredients"),
            |store| {
                store.add_field(
                    "recipes",
                    FieldDef::optional(
                        "ingredient_ids",
                        FieldType::relation_many("ingredients", 0, None),
                    ),
                )
            },
            |store| store.remove_field("recipes", "ingredient_ids"),
        ),
        // The typo shipped; migration 1740864218 corrects it.
        MigrationRecord::new(
            MigrationId::new(1740860836, "create_ingredient_cateogry"),
            |store| {
                store.create_collection(
                    CollectionDef::new("ingredient_cateogry")
                        .with_field(FieldDef::new("name", FieldType::Text)),
                )
            },
            |store| store.drop_collection("ingredient_cateogry"),
        ),
        MigrationRecord::new(
            MigrationId::new(1740864075, "localize_measurement_names"),
            |store| {
                store.rename_field("measurements", "name", "name_en")?;
                store.add_field(
                    "measurements",
                    FieldDef::optional("name_de", FieldType::Text),
                )
            },
            |store| {
                store.remove_field("measurements", "name_de")?;
                store.rename_field("measurements", "name_en", "name")
            },
        ),
        MigrationRecord::new(
            MigrationId::new(1740864176, "localize_ingredient_names"),
            |store| {
                store.rename_field("ingredients", "name", "name_en")?;
                store.add_field(
                    "ingredients",
                    FieldDef::optional("name_de", FieldType::Text),
                )
            },
            |store| {
                store.remove_field("ingredients", "name_de")?;
                store.rename_field("ingredients", "name_en", "name")
            },
        ),
        MigrationRecord::new(
            MigrationId::new(1740864218, "fix_category_typo"),
            |store| store.rename_collection("ingredient_cateogry", "ingredients_categories"),
            |store| store.rename_collection("ingredients_categories", "ingredient_cateogry"),
        ),
        MigrationRecord::new(
            MigrationId::new(1740907510, "link_ingredients_to_categories"),
            |store| {
                store.add_field(
                    "ingredients",
                    FieldDef::optional("category_id", FieldType::relation("ingredients_categories")),
                )
            },
            |store| store.remove_field("ingredients", "category_id"),
        ),
        MigrationRecord::new(
            MigrationId::new(1740907532, "rename_categories_master"),
            |store| {
                store.rename_collection("ingredients_categories", "ingredients_categories_master")
            },
            |store| {
                store.rename_collection("ingredients_categories_master", "ingredients_categories")
            },
        ),
        MigrationRecord::new(
            MigrationId::new(1741024684, "create_recipes_categories_master"),
            |store| {
                store.create_collection(
                    CollectionDef::new("recipes_categories_master")
                        .with_field(FieldDef::new("name_en", FieldType::Text))
                        .with_field(FieldDef::optional("name_de", FieldType::Text)),
                )
            },
            |store| store.drop_collection("recipes_categories_master"),
        ),
        MigrationRecord::new(
            MigrationId::new(1741028464, "add_recipe_category"),
            |store| {
                store.add_field(
                    "recipes",
                    FieldDef::optional(
                        "recipe_category_id",
                        FieldType::relation("recipes_categories_master"),
                    ),
                )
            },
            |store| store.remove_field("recipes", "recipe_category_id"),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::catalog::Catalog;
    use strata_core::migration::{
        AppliedLedger, MigrationRunner, RunnerConfig, SledLedger,
    };

    #[test]
    fn test_registry_builds() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 12);
    }

    #[test]
    fn test_full_sequence_applies_and_reverses() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let mut runner = MigrationRunner::new(
            registry().unwrap(),
            Catalog::open(&db).unwrap(),
            SledLedger::open(&db).unwrap(),
            RunnerConfig::default(),
        );

        let report = runner.apply_all().unwrap();
        assert_eq!(report.completed.len(), 12);

        let catalog = runner.store();
        assert_eq!(
            catalog.collection_names(),
            vec![
                "ingredients",
                "ingredients_categories_master",
                "measurements",
                "recipes",
                "recipes_categories_master",
            ]
        );

        let ingredients = catalog.get_collection("ingredients").unwrap();
        assert!(ingredients.has_field("name_en"));
        assert!(ingredients.has_field("name_de"));
        let category = ingredients.get_field("category_id").unwrap();
        assert_eq!(
            category.field_type.relation_target(),
            Some("ingredients_categories_master")
        );

        // Every down action is a true inverse: a full rollback leaves an
        // empty store and an empty ledger.
        let report = runner.rollback(usize::MAX).unwrap();
        assert_eq!(report.completed.len(), 12);
        assert!(runner.store().is_empty());
        assert!(runner.ledger().list_applied().unwrap().is_empty());
    }
}
