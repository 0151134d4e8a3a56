//! Schema upgrade planning.
//!
//! Engines record which collections and indexes already exist. When a
//! database is opened at a version above the stored one, [`plan_upgrade`]
//! compares that record with the requested [`DatabaseSchema`] and lists only
//! what is missing, which makes re-running an upgrade against a partially or
//! fully upgraded database harmless.

use std::collections::HashMap;

use essaybook_core::{CollectionSchema, DatabaseSchema, IndexDef};

use crate::error::StoreError;

/// What the upgrade step has to create.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpgradePlan {
    /// Collections absent from the database, created with all their indexes.
    pub new_collections: Vec<CollectionSchema>,
    /// Indexes absent from collections that already exist, as
    /// `(collection name, index)`. These must be back-filled.
    pub new_indexes: Vec<(String, IndexDef)>,
}

impl UpgradePlan {
    /// Whether the database already matches the schema.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_collections.is_empty() && self.new_indexes.is_empty()
    }
}

/// Outcome of comparing stored and requested versions.
#[derive(Debug, PartialEq, Eq)]
pub enum VersionCheck {
    /// Versions match; nothing to do.
    Current,
    /// Stored version is older; run the upgrade.
    Upgrade,
}

/// Compares the stored version with the requested one.
///
/// # Errors
///
/// Returns [`StoreError::VersionDowngrade`] if the database on disk was
/// written by a newer schema.
pub fn check_version(name: &str, stored: u32, requested: u32) -> Result<VersionCheck, StoreError> {
    match stored.cmp(&requested) {
        std::cmp::Ordering::Equal => Ok(VersionCheck::Current),
        std::cmp::Ordering::Less => Ok(VersionCheck::Upgrade),
        std::cmp::Ordering::Greater => Err(StoreError::VersionDowngrade {
            name: name.to_string(),
            stored,
            requested,
        }),
    }
}

/// Lists the collections and indexes `target` declares that `existing` lacks.
#[must_use]
pub fn plan_upgrade(
    existing: &HashMap<String, CollectionSchema>,
    target: &DatabaseSchema,
) -> UpgradePlan {
    let mut plan = UpgradePlan::default();

    for collection in &target.collections {
        match existing.get(&collection.name) {
            None => plan.new_collections.push(collection.clone()),
            Some(current) => {
                for index in &collection.indexes {
                    if current.index(&index.name).is_none() {
                        plan.new_indexes
                            .push((collection.name.clone(), index.clone()));
                    }
                }
            }
        }
    }

    plan
}

/// Validates a schema before any engine touches storage.
///
/// # Errors
///
/// Returns [`StoreError::InvalidSchema`] listing every problem found.
pub fn validate_schema(schema: &DatabaseSchema) -> Result<(), StoreError> {
    match schema.validate() {
        essaybook_core::ValidationResult::Valid => Ok(()),
        essaybook_core::ValidationResult::Invalid { errors } => {
            Err(StoreError::InvalidSchema { errors })
        }
    }
}
