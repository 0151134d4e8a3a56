//! Database, collection, and index definitions.
//!
//! A [`DatabaseSchema`] names a database, pins its integer version, and lists
//! the collections the upgrade step must guarantee exist. Opening a database
//! at a higher version than the one stored on disk runs the upgrade, which
//! creates whatever collections and indexes are missing and leaves existing
//! ones alone.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Name of the evaluations collection.
pub const EVALUATIONS: &str = "evaluations";
/// Name of the API-key collection.
pub const API_KEYS: &str = "api_keys";

/// Name of the essay-evaluation database.
pub const DB_NAME: &str = "essay_evaluations";
/// Current schema version of the essay-evaluation database.
pub const DB_VERSION: u32 = 2;

/// Secondary index over one field of a collection's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name, unique within its collection.
    pub name: String,
    /// Top-level record field the index reads its value from.
    pub key_path: String,
    /// Whether two records may share an index value.
    pub unique: bool,
}

impl IndexDef {
    /// Non-unique index named after the field it covers.
    #[must_use]
    pub fn on(field: &str) -> Self {
        Self {
            name: field.to_string(),
            key_path: field.to_string(),
            unique: false,
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A named group of records sharing a key path and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name, unique within the database.
    pub name: String,
    /// Top-level record field holding the primary key.
    pub key_path: String,
    /// Whether the store assigns integer keys when the record has none.
    pub auto_increment: bool,
    /// Secondary indexes.
    pub indexes: Vec<IndexDef>,
}

impl CollectionSchema {
    /// Collection whose records carry their own key under `key_path`.
    #[must_use]
    pub fn keyed(name: &str, key_path: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.to_string(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Collection whose integer keys are assigned by the store.
    #[must_use]
    pub fn auto_increment(name: &str, key_path: &str) -> Self {
        Self {
            auto_increment: true,
            ..Self::keyed(name, key_path)
        }
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Result of validating a schema definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The schema is well-formed.
    Valid,
    /// The schema violates one or more constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    /// Whether validation passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Versioned definition of a whole database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Database name. On-disk engines derive the file name from it.
    pub name: String,
    /// Schema version. Raising it triggers the upgrade step once.
    pub version: u32,
    /// Collections the upgrade step guarantees exist.
    pub collections: Vec<CollectionSchema>,
}

impl DatabaseSchema {
    /// Empty schema at the given version.
    #[must_use]
    pub fn new(name: &str, version: u32) -> Self {
        Self {
            name: name.to_string(),
            version,
            collections: Vec::new(),
        }
    }

    /// Adds a collection.
    #[must_use]
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.collections.push(collection);
        self
    }

    /// The essay-evaluation database: evaluations (auto-increment, indexed by
    /// creation time, student name, and class) and API keys (caller-keyed,
    /// indexed by creation time).
    #[must_use]
    pub fn essay_evaluations() -> Self {
        Self::new(DB_NAME, DB_VERSION)
            .with_collection(
                CollectionSchema::auto_increment(EVALUATIONS, "id")
                    .with_index(IndexDef::on("student_name"))
                    .with_index(IndexDef::on("student_class"))
                    .with_index(IndexDef::on("created_at")),
            )
            .with_collection(
                CollectionSchema::keyed(API_KEYS, "id").with_index(IndexDef::on("created_at")),
            )
    }

    /// Looks up a collection by name.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Checks names, key paths, and version for structural problems.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("database name is empty".to_string());
        }
        if self.version == 0 {
            errors.push("schema version must be at least 1".to_string());
        }

        let mut seen = HashSet::new();
        for collection in &self.collections {
            if collection.name.is_empty() {
                errors.push("collection name is empty".to_string());
            } else if collection.name.contains('/') {
                errors.push(format!(
                    "collection name '{}' must not contain '/'",
                    collection.name
                ));
            } else if collection.name.starts_with("__") {
                errors.push(format!(
                    "collection name '{}' is reserved",
                    collection.name
                ));
            }
            if !seen.insert(collection.name.as_str()) {
                errors.push(format!("duplicate collection '{}'", collection.name));
            }
            if collection.key_path.is_empty() {
                errors.push(format!("collection '{}' has an empty key path", collection.name));
            }

            let mut index_names = HashSet::new();
            for index in &collection.indexes {
                if index.name.is_empty() || index.key_path.is_empty() {
                    errors.push(format!(
                        "collection '{}' has an index with an empty name or key path",
                        collection.name
                    ));
                }
                if !index_names.insert(index.name.as_str()) {
                    errors.push(format!(
                        "duplicate index '{}' on collection '{}'",
                        index.name, collection.name
                    ));
                }
            }
        }

        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }
}

impl Default for DatabaseSchema {
    fn default() -> Self {
        Self::essay_evaluations()
    }
}
