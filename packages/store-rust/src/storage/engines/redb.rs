//! Redb-backed [`StorageEngine`] implementation.
//!
//! One redb file holds one database.
//!
//! # Layout
//!
//! ```text
//! __meta:             "version"              -> u64 schema version
//!                     "<collection>/next_key" -> u64 key generator
//! __collections:      collection name        -> CollectionSchema (MsgPack)
//! <collection>:       encoded primary key    -> document (MsgPack)
//! <collection>/<idx>: encoded index value    => encoded primary keys (multimap)
//! ```
//!
//! Keys use [`RecordKey::encode`], so redb's byte order is key order and a
//! full scan of a multimap index yields records by `(value, primary key)`.
//! Every operation runs in a single redb transaction; a write that fails
//! part-way is rolled back when its transaction is dropped uncommitted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use essaybook_core::{CollectionSchema, DatabaseSchema, IndexDef, RecordKey};
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata, TableDefinition, WriteTransaction,
};

use crate::error::StoreError;
use crate::storage::engine::{StorageEngine, WriteMode};
use crate::storage::record::{
    decode_body, encode_body, index_value, resolve_key, Document, FIRST_GENERATED_KEY,
};
use crate::storage::upgrade::{check_version, plan_upgrade, validate_schema, VersionCheck};

const META: TableDefinition<&str, u64> = TableDefinition::new("__meta");
const REGISTRY: TableDefinition<&str, &[u8]> = TableDefinition::new("__collections");
const VERSION_KEY: &str = "version";

fn data_table(collection: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(collection)
}

fn index_table(name: &str) -> MultimapTableDefinition<'_, &'static [u8], &'static [u8]> {
    MultimapTableDefinition::new(name)
}

fn index_table_name(collection: &str, index: &str) -> String {
    format!("{collection}/{index}")
}

fn counter_key(collection: &str) -> String {
    format!("{collection}/next_key")
}

/// On-disk storage engine backed by a redb database file.
pub struct RedbStorage {
    db: Database,
    path: PathBuf,
    name: String,
    version: u32,
    collections: HashMap<String, CollectionSchema>,
}

impl RedbStorage {
    /// Opens (creating if needed) the database file at `path` and upgrades it
    /// to `schema`.
    ///
    /// # Errors
    ///
    /// Returns a connection-class error if the schema is malformed, the file
    /// cannot be opened or is locked by another process, the file holds a
    /// newer schema version, or the upgrade cannot complete.
    pub fn open(path: &Path, schema: &DatabaseSchema) -> Result<Self, StoreError> {
        validate_schema(schema)?;

        let connection_error = |reason: String| StoreError::Connection {
            name: schema.name.clone(),
            reason,
        };

        let db = Database::create(path).map_err(|e| connection_error(e.to_string()))?;
        let (version, collections) = Self::upgrade(&db, schema).map_err(|e| match e {
            StoreError::Engine(reason) | StoreError::Serialization(reason) => {
                connection_error(reason)
            }
            err @ StoreError::Constraint { .. } => connection_error(err.to_string()),
            other => other,
        })?;

        tracing::debug!(
            database = %schema.name,
            path = %path.display(),
            version,
            collections = collections.len(),
            "opened redb database"
        );

        Ok(Self {
            db,
            path: path.to_path_buf(),
            name: schema.name.clone(),
            version,
            collections,
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the version check and, if needed, the upgrade, in one transaction.
    fn upgrade(
        db: &Database,
        schema: &DatabaseSchema,
    ) -> Result<(u32, HashMap<String, CollectionSchema>), StoreError> {
        let txn = db.begin_write()?;
        let result = {
            let mut meta = txn.open_table(META)?;
            let mut registry = txn.open_table(REGISTRY)?;

            let stored = meta.get(VERSION_KEY)?.map_or(0, |v| v.value());
            let stored = u32::try_from(stored).unwrap_or(u32::MAX);

            let mut existing = HashMap::new();
            for item in registry.iter()? {
                let (name, body) = item?;
                let def: CollectionSchema = rmp_serde::from_slice(body.value())?;
                existing.insert(name.value().to_string(), def);
            }

            if check_version(&schema.name, stored, schema.version)? == VersionCheck::Current {
                (stored, existing)
            } else {
                let plan = plan_upgrade(&existing, schema);

                for collection in plan.new_collections {
                    tracing::info!(
                        database = %schema.name,
                        collection = %collection.name,
                        "creating collection"
                    );
                    create_collection(&txn, &collection)?;
                    if collection.auto_increment {
                        meta.insert(counter_key(&collection.name).as_str(), FIRST_GENERATED_KEY)?;
                    }
                    let encoded = rmp_serde::to_vec_named(&collection)?;
                    registry.insert(collection.name.as_str(), encoded.as_slice())?;
                    existing.insert(collection.name.clone(), collection);
                }

                for (collection, index) in plan.new_indexes {
                    let Some(def) = existing.get_mut(&collection) else {
                        continue;
                    };
                    let records = backfill_index(&txn, &collection, &index)?;
                    tracing::info!(
                        database = %schema.name,
                        collection = %collection,
                        index = %index.name,
                        records,
                        "creating index"
                    );
                    def.indexes.push(index);
                    let encoded = rmp_serde::to_vec_named(&*def)?;
                    registry.insert(collection.as_str(), encoded.as_slice())?;
                }

                meta.insert(VERSION_KEY, u64::from(schema.version))?;
                (schema.version, existing)
            }
        };
        txn.commit()?;
        Ok(result)
    }

    fn schema_of(&self, collection: &str) -> Result<&CollectionSchema, StoreError> {
        self.collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }
}

fn create_collection(
    txn: &WriteTransaction,
    collection: &CollectionSchema,
) -> Result<(), StoreError> {
    txn.open_table(data_table(&collection.name))?;
    for index in &collection.indexes {
        let name = index_table_name(&collection.name, &index.name);
        txn.open_multimap_table(index_table(&name))?;
    }
    Ok(())
}

/// Creates an index table over existing records. Returns how many records
/// the index covers.
fn backfill_index(
    txn: &WriteTransaction,
    collection: &str,
    index: &IndexDef,
) -> Result<usize, StoreError> {
    let name = index_table_name(collection, &index.name);
    let data = txn.open_table(data_table(collection))?;
    let mut entries = txn.open_multimap_table(index_table(&name))?;

    let mut covered = 0;
    for item in data.iter()? {
        let (key, body) = item?;
        let doc = decode_body(body.value())?;
        let Some(value) = index_value(index, &doc) else {
            continue;
        };
        let value = value.encode();
        if index.unique && entries.get(value.as_slice())?.next().is_some() {
            return Err(StoreError::constraint(
                collection,
                format!("cannot build unique index '{}': duplicate value", index.name),
            ));
        }
        entries.insert(value.as_slice(), key.value())?;
        covered += 1;
    }
    Ok(covered)
}

impl StorageEngine for RedbStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn collections(&self) -> Vec<CollectionSchema> {
        let mut all: Vec<CollectionSchema> = self.collections.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn write(
        &self,
        collection: &str,
        mut doc: Document,
        mode: WriteMode,
    ) -> Result<RecordKey, StoreError> {
        let schema = self.schema_of(collection)?;
        let txn = self.db.begin_write()?;
        let key = {
            let counter = counter_key(collection);
            let mut meta = txn.open_table(META)?;
            let stored_next = meta
                .get(counter.as_str())?
                .map_or(FIRST_GENERATED_KEY, |v| v.value());
            let mut next_key = stored_next;
            let key = resolve_key(schema, &mut doc, &mut next_key)?;
            let encoded = key.encode();

            let mut data = txn.open_table(data_table(collection))?;
            let old = data
                .get(encoded.as_slice())?
                .map(|v| decode_body(v.value()))
                .transpose()?;
            if mode == WriteMode::Insert && old.is_some() {
                return Err(StoreError::constraint(
                    collection,
                    format!("key {key} already exists"),
                ));
            }

            for index in &schema.indexes {
                let name = index_table_name(collection, &index.name);
                let mut entries = txn.open_multimap_table(index_table(&name))?;
                if let Some(value) = old.as_ref().and_then(|d| index_value(index, d)) {
                    entries.remove(value.encode().as_slice(), encoded.as_slice())?;
                }
                let Some(value) = index_value(index, &doc) else {
                    continue;
                };
                let encoded_value = value.encode();
                if index.unique {
                    for owner in entries.get(encoded_value.as_slice())? {
                        if owner?.value() != encoded.as_slice() {
                            return Err(StoreError::constraint(
                                collection,
                                format!("unique index '{}' already holds {value}", index.name),
                            ));
                        }
                    }
                }
                entries.insert(encoded_value.as_slice(), encoded.as_slice())?;
            }

            let body = encode_body(&doc)?;
            data.insert(encoded.as_slice(), body.as_slice())?;
            if next_key != stored_next {
                meta.insert(counter.as_str(), next_key)?;
            }
            key
        };
        txn.commit()?;
        Ok(key)
    }

    fn get(&self, collection: &str, key: &RecordKey) -> Result<Option<Document>, StoreError> {
        self.schema_of(collection)?;
        let txn = self.db.begin_read()?;
        let data = txn.open_table(data_table(collection))?;
        let found = data
            .get(key.encode().as_slice())?
            .map(|v| decode_body(v.value()))
            .transpose()?;
        Ok(found)
    }

    fn get_all(
        &self,
        collection: &str,
        index: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        let schema = self.schema_of(collection)?;
        let txn = self.db.begin_read()?;
        let data = txn.open_table(data_table(collection))?;
        let mut out = Vec::new();

        let Some(index) = index else {
            for item in data.iter()? {
                let (_, body) = item?;
                out.push(decode_body(body.value())?);
            }
            return Ok(out);
        };

        if schema.index(index).is_none() {
            return Err(StoreError::UnknownIndex {
                collection: collection.to_string(),
                index: index.to_string(),
            });
        }
        let name = index_table_name(collection, index);
        let entries = txn.open_multimap_table(index_table(&name))?;
        for item in entries.iter()? {
            let (_, owners) = item?;
            for owner in owners {
                let owner = owner?;
                if let Some(body) = data.get(owner.value())? {
                    out.push(decode_body(body.value())?);
                }
            }
        }
        Ok(out)
    }

    fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.schema_of(collection)?;
        let txn = self.db.begin_read()?;
        let data = txn.open_table(data_table(collection))?;
        Ok(usize::try_from(data.len()?).unwrap_or(usize::MAX))
    }

    fn delete(&self, collection: &str, key: &RecordKey) -> Result<(), StoreError> {
        let schema = self.schema_of(collection)?;
        let encoded = key.encode();
        let txn = self.db.begin_write()?;
        {
            let mut data = txn.open_table(data_table(collection))?;
            let old = data
                .remove(encoded.as_slice())?
                .map(|v| decode_body(v.value()))
                .transpose()?;
            if let Some(old) = old {
                for index in &schema.indexes {
                    let Some(value) = index_value(index, &old) else {
                        continue;
                    };
                    let name = index_table_name(collection, &index.name);
                    let mut entries = txn.open_multimap_table(index_table(&name))?;
                    entries.remove(value.encode().as_slice(), encoded.as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn clear(&self, collection: &str) -> Result<(), StoreError> {
        let schema = self.schema_of(collection)?;
        let txn = self.db.begin_write()?;
        txn.delete_table(data_table(collection))?;
        txn.open_table(data_table(collection))?;
        for index in &schema.indexes {
            let name = index_table_name(collection, &index.name);
            txn.delete_multimap_table(index_table(&name))?;
            txn.open_multimap_table(index_table(&name))?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use essaybook_core::IndexDef;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::storage::engines::conformance;
    use crate::storage::record::into_document;

    fn open(dir: &TempDir) -> RedbStorage {
        RedbStorage::open(&dir.path().join("test.redb"), &conformance::schema()).unwrap()
    }

    #[test]
    fn generated_keys_are_sequential() {
        let dir = TempDir::new().unwrap();
        conformance::generated_keys_are_sequential(&open(&dir));
    }

    #[test]
    fn insert_rejects_duplicate_keys() {
        let dir = TempDir::new().unwrap();
        conformance::insert_rejects_duplicate_keys(&open(&dir));
    }

    #[test]
    fn upsert_replaces_and_reindexes() {
        let dir = TempDir::new().unwrap();
        conformance::upsert_replaces_and_reindexes(&open(&dir));
    }

    #[test]
    fn unique_index_is_enforced() {
        let dir = TempDir::new().unwrap();
        conformance::unique_index_is_enforced(&open(&dir));
    }

    #[test]
    fn index_order_breaks_ties_by_key() {
        let dir = TempDir::new().unwrap();
        conformance::index_order_breaks_ties_by_key(&open(&dir));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        conformance::delete_is_idempotent(&open(&dir));
    }

    #[test]
    fn clear_empties_collection_and_indexes() {
        let dir = TempDir::new().unwrap();
        conformance::clear_empties_collection_and_indexes(&open(&dir));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        conformance::unknown_names_are_rejected(&open(&dir));
    }

    #[test]
    fn records_and_key_generator_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = open(&dir);
            for name in ["Ana", "Bo"] {
                let doc = into_document("evaluations", json!({"student_name": name})).unwrap();
                storage.write("evaluations", doc, WriteMode::Insert).unwrap();
            }
            storage.delete("evaluations", &RecordKey::from(2_u64)).unwrap();
        }

        let storage = open(&dir);
        assert_eq!(storage.version(), 3);
        assert_eq!(storage.count("evaluations").unwrap(), 1);

        let doc = into_document("evaluations", json!({"student_name": "Cy"})).unwrap();
        let key = storage.write("evaluations", doc, WriteMode::Insert).unwrap();
        assert_eq!(key, RecordKey::from(3_u64));
    }

    #[test]
    fn upgrade_adds_collections_and_backfills_indexes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("essays.redb");

        let v1 = DatabaseSchema::new("essays", 1).with_collection(
            CollectionSchema::auto_increment("evaluations", "id")
                .with_index(IndexDef::on("created_at")),
        );
        {
            let storage = RedbStorage::open(&path, &v1).unwrap();
            for class in ["5B", "5A"] {
                let doc = into_document(
                    "evaluations",
                    json!({"student_class": class, "created_at": "t"}),
                )
                .unwrap();
                storage.write("evaluations", doc, WriteMode::Insert).unwrap();
            }
        }

        let v2 = DatabaseSchema::essay_evaluations();
        let v2 = DatabaseSchema { name: "essays".to_string(), ..v2 };
        let storage = RedbStorage::open(&path, &v2).unwrap();
        assert_eq!(storage.version(), 2);

        let names: Vec<String> = storage.collections().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["api_keys", "evaluations"]);

        let by_class = storage.get_all("evaluations", Some("student_class")).unwrap();
        let classes: Vec<&str> = by_class
            .iter()
            .map(|d| d["student_class"].as_str().unwrap())
            .collect();
        assert_eq!(classes, vec!["5A", "5B"]);
        assert!(storage.get_all("evaluations", Some("student_name")).unwrap().is_empty());
    }

    #[test]
    fn reopening_at_same_version_keeps_data() {
        let dir = TempDir::new().unwrap();
        {
            let storage = open(&dir);
            let doc = into_document("items", json!({"code": "a", "label": "x"})).unwrap();
            storage.write("items", doc, WriteMode::Insert).unwrap();
        }
        let storage = open(&dir);
        assert_eq!(storage.count("items").unwrap(), 1);
        assert_eq!(storage.get_all("items", Some("label")).unwrap().len(), 1);
    }

    #[test]
    fn newer_database_is_refused() {
        let dir = TempDir::new().unwrap();
        drop(open(&dir));

        let older = DatabaseSchema::new("conformance", 1);
        let Err(err) = RedbStorage::open(&dir.path().join("test.redb"), &older) else {
            panic!("expected version downgrade to be refused");
        };
        assert!(matches!(
            err,
            StoreError::VersionDowngrade {
                stored: 3,
                requested: 1,
                ..
            }
        ));
        assert!(err.is_connection_error());
    }

    #[test]
    fn unreadable_path_is_a_connection_error() {
        let dir = TempDir::new().unwrap();
        let Err(err) = RedbStorage::open(dir.path(), &conformance::schema()) else {
            panic!("opening a directory as a database should fail");
        };
        assert!(err.is_connection_error(), "{err}");
    }
}
