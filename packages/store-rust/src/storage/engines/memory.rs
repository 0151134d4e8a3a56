//! In-memory [`StorageEngine`] implementation backed by [`DashMap`].
//!
//! Each collection lives in its own `DashMap` shard entry, so an operation
//! holds exclusive access to exactly one collection for its duration, which
//! is what makes it atomic. Suitable for tests and ephemeral sessions.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use essaybook_core::{CollectionSchema, DatabaseSchema, IndexDef, RecordKey};

use crate::error::StoreError;
use crate::storage::engine::{StorageEngine, WriteMode};
use crate::storage::record::{index_value, resolve_key, Document, FIRST_GENERATED_KEY};
use crate::storage::upgrade::{check_version, plan_upgrade, validate_schema, VersionCheck};

/// Index entries ordered by `(index value, primary key)`.
type IndexEntries = BTreeSet<(RecordKey, RecordKey)>;

struct MemCollection {
    schema: CollectionSchema,
    records: BTreeMap<RecordKey, Document>,
    indexes: HashMap<String, IndexEntries>,
    next_key: u64,
}

impl MemCollection {
    fn new(schema: CollectionSchema) -> Self {
        let indexes = schema
            .indexes
            .iter()
            .map(|i| (i.name.clone(), IndexEntries::new()))
            .collect();
        Self {
            schema,
            records: BTreeMap::new(),
            indexes,
            next_key: FIRST_GENERATED_KEY,
        }
    }

    /// Builds the entries of a new index from existing records.
    fn backfill(&self, index: &IndexDef) -> Result<IndexEntries, String> {
        let mut entries = IndexEntries::new();
        for (key, doc) in &self.records {
            if let Some(value) = index_value(index, doc) {
                if index.unique && keys_for(&entries, &value).next().is_some() {
                    return Err(format!(
                        "cannot build unique index '{}' on '{}': duplicate value {value}",
                        index.name, self.schema.name
                    ));
                }
                entries.insert((value, key.clone()));
            }
        }
        Ok(entries)
    }

    fn add_index(&mut self, index: IndexDef, entries: IndexEntries) {
        self.indexes.insert(index.name.clone(), entries);
        self.schema.indexes.push(index);
    }

    fn unlink(&mut self, key: &RecordKey, doc: &Document) {
        for index in &self.schema.indexes {
            if let Some(value) = index_value(index, doc) {
                if let Some(entries) = self.indexes.get_mut(&index.name) {
                    entries.remove(&(value, key.clone()));
                }
            }
        }
    }

    fn link(&mut self, key: &RecordKey, doc: &Document) {
        for index in &self.schema.indexes {
            if let Some(value) = index_value(index, doc) {
                self.indexes
                    .entry(index.name.clone())
                    .or_default()
                    .insert((value, key.clone()));
            }
        }
    }
}

/// Primary keys filed under `value` in an index.
fn keys_for<'a>(
    entries: &'a IndexEntries,
    value: &'a RecordKey,
) -> impl Iterator<Item = &'a RecordKey> {
    let start = (value.clone(), RecordKey::Number(f64::NEG_INFINITY));
    entries
        .range((Bound::Included(start), Bound::Unbounded))
        .take_while(move |(v, _)| v == value)
        .map(|(_, pk)| pk)
}

/// In-memory storage engine.
pub struct MemoryStorage {
    name: String,
    version: AtomicU32,
    collections: DashMap<String, MemCollection>,
}

impl MemoryStorage {
    /// Creates an empty database at version 0 with no collections.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: AtomicU32::new(0),
            collections: DashMap::new(),
        }
    }

    /// Creates a database and upgrades it to `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidSchema`] if the schema is malformed.
    pub fn open(schema: &DatabaseSchema) -> Result<Self, StoreError> {
        let storage = Self::new(&schema.name);
        storage.upgrade(schema)?;
        Ok(storage)
    }

    /// Brings the database up to `schema.version`, creating missing
    /// collections and indexes. Does nothing if already at that version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidSchema`] for a malformed schema and
    /// [`StoreError::VersionDowngrade`] if the database is newer.
    pub fn upgrade(&self, schema: &DatabaseSchema) -> Result<(), StoreError> {
        validate_schema(schema)?;
        let stored = self.version.load(Ordering::SeqCst);
        if check_version(&self.name, stored, schema.version)? == VersionCheck::Current {
            return Ok(());
        }

        let existing: HashMap<String, CollectionSchema> = self
            .collections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().schema.clone()))
            .collect();
        let plan = plan_upgrade(&existing, schema);

        // Back-fill every new index before touching anything, so a failed
        // upgrade leaves the database as it was.
        let mut backfilled = Vec::with_capacity(plan.new_indexes.len());
        for (collection, index) in plan.new_indexes {
            let Some(entry) = self.collections.get(&collection) else {
                continue;
            };
            let entries = entry
                .backfill(&index)
                .map_err(|reason| StoreError::Connection {
                    name: self.name.clone(),
                    reason,
                })?;
            backfilled.push((collection, index, entries));
        }

        for collection in plan.new_collections {
            tracing::info!(
                database = %self.name,
                collection = %collection.name,
                "creating collection"
            );
            self.collections
                .insert(collection.name.clone(), MemCollection::new(collection));
        }
        for (collection, index, entries) in backfilled {
            if let Some(mut entry) = self.collections.get_mut(&collection) {
                tracing::info!(
                    database = %self.name,
                    collection = %collection,
                    index = %index.name,
                    records = entries.len(),
                    "creating index"
                );
                entry.add_index(index, entries);
            }
        }

        self.version.store(schema.version, Ordering::SeqCst);
        Ok(())
    }

    fn unknown(collection: &str) -> StoreError {
        StoreError::UnknownCollection(collection.to_string())
    }
}

impl StorageEngine for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    fn collections(&self) -> Vec<CollectionSchema> {
        let mut all: Vec<CollectionSchema> = self
            .collections
            .iter()
            .map(|entry| entry.value().schema.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn write(
        &self,
        collection: &str,
        mut doc: Document,
        mode: WriteMode,
    ) -> Result<RecordKey, StoreError> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| Self::unknown(collection))?;
        let coll = entry.value_mut();

        // Every check runs before the first mutation, so a rejected write
        // leaves the collection untouched.
        let mut next_key = coll.next_key;
        let key = resolve_key(&coll.schema, &mut doc, &mut next_key)?;

        if mode == WriteMode::Insert && coll.records.contains_key(&key) {
            return Err(StoreError::constraint(
                collection,
                format!("key {key} already exists"),
            ));
        }
        for index in coll.schema.indexes.iter().filter(|i| i.unique) {
            let Some(value) = index_value(index, &doc) else {
                continue;
            };
            let Some(entries) = coll.indexes.get(&index.name) else {
                continue;
            };
            if keys_for(entries, &value).any(|pk| pk != &key) {
                return Err(StoreError::constraint(
                    collection,
                    format!("unique index '{}' already holds {value}", index.name),
                ));
            }
        }

        if let Some(old) = coll.records.remove(&key) {
            coll.unlink(&key, &old);
        }
        coll.link(&key, &doc);
        coll.records.insert(key.clone(), doc);
        coll.next_key = next_key;
        Ok(key)
    }

    fn get(&self, collection: &str, key: &RecordKey) -> Result<Option<Document>, StoreError> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| Self::unknown(collection))?;
        Ok(entry.records.get(key).cloned())
    }

    fn get_all(
        &self,
        collection: &str,
        index: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| Self::unknown(collection))?;

        let Some(index) = index else {
            return Ok(entry.records.values().cloned().collect());
        };
        let entries = entry
            .indexes
            .get(index)
            .ok_or_else(|| StoreError::UnknownIndex {
                collection: collection.to_string(),
                index: index.to_string(),
            })?;
        Ok(entries
            .iter()
            .filter_map(|(_, pk)| entry.records.get(pk).cloned())
            .collect())
    }

    fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| Self::unknown(collection))?;
        Ok(entry.records.len())
    }

    fn delete(&self, collection: &str, key: &RecordKey) -> Result<(), StoreError> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| Self::unknown(collection))?;
        let coll = entry.value_mut();
        if let Some(old) = coll.records.remove(key) {
            coll.unlink(key, &old);
        }
        Ok(())
    }

    fn clear(&self, collection: &str) -> Result<(), StoreError> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| Self::unknown(collection))?;
        let coll = entry.value_mut();
        coll.records.clear();
        for entries in coll.indexes.values_mut() {
            entries.clear();
        }
        Ok(())
    }
}
