//! Low-level storage engine trait.
//!
//! Defines [`StorageEngine`], the innermost storage layer. An engine is an
//! opened, upgraded database: it knows its collections and indexes and runs
//! each operation as one atomic transaction against one collection. All
//! operations are synchronous; the [`RecordStore`](super::RecordStore) moves
//! them onto the blocking pool.

use essaybook_core::{CollectionSchema, RecordKey};

use super::record::Document;
use crate::error::StoreError;

/// Whether a write may replace an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with a constraint error if the key already exists.
    Insert,
    /// Replace any record under the same key.
    Upsert,
}

/// An opened database holding named collections of documents.
///
/// Wrapped in `Arc<dyn StorageEngine>` for sharing across async boundaries.
pub trait StorageEngine: Send + Sync + 'static {
    /// Database name.
    fn name(&self) -> &str;

    /// Schema version the database is at.
    fn version(&self) -> u32;

    /// Definitions of every collection present, sorted by name.
    fn collections(&self) -> Vec<CollectionSchema>;

    /// Writes a document, assigning its key if the collection auto-increments.
    ///
    /// Returns the record's primary key.
    fn write(
        &self,
        collection: &str,
        doc: Document,
        mode: WriteMode,
    ) -> Result<RecordKey, StoreError>;

    /// Fetches one document by primary key.
    fn get(&self, collection: &str, key: &RecordKey) -> Result<Option<Document>, StoreError>;

    /// Fetches every document, ordered by primary key, or by the named index
    /// (ties broken by primary key). Documents absent from the index are
    /// omitted from index-ordered results.
    fn get_all(&self, collection: &str, index: Option<&str>)
        -> Result<Vec<Document>, StoreError>;

    /// Number of documents in the collection.
    fn count(&self, collection: &str) -> Result<usize, StoreError>;

    /// Removes the document with the given key. Absent keys are not an error.
    fn delete(&self, collection: &str, key: &RecordKey) -> Result<(), StoreError>;

    /// Removes every document. The key generator is not reset.
    fn clear(&self, collection: &str) -> Result<(), StoreError>;

    /// Whether this is a null (no-op) engine.
    ///
    /// Returns `false` by default. Null implementations override to return `true`.
    fn is_null(&self) -> bool {
        false
    }
}
