//! No-op [`StorageEngine`] implementation.
//!
//! [`NullStorage`] discards all writes and returns empty results for reads.
//! It stands in for a real database when the execution context has no
//! persistent storage, or when opening failed under the `Noop` policy, so
//! calling code runs unchanged either way.

use essaybook_core::{CollectionSchema, RecordKey};

use crate::error::StoreError;
use crate::storage::engine::{StorageEngine, WriteMode};
use crate::storage::record::Document;

/// No-op engine for contexts without persistent storage.
///
/// All write operations succeed immediately without side effects.
/// All read operations return empty results.
#[derive(Debug, Clone, Default)]
pub struct NullStorage {
    name: String,
}

impl NullStorage {
    /// Creates a null engine reporting the given database name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl StorageEngine for NullStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        0
    }

    fn collections(&self) -> Vec<CollectionSchema> {
        Vec::new()
    }

    // Nothing is stored, so there is no meaningful key to hand back.
    fn write(
        &self,
        _collection: &str,
        _doc: Document,
        _mode: WriteMode,
    ) -> Result<RecordKey, StoreError> {
        Ok(RecordKey::Number(0.0))
    }

    fn get(&self, _collection: &str, _key: &RecordKey) -> Result<Option<Document>, StoreError> {
        Ok(None)
    }

    fn get_all(
        &self,
        _collection: &str,
        _index: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(Vec::new())
    }

    fn count(&self, _collection: &str) -> Result<usize, StoreError> {
        Ok(0)
    }

    fn delete(&self, _collection: &str, _key: &RecordKey) -> Result<(), StoreError> {
        Ok(())
    }

    fn clear(&self, _collection: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn is_null(&self) -> bool {
        true
    }
}
