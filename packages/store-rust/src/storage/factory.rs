//! Factory for opening the [`StorageEngine`] a [`Backend`] describes.
//!
//! [`open_engine`] is the single place where configuration turns into a
//! concrete engine. It runs synchronously and may touch the filesystem, so
//! the connection layer calls it from the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use essaybook_core::DatabaseSchema;

use crate::config::Backend;
use crate::error::StoreError;
use crate::storage::engine::StorageEngine;
use crate::storage::engines::{MemoryStorage, NullStorage, RedbStorage};

/// File extension of on-disk databases.
pub const DATABASE_EXTENSION: &str = "redb";

/// Path of the database file for `name` inside `dir`.
#[must_use]
pub fn database_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{DATABASE_EXTENSION}"))
}

/// Opens and upgrades the engine for `backend`.
///
/// # Errors
///
/// Returns a connection-class [`StoreError`] if the data directory cannot be
/// created or the engine fails to open or upgrade.
pub fn open_engine(
    backend: &Backend,
    schema: &DatabaseSchema,
) -> Result<Arc<dyn StorageEngine>, StoreError> {
    match backend {
        Backend::Disk { dir } => {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::Connection {
                name: schema.name.clone(),
                reason: format!("cannot create data directory {}: {e}", dir.display()),
            })?;
            let path = database_path(dir, &schema.name);
            Ok(Arc::new(RedbStorage::open(&path, schema)?))
        }
        Backend::Memory => Ok(Arc::new(MemoryStorage::open(schema)?)),
        Backend::Unavailable => Ok(Arc::new(NullStorage::new(&schema.name))),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn disk_backend_creates_directory_and_file() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("nested").join("data");
        let schema = DatabaseSchema::essay_evaluations();

        let engine = open_engine(&Backend::Disk { dir: dir.clone() }, &schema).unwrap();
        assert!(!engine.is_null());
        assert_eq!(engine.version(), schema.version);
        assert!(database_path(&dir, &schema.name).is_file());
    }

    #[test]
    fn memory_backend_is_upgraded() {
        let schema = DatabaseSchema::essay_evaluations();
        let engine = open_engine(&Backend::Memory, &schema).unwrap();
        assert_eq!(engine.collections().len(), 2);
        assert!(!engine.is_null());
    }

    #[test]
    fn unavailable_backend_is_null() {
        let engine = open_engine(&Backend::Unavailable, &DatabaseSchema::default()).unwrap();
        assert!(engine.is_null());
    }

    #[test]
    fn data_dir_that_is_a_file_fails_to_connect() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("occupied");
        std::fs::write(&file, b"not a directory").unwrap();

        let Err(err) = open_engine(&Backend::Disk { dir: file }, &DatabaseSchema::default())
        else {
            panic!("expected connection failure");
        };
        assert!(err.is_connection_error(), "{err}");
    }

    #[test]
    fn invalid_schema_fails_before_opening() {
        let schema = DatabaseSchema::new("", 0);
        assert!(open_engine(&Backend::Memory, &schema).is_err());
    }
}
