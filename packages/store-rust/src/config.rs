//! Configuration types for the record store.

use std::path::PathBuf;

use essaybook_core::DatabaseSchema;

/// Where the store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Embedded on-disk database, one file per database name under `dir`.
    Disk {
        /// Directory holding the database files. Created on first open.
        dir: PathBuf,
    },
    /// Process-local memory. Contents vanish with the store.
    Memory,
    /// The execution context has no persistent storage. Every operation is a
    /// no-op and every read comes back empty.
    Unavailable,
}

/// What the store does when opening the database fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnUnavailable {
    /// Report the failure to the caller. The next operation tries again.
    #[default]
    Fail,
    /// Swallow the failure and behave as if no storage existed.
    Noop,
}

/// Top-level configuration for a [`RecordStore`](crate::storage::RecordStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Storage backend.
    pub backend: Backend,
    /// Policy for open failures.
    pub on_unavailable: OnUnavailable,
    /// Database name, version, and collection layout.
    pub schema: DatabaseSchema,
}

impl StoreConfig {
    /// In-memory store with the default schema.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            ..Self::default()
        }
    }

    /// On-disk store under `dir` with the default schema.
    #[must_use]
    pub fn disk(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Disk { dir: dir.into() },
            ..Self::default()
        }
    }

    /// Store for contexts without persistent storage.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            backend: Backend::Unavailable,
            ..Self::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Disk {
                dir: PathBuf::from(".essaybook"),
            },
            on_unavailable: OnUnavailable::Fail,
            schema: DatabaseSchema::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use essaybook_core::schema::{DB_NAME, DB_VERSION};

    use super::*;

    #[test]
    fn store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(
            config.backend,
            Backend::Disk {
                dir: PathBuf::from(".essaybook")
            }
        );
        assert_eq!(config.on_unavailable, OnUnavailable::Fail);
        assert_eq!(config.schema.name, DB_NAME);
        assert_eq!(config.schema.version, DB_VERSION);
    }

    #[test]
    fn constructors_only_change_backend() {
        assert_eq!(StoreConfig::memory().backend, Backend::Memory);
        assert_eq!(StoreConfig::unavailable().backend, Backend::Unavailable);

        let disk = StoreConfig::disk("/tmp/essays");
        assert_eq!(
            disk.backend,
            Backend::Disk {
                dir: PathBuf::from("/tmp/essays")
            }
        );
        assert_eq!(disk.on_unavailable, OnUnavailable::Fail);
    }
}
