//! Lazily-opened, shared database connection.
//!
//! A [`Connection`] opens its engine on first use and caches it for the rest
//! of its lifetime. Concurrent first callers wait on the same open. The
//! lifecycle is tracked in an `ArcSwap` so it can be observed without
//! touching the cell.
//!
//! The blocking open task is kept until some caller sees it finish. A caller
//! dropped mid-open leaves the task running, and the next caller awaits that
//! same task instead of racing it for the database file lock.
//!
//! A memory database is retained across [`Connection::close`], since
//! dropping it would discard every record.
//!
//!
//! ```text
//! Uninitialized -> Opening -> Ready
//!                          -> Failed      (Fail policy, next call retries)
//!                          -> Unavailable (Noop policy or no storage)
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use essaybook_core::DatabaseSchema;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;

use crate::config::{Backend, OnUnavailable, StoreConfig};
use crate::error::StoreError;
use crate::storage::engine::StorageEngine;
use crate::storage::engines::NullStorage;
use crate::storage::factory::open_engine;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing has asked for the database yet.
    Uninitialized,
    /// The first open is in progress.
    Opening,
    /// The engine is open and cached.
    Ready,
    /// The last open attempt failed. The next operation tries again.
    Failed,
    /// Operations run against the null engine.
    Unavailable,
}

type OpenResult = Result<Arc<dyn StorageEngine>, StoreError>;

/// Owns the cached engine handle for one database.
pub struct Connection {
    backend: Backend,
    schema: Arc<DatabaseSchema>,
    policy: OnUnavailable,
    engine: OnceCell<Arc<dyn StorageEngine>>,
    pending: Mutex<Option<JoinHandle<OpenResult>>>,
    retained: Option<Arc<dyn StorageEngine>>,
    state: ArcSwap<ConnectionState>,
}

impl Connection {
    /// Creates an unopened connection.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            backend: config.backend,
            schema: Arc::new(config.schema),
            policy: config.on_unavailable,
            engine: OnceCell::new(),
            pending: Mutex::new(None),
            retained: None,
            state: ArcSwap::from_pointee(ConnectionState::Uninitialized),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        **self.state.load()
    }

    /// Schema the database is opened with.
    #[must_use]
    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    /// Returns the cached engine, opening it first if needed.
    ///
    /// # Errors
    ///
    /// Under [`OnUnavailable::Fail`], returns the connection error of a
    /// failed open. Nothing is cached in that case.
    pub async fn engine(&self) -> Result<Arc<dyn StorageEngine>, StoreError> {
        let engine = self.engine.get_or_try_init(|| self.open()).await?;
        Ok(Arc::clone(engine))
    }

    /// Drops the cached engine. The next call to [`engine`](Self::engine)
    /// opens the database again.
    ///
    /// A [`Backend::Memory`] engine is kept aside and handed back by that
    /// next open, so its records outlive the close.
    ///
    /// Returns whether an engine was cached.
    pub fn close(&mut self) -> bool {
        self.state.store(Arc::new(ConnectionState::Uninitialized));
        let Some(engine) = self.engine.take() else {
            return false;
        };
        if matches!(self.backend, Backend::Memory) {
            self.retained = Some(engine);
        }
        tracing::debug!(database = %self.schema.name, "closed database");
        true
    }

    async fn open(&self) -> OpenResult {
        if let Some(engine) = &self.retained {
            self.state.store(Arc::new(ConnectionState::Ready));
            return Ok(Arc::clone(engine));
        }

        let joined = {
            let mut pending = self.pending.lock().await;
            let task = pending.get_or_insert_with(|| {
                self.state.store(Arc::new(ConnectionState::Opening));
                let backend = self.backend.clone();
                let schema = Arc::clone(&self.schema);
                tokio::task::spawn_blocking(move || open_engine(&backend, &schema))
            });
            // Cancellation here leaves the handle for the next caller.
            let joined = task.await;
            *pending = None;
            joined
        };
        let opened = match joined {
            Ok(result) => result,
            Err(e) => Err(StoreError::Connection {
                name: self.schema.name.clone(),
                reason: format!("open task failed: {e}"),
            }),
        };

        match opened {
            Ok(engine) => {
                let state = if engine.is_null() {
                    tracing::info!(
                        database = %self.schema.name,
                        "no persistent storage; operations are no-ops"
                    );
                    ConnectionState::Unavailable
                } else {
                    tracing::info!(
                        database = %engine.name(),
                        version = engine.version(),
                        "database ready"
                    );
                    ConnectionState::Ready
                };
                self.state.store(Arc::new(state));
                Ok(engine)
            }
            Err(err) => match self.policy {
                OnUnavailable::Fail => {
                    tracing::warn!(
                        database = %self.schema.name,
                        error = %err,
                        "failed to open database"
                    );
                    self.state.store(Arc::new(ConnectionState::Failed));
                    Err(err)
                }
                OnUnavailable::Noop => {
                    tracing::warn!(
                        database = %self.schema.name,
                        error = %err,
                        "failed to open database; continuing without storage"
                    );
                    self.state.store(Arc::new(ConnectionState::Unavailable));
                    Ok(Arc::new(NullStorage::new(&self.schema.name)))
                }
            },
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.backend)
            .field("database", &self.schema.name)
            .field("policy", &self.policy)
            .field("retained", &self.retained.is_some())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn blocked_dir(root: &TempDir) -> std::path::PathBuf {
        let path = root.path().join("blocked");
        std::fs::write(&path, b"file in the way").unwrap();
        path
    }

    #[tokio::test]
    async fn opens_once_and_caches() {
        let connection = Connection::new(StoreConfig::memory());
        assert_eq!(connection.state(), ConnectionState::Uninitialized);

        let first = connection.engine().await.unwrap();
        let second = connection.engine().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connection.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_open() {
        let connection = Arc::new(Connection::new(StoreConfig::memory()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let connection = Arc::clone(&connection);
                tokio::spawn(async move { connection.engine().await.unwrap() })
            })
            .collect();

        let mut engines = Vec::new();
        for handle in handles {
            engines.push(handle.await.unwrap());
        }
        assert!(engines.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn fail_policy_reports_and_retries() {
        let root = TempDir::new().unwrap();
        let dir = blocked_dir(&root);
        let connection = Connection::new(StoreConfig::disk(&dir));

        let Err(err) = connection.engine().await else {
            panic!("expected connection failure");
        };
        assert!(err.is_connection_error());
        assert_eq!(connection.state(), ConnectionState::Failed);

        std::fs::remove_file(&dir).unwrap();
        let engine = connection.engine().await.unwrap();
        assert!(!engine.is_null());
        assert_eq!(connection.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn noop_policy_degrades_to_null_engine() {
        let root = TempDir::new().unwrap();
        let config = StoreConfig {
            on_unavailable: OnUnavailable::Noop,
            ..StoreConfig::disk(blocked_dir(&root))
        };
        let connection = Connection::new(config);

        let engine = connection.engine().await.unwrap();
        assert!(engine.is_null());
        assert_eq!(connection.state(), ConnectionState::Unavailable);
    }

    #[tokio::test]
    async fn unavailable_backend_never_fails() {
        let connection = Connection::new(StoreConfig::unavailable());
        assert!(connection.engine().await.unwrap().is_null());
        assert_eq!(connection.state(), ConnectionState::Unavailable);
    }

    #[tokio::test]
    async fn close_allows_reopening() {
        let root = TempDir::new().unwrap();
        let mut connection = Connection::new(StoreConfig::disk(root.path()));

        connection.engine().await.unwrap();
        assert!(connection.close());
        assert_eq!(connection.state(), ConnectionState::Uninitialized);
        assert!(!connection.close());

        // The file lock was released with the engine.
        connection.engine().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn retry_after_cancelled_open_reuses_the_same_open() {
        let root = TempDir::new().unwrap();
        let config = StoreConfig {
            on_unavailable: OnUnavailable::Noop,
            ..StoreConfig::disk(root.path())
        };
        let connection = Connection::new(config);

        let _ = tokio::time::timeout(Duration::from_micros(1), connection.engine()).await;

        let engine = connection.engine().await.unwrap();
        assert!(!engine.is_null());
        assert_eq!(connection.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn repeated_cancelled_opens_still_leave_one_engine() {
        let root = TempDir::new().unwrap();
        let connection = Connection::new(StoreConfig::disk(root.path()));

        for _ in 0..3 {
            let _ = tokio::time::timeout(Duration::from_micros(1), connection.engine()).await;
        }
        let first = connection.engine().await.unwrap();
        let second = connection.engine().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connection.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn memory_engine_outlives_close() {
        let mut connection = Connection::new(StoreConfig::memory());
        let before = connection.engine().await.unwrap();

        assert!(connection.close());
        assert_eq!(connection.state(), ConnectionState::Uninitialized);

        let after = connection.engine().await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(connection.state(), ConnectionState::Ready);
    }
}
