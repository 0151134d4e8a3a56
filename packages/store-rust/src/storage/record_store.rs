//! Async record store over typed collections.
//!
//! [`RecordStore`] is the public face of the storage layer. It owns a lazily
//! opened [`Connection`], stamps `created_at` on every write, and moves each
//! engine call onto the blocking pool so every operation is a future that
//! resolves exactly once, after its transaction has committed.
//!
//! Two surfaces are offered:
//!
//! - typed operations over any [`Collection`] (`insert`, `upsert`, `get_all`,
//!   `get`, `delete_by_id`, `clear`, `count`), plus essay-specific helpers;
//! - document operations addressed by collection name, for callers that work
//!   with raw JSON.

use essaybook_core::{
    ApiKey, ApiKeys, ClockSource, Collection, CollectionSchema, DatabaseSchema, Evaluation,
    Evaluations, NewApiKey, NewEvaluation, RecordKey, Stamper,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::storage::connection::{Connection, ConnectionState};
use crate::storage::engine::{StorageEngine, WriteMode};
use crate::storage::record::{into_document, Document};

/// Field every record carries its store-assigned creation time under.
pub const CREATED_AT: &str = "created_at";

/// Index the domain helpers list records by.
const BY_CREATION: &str = "created_at";

/// Async CRUD over the collections of one database.
#[derive(Debug)]
pub struct RecordStore {
    connection: Connection,
    stamper: Stamper,
}

impl RecordStore {
    /// Creates a store that opens its database on first use.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            connection: Connection::new(config),
            stamper: Stamper::default(),
        }
    }

    /// Like [`new`](Self::new), reading creation times from `clock`.
    #[must_use]
    pub fn with_clock(config: StoreConfig, clock: Box<dyn ClockSource>) -> Self {
        Self {
            connection: Connection::new(config),
            stamper: Stamper::new(clock),
        }
    }

    /// Connection lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Schema the database is opened with.
    #[must_use]
    pub fn schema(&self) -> &DatabaseSchema {
        self.connection.schema()
    }

    /// Opens the database now instead of on first use.
    ///
    /// # Errors
    ///
    /// Returns the connection error under the `Fail` policy.
    pub async fn connect(&self) -> Result<(), StoreError> {
        self.connection.engine().await.map(|_| ())
    }

    /// Releases the database. The next operation opens it again.
    pub fn close(&mut self) {
        self.connection.close();
    }

    /// Collections present in the opened database, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns the connection error under the `Fail` policy.
    pub async fn collections(&self) -> Result<Vec<CollectionSchema>, StoreError> {
        self.run(|engine| Ok(engine.collections())).await
    }

    // -- Typed operations --

    /// Inserts a new record, stamping `created_at`. Auto-increment
    /// collections assign the key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] if the draft fails
    /// [`Collection::validate`], and a constraint error if the key or a
    /// unique index value is already taken.
    pub async fn insert<C: Collection>(&self, draft: &C::Draft) -> Result<(), StoreError> {
        self.insert_document(C::NAME, draft_value::<C>(draft)?)
            .await
            .map(|_| ())
    }

    /// Inserts or replaces the record under the draft's key, stamping
    /// `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] if the draft fails
    /// [`Collection::validate`], and a constraint error on a unique index
    /// clash with another record.
    pub async fn upsert<C: Collection>(&self, draft: &C::Draft) -> Result<(), StoreError> {
        self.upsert_document(C::NAME, draft_value::<C>(draft)?)
            .await
            .map(|_| ())
    }

    /// Every record, by primary key or by the named index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownIndex`] for an undeclared index and a
    /// serialization error if a stored record does not match `C::Record`.
    pub async fn get_all<C: Collection>(
        &self,
        order_by: Option<&str>,
    ) -> Result<Vec<C::Record>, StoreError> {
        self.get_documents(C::NAME, order_by)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// One record by primary key.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the stored record does not match
    /// `C::Record`.
    pub async fn get<C: Collection>(&self, id: C::Key) -> Result<Option<C::Record>, StoreError> {
        self.get_document(C::NAME, id.into())
            .await?
            .map(from_document)
            .transpose()
    }

    /// Deletes the record with `id`. Absent ids are not an error.
    ///
    /// # Errors
    ///
    /// Returns engine errors only.
    pub async fn delete_by_id<C: Collection>(&self, id: C::Key) -> Result<(), StoreError> {
        self.delete_document(C::NAME, id.into()).await
    }

    /// Removes every record of the collection.
    ///
    /// # Errors
    ///
    /// Returns engine errors only.
    pub async fn clear<C: Collection>(&self) -> Result<(), StoreError> {
        self.clear_collection(C::NAME).await
    }

    /// Number of records in the collection.
    ///
    /// # Errors
    ///
    /// Returns engine errors only.
    pub async fn count<C: Collection>(&self) -> Result<usize, StoreError> {
        self.count_documents(C::NAME).await
    }

    // -- Essay helpers --

    /// Stores a new evaluation and returns its assigned id.
    ///
    /// Returns id 0 when no storage is available.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] for a non-finite score, and
    /// engine and connection errors.
    pub async fn save_evaluation(&self, draft: &NewEvaluation) -> Result<u64, StoreError> {
        let key = self
            .insert_document(Evaluations::NAME, draft_value::<Evaluations>(draft)?)
            .await?;
        Ok(key.as_i64().and_then(|id| u64::try_from(id).ok()).unwrap_or(0))
    }

    /// Every evaluation in creation order.
    ///
    /// # Errors
    ///
    /// Returns engine and connection errors.
    pub async fn evaluations(&self) -> Result<Vec<Evaluation>, StoreError> {
        self.get_all::<Evaluations>(Some(BY_CREATION)).await
    }

    /// Deletes one evaluation.
    ///
    /// # Errors
    ///
    /// Returns engine and connection errors.
    pub async fn delete_evaluation(&self, id: u64) -> Result<(), StoreError> {
        self.delete_by_id::<Evaluations>(id).await
    }

    /// Deletes every evaluation.
    ///
    /// # Errors
    ///
    /// Returns engine and connection errors.
    pub async fn clear_evaluations(&self) -> Result<(), StoreError> {
        self.clear::<Evaluations>().await
    }

    /// Stores an API key, replacing any key with the same id.
    ///
    /// # Errors
    ///
    /// Returns engine and connection errors.
    pub async fn save_api_key(&self, draft: &NewApiKey) -> Result<(), StoreError> {
        self.upsert::<ApiKeys>(draft).await
    }

    /// Every API key in order of last write.
    ///
    /// # Errors
    ///
    /// Returns engine and connection errors.
    pub async fn api_keys(&self) -> Result<Vec<ApiKey>, StoreError> {
        self.get_all::<ApiKeys>(Some(BY_CREATION)).await
    }

    /// Deletes one API key.
    ///
    /// # Errors
    ///
    /// Returns engine and connection errors.
    pub async fn delete_api_key(&self, id: &str) -> Result<(), StoreError> {
        self.delete_by_id::<ApiKeys>(id.to_string()).await
    }

    // -- Document operations --

    /// Inserts a JSON object, stamping `created_at`. Returns its key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] if `value` is not an object or
    /// lacks a usable key, and constraint errors as for [`insert`](Self::insert).
    pub async fn insert_document(
        &self,
        collection: &str,
        value: Value,
    ) -> Result<RecordKey, StoreError> {
        self.write(collection, value, WriteMode::Insert).await
    }

    /// Inserts or replaces a JSON object, stamping `created_at`. Returns its key.
    ///
    /// # Errors
    ///
    /// As for [`insert_document`](Self::insert_document), minus the duplicate
    /// key check.
    pub async fn upsert_document(
        &self,
        collection: &str,
        value: Value,
    ) -> Result<RecordKey, StoreError> {
        self.write(collection, value, WriteMode::Upsert).await
    }

    /// Every document of a collection, by primary key or by the named index.
    ///
    /// # Errors
    ///
    /// Returns unknown collection or index errors.
    pub async fn get_documents(
        &self,
        collection: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        let collection = collection.to_string();
        let order_by = order_by.map(str::to_string);
        self.run(move |engine| engine.get_all(&collection, order_by.as_deref()))
            .await
    }

    /// One document by key.
    ///
    /// # Errors
    ///
    /// Returns unknown collection errors.
    pub async fn get_document(
        &self,
        collection: &str,
        key: RecordKey,
    ) -> Result<Option<Document>, StoreError> {
        let collection = collection.to_string();
        self.run(move |engine| engine.get(&collection, &key)).await
    }

    /// Deletes one document by key. Absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns unknown collection errors.
    pub async fn delete_document(
        &self,
        collection: &str,
        key: RecordKey,
    ) -> Result<(), StoreError> {
        let name = collection.to_string();
        let logged = key.to_string();
        self.run(move |engine| engine.delete(&name, &key)).await?;
        tracing::debug!(collection, key = %logged, "deleted record");
        Ok(())
    }

    /// Removes every document of a collection.
    ///
    /// # Errors
    ///
    /// Returns unknown collection errors.
    pub async fn clear_collection(&self, collection: &str) -> Result<(), StoreError> {
        let name = collection.to_string();
        self.run(move |engine| engine.clear(&name)).await?;
        tracing::info!(collection, "cleared collection");
        Ok(())
    }

    /// Number of documents in a collection.
    ///
    /// # Errors
    ///
    /// Returns unknown collection errors.
    pub async fn count_documents(&self, collection: &str) -> Result<usize, StoreError> {
        let collection = collection.to_string();
        self.run(move |engine| engine.count(&collection)).await
    }

    async fn write(
        &self,
        collection: &str,
        value: Value,
        mode: WriteMode,
    ) -> Result<RecordKey, StoreError> {
        let mut doc = into_document(collection, value)?;
        doc.insert(CREATED_AT.to_string(), Value::from(self.stamper.next_iso8601()));

        let name = collection.to_string();
        let key = self.run(move |engine| engine.write(&name, doc, mode)).await?;
        tracing::debug!(collection, key = %key, ?mode, "wrote record");
        Ok(key)
    }

    /// Runs one engine call on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StorageEngine) -> Result<T, StoreError> + Send + 'static,
    {
        let engine = self.connection.engine().await?;
        tokio::task::spawn_blocking(move || op(engine.as_ref()))
            .await
            .map_err(|e| StoreError::Aborted(e.to_string()))?
    }
}

fn draft_value<C: Collection>(draft: &C::Draft) -> Result<Value, StoreError> {
    C::validate(draft).map_err(|reason| StoreError::invalid_record(C::NAME, reason))?;
    serde_json::to_value(draft).map_err(|e| StoreError::invalid_record(C::NAME, e.to_string()))
}

fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}
