//! Typed views over named collections.
//!
//! The storage layer handles schemaless documents. A [`Collection`] binds a
//! collection name to the Rust types callers write and read, so the record
//! store can offer typed operations without knowing about essays or keys.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::key::RecordKey;
use crate::schema::{API_KEYS, EVALUATIONS};
use crate::types::{ApiKey, Evaluation, NewApiKey, NewEvaluation};

/// Binds a collection name to its key, draft, and record types.
pub trait Collection: Send + Sync + 'static {
    /// Collection name as declared in the database schema.
    const NAME: &'static str;

    /// Primary key type accepted by delete and get.
    type Key: Into<RecordKey> + Send;

    /// Payload supplied by callers on write. Never carries store-owned fields.
    type Draft: Serialize + Send + Sync;

    /// Record returned on read, including store-owned fields.
    type Record: DeserializeOwned + Send;

    /// Checks a draft before it is written.
    ///
    /// # Errors
    ///
    /// Returns the reason the draft cannot be stored.
    fn validate(_draft: &Self::Draft) -> Result<(), String> {
        Ok(())
    }
}

/// The `evaluations` collection.
#[derive(Debug, Clone, Copy)]
pub struct Evaluations;

impl Collection for Evaluations {
    const NAME: &'static str = EVALUATIONS;
    type Key = u64;
    type Draft = NewEvaluation;
    type Record = Evaluation;

    fn validate(draft: &Self::Draft) -> Result<(), String> {
        draft.validate()
    }
}

/// The `api_keys` collection.
#[derive(Debug, Clone, Copy)]
pub struct ApiKeys;

impl Collection for ApiKeys {
    const NAME: &'static str = API_KEYS;
    type Key = String;
    type Draft = NewApiKey;
    type Record = ApiKey;
}
