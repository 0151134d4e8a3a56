//! Essaybook Store: embedded record store for essay evaluations and API keys.

pub mod config;
pub mod error;
pub mod storage;

pub use config::{Backend, OnUnavailable, StoreConfig};
pub use error::StoreError;
pub use storage::{ConnectionState, Document, RecordStore};
