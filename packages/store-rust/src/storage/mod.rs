//! Layered storage for the record store.
//!
//! - **Engines** ([`StorageEngine`]): synchronous, transactional collections
//!   of documents with secondary indexes. [`RedbStorage`] on disk,
//!   [`MemoryStorage`] in memory, [`NullStorage`] when there is no storage.
//! - **Connection** ([`Connection`]): opens the configured engine once, on
//!   first use, and applies the failure policy.
//! - **Record store** ([`RecordStore`]): async, typed operations that stamp
//!   creation times and run engine calls on the blocking pool.

pub mod connection;
pub mod engine;
pub mod engines;
pub mod factory;
pub mod record;
pub mod record_store;
pub mod upgrade;

pub use connection::{Connection, ConnectionState};
pub use engine::{StorageEngine, WriteMode};
pub use engines::{MemoryStorage, NullStorage, RedbStorage};
pub use factory::open_engine;
pub use record::Document;
pub use record_store::RecordStore;
