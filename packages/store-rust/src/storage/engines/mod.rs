//! `StorageEngine` implementations.
//!
//! [`RedbStorage`] persists to an embedded database file, [`MemoryStorage`]
//! keeps the same semantics in process memory, and [`NullStorage`] stands in
//! when there is no storage at all.

mod memory;
mod null;
mod redb;

#[cfg(test)]
pub(crate) mod conformance;

pub use self::memory::MemoryStorage;
pub use self::null::NullStorage;
pub use self::redb::RedbStorage;
