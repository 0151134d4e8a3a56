//! Error taxonomy for the record store.
//!
//! Errors fall into two classes. Connection errors mean the database could
//! not be opened; the cached handle stays empty and the next operation
//! tries again. Transaction errors mean a single operation was rejected or
//! aborted; the cached handle remains valid for later operations.
//!
//! Missing storage capability is deliberately not an error: the store swaps
//! in a no-op engine instead.

/// Errors returned by record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open database '{name}': {reason}")]
    Connection { name: String, reason: String },
    #[error("database '{name}' is at version {stored}, newer than requested version {requested}")]
    VersionDowngrade {
        name: String,
        stored: u32,
        requested: u32,
    },
    #[error("invalid schema: {}", errors.join("; "))]
    InvalidSchema { errors: Vec<String> },
    #[error("constraint violated in '{collection}': {reason}")]
    Constraint { collection: String, reason: String },
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
    #[error("unknown index '{index}' on collection '{collection}'")]
    UnknownIndex { collection: String, index: String },
    #[error("invalid record for '{collection}': {reason}")]
    InvalidRecord { collection: String, reason: String },
    #[error("storage engine error: {0}")]
    Engine(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("operation aborted: {0}")]
    Aborted(String),
}

impl StoreError {
    /// Whether opening the database failed.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::VersionDowngrade { .. } | Self::InvalidSchema { .. }
        )
    }

    /// Whether a single operation was rejected or aborted.
    #[must_use]
    pub fn is_transaction_error(&self) -> bool {
        !self.is_connection_error()
    }

    pub(crate) fn invalid_record(collection: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn constraint(collection: &str, reason: impl Into<String>) -> Self {
        Self::Constraint {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }
}

macro_rules! engine_error {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(err: $ty) -> Self {
                    Self::Engine(err.to_string())
                }
            }
        )+
    };
}

engine_error!(
    redb::Error,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_errors() {
        let err = StoreError::VersionDowngrade {
            name: "db".to_string(),
            stored: 3,
            requested: 2,
        };
        assert!(err.is_connection_error());
        assert!(!err.is_transaction_error());

        let err = StoreError::InvalidSchema {
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.is_connection_error());
        assert_eq!(err.to_string(), "invalid schema: a; b");
    }

    #[test]
    fn classifies_transaction_errors() {
        let err = StoreError::constraint("api_keys", "key already exists");
        assert!(err.is_transaction_error());
        assert_eq!(
            err.to_string(),
            "constraint violated in 'api_keys': key already exists"
        );
        assert!(StoreError::UnknownCollection("x".to_string()).is_transaction_error());
        assert!(StoreError::Aborted("panic".to_string()).is_transaction_error());
    }
}
