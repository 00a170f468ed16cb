//! Errors from the RocksDB-backed state store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Database opened without one of the expected column families
    #[error("Missing column family {0}")]
    ColumnFamilyNotFound(String),

    /// Stored key does not decode to a document id
    #[error("Corrupt key: {0}")]
    Key(String),

    /// State record or source document failed to (de)serialize
    #[error("Corrupt record: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
