//! Shared storage and election errors.

use crate::db::DbError;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;
pub type ElectionResult<T> = Result<T, ElectionError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("shared storage database error: {0}")]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("invalid election config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("lease record encode failed: {0}")]
    Encode(String),
}
