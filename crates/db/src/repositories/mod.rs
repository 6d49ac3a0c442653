use thiserror::Error;

use forecourt_core::store::StoreError;

pub mod ledger;
pub mod memory;

pub use ledger::SqlLedgerStore;
pub use memory::InMemoryLedgerStore;

/// Change-feed buffer used when a store is built without an explicit capacity.
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(sqlx::Error::Database(error))
                if error.is_unique_violation() =>
            {
                StoreError::Duplicate(error.message().to_owned())
            }
            RepositoryError::Database(error) => StoreError::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}
