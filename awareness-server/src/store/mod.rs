//! Warning-count persistence.
//!
//! The `WarningStore` trait abstracts the single `(user_id, warning_count)`
//! keyspace the moderation engine needs. Keys are compared
//! case-insensitively: implementations store the lower-cased user id, so
//! there is at most one record per normalized identity.
//!
//! A missing record reads as zero. A failed read is an error and must never
//! be treated as zero.

mod memory;
mod sqlite;

pub use memory::InMemoryWarningStore;
pub use sqlite::SqliteWarningStore;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::moderation::UserId;

/// One stored warning counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarningRecord {
    /// Normalized (lower-cased) user id.
    pub user_id: String,
    pub warning_count: u64,
}

/// Errors from a warning store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend failed to perform an operation.
    Storage {
        operation: &'static str,
        message: String,
    },
    /// A stored value could not be interpreted.
    Corrupt {
        user_id: String,
        message: String,
    },
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corrupt(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            user_id: user_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Storage { operation, message } => {
                write!(f, "storage error during {}: {}", operation, message)
            }
            StoreError::Corrupt { user_id, message } => {
                write!(f, "corrupt warning record for {}: {}", user_id, message)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable mapping from user identity to warning count.
#[async_trait]
pub trait WarningStore: Send + Sync {
    /// Current count for the user, 0 if there is no record.
    async fn get(&self, user_id: &UserId) -> Result<u64, StoreError>;

    /// Create or overwrite the user's count.
    async fn set(&self, user_id: &UserId, count: u64) -> Result<(), StoreError>;

    /// Every record, ordered by user id.
    async fn all(&self) -> Result<Vec<WarningRecord>, StoreError>;
}
