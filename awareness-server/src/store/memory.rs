//! In-memory implementation of `WarningStore`.
//!
//! All counts are lost on restart. Used in tests and when no state directory
//! is wanted.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StoreError, WarningRecord, WarningStore};
use crate::moderation::UserId;

/// Warning counts in a `HashMap` keyed by normalized user id.
pub struct InMemoryWarningStore {
    counts: RwLock<HashMap<String, u64>>,
}

impl InMemoryWarningStore {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryWarningStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarningStore for InMemoryWarningStore {
    async fn get(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let counts = self.counts.read().await;
        Ok(counts.get(&user_id.normalized()).copied().unwrap_or(0))
    }

    async fn set(&self, user_id: &UserId, count: u64) -> Result<(), StoreError> {
        let mut counts = self.counts.write().await;
        counts.insert(user_id.normalized(), count);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<WarningRecord>, StoreError> {
        let counts = self.counts.read().await;
        let mut records: Vec<WarningRecord> = counts
            .iter()
            .map(|(user_id, count)| WarningRecord {
                user_id: user_id.clone(),
                warning_count: *count,
            })
            .collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(records)
    }
}
