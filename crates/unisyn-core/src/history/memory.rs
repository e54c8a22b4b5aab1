use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    budget_window, derived_prefix, HistoryEntry, HistoryStore, MonotonicClock, Role,
    StoredMessage, DEFAULT_SHARED_LIMIT,
};
use crate::error::StoreError;
use crate::tokens::TokenCounter;

/// Process-local history store.
///
/// Each partition is a separate map entry, so concurrent fan-out tasks writing
/// to their own model partitions never contend on the same lock.
pub struct MemoryHistoryStore {
    partitions: DashMap<String, Vec<StoredMessage>>,
    clock: MonotonicClock,
    counter: Arc<dyn TokenCounter>,
    shared_limit: usize,
}

impl MemoryHistoryStore {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            partitions: DashMap::new(),
            clock: MonotonicClock::default(),
            counter,
            shared_limit: DEFAULT_SHARED_LIMIT,
        }
    }

    pub fn with_shared_limit(mut self, limit: usize) -> Self {
        self.shared_limit = limit;
        self
    }

    /// Number of messages in one partition.
    pub fn len(&self, partition: &str) -> usize {
        self.partitions.get(partition).map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, partition: &str) -> bool {
        self.len(partition) == 0
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(
        &self,
        partition: &str,
        role: Role,
        content: &str,
        model_label: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entry = self.partitions.entry(partition.to_string()).or_default();
        // Stamped under the partition's shard lock so appends land in timestamp order.
        let timestamp = self.clock.next();
        entry.push(StoredMessage {
            role,
            content: content.to_string(),
            model_label: model_label.map(String::from),
            timestamp,
        });
        Ok(())
    }

    async fn read(
        &self,
        partition: &str,
        message_limit: usize,
        token_budget: u64,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let Some(messages) = self.partitions.get(partition) else {
            return Ok(Vec::new());
        };
        Ok(budget_window(
            messages.iter().rev(),
            message_limit,
            token_budget,
            self.counter.as_ref(),
        ))
    }

    async fn read_by_prefix(&self, session_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let prefix = derived_prefix(session_id);
        let mut merged: Vec<StoredMessage> = self
            .partitions
            .iter()
            .filter(|p| p.key().starts_with(&prefix))
            .flat_map(|p| p.value().clone())
            .collect();
        merged.sort_by_key(|m| m.timestamp);
        Ok(merged
            .iter()
            .take(self.shared_limit)
            .map(StoredMessage::to_entry)
            .collect())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        self.partitions.remove(session_id);
        Ok(())
    }

    async fn clear_by_prefix(&self, session_id: &str) -> Result<usize, StoreError> {
        let prefix = derived_prefix(session_id);
        let mut removed = 0usize;
        self.partitions.retain(|key, messages| {
            if key.starts_with(&prefix) {
                removed += messages.len();
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}
