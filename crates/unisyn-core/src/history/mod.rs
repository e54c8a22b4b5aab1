//! Partitioned, append-only message history.
//!
//! A session has one global partition (keyed by the session id) that holds
//! every user turn, plus one private partition per model
//! (`{session_id}_{model_key}`) that holds that model's replies.

pub mod memory;
pub mod sqlite;

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::tokens::TokenCounter;

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

/// Joins a session id and a model key into a model-session id.
pub const PARTITION_SEPARATOR: &str = "_";

/// Default cap on the merged cross-model read.
pub const DEFAULT_SHARED_LIMIT: usize = 500;

/// Derive the private partition id for one model within a session.
pub fn model_partition(session_id: &str, model_key: &str) -> String {
    format!("{session_id}{PARTITION_SEPARATOR}{model_key}")
}

/// Prefix shared by every derived partition of a session.
pub fn derived_prefix(session_id: &str) -> String {
    format!("{session_id}{PARTITION_SEPARATOR}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(StoreError::InvalidRole(other.to_string())),
        }
    }
}

/// A stored message. Never mutated after append.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub model_label: Option<String>,
    /// Microseconds since the Unix epoch, unique within a store.
    pub timestamp: i64,
}

impl StoredMessage {
    pub fn to_entry(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.role,
            content: self.content.clone(),
            model_label: self.model_label.clone(),
        }
    }
}

/// A message as returned by history reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_label: Option<String>,
}

/// Append/query contract over per-partition message logs.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one message with a timestamp greater than every earlier append
    /// to the same partition.
    async fn append(
        &self,
        partition: &str,
        role: Role,
        content: &str,
        model_label: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Most recent messages of a partition that fit `token_budget`, oldest first.
    ///
    /// At most `message_limit` candidates are considered. Walking newest to
    /// oldest, the first message that would push the running total over the
    /// budget ends the selection.
    async fn read(
        &self,
        partition: &str,
        message_limit: usize,
        token_budget: u64,
    ) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Every message in partitions starting with `{session_id}_`, ordered by
    /// timestamp and capped at the store's shared limit.
    ///
    /// Matching is a literal prefix test, so a session named `s1_x` is also
    /// visible as a derived partition of `s1`.
    async fn read_by_prefix(&self, session_id: &str) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Delete the partition named exactly `session_id`.
    async fn clear(&self, session_id: &str) -> Result<(), StoreError>;

    /// Delete every derived partition of `session_id`. Returns the number of
    /// messages removed.
    async fn clear_by_prefix(&self, session_id: &str) -> Result<usize, StoreError>;
}

/// Store-wide clock handing out strictly increasing microsecond timestamps.
#[derive(Debug, Default)]
pub(crate) struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub(crate) fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    pub(crate) fn next(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_micros();
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }
}

/// Apply the message-limit and token-budget window to a newest-first sequence.
pub(crate) fn budget_window<'a, I>(
    newest_first: I,
    message_limit: usize,
    token_budget: u64,
    counter: &dyn TokenCounter,
) -> Vec<HistoryEntry>
where
    I: IntoIterator<Item = &'a StoredMessage>,
{
    let mut picked = Vec::new();
    let mut used = 0u64;
    for msg in newest_first.into_iter().take(message_limit) {
        let cost = counter.count_tokens(&msg.content);
        if used.saturating_add(cost) > token_budget {
            break;
        }
        used += cost;
        picked.push(msg.to_entry());
    }
    picked.reverse();
    picked
}
