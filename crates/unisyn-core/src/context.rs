use std::sync::Arc;

use tracing::debug;
use unisyn_config::HistoryConfig;

use crate::error::StoreError;
use crate::history::{model_partition, HistoryEntry, HistoryStore, Role};
use crate::registry::ContextMode;

/// Per-partition read window applied to every history read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextLimits {
    pub message_limit: usize,
    pub token_budget: u64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            message_limit: 50,
            token_budget: 4000,
        }
    }
}

impl From<&HistoryConfig> for ContextLimits {
    fn from(cfg: &HistoryConfig) -> Self {
        Self {
            message_limit: cfg.message_limit,
            token_budget: cfg.token_budget,
        }
    }
}

/// Decides which stored messages a model is allowed to see.
///
/// The returned list excludes the system prompt; callers prepend it.
#[derive(Clone)]
pub struct ContextResolver {
    store: Arc<dyn HistoryStore>,
    limits: ContextLimits,
}

impl ContextResolver {
    pub fn new(store: Arc<dyn HistoryStore>, limits: ContextLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    async fn read(&self, partition: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        self.store
            .read(partition, self.limits.message_limit, self.limits.token_budget)
            .await
    }

    /// Build the ordered history for `model_key` under `mode`.
    ///
    /// `Isolated` yields every user turn followed by every reply of this
    /// model. This is concatenation, not a chronological merge: user and
    /// assistant turns live in different partitions.
    pub async fn build_context(
        &self,
        session_id: &str,
        model_key: &str,
        mode: ContextMode,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let user_history = self.read(session_id).await?;

        let context = match mode {
            ContextMode::Isolated => {
                let model_history = self.read(&model_partition(session_id, model_key)).await?;
                concat(user_history, model_history)
            }
            ContextMode::SharedAll => {
                let all_replies = self.store.read_by_prefix(session_id).await?;
                concat(user_history, all_replies)
            }
            ContextMode::Handover => {
                let model_history = self.read(&model_partition(session_id, model_key)).await?;
                if model_history.is_empty() {
                    user_history
                        .into_iter()
                        .filter(|e| e.role == Role::User)
                        .collect()
                } else {
                    model_history
                }
            }
            ContextMode::UserOnly => user_history,
        };

        debug!(
            "Context for {session_id}/{model_key} ({}): {} messages",
            mode.as_str(),
            context.len()
        );
        Ok(context)
    }
}

fn concat(mut first: Vec<HistoryEntry>, second: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    first.extend(second);
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistoryStore;
    use crate::tokens::CharEstimateCounter;

    async fn seeded() -> (Arc<MemoryHistoryStore>, ContextResolver) {
        let store = Arc::new(MemoryHistoryStore::new(Arc::new(CharEstimateCounter)));
        store.append("s1", Role::User, "q1", None).await.unwrap();
        store
            .append("s1_a", Role::Assistant, "a says 1", Some("Model A"))
            .await
            .unwrap();
        store
            .append("s1_b", Role::Assistant, "b says 1", Some("Model B"))
            .await
            .unwrap();
        store.append("s1", Role::User, "q2", None).await.unwrap();
        let resolver = ContextResolver::new(store.clone(), ContextLimits::default());
        (store, resolver)
    }

    fn contents(entries: &[HistoryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_isolated_is_user_turns_then_own_replies() {
        let (_store, resolver) = seeded().await;
        let ctx = resolver
            .build_context("s1", "a", ContextMode::Isolated)
            .await
            .unwrap();
        // Not chronological: q2 was written after "a says 1"
        assert_eq!(contents(&ctx), vec!["q1", "q2", "a says 1"]);
        assert!(ctx.iter().all(|e| e.content != "b says 1"));
    }

    #[tokio::test]
    async fn test_shared_all_sees_every_reply_in_timestamp_order() {
        let (_store, resolver) = seeded().await;
        let ctx = resolver
            .build_context("s1", "b", ContextMode::SharedAll)
            .await
            .unwrap();
        assert_eq!(contents(&ctx), vec!["q1", "q2", "a says 1", "b says 1"]);
        assert_eq!(ctx[2].role, Role::Assistant);
        assert_eq!(ctx[2].model_label.as_deref(), Some("Model A"));
    }

    #[tokio::test]
    async fn test_handover_prefers_private_partition() {
        let (_store, resolver) = seeded().await;
        let ctx = resolver
            .build_context("s1", "a", ContextMode::Handover)
            .await
            .unwrap();
        assert_eq!(contents(&ctx), vec!["a says 1"]);
    }

    #[tokio::test]
    async fn test_handover_without_history_uses_user_turns() {
        let (_store, resolver) = seeded().await;
        let ctx = resolver
            .build_context("s1", "fresh", ContextMode::Handover)
            .await
            .unwrap();
        assert_eq!(contents(&ctx), vec!["q1", "q2"]);
        assert!(ctx.iter().all(|e| e.role == Role::User));
    }

    #[tokio::test]
    async fn test_user_only_mode() {
        let (_store, resolver) = seeded().await;
        let ctx = resolver
            .build_context("s1", "a", ContextMode::parse("something-else"))
            .await
            .unwrap();
        assert_eq!(contents(&ctx), vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn test_limits_apply_per_partition() {
        let store = Arc::new(MemoryHistoryStore::new(Arc::new(CharEstimateCounter)));
        for i in 0..5 {
            store
                .append("s1", Role::User, &format!("q{i}"), None)
                .await
                .unwrap();
            store
                .append("s1_a", Role::Assistant, &format!("r{i}"), Some("A"))
                .await
                .unwrap();
        }
        let resolver = ContextResolver::new(
            store,
            ContextLimits {
                message_limit: 2,
                token_budget: 4000,
            },
        );
        let ctx = resolver
            .build_context("s1", "a", ContextMode::Isolated)
            .await
            .unwrap();
        assert_eq!(contents(&ctx), vec!["q3", "q4", "r3", "r4"]);
    }

    #[tokio::test]
    async fn test_empty_session() {
        let store = Arc::new(MemoryHistoryStore::new(Arc::new(CharEstimateCounter)));
        let resolver = ContextResolver::new(store, ContextLimits::default());
        for mode in [
            ContextMode::Isolated,
            ContextMode::SharedAll,
            ContextMode::Handover,
            ContextMode::UserOnly,
        ] {
            assert!(resolver
                .build_context("none", "a", mode)
                .await
                .unwrap()
                .is_empty());
        }
    }
}
