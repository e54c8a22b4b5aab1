//! Fan-out of one user turn to every selected model.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::backend::{ChatMessage, InvokeParams, ModelBackend};
use crate::context::ContextResolver;
use crate::error::ChatError;
use crate::history::{model_partition, HistoryEntry, HistoryStore, Role};
use crate::registry::{ContextMode, ConversationType, ModelDescriptor, ModelRegistry};

/// Session used when the client does not name one.
pub const DEFAULT_SESSION: &str = "default";

/// A parsed chat request. Absent and `null` fields are treated alike.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub models: Vec<String>,
    #[serde(default)]
    pub conversation_type: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Result for one model. `error` is set and `text` is empty on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelOutcome {
    pub model: String,
    pub label: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub text: String,
}

impl ModelOutcome {
    fn success(model: &ModelDescriptor, text: String) -> Self {
        Self {
            model: model.backend_id.clone(),
            label: model.label.clone(),
            key: model.key.clone(),
            error: None,
            text,
        }
    }

    fn failure(model: &ModelDescriptor, error: String) -> Self {
        Self {
            model: model.backend_id.clone(),
            label: model.label.clone(),
            key: model.key.clone(),
            error: Some(error),
            text: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub results: Vec<ModelOutcome>,
    pub session_id: String,
    pub conversation_type: ConversationType,
    pub context_mode: ContextMode,
}

/// Coordinates history, context resolution and backend calls for a request.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ChatOrchestrator {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn HistoryStore>,
    resolver: ContextResolver,
    backend: Arc<dyn ModelBackend>,
    params: InvokeParams,
    default_session: String,
}

impl ChatOrchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn HistoryStore>,
        resolver: ContextResolver,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        Self {
            registry,
            store,
            resolver,
            backend,
            params: InvokeParams::default(),
            default_session: DEFAULT_SESSION.to_string(),
        }
    }

    pub fn with_params(mut self, params: InvokeParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_default_session(mut self, session: impl Into<String>) -> Self {
        self.default_session = session.into();
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    fn session_or_default(&self, session_id: Option<&str>) -> String {
        session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_session.as_str())
            .to_string()
    }

    /// Record the prompt once, then query every resolved model concurrently.
    ///
    /// Fails only for a blank prompt or when the user turn cannot be stored.
    /// Per-model failures come back as outcomes with `error` set.
    pub async fn handle_chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ChatError::MissingPrompt);
        }
        let session_id = self.session_or_default(request.session_id.as_deref());

        // Written before any model task starts so its timestamp precedes every reply.
        self.store
            .append(&session_id, Role::User, prompt, None)
            .await?;

        let resolution = self
            .registry
            .resolve(&request.models, request.conversation_type.as_deref());
        let conversation_type = resolution.conversation_type;
        let context_mode = resolution.context_mode;

        info!(
            "Chat session={session_id} type={} models=[{}]",
            conversation_type.as_str(),
            resolution
                .models
                .iter()
                .map(|m| m.key.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let handles: Vec<_> = resolution
            .models
            .iter()
            .cloned()
            .map(|model| {
                let this = self.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    this.query_model(&session_id, &model, conversation_type, context_mode)
                        .await
                })
            })
            .collect();

        let results = join_all(handles)
            .await
            .into_iter()
            .zip(&resolution.models)
            .map(|(joined, model)| {
                joined.unwrap_or_else(|e| {
                    warn!("Model task for {} aborted: {e}", model.key);
                    ModelOutcome::failure(model, ChatError::TaskAborted(e.to_string()).to_string())
                })
            })
            .collect();

        Ok(ChatResponse {
            results,
            session_id,
            conversation_type,
            context_mode,
        })
    }

    async fn query_model(
        &self,
        session_id: &str,
        model: &ModelDescriptor,
        conversation_type: ConversationType,
        context_mode: ContextMode,
    ) -> ModelOutcome {
        match self
            .generate(session_id, model, conversation_type, context_mode)
            .await
        {
            Ok(text) => ModelOutcome::success(model, text),
            Err(e) => {
                warn!("Model {} ({}) failed: {e}", model.key, model.backend_id);
                ModelOutcome::failure(model, e.to_string())
            }
        }
    }

    async fn generate(
        &self,
        session_id: &str,
        model: &ModelDescriptor,
        conversation_type: ConversationType,
        context_mode: ContextMode,
    ) -> Result<String, ChatError> {
        let history = self
            .resolver
            .build_context(session_id, &model.key, context_mode)
            .await?;

        // The prompt is already part of `history`; it is not appended again.
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(
            self.registry.compose_system_prompt(conversation_type, model),
        ));
        // Shared readers see replies from several models; name the author.
        let tag_authors = context_mode == ContextMode::SharedAll;
        messages.extend(history.iter().map(|entry| {
            if tag_authors {
                ChatMessage::tagged(entry)
            } else {
                ChatMessage::from(entry)
            }
        }));

        let text = self
            .backend
            .complete(&model.backend_id, &messages, self.params)
            .await?;

        self.store
            .append(
                &model_partition(session_id, &model.key),
                Role::Assistant,
                &text,
                Some(&model.label),
            )
            .await?;
        Ok(text)
    }

    /// User turns of a session, windowed like a context read.
    pub async fn history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, ChatError> {
        let limits = self.resolver.limits();
        Ok(self
            .store
            .read(session_id, limits.message_limit, limits.token_budget)
            .await?)
    }

    /// Purge a session and every model partition derived from it.
    /// Returns the number of model replies removed.
    pub async fn clear_session(&self, session_id: &str) -> Result<usize, ChatError> {
        self.store.clear(session_id).await?;
        let removed = self.store.clear_by_prefix(session_id).await?;
        info!("Cleared session {session_id} ({removed} model replies)");
        Ok(removed)
    }
}
