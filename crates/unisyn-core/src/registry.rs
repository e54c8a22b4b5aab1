//! Model and conversation-mode registry.
//!
//! Built once at startup from the built-in catalogue plus config overrides,
//! then shared read-only by every request.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use unisyn_config::{ChatConfig, Config, ModelEntry, PromptsConfig};

/// Key of the pseudo-model used when nothing else resolves.
pub const DEFAULT_MODEL_KEY: &str = "unisyn-auto";

/// Upper bound on concurrent backend calls per request.
pub const MAX_FANOUT: usize = 4;

/// How a request's models relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Solo,
    MultiIsolated,
    MultiShared,
}

impl ConversationType {
    pub const ALL: [ConversationType; 3] = [
        ConversationType::Solo,
        ConversationType::MultiIsolated,
        ConversationType::MultiShared,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationType::Solo => "solo",
            ConversationType::MultiIsolated => "multi_isolated",
            ConversationType::MultiShared => "multi_shared",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solo" => Some(Self::Solo),
            "multi_isolated" => Some(Self::MultiIsolated),
            "multi_shared" => Some(Self::MultiShared),
            _ => None,
        }
    }

    /// Which partitions a model may see in this conversation type.
    pub fn context_mode(&self) -> ContextMode {
        match self {
            ConversationType::MultiShared => ContextMode::SharedAll,
            ConversationType::Solo | ConversationType::MultiIsolated => ContextMode::Isolated,
        }
    }

    fn builtin_prompt(&self) -> &'static str {
        match self {
            ConversationType::Solo => {
                "You are a single AI assistant in a one-on-one conversation on Unisyn AI. \
                 Focus on being clear, helpful, concise, and truthful."
            }
            ConversationType::MultiIsolated => {
                "You are one of several AI assistants in Unisyn AI. \
                 You do NOT see the other assistants' messages. \
                 Provide your own best answer independently."
            }
            ConversationType::MultiShared => {
                "You are one of several AI assistants in Unisyn AI. \
                 You CAN see previous responses from other assistants. \
                 You may critique, build on, or contrast them when helpful."
            }
        }
    }
}

/// Context visibility policy applied by the context resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// User turns plus the model's own replies.
    Isolated,
    /// User turns plus every model's replies.
    SharedAll,
    /// Own replies if any, otherwise user turns only. Not reachable over HTTP.
    Handover,
    /// User turns only.
    UserOnly,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextMode::Isolated => "isolated",
            ContextMode::SharedAll => "shared_all",
            ContextMode::Handover => "handover",
            ContextMode::UserOnly => "user_only",
        }
    }

    /// Unrecognized names fall back to user turns only.
    pub fn parse(s: &str) -> Self {
        match s {
            "isolated" => Self::Isolated,
            "shared_all" => Self::SharedAll,
            "handover" => Self::Handover,
            _ => Self::UserOnly,
        }
    }
}

/// A backend the gateway can fan out to.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelDescriptor {
    pub key: String,
    #[serde(rename = "id")]
    pub backend_id: String,
    pub label: String,
    #[serde(skip)]
    pub persona: Option<String>,
}

impl ModelDescriptor {
    pub fn new(key: &str, backend_id: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            backend_id: backend_id.to_string(),
            label: label.to_string(),
            persona: None,
        }
    }
}

impl From<&ModelEntry> for ModelDescriptor {
    fn from(e: &ModelEntry) -> Self {
        Self {
            key: e.key.clone(),
            backend_id: e.id.clone(),
            label: e.label.clone(),
            persona: e.persona.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

/// Outcome of resolving a request's model keys and mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub models: Vec<ModelDescriptor>,
    pub conversation_type: ConversationType,
    pub context_mode: ContextMode,
}

/// Read-only table of models and per-mode system prompts.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    /// Insertion-ordered so `/health` lists models in catalogue order.
    models: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
    default_key: String,
    max_models: usize,
    prompts: HashMap<ConversationType, String>,
}

impl ModelRegistry {
    /// Build from explicit parts. Fails if `default_key` is not in `models`.
    pub fn new(
        models: Vec<ModelDescriptor>,
        default_key: &str,
        max_models: usize,
        prompts: &PromptsConfig,
    ) -> Result<Self> {
        let mut ordered: Vec<ModelDescriptor> = Vec::with_capacity(models.len());
        let mut index = HashMap::new();
        for model in models {
            if let Some(&pos) = index.get(&model.key) {
                ordered[pos] = model;
            } else {
                index.insert(model.key.clone(), ordered.len());
                ordered.push(model);
            }
        }

        if !index.contains_key(default_key) {
            bail!("default model '{default_key}' is not in the model registry");
        }
        if max_models == 0 {
            bail!("maxModels must be at least 1");
        }
        if max_models > MAX_FANOUT {
            warn!("maxModels {max_models} exceeds the fan-out cap, using {MAX_FANOUT}");
        }
        let max_models = max_models.min(MAX_FANOUT);

        let prompts = ConversationType::ALL
            .iter()
            .map(|ct| {
                let custom = match ct {
                    ConversationType::Solo => prompts.solo.as_ref(),
                    ConversationType::MultiIsolated => prompts.multi_isolated.as_ref(),
                    ConversationType::MultiShared => prompts.multi_shared.as_ref(),
                };
                let text = custom
                    .filter(|p| !p.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| ct.builtin_prompt().to_string());
                (*ct, text)
            })
            .collect();

        Ok(Self {
            models: ordered,
            index,
            default_key: default_key.to_string(),
            max_models,
            prompts,
        })
    }

    /// The built-in catalogue with default prompts and fan-out cap.
    pub fn builtin() -> Self {
        Self::new(
            builtin_models(),
            DEFAULT_MODEL_KEY,
            MAX_FANOUT,
            &PromptsConfig::default(),
        )
        .expect("built-in catalogue contains the default model")
    }

    /// Built-in catalogue merged with config models and prompt overrides.
    pub fn from_config(config: &Config) -> Result<Self> {
        let ChatConfig {
            default_model,
            max_models,
            ..
        } = &config.chat;
        let mut models = builtin_models();
        models.extend(config.models.iter().map(ModelDescriptor::from));
        Self::new(models, default_model, *max_models, &config.prompts)
    }

    pub fn get(&self, key: &str) -> Option<&ModelDescriptor> {
        self.index.get(key).map(|&i| &self.models[i])
    }

    pub fn default_model(&self) -> &ModelDescriptor {
        &self.models[self.index[&self.default_key]]
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn max_models(&self) -> usize {
        self.max_models
    }

    pub fn system_prompt(&self, conversation_type: ConversationType) -> &str {
        self.prompts
            .get(&conversation_type)
            .map(String::as_str)
            .unwrap_or_else(|| conversation_type.builtin_prompt())
    }

    /// System message for one model: the mode template, the model's label, and
    /// its persona when configured.
    pub fn compose_system_prompt(
        &self,
        conversation_type: ConversationType,
        model: &ModelDescriptor,
    ) -> String {
        let mut prompt = format!(
            "{}\n\nYou are answering as {}.",
            self.system_prompt(conversation_type),
            model.label
        );
        if let Some(ref persona) = model.persona {
            prompt.push_str("\n\n");
            prompt.push_str(persona);
        }
        prompt
    }

    /// Map requested keys and mode onto registry models and a context policy.
    ///
    /// Never fails: unknown keys are dropped, an empty result falls back to the
    /// default model, and an unknown mode becomes `solo`.
    pub fn resolve(&self, keys: &[String], requested_mode: Option<&str>) -> Resolution {
        let default_keys = [self.default_key.clone()];
        let keys: &[String] = if keys.is_empty() { &default_keys } else { keys };

        let mut models: Vec<ModelDescriptor> = keys
            .iter()
            .take(self.max_models)
            .filter_map(|k| self.get(k).cloned())
            .collect();
        if models.is_empty() {
            models.push(self.default_model().clone());
        }

        let conversation_type = match requested_mode.filter(|m| !m.is_empty()) {
            None if models.len() == 1 => ConversationType::Solo,
            None => ConversationType::MultiIsolated,
            Some(mode) => ConversationType::parse(mode).unwrap_or(ConversationType::Solo),
        };

        Resolution {
            models,
            conversation_type,
            context_mode: conversation_type.context_mode(),
        }
    }
}

fn builtin_models() -> Vec<ModelDescriptor> {
    [
        // Pseudo-model for auto-routing
        ("unisyn-auto", "microsoft/phi-4", "Unisyn Auto"),
        // OpenAI
        ("gpt51", "openai/gpt-5.1", "OpenAI · GPT-5.1"),
        ("gpt5", "openai/gpt-5", "OpenAI · GPT-5"),
        ("gpt41mini", "openai/gpt-4.1-mini", "OpenAI · GPT-4.1 Mini"),
        ("gpt4omini", "openai/gpt-4o-mini", "OpenAI · GPT-4o Mini"),
        ("gpt35", "openai/gpt-3.5-turbo", "OpenAI · GPT-3.5 Turbo"),
        // Anthropic
        ("claudehaiku45", "anthropic/claude-haiku-4.5", "Claude Haiku 4.5"),
        ("claude37sonnet", "anthropic/claude-3.7-sonnet", "Claude 3.7 Sonnet"),
        // Google
        ("gemini25pro", "google/gemini-2.5-pro", "Gemini 2.5 Pro"),
        ("gemini25flash", "google/gemini-2.5-flash", "Gemini 2.5 Flash"),
        ("gemma327b", "google/gemma-3-27b-it:free", "Gemma 3 27B"),
        // Meta
        ("llama4mav", "meta-llama/llama-4-maverick:free", "Llama 4 Maverick"),
        ("llama33370b", "meta-llama/llama-3.3-70b-instruct:free", "Llama 3.3 70B"),
        // DeepSeek
        ("deepseekv31", "deepseek/deepseek-chat-v3.1", "DeepSeek Chat v3.1"),
        ("deepseek0324", "deepseek/deepseek-chat-v3-0324:free", "DeepSeek Chat v3-0324"),
        ("deepseekr1", "deepseek/deepseek-r1:free", "DeepSeek R1"),
        // xAI
        ("grok4fast", "x-ai/grok-4-fast", "Grok-4 Fast"),
        ("grok4", "x-ai/grok-4", "Grok-4"),
        ("grok3", "x-ai/grok-3", "Grok-3"),
        ("grok3mini", "x-ai/grok-3-mini", "Grok-3 Mini"),
        // Perplexity
        ("sonarpro", "perplexity/sonar-pro", "Sonar Pro"),
        ("sonar", "perplexity/sonar", "Sonar"),
        ("sonarreason", "perplexity/sonar-reasoning", "Sonar Reasoning"),
        // Microsoft
        ("phi4rp", "microsoft/phi-4-reasoning-plus", "Phi-4 Reasoning Plus"),
        ("phi4", "microsoft/phi-4", "Phi-4"),
        ("phi3m", "microsoft/phi-3-medium-128k-instruct", "Phi-3 Medium 128k"),
        // Mistral
        ("mistrallarge", "mistralai/mistral-large-2407", "Mistral Large 2407"),
        ("mistralmed", "mistralai/mistral-medium-3.1", "Mistral Medium 3.1"),
        ("mistralsmall", "mistralai/mistral-small-3.2-24b-instruct:free", "Mistral Small 24B"),
        // Qwen
        ("qwen235b", "qwen/qwen3-235b-a22b:free", "Qwen3 235B"),
        ("qwencoder", "qwen/qwen3-coder:free", "Qwen3 Coder"),
    ]
    .iter()
    .map(|(key, id, label)| ModelDescriptor::new(key, id, label))
    .collect()
}
