pub mod backend;
pub mod context;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod registry;
pub mod tokens;

// Re-export key types
pub use backend::{ChatMessage, InvokeParams, ModelBackend, OpenRouterBackend};
pub use context::{ContextLimits, ContextResolver};
pub use error::{ChatError, InvokeError, StoreError};
pub use history::{HistoryEntry, HistoryStore, MemoryHistoryStore, Role, SqliteHistoryStore};
pub use orchestrator::{ChatOrchestrator, ChatRequest, ChatResponse, ModelOutcome};
pub use registry::{ContextMode, ConversationType, ModelDescriptor, ModelRegistry};
pub use tokens::{CharEstimateCounter, TokenCounter};
