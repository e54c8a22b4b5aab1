use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use unisyn_channels::WebServer;
use unisyn_config::{
    expand_home, find_config_path, load_config, resolve_api_base, resolve_api_key, Config,
    HistoryBackend, HistoryConfig,
};
use unisyn_core::{
    CharEstimateCounter, ChatError, ChatOrchestrator, ChatRequest, ContextLimits, ContextResolver,
    HistoryStore, InvokeParams, MemoryHistoryStore, ModelRegistry, OpenRouterBackend,
    SqliteHistoryStore,
};

#[derive(Parser)]
#[command(name = "unisyn", about = "Multi-model chat gateway", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve,
    /// Send one prompt to one or more models
    Chat {
        /// Prompt text
        #[arg(short, long)]
        prompt: String,
        /// Session ID (defaults to chat.defaultSession)
        #[arg(short, long)]
        session: Option<String>,
        /// Model key, repeatable
        #[arg(short, long = "model")]
        models: Vec<String>,
        /// Conversation type: solo, multi_isolated or multi_shared
        #[arg(long)]
        mode: Option<String>,
        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },
    /// List registered models
    Models,
    /// Print the user turns of a session
    History {
        #[arg(short, long)]
        session: String,
    },
    /// Delete a session and every model reply derived from it
    Clear {
        #[arg(short, long)]
        session: String,
    },
    /// Show resolved configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);

    match cli.command {
        Commands::Status => run_status(&config_path)?,
        Commands::Serve => run_gateway(&load_config(&config_path)?).await?,
        Commands::Chat {
            prompt,
            session,
            models,
            mode,
            json,
        } => {
            let request = ChatRequest {
                prompt,
                session_id: session,
                models,
                conversation_type: mode,
            };
            run_chat(&load_config(&config_path)?, request, json).await?;
        }
        Commands::Models => run_models(&load_config(&config_path)?)?,
        Commands::History { session } => {
            let config = load_config(&config_path)?;
            let orchestrator = build_orchestrator(&config)?;
            warn_if_ephemeral(&config.history);
            let entries = orchestrator.history(&session).await?;
            if entries.is_empty() {
                println!("No history for session '{session}'");
            }
            for entry in entries {
                println!("[{}] {}", entry.role.as_str(), entry.content);
            }
        }
        Commands::Clear { session } => {
            let config = load_config(&config_path)?;
            let orchestrator = build_orchestrator(&config)?;
            warn_if_ephemeral(&config.history);
            let removed = orchestrator.clear_session(&session).await?;
            println!("Cleared session '{session}' ({removed} model replies removed)");
        }
    }

    Ok(())
}

fn warn_if_ephemeral(cfg: &HistoryConfig) {
    if cfg.backend == HistoryBackend::Memory {
        warn!("History backend is in-memory; nothing persists between CLI runs");
    }
}

fn build_store(cfg: &HistoryConfig) -> Result<Arc<dyn HistoryStore>> {
    let counter = Arc::new(CharEstimateCounter);
    let store: Arc<dyn HistoryStore> = match cfg.backend {
        HistoryBackend::Memory => {
            Arc::new(MemoryHistoryStore::new(counter).with_shared_limit(cfg.shared_limit))
        }
        HistoryBackend::Sqlite => {
            let path = expand_home(&cfg.path);
            let store = SqliteHistoryStore::open(&path, counter)
                .with_context(|| format!("failed to open history database '{}'", path.display()))?;
            Arc::new(store.with_shared_limit(cfg.shared_limit))
        }
    };
    Ok(store)
}

fn build_orchestrator(config: &Config) -> Result<ChatOrchestrator> {
    let registry = Arc::new(ModelRegistry::from_config(config)?);
    let store = build_store(&config.history)?;
    let resolver = ContextResolver::new(store.clone(), ContextLimits::from(&config.history));
    let backend = OpenRouterBackend::from_config(&config.providers.openrouter)
        .context("failed to build OpenRouter client")?;
    if !backend.has_api_key() {
        warn!("No OpenRouter API key configured; set OPENROUTER_API_KEY or providers.openrouter.apiKey");
    }

    Ok(
        ChatOrchestrator::new(registry, store, resolver, Arc::new(backend))
            .with_params(InvokeParams {
                temperature: config.chat.temperature,
                max_tokens: config.chat.max_tokens,
            })
            .with_default_session(config.chat.default_session.clone()),
    )
}

async fn run_gateway(config: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    info!(
        "Loaded {} models (default: {}, max per request: {})",
        orchestrator.registry().models().len(),
        orchestrator.registry().default_model().key,
        orchestrator.registry().max_models()
    );

    let server = WebServer::new(config.gateway.clone(), orchestrator);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    server.stop().await;
    Ok(())
}

async fn run_chat(config: &Config, request: ChatRequest, json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let response = match orchestrator.handle_chat(request).await {
        Ok(r) => r,
        Err(ChatError::MissingPrompt) => anyhow::bail!("Missing prompt"),
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!(
        "session: {}  type: {}  context: {}",
        response.session_id,
        response.conversation_type.as_str(),
        response.context_mode.as_str()
    );
    for outcome in &response.results {
        println!();
        println!("── {} ({}) ──", outcome.label, outcome.model);
        match outcome.error {
            Some(ref e) => println!("error: {e}"),
            None => println!("{}", outcome.text),
        }
    }
    Ok(())
}

fn run_models(config: &Config) -> Result<()> {
    let registry = ModelRegistry::from_config(config)?;
    let default_key = registry.default_model().key.clone();
    for model in registry.models() {
        let marker = if model.key == default_key { "*" } else { " " };
        println!("{marker} {:<16} {:<48} {}", model.key, model.backend_id, model.label);
    }
    Ok(())
}

fn run_status(config_path: &Path) -> Result<()> {
    println!("unisyn status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!("  Config:    {} (not found, using defaults)", config_path.display());
    }
    let config = load_config(config_path)?;

    println!(
        "  Gateway:   http://{}:{}",
        config.gateway.host, config.gateway.port
    );

    let openrouter = &config.providers.openrouter;
    println!("  Endpoint:  {}", resolve_api_base(openrouter));
    println!(
        "  API key:   {}",
        if resolve_api_key(openrouter).is_some() {
            "configured"
        } else {
            "not set"
        }
    );
    println!("  Timeout:   {}s", openrouter.timeout_secs);
    println!();

    match config.history.backend {
        HistoryBackend::Memory => println!("  History:   in-memory"),
        HistoryBackend::Sqlite => println!(
            "  History:   sqlite ({})",
            expand_home(&config.history.path).display()
        ),
    }
    println!(
        "  Window:    {} messages / {} tokens per partition, {} shared",
        config.history.message_limit, config.history.token_budget, config.history.shared_limit
    );
    println!();

    match ModelRegistry::from_config(&config) {
        Ok(registry) => println!(
            "  Models:    {} registered, default '{}', max {} per request",
            registry.models().len(),
            registry.default_model().key,
            registry.max_models()
        ),
        Err(e) => println!("  Models:    invalid ({e})"),
    }
    println!(
        "  Sampling:  temperature {}, max tokens {}",
        config.chat.temperature, config.chat.max_tokens
    );

    Ok(())
}
