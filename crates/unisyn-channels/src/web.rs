use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use unisyn_config::GatewayConfig;
use unisyn_core::{ChatError, ChatOrchestrator, ChatRequest, ModelDescriptor};

#[derive(Clone)]
struct AppState {
    orchestrator: ChatOrchestrator,
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    ok: bool,
    models: &'a [ModelDescriptor],
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct HistoryMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    history: Vec<HistoryMessage>,
}

#[derive(Serialize)]
struct ClearResponse {
    session_id: String,
    cleared: usize,
}

/// Routes of the gateway, with permissive CORS for browser clients.
pub fn build_router(orchestrator: ChatOrchestrator) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(api_chat))
        .route(
            "/api/history/{session_id}",
            get(api_history).delete(api_clear_history),
        )
        .layer(CorsLayer::permissive())
        .with_state(AppState { orchestrator })
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        ok: true,
        models: state.orchestrator.registry().models(),
    })
    .into_response()
}

async fn api_chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    match state.orchestrator.handle_chat(request).await {
        Ok(resp) => Json(resp).into_response(),
        // Clients expect the validation error in a 200 body
        Err(ChatError::MissingPrompt) => error_response(StatusCode::OK, ChatError::MissingPrompt),
        Err(e) => {
            error!("Chat request failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn api_history(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.orchestrator.history(&session_id).await {
        Ok(entries) => Json(HistoryResponse {
            session_id,
            history: entries
                .into_iter()
                .map(|e| HistoryMessage {
                    role: e.role.as_str(),
                    content: e.content,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => {
            error!("History read for {session_id} failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn api_clear_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.orchestrator.clear_session(&session_id).await {
        Ok(cleared) => Json(ClearResponse {
            session_id,
            cleared,
        })
        .into_response(),
        Err(e) => {
            error!("Clearing {session_id} failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// HTTP front end for a [`ChatOrchestrator`].
pub struct WebServer {
    gateway_config: GatewayConfig,
    orchestrator: ChatOrchestrator,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl WebServer {
    pub fn new(gateway_config: GatewayConfig, orchestrator: ChatOrchestrator) -> Self {
        Self {
            gateway_config,
            orchestrator,
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Bind and serve in the background. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let router = build_router(self.orchestrator.clone());

        let addr: SocketAddr = format!("{}:{}", self.gateway_config.host, self.gateway_config.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid gateway listen address: {e}"))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        info!("Unisyn gateway listening on http://{bound}");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!("Web server error: {e}");
            }
        });

        Ok(bound)
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
            info!("Unisyn gateway stopped");
        }
    }
}
