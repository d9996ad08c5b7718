//! HTTP ingress: `GET /` and `POST /send`. Every response is JSON.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::consts::VERSION;
use crate::models::{SendRequest, SendResponse};
use crate::pipeline::PromptProcessor;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<dyn PromptProcessor>,
    /// Upper bound on a whole `/send` call, checks included. `None` waits.
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome_handler))
        .route("/send", post(send_handler))
        .fallback(not_found_handler)
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    serve_with_shutdown(listener, state, shutdown_signal()).await
}

pub async fn serve_with_shutdown<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("guardian {} listening on {}", VERSION, addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    info!("guardian shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn welcome_handler() -> Json<&'static str> {
    Json("welcome")
}

async fn send_handler(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected request body");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    let user_id = request.user_id;
    let run = state.processor.process_prompt(request);
    let outcome = match state.request_timeout {
        Some(limit) => tokio::time::timeout(limit, run).await,
        None => Ok(run.await),
    };
    match outcome {
        Ok(Ok(verdict)) => Json(SendResponse { status: verdict }).into_response(),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(_) => {
            warn!(%user_id, timeout = ?state.request_timeout, "request timed out");
            error_response(StatusCode::GATEWAY_TIMEOUT, "request timed out".to_string())
        }
    }
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found".to_string())
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}
