//! Inbound webhook: every request body becomes one relayed message.

use std::future::Future;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, Router};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::relay::{strip_marker, RelaySender};

#[derive(Clone)]
struct WebhookState {
    queue: RelaySender,
}

/// Router that accepts any method on any path.
pub fn router(queue: RelaySender) -> Router {
    Router::new()
        .fallback(ingest)
        .with_state(WebhookState { queue })
}

// Holds the request open until the fan-out loop accepts the payload.
async fn ingest(State(state): State<WebhookState>, body: String) -> StatusCode {
    let payload = strip_marker(&body);
    if payload.trim().is_empty() {
        warn!("Rejecting webhook with empty payload");
        return StatusCode::BAD_REQUEST;
    }
    debug!("Webhook payload received ({} bytes)", payload.len());

    match state.queue.enqueue(payload).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("Dropping webhook payload: {:#}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind webhook listener to {addr}"))
}

pub async fn serve<F>(listener: TcpListener, queue: RelaySender, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Webhook listening on http://{}", addr);
    }

    axum::serve(listener, router(queue))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Webhook server error")
}
