//! Webhook transport: `POST /` with the raw event as JSON.
//!
//! The platform retries any delivery that doesn't get a timely HTTP answer,
//! so every request is finalized exactly once, either with a synchronous
//! reply body or with a bare `200 OK`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::message::{ChatMessage, ResponseHandle};
use crate::normalize::parse_event;

#[derive(Clone)]
struct WebhookState {
    adapter: Arc<Adapter>,
    response_timeout: Duration,
}

/// How a webhook request was finalized once dispatch completed.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// A handler answered through the response handle.
    AlreadyResponded(Value),
    /// The message was handled, done, or needs no reply.
    AutoAcked,
    /// Nothing answered within the response timeout.
    TimedOut,
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::AlreadyResponded(body) => (StatusCode::OK, Json(body)).into_response(),
            Outcome::AutoAcked | Outcome::TimedOut => StatusCode::OK.into_response(),
        }
    }
}

/// Decide how to finalize the request for `message` after the runtime's
/// completion signal.
pub async fn reconcile(
    message: &ChatMessage,
    mut reply: oneshot::Receiver<Value>,
    response_timeout: Duration,
) -> Outcome {
    if let Ok(body) = reply.try_recv() {
        return Outcome::AlreadyResponded(body);
    }

    if message.is_handled() || message.is_done() || message.is_removed_from_space() {
        return Outcome::AutoAcked;
    }

    match tokio::time::timeout(response_timeout, reply).await {
        Ok(Ok(body)) => Outcome::AlreadyResponded(body),
        _ => {
            warn!(
                "No response for event in space {} after {:?}",
                message.space.name, response_timeout
            );
            Outcome::TimedOut
        }
    }
}

pub fn router(adapter: Arc<Adapter>, response_timeout: Duration) -> Router {
    Router::new()
        .route("/", post(receive_event))
        .with_state(WebhookState {
            adapter,
            response_timeout,
        })
}

pub async fn serve(app: Router, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind webhook listener on {}", bind))?;
    info!("Listening for Chat events on http://{}", bind);
    axum::serve(listener, app)
        .await
        .context("Webhook server failed")
}

async fn receive_event(State(state): State<WebhookState>, body: Bytes) -> Response {
    let event = match parse_event(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Bad request: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    debug!("Webhook event {} for space {}", event.event_type, event.space.name);

    let (handle, reply) = ResponseHandle::channel();
    let Some(message) = state.adapter.normalize(event, Some(handle)) else {
        return StatusCode::OK.into_response();
    };

    state.adapter.dispatch(message.clone()).await;
    reconcile(&message, reply, state.response_timeout)
        .await
        .into_response()
}
