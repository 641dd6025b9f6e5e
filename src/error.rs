//! Error taxonomy for the adapter.
//!
//! Contract violations (`OutboundError`) surface to the immediate caller.
//! Everything that happens after a send has been accepted (`AuthError`,
//! `DeliveryError`) is logged and dropped.

use thiserror::Error;

/// Failure to turn a raw platform event into a canonical message.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Unrecognized event type: {0}")]
    UnrecognizedEventType(String),
    #[error("event is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Caller errors raised by `send`/`reply` before any network activity.
#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
    #[error("You cannot send an empty message.")]
    EmptyMessage,
    #[error("cards payload is not valid JSON: {0}")]
    InvalidCards(#[source] serde_json::Error),
}

/// Credential acquisition failed. Cloneable so every waiter on the memoized
/// lease observes the same failure.
#[derive(Debug, Clone, Error)]
#[error("Chat authentication failed: {0}")]
pub struct AuthError(pub String);

/// An accepted outbound message could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Unauthenticated(#[from] AuthError),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

/// Queue subscription failures (pull or acknowledge).
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error(transparent)]
    Unauthenticated(#[from] AuthError),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Pub/Sub error (status {status}): {body}")]
    Api { status: u16, body: String },
}

/// A queue delivery whose payload is not a base64-encoded JSON event.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not a valid event: {0}")]
    Json(#[from] serde_json::Error),
}
