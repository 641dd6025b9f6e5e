//! Queue transport: pulls events from a Pub/Sub subscription.
//!
//! Every delivery is acknowledged as soon as its event has been handed to the
//! runtime, or right away when its payload can't be decoded, so the broker
//! never redelivers it. The runtime handles each event on its own task, so a
//! slow handler never holds up the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapter::Adapter;
use crate::auth::TokenSource;
use crate::config::PubSubConfig;
use crate::error::{PayloadError, PubSubError};
use crate::normalize::{parse_event, RawEvent};

const PULL_ERROR_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default)]
    pub message_id: String,
    /// Base64-encoded event JSON.
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[async_trait]
pub trait Subscription: Send + Sync {
    /// Fully qualified subscription name, for logging.
    fn name(&self) -> &str;

    async fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, PubSubError>;

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<(), PubSubError>;
}

/// Pub/Sub REST API subscription (`:pull` / `:acknowledge`).
pub struct RestSubscription {
    client: reqwest::Client,
    endpoint: String,
    path: String,
    scope: String,
    tokens: Arc<dyn TokenSource>,
}

impl RestSubscription {
    pub fn new(client: reqwest::Client, config: &PubSubConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            path: config.subscription_path(),
            scope: config.scope.clone(),
            tokens,
        }
    }

    async fn call(&self, verb: &str, body: serde_json::Value) -> Result<reqwest::Response, PubSubError> {
        let token = self.tokens.token(&self.scope).await?;
        let url = format!("{}/{}:{}", self.endpoint, self.path, verb);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PubSubError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Subscription for RestSubscription {
    fn name(&self) -> &str {
        &self.path
    }

    async fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, PubSubError> {
        let response = self
            .call("pull", json!({ "maxMessages": max_messages }))
            .await?;
        let pulled: PullResponse = response.json().await?;
        Ok(pulled.received_messages)
    }

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<(), PubSubError> {
        self.call("acknowledge", json!({ "ackIds": ack_ids })).await?;
        Ok(())
    }
}

/// Decode a queue payload into a raw event.
pub fn decode_event(data: &str) -> Result<RawEvent, PayloadError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
    Ok(parse_event(&bytes)?)
}

/// Hand one delivery to the runtime and acknowledge it. The returned task,
/// if any, completes when the runtime has finished with the event.
pub async fn handle_message(
    adapter: &Arc<Adapter>,
    subscription: &dyn Subscription,
    received: ReceivedMessage,
) -> Option<JoinHandle<()>> {
    debug!("Received message {}", received.message.message_id);
    debug!("\tData: {}", received.message.data);

    let dispatched = match decode_event(&received.message.data) {
        Ok(event) => adapter
            .normalize(event, None)
            .map(|message| adapter.spawn_dispatch(message)),
        Err(e) => {
            warn!("Bad request: {}", e);
            None
        }
    };

    if let Err(e) = subscription
        .acknowledge(std::slice::from_ref(&received.ack_id))
        .await
    {
        error!(
            "Failed to acknowledge message {}: {}",
            received.message.message_id, e
        );
    }
    dispatched
}

/// Pull once and hand the batch to the runtime in arrival order. Returns how
/// many deliveries were pulled.
pub async fn poll_once(
    adapter: &Arc<Adapter>,
    subscription: &dyn Subscription,
    max_messages: u32,
) -> Result<usize, PubSubError> {
    let batch = subscription.pull(max_messages).await?;
    let count = batch.len();
    for received in batch {
        handle_message(adapter, subscription, received).await;
    }
    Ok(count)
}

/// Pull forever. Pull failures are logged and retried after a pause.
pub async fn run(adapter: Arc<Adapter>, subscription: Arc<dyn Subscription>, max_messages: u32) {
    info!(
        "Connecting to Pub/Sub subscription - {}",
        subscription.name()
    );
    loop {
        if let Err(e) = poll_once(&adapter, subscription.as_ref(), max_messages).await {
            error!("Pub/Sub pull failed: {}", e);
            tokio::time::sleep(PULL_ERROR_PAUSE).await;
        }
    }
}
