use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::auth::TokenSource;
use crate::config::Config;
use crate::error::OutboundError;
use crate::message::{ChatMessage, Envelope, ResponseHandle};
use crate::normalize::{EventNormalizer, RawEvent};
use crate::outbound::{Delivery, OutboundSender};
use crate::robot::Robot;
use crate::transport::{pubsub, webhook};

const RECEIVED_CAPACITY: usize = 64;

/// Connects one bot runtime to the chat platform.
pub struct Adapter {
    normalizer: EventNormalizer,
    sender: OutboundSender,
    robot: Arc<dyn Robot>,
    received: broadcast::Sender<Arc<ChatMessage>>,
}

impl Adapter {
    pub fn new(robot: Arc<dyn Robot>, sender: OutboundSender) -> Self {
        let (received, _) = broadcast::channel(RECEIVED_CAPACITY);
        Self {
            normalizer: EventNormalizer::new(robot.name()),
            sender,
            robot,
            received,
        }
    }

    /// Every message dispatched to the runtime, after dispatch completes.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChatMessage>> {
        self.received.subscribe()
    }

    /// Normalize an inbound event. Events that cannot be normalized are
    /// logged and dropped.
    pub fn normalize(
        &self,
        event: RawEvent,
        response: Option<ResponseHandle>,
    ) -> Option<Arc<ChatMessage>> {
        match self.normalizer.normalize(event, response) {
            Ok(message) => Some(Arc::new(message)),
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    /// Hand a message to the runtime and wait for it to finish.
    pub async fn dispatch(&self, message: Arc<ChatMessage>) {
        self.robot.receive(message.clone()).await;
        // No subscribers is fine.
        let _ = self.received.send(message);
    }

    /// Start dispatching `message` on its own task. Messages handed over in
    /// order reach the runtime in that order; nobody waits for them to
    /// finish.
    pub fn spawn_dispatch(self: &Arc<Self>, message: Arc<ChatMessage>) -> JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move { adapter.dispatch(message).await })
    }

    /// Normalize and dispatch in one step.
    pub async fn on_event(
        &self,
        event: RawEvent,
        response: Option<ResponseHandle>,
    ) -> Option<Arc<ChatMessage>> {
        let message = self.normalize(event, response)?;
        self.dispatch(message.clone()).await;
        Some(message)
    }

    pub fn send(
        &self,
        envelope: &Envelope,
        text: &str,
        cards: Option<&str>,
    ) -> Result<Delivery, OutboundError> {
        self.sender.send(envelope, text, cards)
    }

    pub fn reply(
        &self,
        envelope: &Envelope,
        text: &str,
        cards: Option<&str>,
    ) -> Result<Delivery, OutboundError> {
        self.sender.reply(envelope, text, cards)
    }

    /// Serve the transport the configuration selects until it stops.
    pub async fn run(
        self: Arc<Self>,
        config: &Config,
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<()> {
        if config.pubsub.enabled {
            let subscription = Arc::new(pubsub::RestSubscription::new(
                http,
                &config.pubsub,
                tokens,
            ));
            info!("Hangouts Chat adapter initialized successfully");
            pubsub::run(self, subscription, config.pubsub.max_messages).await;
            Ok(())
        } else {
            let timeout = Duration::from_secs(config.server.response_timeout_secs);
            let app = webhook::router(self, timeout);
            info!("Hangouts Chat adapter initialized successfully");
            webhook::serve(app, &config.server.bind).await
        }
    }
}
