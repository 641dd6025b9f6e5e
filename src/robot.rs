//! Boundary to the bot runtime that consumes canonical messages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::message::{ChatMessage, Envelope, MessageKind};
use crate::outbound::OutboundSender;

/// A bot runtime. `receive` returning is the completion signal: it must only
/// resolve after every matching handler has finished.
#[async_trait]
pub trait Robot: Send + Sync {
    /// Invocation name used to address the bot, e.g. `hubot`.
    fn name(&self) -> &str;

    async fn receive(&self, message: Arc<ChatMessage>);
}

/// Minimal runtime used by the binary: echoes text back, greets new spaces.
pub struct EchoRobot {
    name: String,
    sender: OutboundSender,
}

impl EchoRobot {
    pub fn new(name: impl Into<String>, sender: OutboundSender) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }

    fn strip_mention<'a>(&self, text: &'a str) -> &'a str {
        let mention = text
            .trim_start()
            .strip_prefix('@')
            .and_then(|rest| rest.strip_prefix(self.name.as_str()));
        match mention {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                rest.trim_start()
            }
            _ => text,
        }
    }
}

#[async_trait]
impl Robot for EchoRobot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, message: Arc<ChatMessage>) {
        match &message.kind {
            MessageKind::Text { text, .. } => {
                let reply = format!("You said: {}", self.strip_mention(text));
                // Answer in the webhook response when there is one.
                if let Some(handle) = message.response() {
                    if handle.respond(json!({ "text": reply })) {
                        return;
                    }
                }
                let envelope = Envelope::for_message(message.clone());
                match self.sender.reply(&envelope, &reply, None) {
                    Ok(delivery) => delivery.finished().await,
                    Err(e) => warn!("Reply rejected: {}", e),
                }
            }
            MessageKind::AddedToSpace | MessageKind::AddedToSpaceText { .. } => {
                let greeting = format!("Thanks for adding me! Mention @{} to talk to me.", self.name);
                let envelope = Envelope::for_message(message.clone());
                match self.sender.send(&envelope, &greeting, None) {
                    Ok(delivery) => delivery.finished().await,
                    Err(e) => warn!("Greeting rejected: {}", e),
                }
            }
            MessageKind::RemovedFromSpace => {
                info!("Removed from space {}", message.space.name);
                message.set_done();
            }
            MessageKind::CardClicked {
                action_method_name, ..
            } => {
                info!("Card action '{}' has no handler", action_method_name);
                message.set_done();
            }
        }
    }
}
