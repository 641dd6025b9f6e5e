//! Canonical message model shared by the transports, the bot runtime and the
//! outbound sender.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::OutboundError;

/// Kind of conversation a space represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SpaceType {
    #[serde(rename = "DM")]
    Dm,
    #[serde(rename = "ROOM")]
    Room,
    #[default]
    #[serde(other)]
    Unspecified,
}

/// A conversation context on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    /// Resource name, e.g. `spaces/AAAA`.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "type", default)]
    pub space_type: SpaceType,
}

impl Space {
    pub fn is_direct_message(&self) -> bool {
        self.space_type == SpaceType::Dm
    }
}

/// Opaque reference to a thread inside a space. The platform's object is
/// kept as received and echoed back verbatim on replies, so fields other
/// than `name` (or a thread with no `name` at all) survive the round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thread(Value);

impl Thread {
    pub fn named(name: impl Into<String>) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert("name".to_string(), Value::String(name.into()));
        Self(Value::Object(fields))
    }

    /// Resource name, e.g. `spaces/AAAA/threads/BBBB`, when the platform sent one.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }
}

/// Sender of an inbound event.
///
/// `id` is the platform's `user.name` (an opaque resource id such as
/// `users/42`); `display_name` is the human readable `user.displayName`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub display_name: String,
    /// Always the owning space's name.
    pub room: Option<String>,
}

/// Variant-specific payload of a canonical message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text {
        text: String,
        source_id: String,
        thread: Option<Thread>,
    },
    AddedToSpace,
    AddedToSpaceText {
        text: String,
        source_id: String,
        thread: Option<Thread>,
    },
    RemovedFromSpace,
    CardClicked {
        thread: Option<Thread>,
        action_method_name: String,
        parameters: BTreeMap<String, String>,
    },
}

/// Handle for answering a webhook request synchronously with a JSON body.
///
/// Only the first `respond` call wins; once the transport has finalized the
/// HTTP exchange every further call returns `false`.
#[derive(Clone)]
pub struct ResponseHandle {
    slot: Arc<Mutex<Option<oneshot::Sender<Value>>>>,
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("used", &self.is_used())
            .finish()
    }
}

impl ResponseHandle {
    /// Create a handle plus the receiving half kept by the transport.
    pub fn channel() -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (handle, rx)
    }

    /// Send `body` as the HTTP response. Returns whether it was delivered.
    pub fn respond(&self, body: Value) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match sender {
            Some(tx) => tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Whether `respond` has already been called.
    pub fn is_used(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

/// A normalized inbound event as seen by the bot runtime.
#[derive(Debug)]
pub struct ChatMessage {
    pub user: User,
    pub space: Space,
    pub event_time: Option<DateTime<Utc>>,
    pub kind: MessageKind,
    response: Option<ResponseHandle>,
    handled: AtomicBool,
    done: AtomicBool,
}

impl ChatMessage {
    pub fn new(
        user: User,
        space: Space,
        event_time: Option<DateTime<Utc>>,
        kind: MessageKind,
        response: Option<ResponseHandle>,
    ) -> Self {
        Self {
            user,
            space,
            event_time,
            kind,
            response,
            handled: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    /// Message text for the variants that carry one.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { text, .. } | MessageKind::AddedToSpaceText { text, .. } => {
                Some(text)
            }
            _ => None,
        }
    }

    /// Thread the event happened in, if any.
    pub fn thread(&self) -> Option<&Thread> {
        match &self.kind {
            MessageKind::Text { thread, .. }
            | MessageKind::AddedToSpaceText { thread, .. }
            | MessageKind::CardClicked { thread, .. } => thread.as_ref(),
            MessageKind::AddedToSpace | MessageKind::RemovedFromSpace => None,
        }
    }

    pub fn is_removed_from_space(&self) -> bool {
        matches!(self.kind, MessageKind::RemovedFromSpace)
    }

    /// The webhook response handle, absent for queue deliveries.
    pub fn response(&self) -> Option<&ResponseHandle> {
        self.response.as_ref()
    }

    /// Mark that a reply was produced through the REST API.
    /// Returns `false` if the flag was already set.
    pub fn set_handled(&self) -> bool {
        !self.handled.swap(true, Ordering::SeqCst)
    }

    /// Mark that processing finished without a reply.
    /// Returns `false` if the flag was already set.
    pub fn set_done(&self) -> bool {
        !self.done.swap(true, Ordering::SeqCst)
    }

    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Destination descriptor for outbound sends.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub message: Option<Arc<ChatMessage>>,
    pub room: Option<String>,
}

impl Envelope {
    pub fn for_message(message: Arc<ChatMessage>) -> Self {
        Self {
            message: Some(message),
            room: None,
        }
    }

    pub fn for_room(room: impl Into<String>) -> Self {
        Self {
            message: None,
            room: Some(room.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceRef {
    pub name: String,
}

/// Request body of the platform's message-creation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundPayload {
    pub space: SpaceRef,
    pub text: String,
    pub cards: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
}

impl OutboundPayload {
    /// Build a payload, refusing one with neither text nor cards.
    pub fn new(
        space: String,
        thread: Option<Thread>,
        text: &str,
        cards_json: &str,
    ) -> Result<Self, OutboundError> {
        let cards: Vec<Value> =
            serde_json::from_str(cards_json).map_err(OutboundError::InvalidCards)?;
        if text.is_empty() && cards.is_empty() {
            return Err(OutboundError::EmptyMessage);
        }
        Ok(Self {
            space: SpaceRef { name: space },
            text: text.to_string(),
            cards,
            thread,
        })
    }
}
