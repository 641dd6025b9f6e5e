//! Maps raw platform events onto the canonical message model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::NormalizeError;
use crate::message::{ChatMessage, MessageKind, ResponseHandle, Space, Thread, User};

/// Inbound event as delivered by the webhook or the queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub space: Space,
    pub user: RawUser,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action: Option<RawAction>,
}

/// The platform's user object. `name` is a resource id, not a display name.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUser {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    /// Absent or `null` on some synthetic events.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thread: Option<Thread>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    pub action_method_name: String,
    #[serde(default, deserialize_with = "deserialize_parameters")]
    pub parameters: BTreeMap<String, String>,
}

/// Card parameters arrive either as an object or as `[{key, value}]`.
fn deserialize_parameters<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct KeyValue {
        key: String,
        #[serde(default)]
        value: String,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Parameters {
        Map(BTreeMap<String, String>),
        List(Vec<KeyValue>),
    }

    Ok(match Option::<Parameters>::deserialize(deserializer)? {
        Some(Parameters::Map(map)) => map,
        Some(Parameters::List(list)) => list.into_iter().map(|kv| (kv.key, kv.value)).collect(),
        None => BTreeMap::new(),
    })
}

/// Parse a JSON request body or decoded queue payload.
pub fn parse_event(bytes: &[u8]) -> Result<RawEvent, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Converts raw events into canonical messages.
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    bot_name: String,
}

impl EventNormalizer {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
        }
    }

    pub fn normalize(
        &self,
        event: RawEvent,
        response: Option<ResponseHandle>,
    ) -> Result<ChatMessage, NormalizeError> {
        let RawEvent {
            event_type,
            space,
            user,
            message,
            event_time,
            action,
        } = event;

        let user = User {
            id: user.name,
            display_name: user.display_name.unwrap_or_default(),
            room: Some(space.name.clone()),
        };

        let kind = match event_type.as_str() {
            "ADDED_TO_SPACE" => match message {
                Some(m) => MessageKind::AddedToSpaceText {
                    text: m.text.unwrap_or_default(),
                    source_id: m.name.unwrap_or_default(),
                    thread: m.thread,
                },
                None => MessageKind::AddedToSpace,
            },
            "REMOVED_FROM_SPACE" => MessageKind::RemovedFromSpace,
            "MESSAGE" => {
                let m = message.ok_or(NormalizeError::MissingField("message"))?;
                let mut text = m.text.unwrap_or_default();
                // Direct messages arrive without the @-mention command matching relies on.
                if space.is_direct_message() {
                    text = format!("@{} {}", self.bot_name, text);
                }
                MessageKind::Text {
                    text,
                    source_id: m.name.unwrap_or_default(),
                    thread: m.thread,
                }
            }
            "CARD_CLICKED" => {
                let action = action.ok_or(NormalizeError::MissingField("action"))?;
                MessageKind::CardClicked {
                    thread: message.and_then(|m| m.thread),
                    action_method_name: action.action_method_name,
                    parameters: action.parameters,
                }
            }
            other => return Err(NormalizeError::UnrecognizedEventType(other.to_string())),
        };

        Ok(ChatMessage::new(user, space, event_time, kind, response))
    }
}
