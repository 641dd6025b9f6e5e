//! Destination resolution for outbound messages.

use crate::error::OutboundError;
use crate::message::{Envelope, Thread};

/// Space an envelope addresses: the source message's space, else the room.
pub fn resolve_space(envelope: &Envelope) -> Result<String, OutboundError> {
    if let Some(message) = &envelope.message {
        return Ok(message.space.name.clone());
    }
    if let Some(room) = &envelope.room {
        return Ok(room.clone());
    }
    Err(OutboundError::InvalidEnvelope(
        "envelope must have either a message or a room",
    ))
}

/// Thread for a proactive send. A bare room never carries thread context,
/// so the message starts a new thread.
pub fn resolve_thread(envelope: &Envelope) -> Option<Thread> {
    envelope
        .message
        .as_ref()
        .and_then(|message| message.thread().cloned())
}

/// Space and thread for a reply, which must answer a source message.
pub fn resolve_reply(envelope: &Envelope) -> Result<(String, Option<Thread>), OutboundError> {
    let message = envelope.message.as_ref().ok_or(OutboundError::InvalidEnvelope(
        "a reply envelope must contain a message",
    ))?;
    Ok((message.space.name.clone(), message.thread().cloned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::message::{ChatMessage, MessageKind, Space, SpaceType, User};

    fn message(thread: Option<&str>) -> Arc<ChatMessage> {
        Arc::new(ChatMessage::new(
            User {
                id: "users/1".to_string(),
                display_name: "Ada".to_string(),
                room: Some("spaces/M".to_string()),
            },
            Space {
                name: "spaces/M".to_string(),
                display_name: String::new(),
                space_type: SpaceType::Room,
            },
            None,
            MessageKind::Text {
                text: "hi".to_string(),
                source_id: "spaces/M/messages/1".to_string(),
                thread: thread.map(Thread::named),
            },
            None,
        ))
    }

    #[test]
    fn test_space_from_message() {
        let envelope = Envelope::for_message(message(None));
        assert_eq!(resolve_space(&envelope).unwrap(), "spaces/M");
    }

    #[test]
    fn test_message_wins_over_room() {
        let envelope = Envelope {
            message: Some(message(Some("spaces/M/threads/t"))),
            room: Some("spaces/OTHER".to_string()),
        };
        assert_eq!(resolve_space(&envelope).unwrap(), "spaces/M");
        assert_eq!(resolve_thread(&envelope).unwrap().name(), Some("spaces/M/threads/t"));
    }

    #[test]
    fn test_room_has_no_thread() {
        let envelope = Envelope::for_room("spaces/X");
        assert_eq!(resolve_space(&envelope).unwrap(), "spaces/X");
        assert!(resolve_thread(&envelope).is_none());
    }

    #[test]
    fn test_empty_envelope_is_invalid() {
        let err = resolve_space(&Envelope::default()).unwrap_err();
        assert!(matches!(err, OutboundError::InvalidEnvelope(_)));
    }

    #[test]
    fn test_reply_requires_message() {
        let err = resolve_reply(&Envelope::for_room("spaces/X")).unwrap_err();
        assert!(matches!(err, OutboundError::InvalidEnvelope(_)));

        let (space, thread) =
            resolve_reply(&Envelope::for_message(message(Some("spaces/M/threads/r")))).unwrap();
        assert_eq!(space, "spaces/M");
        assert_eq!(thread.unwrap().name(), Some("spaces/M/threads/r"));
    }
}
