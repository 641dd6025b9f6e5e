//! Best-effort outbound delivery through the platform's REST API.

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::auth::CredentialLease;
use crate::delivery::{resolve_reply, resolve_space, resolve_thread};
use crate::error::{DeliveryError, OutboundError};
use crate::message::{Envelope, OutboundPayload, Thread};

const NO_CARDS: &str = "[]";

/// An accepted outbound message in flight. Dropping it does not cancel the
/// delivery; awaiting it only waits for the attempt to finish.
pub struct Delivery(JoinHandle<()>);

impl Delivery {
    pub async fn finished(self) {
        if let Err(e) = self.0.await {
            error!("Delivery task failed: {}", e);
        }
    }
}

/// Builds payloads and hands them to the platform once credentials resolve.
#[derive(Clone)]
pub struct OutboundSender {
    lease: CredentialLease,
}

impl OutboundSender {
    pub fn new(lease: CredentialLease) -> Self {
        Self { lease }
    }

    /// Send to the envelope's space, joining the source message's thread if
    /// there is one. Marks the source message as handled.
    pub fn send(
        &self,
        envelope: &Envelope,
        text: &str,
        cards: Option<&str>,
    ) -> Result<Delivery, OutboundError> {
        let space = resolve_space(envelope)?;
        let delivery = self.post(space, resolve_thread(envelope), text, cards)?;
        if let Some(message) = &envelope.message {
            message.set_handled();
        }
        Ok(delivery)
    }

    /// Answer the envelope's source message in its thread.
    pub fn reply(
        &self,
        envelope: &Envelope,
        text: &str,
        cards: Option<&str>,
    ) -> Result<Delivery, OutboundError> {
        let (space, thread) = resolve_reply(envelope)?;
        let delivery = self.post(space, thread, text, cards)?;
        if let Some(message) = &envelope.message {
            message.set_handled();
        }
        Ok(delivery)
    }

    fn post(
        &self,
        space: String,
        thread: Option<Thread>,
        text: &str,
        cards: Option<&str>,
    ) -> Result<Delivery, OutboundError> {
        let payload = OutboundPayload::new(space, thread, text, cards.unwrap_or(NO_CARDS))?;
        info!("Sending a message to space: {}", payload.space.name);

        let lease = self.lease.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = deliver(&lease, &payload).await {
                error!(
                    "Message creation failed for space {}: {}",
                    payload.space.name, e
                );
            }
        });
        Ok(Delivery(task))
    }
}

async fn deliver(lease: &CredentialLease, payload: &OutboundPayload) -> Result<(), DeliveryError> {
    let chat = lease.client().await?;
    chat.create_message(&payload.space.name, payload).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::auth::{ChatHandle, Connector};
    use crate::chat_api::ChatApi;
    use crate::error::AuthError;
    use crate::message::{ChatMessage, MessageKind, Space, SpaceType, User};

    /// Records every created message instead of calling the platform.
    #[derive(Default)]
    pub(crate) struct RecordingApi {
        pub(crate) created: Mutex<Vec<(String, OutboundPayload)>>,
        pub(crate) fail: bool,
    }

    impl RecordingApi {
        pub(crate) fn created(&self) -> Vec<(String, OutboundPayload)> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatApi for RecordingApi {
        async fn create_message(
            &self,
            parent: &str,
            body: &OutboundPayload,
        ) -> Result<(), DeliveryError> {
            self.created
                .lock()
                .unwrap()
                .push((parent.to_string(), body.clone()));
            if self.fail {
                return Err(DeliveryError::Api {
                    status: 500,
                    body: "backend error".to_string(),
                });
            }
            Ok(())
        }
    }

    /// Hands out a shared `RecordingApi`, or fails authentication.
    pub(crate) struct FakeConnector {
        pub(crate) api: Arc<RecordingApi>,
        pub(crate) fail: bool,
    }

    impl FakeConnector {
        pub(crate) fn ok(api: Arc<RecordingApi>) -> Arc<Self> {
            Arc::new(Self { api, fail: false })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self {
                api: Arc::new(RecordingApi::default()),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> Result<ChatHandle, AuthError> {
            if self.fail {
                return Err(AuthError("could not load default credentials".to_string()));
            }
            Ok(self.api.clone())
        }
    }

    fn message(thread: Option<&str>) -> Arc<ChatMessage> {
        Arc::new(ChatMessage::new(
            User {
                id: "users/1".to_string(),
                display_name: "Ada".to_string(),
                room: Some("spaces/S".to_string()),
            },
            Space {
                name: "spaces/S".to_string(),
                display_name: String::new(),
                space_type: SpaceType::Room,
            },
            None,
            MessageKind::Text {
                text: "@bot hi".to_string(),
                source_id: "spaces/S/messages/1".to_string(),
                thread: thread.map(Thread::named),
            },
            None,
        ))
    }

    fn sender(api: &Arc<RecordingApi>) -> OutboundSender {
        OutboundSender::new(CredentialLease::acquire(FakeConnector::ok(api.clone())))
    }

    #[tokio::test]
    async fn test_send_to_room_starts_new_thread() {
        let api = Arc::new(RecordingApi::default());
        sender(&api)
            .send(&Envelope::for_room("spaces/X"), "hello", None)
            .unwrap()
            .finished()
            .await;

        let created = api.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "spaces/X");
        assert_eq!(created[0].1.text, "hello");
        assert!(created[0].1.thread.is_none());
    }

    #[tokio::test]
    async fn test_send_marks_message_handled() {
        let api = Arc::new(RecordingApi::default());
        let msg = message(Some("spaces/S/threads/t"));
        sender(&api)
            .send(&Envelope::for_message(msg.clone()), "pong", None)
            .unwrap()
            .finished()
            .await;

        assert!(msg.is_handled());
        let created = api.created();
        assert_eq!(created[0].0, "spaces/S");
        assert_eq!(created[0].1.thread.as_ref().unwrap().name(), Some("spaces/S/threads/t"));
    }

    #[tokio::test]
    async fn test_reply_uses_source_thread_and_cards() {
        let api = Arc::new(RecordingApi::default());
        let msg = message(Some("spaces/S/threads/r"));
        sender(&api)
            .reply(
                &Envelope::for_message(msg),
                "",
                Some(r#"[{"sections": []}]"#),
            )
            .unwrap()
            .finished()
            .await;

        let created = api.created();
        assert_eq!(created[0].1.cards.len(), 1);
        assert_eq!(created[0].1.thread.as_ref().unwrap().name(), Some("spaces/S/threads/r"));
    }

    #[tokio::test]
    async fn test_reply_to_room_is_invalid() {
        let api = Arc::new(RecordingApi::default());
        let result = sender(&api).reply(&Envelope::for_room("spaces/X"), "hi", None);
        assert!(matches!(result, Err(OutboundError::InvalidEnvelope(_))));
        assert!(api.created().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_never_reaches_platform() {
        let api = Arc::new(RecordingApi::default());
        let msg = message(None);
        let result = sender(&api).send(&Envelope::for_message(msg.clone()), "", Some("[]"));
        assert!(matches!(result, Err(OutboundError::EmptyMessage)));
        assert!(!msg.is_handled());

        tokio::task::yield_now().await;
        assert!(api.created().is_empty());
    }

    /// Collects formatted log output written on the current thread.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_auth_failure_is_logged_not_raised() {
        let logs = LogCapture::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let connector = FakeConnector::failing();
        let sender = OutboundSender::new(CredentialLease::acquire(connector.clone()));
        let msg = message(None);

        let delivery = sender
            .send(&Envelope::for_message(msg.clone()), "hello", None)
            .expect("send accepts the message even without credentials");
        assert!(msg.is_handled());
        delivery.finished().await;

        let output = logs.contents();
        assert!(output.contains("Hangouts Chat Authentication Failed!"));
        assert!(output.contains("Message creation failed for space spaces/S"));
        assert!(output.contains("could not load default credentials"));
        assert!(connector.api.created().is_empty());
    }

    #[tokio::test]
    async fn test_platform_error_is_dropped() {
        let api = Arc::new(RecordingApi {
            fail: true,
            ..RecordingApi::default()
        });
        sender(&api)
            .send(&Envelope::for_room("spaces/X"), "hello", None)
            .unwrap()
            .finished()
            .await;
        assert_eq!(api.created().len(), 1);
    }
}
