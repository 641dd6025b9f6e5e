use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::auth::TokenSource;
use crate::error::{AuthError, DeliveryError};
use crate::message::OutboundPayload;

/// The platform's message-creation resource.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Create `body` as a new message under the space `parent`.
    async fn create_message(&self, parent: &str, body: &OutboundPayload)
        -> Result<(), DeliveryError>;
}

/// `spaces.messages.create` over the REST API. A bearer token is taken from
/// the token source on every call, so expired tokens are replaced as the
/// source refreshes them.
pub struct RestChatClient {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
    scope: String,
}

impl RestChatClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            tokens,
            scope: scope.into(),
        }
    }

    async fn bearer(&self) -> Result<String, AuthError> {
        self.tokens.token(&self.scope).await
    }

    fn messages_url(&self, parent: &str) -> String {
        format!("{}/{}/messages", self.endpoint.trim_end_matches('/'), parent)
    }
}

#[async_trait]
impl ChatApi for RestChatClient {
    async fn create_message(
        &self,
        parent: &str,
        body: &OutboundPayload,
    ) -> Result<(), DeliveryError> {
        let token = self.bearer().await?;
        let url = self.messages_url(parent);
        debug!("Creating message: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Hands out a new token on every request, like a source whose tokens
    /// keep expiring.
    #[derive(Default)]
    struct RotatingToken {
        issued: AtomicUsize,
        scopes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TokenSource for RotatingToken {
        async fn token(&self, scope: &str) -> Result<String, AuthError> {
            self.scopes.lock().unwrap().push(scope.to_string());
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{n}"))
        }
    }

    struct RevokedToken;

    #[async_trait]
    impl TokenSource for RevokedToken {
        async fn token(&self, _scope: &str) -> Result<String, AuthError> {
            Err(AuthError("service account disabled".to_string()))
        }
    }

    fn client(tokens: Arc<dyn TokenSource>) -> RestChatClient {
        RestChatClient::new(
            reqwest::Client::new(),
            "https://chat.googleapis.com/v1/",
            tokens,
            "https://www.googleapis.com/auth/chat.bot",
        )
    }

    #[test]
    fn test_messages_url_joins_parent() {
        let client = client(Arc::new(RotatingToken::default()));
        assert_eq!(
            client.messages_url("spaces/AAA"),
            "https://chat.googleapis.com/v1/spaces/AAA/messages"
        );
    }

    #[tokio::test]
    async fn test_token_taken_per_call() {
        let tokens = Arc::new(RotatingToken::default());
        let client = client(tokens.clone());

        assert_eq!(client.bearer().await.unwrap(), "token-1");
        assert_eq!(client.bearer().await.unwrap(), "token-2");
        assert_eq!(
            *tokens.scopes.lock().unwrap(),
            vec!["https://www.googleapis.com/auth/chat.bot"; 2]
        );
    }

    #[tokio::test]
    async fn test_token_failure_is_unauthenticated() {
        let client = client(Arc::new(RevokedToken));
        let body = OutboundPayload::new("spaces/AAA".to_string(), None, "hi", "[]").unwrap();

        let err = client.create_message("spaces/AAA", &body).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unauthenticated(_)));
    }
}
