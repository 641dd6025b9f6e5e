//! Credential acquisition for outbound calls.
//!
//! The adapter acquires one authorization handle at start-up and shares it
//! between every send for the lifetime of the process. The handle itself is
//! never re-acquired; the bearer tokens behind it are refreshed by the token
//! source before they expire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::chat_api::{ChatApi, RestChatClient};
use crate::config::AuthConfig;
use crate::error::AuthError;

/// Shared platform client produced once credentials are available.
pub type ChatHandle = Arc<dyn ChatApi>;

/// Source of OAuth bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, scope: &str) -> Result<String, AuthError>;
}

/// A pre-provisioned bearer token from the configuration file.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self, _scope: &str) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Tokens are replaced this long before the expiry the server reported.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    /// Seconds until expiry.
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Tokens by scope, each valid until shortly before its reported expiry.
#[derive(Default)]
struct TokenCache {
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    fn get(&self, scope: &str, now: Instant) -> Option<String> {
        let tokens = self.tokens.lock().ok()?;
        tokens
            .get(scope)
            .filter(|cached| now + REFRESH_MARGIN < cached.expires_at)
            .map(|cached| cached.token.clone())
    }

    fn put(&self, scope: &str, token: &str, expires_in: Duration, now: Instant) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(
                scope.to_string(),
                CachedToken {
                    token: token.to_string(),
                    expires_at: now + expires_in,
                },
            );
        }
    }
}

/// Default service account token from the compute metadata server.
pub struct MetadataServer {
    client: reqwest::Client,
    url: String,
    cache: TokenCache,
}

impl MetadataServer {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            cache: TokenCache::default(),
        }
    }

    async fn fetch(&self, scope: &str) -> Result<MetadataToken, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .query(&[("scopes", scope)])
            .send()
            .await
            .map_err(|e| AuthError(format!("metadata server unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError(format!(
                "metadata server returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError(format!("malformed token response: {e}")))
    }
}

#[async_trait]
impl TokenSource for MetadataServer {
    async fn token(&self, scope: &str) -> Result<String, AuthError> {
        if let Some(token) = self.cache.get(scope, Instant::now()) {
            return Ok(token);
        }

        let fetched = self.fetch(scope).await?;
        debug!("Fetched token for {}, expires in {}s", scope, fetched.expires_in);
        self.cache.put(
            scope,
            &fetched.access_token,
            Duration::from_secs(fetched.expires_in),
            Instant::now(),
        );
        Ok(fetched.access_token)
    }
}

/// Pick the token source the configuration asks for.
pub fn token_source(config: &AuthConfig, client: reqwest::Client) -> Arc<dyn TokenSource> {
    match config.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(MetadataServer::new(client, config.metadata_url.clone())),
    }
}

/// Turns acquired credentials into a platform client.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<ChatHandle, AuthError>;
}

/// Connects to the Chat REST API. A first token is fetched up front so that
/// missing credentials fail the acquisition; the client then asks the token
/// source again on every call.
pub struct GoogleConnector {
    tokens: Arc<dyn TokenSource>,
    client: reqwest::Client,
    scope: String,
    endpoint: String,
}

impl GoogleConnector {
    pub fn new(config: &AuthConfig, tokens: Arc<dyn TokenSource>, client: reqwest::Client) -> Self {
        Self {
            tokens,
            client,
            scope: config.scope.clone(),
            endpoint: config.chat_endpoint.clone(),
        }
    }
}

#[async_trait]
impl Connector for GoogleConnector {
    async fn connect(&self) -> Result<ChatHandle, AuthError> {
        self.tokens.token(&self.scope).await?;
        Ok(Arc::new(RestChatClient::new(
            self.client.clone(),
            self.endpoint.clone(),
            self.tokens.clone(),
            self.scope.clone(),
        )))
    }
}

/// One memoized credential acquisition, started at construction.
///
/// Clones share the same underlying future: the first resolution is final,
/// including a failure.
#[derive(Clone)]
pub struct CredentialLease {
    inner: Shared<BoxFuture<'static, Result<ChatHandle, AuthError>>>,
}

impl CredentialLease {
    /// Spawn the acquisition. Must be called from within a tokio runtime.
    pub fn acquire(connector: Arc<dyn Connector>) -> Self {
        let task = tokio::spawn(async move {
            let result = connector.connect().await;
            match &result {
                Ok(_) => info!("Chat credentials acquired"),
                Err(e) => error!(
                    "Hangouts Chat Authentication Failed! Please provide the credentials for your service account.\n{}",
                    e
                ),
            }
            result
        });

        let inner = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(AuthError(format!("credential task aborted: {e}"))),
            }
        }
        .boxed()
        .shared();

        Self { inner }
    }

    /// Wait for the shared client handle.
    pub async fn client(&self) -> Result<ChatHandle, AuthError> {
        self.inner.clone().await
    }
}
