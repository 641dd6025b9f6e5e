use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bot: BotConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Invocation name prepended to direct messages, e.g. `hubot`.
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long a webhook request waits for a late synchronous reply once
    /// the bot runtime has finished dispatch.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            response_timeout_secs: default_response_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PubSubConfig {
    /// Use the queue transport instead of the webhook.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    #[serde(default = "default_pubsub_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_pubsub_scope")]
    pub scope: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_id: String::new(),
            subscription_id: String::new(),
            max_messages: default_max_messages(),
            endpoint: default_pubsub_endpoint(),
            scope: default_pubsub_scope(),
        }
    }
}

impl PubSubConfig {
    /// Fully qualified subscription resource name.
    pub fn subscription_path(&self) -> String {
        format!(
            "projects/{}/subscriptions/{}",
            self.project_id, self.subscription_id
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_chat_scope")]
    pub scope: String,
    /// Static bearer token. When absent the metadata server is asked.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_chat_endpoint")]
    pub chat_endpoint: String,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            scope: default_chat_scope(),
            token: None,
            chat_endpoint: default_chat_endpoint(),
            metadata_url: default_metadata_url(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_response_timeout_secs() -> u64 {
    25
}

fn default_max_messages() -> u32 {
    10
}

fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com/v1".to_string()
}

fn default_pubsub_scope() -> String {
    "https://www.googleapis.com/auth/pubsub".to_string()
}

fn default_chat_scope() -> String {
    "https://www.googleapis.com/auth/chat.bot".to_string()
}

fn default_chat_endpoint() -> String {
    "https://chat.googleapis.com/v1".to_string()
}

fn default_metadata_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
        .to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bot.name.trim().is_empty() {
            anyhow::bail!("[bot] name must not be empty");
        }
        if self.pubsub.enabled {
            if self.pubsub.project_id.is_empty() {
                anyhow::bail!("[pubsub] project_id is required when pubsub is enabled");
            }
            if self.pubsub.subscription_id.is_empty() {
                anyhow::bail!("[pubsub] subscription_id is required when pubsub is enabled");
            }
        }
        Ok(())
    }
}
