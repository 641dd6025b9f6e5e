use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gchat_adapter::auth::{self, CredentialLease, GoogleConnector};
use gchat_adapter::outbound::OutboundSender;
use gchat_adapter::robot::EchoRobot;
use gchat_adapter::{Adapter, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gchat_adapter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Bot name: {}", config.bot.name);
    if config.pubsub.enabled {
        info!("  Transport: Pub/Sub ({})", config.pubsub.subscription_path());
    } else {
        info!("  Transport: webhook on {}", config.server.bind);
    }

    let http = reqwest::Client::new();
    let tokens = auth::token_source(&config.auth, http.clone());

    // Credentials are requested once, up front; sends wait on the lease.
    let connector = GoogleConnector::new(&config.auth, tokens.clone(), http.clone());
    let lease = CredentialLease::acquire(Arc::new(connector));
    let sender = OutboundSender::new(lease);

    let robot = Arc::new(EchoRobot::new(config.bot.name.clone(), sender.clone()));
    let adapter = Arc::new(Adapter::new(robot, sender));

    adapter.run(&config, http, tokens).await
}
