//! Adapter between a bot runtime and the Hangouts Chat / Google Chat
//! platform. Events arrive over an HTTP webhook or a Pub/Sub subscription;
//! replies go out through the Chat REST API.

pub mod adapter;
pub mod auth;
pub mod chat_api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod message;
pub mod normalize;
pub mod outbound;
pub mod robot;
pub mod transport;

pub use adapter::Adapter;
pub use config::Config;
pub use message::{ChatMessage, Envelope, MessageKind};
pub use robot::Robot;
