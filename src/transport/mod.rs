//! Inbound transports. Both feed raw events into the same `Adapter`.

pub mod pubsub;
pub mod webhook;
