//! Relaybird: relay posts from a filtered stream to downstream accounts.
//!
//! The [`stream::StreamConnector`] keeps one streaming connection alive and
//! hands every decoded [`event::StreamEvent`] to the [`router::EventRouter`],
//! which decides whether to forward it, rewrites its text, re-uploads media
//! and publishes through a [`relaybird_protocol::Publisher`].

pub mod app;
pub mod config;
pub mod conversation;
pub mod event;
pub mod mapping;
pub mod media;
pub mod router;
pub mod stream;
pub mod transform;
pub mod twitter;
