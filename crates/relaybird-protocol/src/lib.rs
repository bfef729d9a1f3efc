//! Relaybird publish protocol.
//!
//! A destination is anything that can take a finished post (text plus media
//! already re-hosted on the destination) and make it public. The relay core
//! only talks to destinations through [`Publisher`]; concrete platforms live in
//! their own crates (see `relaybird-misskey`).
//!
//! # Contract
//!
//! - [`Publisher::upload_media`] fetches a source URL and re-hosts it. `Ok(None)`
//!   means the source is gone and the item should be left out of the post.
//! - [`Publisher::publish`] is called exactly once per routed event. The core
//!   never retries it; implementations that want retries do them internally.
//! - [`Publisher::health_check`] is advisory and used at startup only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length, in characters, of a media caption accepted downstream.
pub const MAX_CAPTION_CHARS: usize = 255;

// ============================================================================
// Options
// ============================================================================

/// Audience of a published post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Home,
    Followers,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Home => "home",
            Visibility::Followers => "followers",
        }
    }
}

/// Options for [`Publisher::publish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub visibility: Visibility,
    /// Ids returned by earlier [`Publisher::upload_media`] calls. Empty means
    /// the post carries no attachment field at all.
    pub attachment_ids: Vec<String>,
}

/// Options for [`Publisher::upload_media`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaOptions {
    pub sensitive: bool,
    /// Caption, already truncated to [`MAX_CAPTION_CHARS`].
    pub alt_text: Option<String>,
}

/// Truncate a caption to [`MAX_CAPTION_CHARS`] characters.
pub fn truncate_caption(text: &str) -> String {
    text.chars().take(MAX_CAPTION_CHARS).collect()
}

// ============================================================================
// Publisher
// ============================================================================

/// A downstream account posts can be delivered to.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a post and return its id on the destination.
    async fn publish(&self, text: &str, options: &PublishOptions) -> Result<String, PublishError>;

    /// Re-host the media at `source_url` and return its destination id.
    async fn upload_media(
        &self,
        source_url: &str,
        options: &MediaOptions,
    ) -> Result<Option<String>, PublishError>;

    /// Check that the destination is reachable and the credential is accepted.
    async fn health_check(&self) -> bool;
}

/// Errors returned by a [`Publisher`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// The request never produced a response (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The destination answered with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The destination answered with a body we could not read.
    #[error("unexpected response: {0}")]
    Decode(String),
}
