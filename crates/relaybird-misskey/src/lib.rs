//! Misskey destination for Relaybird.
//!
//! Implements [`Publisher`] against the Misskey HTTP API:
//!
//! - `notes/create` publishes the post
//! - `drive/files/create` re-hosts media (the source bytes are fetched first)
//! - `i` verifies the access token

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use relaybird_protocol::{MediaOptions, PublishError, PublishOptions, Publisher};

/// Connection settings for one Misskey account.
#[derive(Debug, Clone)]
pub struct MisskeyConfig {
    /// Instance base URL, e.g. `https://misskey.example`.
    pub instance_url: String,
    /// API access token for the posting account.
    pub token: String,
    pub timeout: Duration,
}

/// Misskey account able to receive relayed posts.
pub struct MisskeyPublisher {
    client: Client,
    base_url: String,
    token: String,
}

impl MisskeyPublisher {
    pub fn new(config: MisskeyConfig) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("relaybird/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;

        Ok(Self::with_client(client, config))
    }

    #[must_use]
    pub fn with_client(client: Client, config: MisskeyConfig) -> Self {
        Self {
            client,
            base_url: config.instance_url.trim_end_matches('/').to_string(),
            token: config.token,
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/api/{}", self.base_url, name)
    }

    /// Download the media that should be re-hosted.
    ///
    /// Returns `None` when the source no longer exists.
    async fn fetch_source(&self, source_url: &str) -> Result<Option<SourceMedia>, PublishError> {
        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            warn!(url = %source_url, status = status.as_u16(), "Source media is gone");
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PublishError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await.map_err(transport)?;

        Ok(Some(SourceMedia {
            file_name: file_name_from_url(source_url),
            content_type,
            bytes: bytes.to_vec(),
        }))
    }
}

#[async_trait]
impl Publisher for MisskeyPublisher {
    async fn publish(&self, text: &str, options: &PublishOptions) -> Result<String, PublishError> {
        let body = CreateNoteRequest {
            i: &self.token,
            text,
            visibility: options.visibility.as_str(),
            file_ids: &options.attachment_ids,
        };

        let response = self
            .client
            .post(self.endpoint("notes/create"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let response = ensure_success(response).await?;

        let created: CreateNoteResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Decode(e.to_string()))?;
        debug!(note_id = %created.created_note.id, "Note created");
        Ok(created.created_note.id)
    }

    async fn upload_media(
        &self,
        source_url: &str,
        options: &MediaOptions,
    ) -> Result<Option<String>, PublishError> {
        let Some(source) = self.fetch_source(source_url).await? else {
            return Ok(None);
        };

        let part = Part::bytes(source.bytes)
            .file_name(source.file_name.clone())
            .mime_str(&source.content_type)
            .map_err(transport)?;
        let mut form = Form::new()
            .text("i", self.token.clone())
            .text("name", source.file_name)
            .text("isSensitive", options.sensitive.to_string())
            .part("file", part);
        if let Some(alt_text) = &options.alt_text {
            form = form.text("comment", alt_text.clone());
        }

        let response = self
            .client
            .post(self.endpoint("drive/files/create"))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let response = ensure_success(response).await?;

        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| PublishError::Decode(e.to_string()))?;
        debug!(file_id = %file.id, url = %source_url, "Media uploaded");
        Ok(Some(file.id))
    }

    async fn health_check(&self) -> bool {
        let result = self
            .client
            .post(self.endpoint("i"))
            .json(&TokenOnly { i: &self.token })
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    instance = %self.base_url,
                    status = response.status().as_u16(),
                    "Misskey health check rejected"
                );
                false
            }
            Err(e) => {
                warn!(instance = %self.base_url, error = %e, "Misskey health check failed");
                false
            }
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateNoteRequest<'a> {
    i: &'a str,
    text: &'a str,
    visibility: &'a str,
    #[serde(skip_serializing_if = "no_files")]
    file_ids: &'a [String],
}

#[derive(Serialize)]
struct TokenOnly<'a> {
    i: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNoteResponse {
    created_note: Note,
}

#[derive(Deserialize)]
struct Note {
    id: String,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

struct SourceMedia {
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

// ============================================================================
// Helpers
// ============================================================================

fn transport(e: reqwest::Error) -> PublishError {
    PublishError::Transport(e.to_string())
}

fn no_files(ids: &&[String]) -> bool {
    ids.is_empty()
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, PublishError> {
    if response.status().is_success() {
        return Ok(response);
    }
    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        warn!(url = %response.url(), "Misskey rate limit hit");
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(PublishError::Api { status, message })
}

/// Last path segment of a URL, without query string.
fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("media")
        .to_string()
}
