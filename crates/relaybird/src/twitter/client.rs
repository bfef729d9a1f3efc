//! Twitter REST and streaming client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::fields::{CONVERSATION_PAGE_SIZE, EXPANSION_QUERY};
use super::types::SearchPage;
use crate::conversation::{ConversationPage, ConversationSource, ResolveError};
use crate::stream::{ByteStream, StreamError, StreamTransport};

/// Connect timeout for the streaming request. The body itself has no overall
/// deadline; stalls are detected by the connector.
const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors building a [`TwitterClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid api url: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Bearer-authenticated Twitter API v2 client.
#[derive(Clone)]
pub struct TwitterClient {
    rest: Client,
    stream: Client,
    bearer_token: String,
    stream_url: Url,
    search_url: Url,
    connections_url: Url,
}

impl TwitterClient {
    pub fn new(
        api_url: &str,
        bearer_token: String,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let user_agent = concat!("relaybird/", env!("CARGO_PKG_VERSION"));
        let rest = Client::builder()
            .timeout(request_timeout)
            .user_agent(user_agent)
            .build()?;
        let stream = Client::builder()
            .connect_timeout(STREAM_CONNECT_TIMEOUT)
            .user_agent(user_agent)
            .build()?;

        let base = Url::parse(&format!("{}/", api_url.trim_end_matches('/')))?;
        let mut stream_url = base.join("2/tweets/search/stream")?;
        stream_url.query_pairs_mut().extend_pairs(EXPANSION_QUERY);

        Ok(Self {
            rest,
            stream,
            bearer_token,
            stream_url,
            search_url: base.join("2/tweets/search/recent")?,
            connections_url: base.join("2/connections/all")?,
        })
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.bearer_token)
    }

    fn conversation_url(&self, conversation_id: &str, next_token: Option<&str>) -> Url {
        let mut url = self.search_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("query", &format!("conversation_id:{}", conversation_id));
            query.append_pair("max_results", CONVERSATION_PAGE_SIZE);
            query.extend_pairs(EXPANSION_QUERY);
            if let Some(token) = next_token {
                query.append_pair("next_token", token);
            }
        }
        url
    }
}

#[async_trait]
impl StreamTransport for TwitterClient {
    async fn connect(&self) -> Result<ByteStream, StreamError> {
        debug!(url = %self.stream_url, "Opening filtered stream");
        let response = self
            .stream
            .get(self.stream_url.clone())
            .header("Authorization", self.authorization())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(stream_error(response).await);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(StreamError::from));
        Ok(Box::pin(body))
    }

    async fn terminate_connections(&self) -> Result<(), StreamError> {
        let response = self
            .rest
            .delete(self.connections_url.clone())
            .header("Authorization", self.authorization())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(stream_error(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationSource for TwitterClient {
    #[instrument(skip(self))]
    async fn fetch_page(
        &self,
        conversation_id: &str,
        next_token: Option<&str>,
    ) -> Result<ConversationPage, ResolveError> {
        let response = self
            .rest
            .get(self.conversation_url(conversation_id, next_token))
            .header("Authorization", self.authorization())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ResolveError::Api { status, message });
        }

        let body = response.bytes().await?;
        let page: SearchPage = serde_json::from_slice(&body)?;
        let includes = page.includes;
        Ok(ConversationPage {
            events: page
                .data
                .into_iter()
                .map(|tweet| tweet.into_event(&includes))
                .collect(),
            next_token: page.meta.and_then(|m| m.next_token),
        })
    }
}

/// Classify a non-success response from the stream or connections endpoint.
async fn stream_error(response: Response) -> StreamError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let message = response.text().await.unwrap_or_default();

    match status {
        StatusCode::TOO_MANY_REQUESTS => StreamError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StreamError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        _ => StreamError::Http {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TwitterClient {
        TwitterClient::new(
            "https://api.example.com/",
            "token".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn stream_url_carries_expansions() {
        let client = client();
        assert_eq!(client.stream_url.path(), "/2/tweets/search/stream");
        let pairs: Vec<(String, String)> = client
            .stream_url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs.len(), EXPANSION_QUERY.len());
        assert!(
            pairs
                .iter()
                .any(|(k, v)| k == "expansions" && v.contains("attachments.media_keys"))
        );
    }

    #[test]
    fn conversation_url_includes_query_and_token() {
        let url = client().conversation_url("123", Some("abc"));
        assert_eq!(url.path(), "/2/tweets/search/recent");
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("query".to_string(), "conversation_id:123".to_string())));
        assert!(query.contains(&("max_results".to_string(), "100".to_string())));
        assert!(query.contains(&("next_token".to_string(), "abc".to_string())));
    }

    #[test]
    fn connections_url_is_absolute() {
        assert_eq!(
            client().connections_url.as_str(),
            "https://api.example.com/2/connections/all"
        );
    }

    #[test]
    fn invalid_api_url_is_rejected() {
        let result = TwitterClient::new("not a url", "t".to_string(), Duration::from_secs(1));
        assert!(matches!(result, Err(ClientError::Url(_))));
    }
}
