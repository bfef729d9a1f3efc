//! End-to-end: a local HTTP server plays the stream and search API, the real
//! client and connector read from it, and the router publishes to a
//! recording destination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use relaybird::conversation::ConversationResolver;
use relaybird::mapping::{Destination, RoutingEntry, RoutingTable};
use relaybird::router::EventRouter;
use relaybird::stream::{RetryPolicy, StreamConnector, StreamError};
use relaybird::twitter::TwitterClient;
use relaybird_protocol::{MediaOptions, PublishError, PublishOptions, Publisher, Visibility};
use serde_json::json;

#[derive(Default)]
struct RecordingPublisher {
    posts: Mutex<Vec<(String, PublishOptions)>>,
    uploads: Mutex<Vec<(String, MediaOptions)>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, text: &str, options: &PublishOptions) -> Result<String, PublishError> {
        let mut posts = self.posts.lock().unwrap();
        posts.push((text.to_string(), options.clone()));
        Ok(format!("note-{}", posts.len()))
    }

    async fn upload_media(
        &self,
        source_url: &str,
        options: &MediaOptions,
    ) -> Result<Option<String>, PublishError> {
        self.uploads
            .lock()
            .unwrap()
            .push((source_url.to_string(), options.clone()));
        Ok(Some("file-1".to_string()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct Upstream {
    connects: AtomicUsize,
    terminations: AtomicUsize,
    searches: AtomicUsize,
}

fn stream_body() -> String {
    let own_post = json!({
        "data": {
            "id": "10",
            "author_id": "42",
            "text": "New post &amp; more https://t.co/a https://t.co/m",
            "attachments": { "media_keys": ["3_1"] },
            "possibly_sensitive": true,
            "entities": {
                "urls": [
                    {
                        "url": "https://t.co/a",
                        "expanded_url": "https://example.com/a",
                        "display_url": "example.com/a"
                    },
                    {
                        "url": "https://t.co/m",
                        "expanded_url": "https://twitter.com/alice/status/10/photo/1",
                        "display_url": "pic.twitter.com/m",
                        "media_key": "3_1"
                    }
                ]
            }
        },
        "includes": {
            "users": [{ "id": "42", "name": "Alice", "username": "alice" }],
            "media": [{
                "media_key": "3_1",
                "type": "photo",
                "url": "https://pbs.example/3_1.jpg",
                "alt_text": "a cat"
            }]
        }
    });
    let mixed_reply = json!({
        "data": {
            "id": "11",
            "author_id": "42",
            "text": "@bob agreed",
            "conversation_id": "9",
            "referenced_tweets": [{ "type": "replied_to", "id": "9" }]
        },
        "includes": { "users": [{ "id": "42", "name": "Alice", "username": "alice" }] }
    });
    let unmapped = json!({
        "data": { "id": "12", "author_id": "77", "text": "not routed" }
    });

    format!("{own_post}\r\n\r\nthis line is garbage\n{{}}\n{mixed_reply}\n{unmapped}\n")
}

async fn stream(State(upstream): State<Arc<Upstream>>) -> impl IntoResponse {
    match upstream.connects.fetch_add(1, Ordering::SeqCst) {
        0 => (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests".to_string()),
        1 => (StatusCode::OK, stream_body()),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "down".to_string()),
    }
}

async fn terminate(State(upstream): State<Arc<Upstream>>) -> impl IntoResponse {
    upstream.terminations.fetch_add(1, Ordering::SeqCst);
    axum::Json(json!({ "data": { "successful_kills": 1 } }))
}

async fn search(
    State(upstream): State<Arc<Upstream>>,
    Query(params): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    upstream.searches.fetch_add(1, Ordering::SeqCst);
    let query = params
        .iter()
        .find(|(k, _)| k == "query")
        .map(|(_, v)| v.as_str());
    assert_eq!(query, Some("conversation_id:9"));

    axum::Json(json!({
        "data": [{ "id": "9", "author_id": "77", "text": "root by someone else" }],
        "meta": { "result_count": 1 }
    }))
}

async fn serve(upstream: Arc<Upstream>) -> String {
    let app = Router::new()
        .route("/2/tweets/search/stream", get(stream))
        .route("/2/connections/all", delete(terminate))
        .route("/2/tweets/search/recent", get(search))
        .with_state(upstream);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn relays_stream_through_router_to_publisher() {
    let upstream = Arc::new(Upstream::default());
    let base_url = serve(upstream.clone()).await;

    let client = TwitterClient::new(&base_url, "token".to_string(), Duration::from_secs(5)).unwrap();
    let publisher = Arc::new(RecordingPublisher::default());
    let table = RoutingTable::new(vec![RoutingEntry {
        source_account_id: "42".to_string(),
        destination: Destination {
            name: "misskey".to_string(),
            publisher: publisher.clone(),
            visibility: Visibility::Public,
        },
        enabled: true,
    }])
    .unwrap();
    let router = EventRouter::new(
        table,
        ConversationResolver::new(Arc::new(client.clone())),
        "https://twitter.com".to_string(),
    );
    let connector = StreamConnector::new(
        client,
        RetryPolicy {
            enabled: true,
            max_retries: 1,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        },
        Duration::from_secs(5),
    );

    // 429, then the scripted body, then 503 with the single retry used up.
    let result = connector.start_stream(&router).await;
    assert!(matches!(result, Err(StreamError::Http { status: 503, .. })));

    assert_eq!(upstream.connects.load(Ordering::SeqCst), 3);
    assert_eq!(upstream.terminations.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.searches.load(Ordering::SeqCst), 1);

    let uploads = publisher.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "https://pbs.example/3_1.jpg");
    assert!(uploads[0].1.sensitive);
    assert_eq!(uploads[0].1.alt_text.as_deref(), Some("a cat"));

    let posts = publisher.posts.lock().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(
        posts[0].0,
        "New post & more [example.com/a](https://example.com/a)\n\n\
         https://twitter.com/alice/status/10"
    );
    assert_eq!(posts[0].1.visibility, Visibility::Public);
    assert_eq!(posts[0].1.attachment_ids, vec!["file-1"]);
}
