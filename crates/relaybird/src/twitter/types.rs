//! Twitter API v2 wire types.
//!
//! Only the fields requested in [`super::fields`] are modelled. Conversion into
//! [`crate::event`] types happens here so nothing else depends on wire shapes.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::event::{
    Author, Enrichment, Entities, MediaKind, MediaRef, MediaVariant, MentionEntity,
    ReferencedEvent, StreamEvent, UrlEntity,
};

// ============================================================================
// Envelopes
// ============================================================================

/// One line of the filtered stream.
#[derive(Debug, Deserialize)]
pub struct StreamRecord {
    #[serde(default)]
    pub data: Option<Tweet>,

    #[serde(default)]
    pub includes: Includes,

    #[serde(default)]
    pub errors: Vec<ApiError>,
}

/// A page of the recent-search endpoint.
#[derive(Debug, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub data: Vec<Tweet>,

    #[serde(default)]
    pub includes: Includes,

    #[serde(default)]
    pub meta: Option<SearchMeta>,
}

#[derive(Debug, Deserialize)]
pub struct SearchMeta {
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Expansions delivered next to the primary data.
#[derive(Debug, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,

    #[serde(default)]
    pub media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub detail: Option<String>,
}

impl ApiError {
    pub fn describe(&self) -> String {
        match (&self.title, &self.detail) {
            (Some(title), Some(detail)) => format!("{}: {}", title, detail),
            (Some(title), None) => title.clone(),
            (None, Some(detail)) => detail.clone(),
            (None, None) => "unknown stream error".to_string(),
        }
    }
}

// ============================================================================
// Tweet
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Tweet {
    pub id: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub author_id: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub referenced_tweets: Vec<ReferencedTweet>,

    #[serde(default)]
    pub attachments: Option<Attachments>,

    #[serde(default)]
    pub entities: Option<WireEntities>,

    /// Full text and entities of posts longer than the classic limit.
    #[serde(default)]
    pub note_tweet: Option<NoteTweet>,

    #[serde(default)]
    pub possibly_sensitive: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReferencedTweet {
    #[serde(rename = "type")]
    pub ref_type: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct Attachments {
    #[serde(default)]
    pub media_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoteTweet {
    pub text: String,

    #[serde(default)]
    pub entities: Option<WireEntities>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireEntities {
    #[serde(default)]
    pub urls: Vec<WireUrl>,

    #[serde(default)]
    pub mentions: Vec<WireMention>,
}

#[derive(Debug, Deserialize)]
pub struct WireUrl {
    pub url: String,

    #[serde(default)]
    pub expanded_url: Option<String>,

    #[serde(default)]
    pub display_url: Option<String>,

    #[serde(default)]
    pub media_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireMention {
    pub username: String,

    #[serde(default)]
    pub id: Option<String>,
}

// ============================================================================
// Users and media
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct Media {
    pub media_key: String,

    /// "photo", "video" or "animated_gif".
    #[serde(rename = "type")]
    pub media_type: String,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub alt_text: Option<String>,

    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Debug, Deserialize)]
pub struct Variant {
    pub content_type: String,

    #[serde(default)]
    pub bit_rate: Option<u64>,

    pub url: String,
}

// ============================================================================
// Conversions
// ============================================================================

impl Tweet {
    /// Convert into the neutral event model, resolving media from `includes`.
    pub fn into_event(self, includes: &Includes) -> StreamEvent {
        let (text, entities) = match self.note_tweet {
            Some(note) => (note.text, note.entities.or(self.entities)),
            None => (self.text, self.entities),
        };
        let media_keys = self.attachments.map(|a| a.media_keys).unwrap_or_default();

        StreamEvent {
            attachments: resolve_media(&self.id, &media_keys, &includes.media),
            id: self.id,
            author_id: self.author_id,
            text,
            created_at: self.created_at,
            conversation_id: self.conversation_id,
            referenced_events: self
                .referenced_tweets
                .into_iter()
                .map(|r| ReferencedEvent {
                    kind: r.ref_type,
                    id: r.id,
                })
                .collect(),
            entities: entities.map(convert_entities).unwrap_or_default(),
            sensitive: self.possibly_sensitive,
        }
    }
}

impl Includes {
    /// Enrichment for an event authored by `author_id`.
    pub fn enrichment_for(&self, author_id: Option<&str>) -> Enrichment {
        let author = author_id
            .and_then(|id| self.users.iter().find(|u| u.id == id))
            .map(|u| Author {
                id: u.id.clone(),
                handle: u.username.clone(),
                display_name: u.name.clone(),
            });
        Enrichment { author }
    }
}

fn convert_entities(entities: WireEntities) -> Entities {
    Entities {
        urls: entities
            .urls
            .into_iter()
            .map(|u| UrlEntity {
                raw_token: u.url,
                expanded_url: u.expanded_url,
                display_url: u.display_url,
                media_key: u.media_key,
            })
            .collect(),
        mentions: entities
            .mentions
            .into_iter()
            .map(|m| MentionEntity {
                account_id: m.id,
                handle: m.username,
            })
            .collect(),
    }
}

/// Look up each attached media key, keeping the post's own order.
fn resolve_media(tweet_id: &str, keys: &[String], media: &[Media]) -> Vec<MediaRef> {
    keys.iter()
        .filter_map(|key| {
            let found = media.iter().find(|m| &m.media_key == key);
            if found.is_none() {
                debug!(event_id = %tweet_id, media_key = %key, "Media key missing from includes");
            }
            found
        })
        .map(|m| MediaRef {
            media_key: m.media_key.clone(),
            kind: media_kind(&m.media_type),
            direct_url: m.url.clone(),
            alt_text: m.alt_text.clone(),
            variants: m
                .variants
                .iter()
                .map(|v| MediaVariant {
                    content_type: v.content_type.clone(),
                    bit_rate: v.bit_rate,
                    url: v.url.clone(),
                })
                .collect(),
        })
        .collect()
}

fn media_kind(media_type: &str) -> MediaKind {
    match media_type {
        "photo" => MediaKind::Photo,
        // GIFs are only ever delivered as MP4 variants
        "video" | "animated_gif" => MediaKind::Video,
        _ => MediaKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_tweet_replaces_truncated_text() {
        let tweet: Tweet = serde_json::from_value(serde_json::json!({
            "id": "1",
            "text": "short…",
            "entities": { "urls": [{ "url": "https://t.co/a" }] },
            "note_tweet": {
                "text": "the whole long text",
                "entities": { "mentions": [{ "username": "bob", "id": "9" }] }
            }
        }))
        .unwrap();

        let event = tweet.into_event(&Includes::default());
        assert_eq!(event.text, "the whole long text");
        assert!(event.entities.urls.is_empty());
        assert_eq!(event.entities.mentions[0].handle, "bob");
    }

    #[test]
    fn attachments_follow_media_key_order() {
        let record: StreamRecord = serde_json::from_value(serde_json::json!({
            "data": {
                "id": "1",
                "text": "pics",
                "attachments": { "media_keys": ["3_b", "missing", "3_a"] }
            },
            "includes": {
                "media": [
                    { "media_key": "3_a", "type": "photo", "url": "https://pbs/a.jpg" },
                    { "media_key": "3_b", "type": "animated_gif", "variants": [
                        { "content_type": "video/mp4", "bit_rate": 0, "url": "https://video/b.mp4" }
                    ] }
                ]
            }
        }))
        .unwrap();

        let includes = record.includes;
        let event = record.data.unwrap().into_event(&includes);
        let keys: Vec<&str> = event
            .attachments
            .iter()
            .map(|m| m.media_key.as_str())
            .collect();
        assert_eq!(keys, vec!["3_b", "3_a"]);
        assert_eq!(event.attachments[0].kind, MediaKind::Video);
        assert_eq!(event.attachments[1].kind, MediaKind::Photo);
    }

    #[test]
    fn enrichment_resolves_author_from_includes() {
        let includes: Includes = serde_json::from_value(serde_json::json!({
            "users": [{ "id": "42", "name": "Alice", "username": "alice" }]
        }))
        .unwrap();

        let enrichment = includes.enrichment_for(Some("42"));
        let author = enrichment.author.unwrap();
        assert_eq!(author.handle, "alice");
        assert_eq!(author.display_name, "Alice");

        assert!(includes.enrichment_for(Some("7")).author.is_none());
        assert!(includes.enrichment_for(None).author.is_none());
    }

    #[test]
    fn created_at_parses_rfc3339() {
        let tweet: Tweet = serde_json::from_value(serde_json::json!({
            "id": "1",
            "text": "t",
            "created_at": "2024-03-01T12:30:00.000Z"
        }))
        .unwrap();
        let created = tweet.created_at.unwrap();
        assert_eq!(created.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    }
}
