//! Source-platform-neutral view of one streamed post.
//!
//! Wire records (see [`crate::twitter`]) are converted into these types once,
//! at decode time. Everything downstream of the connector only sees
//! [`StreamEvent`] and [`Enrichment`].

use chrono::{DateTime, Utc};

/// Reference type marking the post a reply answers.
pub const REPLIED_TO: &str = "replied_to";

/// One post received from the stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamEvent {
    pub id: String,
    pub author_id: Option<String>,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub conversation_id: Option<String>,
    pub referenced_events: Vec<ReferencedEvent>,
    pub entities: Entities,
    pub attachments: Vec<MediaRef>,
    pub sensitive: bool,
}

impl StreamEvent {
    /// Id of the post this one directly replies to.
    pub fn replied_to(&self) -> Option<&str> {
        self.referenced_events
            .iter()
            .find(|r| r.kind == REPLIED_TO)
            .map(|r| r.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedEvent {
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entities {
    pub urls: Vec<UrlEntity>,
    pub mentions: Vec<MentionEntity>,
}

/// A shortened link token in the post text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlEntity {
    pub raw_token: String,
    pub expanded_url: Option<String>,
    pub display_url: Option<String>,
    /// Set when the token only stands in for an attached media item.
    pub media_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionEntity {
    pub account_id: Option<String>,
    pub handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub media_key: String,
    pub kind: MediaKind,
    pub direct_url: Option<String>,
    pub alt_text: Option<String>,
    pub variants: Vec<MediaVariant>,
}

/// One encoding of a video.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaVariant {
    pub content_type: String,
    pub bit_rate: Option<u64>,
    pub url: String,
}

/// Side-channel data delivered next to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub author: Option<Author>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub handle: String,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replied_to_ignores_other_reference_kinds() {
        let event = StreamEvent {
            id: "3".to_string(),
            referenced_events: vec![
                ReferencedEvent {
                    kind: "quoted".to_string(),
                    id: "1".to_string(),
                },
                ReferencedEvent {
                    kind: REPLIED_TO.to_string(),
                    id: "2".to_string(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(event.replied_to(), Some("2"));

        let root = StreamEvent::default();
        assert_eq!(root.replied_to(), None);
    }
}
