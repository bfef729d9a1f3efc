//! Twitter API v2 ingress: filtered stream and conversation lookup.

mod client;
pub mod fields;
mod types;

pub use client::{ClientError, TwitterClient};
pub use types::{Includes, SearchPage, StreamRecord, Tweet};

use crate::event::{Enrichment, StreamEvent};

/// One decoded line of the stream.
#[derive(Debug)]
pub enum Frame {
    /// A post plus its side-channel data.
    Event(Box<ParsedEvent>),
    /// A record carrying no post (keep-alive or empty object).
    Heartbeat,
    /// A stream-level error record, e.g. an operational disconnect.
    Fault(String),
}

#[derive(Debug)]
pub struct ParsedEvent {
    pub event: StreamEvent,
    pub enrichment: Enrichment,
}

/// Decode one non-blank line of the stream body.
pub fn decode_frame(line: &str) -> Result<Frame, serde_json::Error> {
    let record: StreamRecord = serde_json::from_str(line)?;

    match record.data {
        Some(tweet) => {
            let enrichment = record.includes.enrichment_for(tweet.author_id.as_deref());
            let event = tweet.into_event(&record.includes);
            Ok(Frame::Event(Box::new(ParsedEvent { event, enrichment })))
        }
        None if !record.errors.is_empty() => {
            let detail = record
                .errors
                .iter()
                .map(|e| e.describe())
                .collect::<Vec<_>>()
                .join("; ");
            Ok(Frame::Fault(detail))
        }
        None => Ok(Frame::Heartbeat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_event_line() {
        let line = r#"{"data":{"id":"10","text":"hi","author_id":"42"},"includes":{"users":[{"id":"42","name":"Alice","username":"alice"}]},"matching_rules":[{"id":"1","tag":"relay"}]}"#;
        match decode_frame(line).unwrap() {
            Frame::Event(parsed) => {
                assert_eq!(parsed.event.id, "10");
                assert_eq!(parsed.event.author_id.as_deref(), Some("42"));
                assert_eq!(parsed.enrichment.author.unwrap().handle, "alice");
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn decode_record_without_data_is_heartbeat() {
        assert!(matches!(decode_frame("{}").unwrap(), Frame::Heartbeat));
    }

    #[test]
    fn decode_error_record_is_fault() {
        let line = r#"{"errors":[{"title":"operational-disconnect","detail":"This stream has been disconnected for operational reasons."}]}"#;
        match decode_frame(line).unwrap() {
            Frame::Fault(detail) => assert!(detail.starts_with("operational-disconnect")),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn decode_malformed_line_fails() {
        assert!(decode_frame("{\"data\":").is_err());
        assert!(decode_frame(r#"{"data":{"text":"no id"}}"#).is_err());
    }
}
