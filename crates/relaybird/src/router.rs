//! Event routing: decide, rewrite, re-upload, publish.
//!
//! Every event goes through the same short-circuit sequence:
//!
//! 1. no author id: skip
//! 2. no enabled route for the author: skip
//! 3. reply whose direct ancestors include another author: skip
//! 4. otherwise render the text, upload media and publish once
//!
//! Nothing escapes [`EventRouter::route`]. Skips and failures end up as log
//! lines so the stream keeps reading.

use std::collections::HashSet;

use async_trait::async_trait;
use relaybird_protocol::{MediaOptions, PublishError, PublishOptions};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::conversation::{ConversationResolver, ResolveError, Thread};
use crate::event::{Enrichment, StreamEvent};
use crate::mapping::{Destination, RoutingTable};
use crate::media::select_media;
use crate::stream::EventHandler;
use crate::transform;

/// Why an event was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingAuthor,
    Unmapped,
    MixedReplyChain,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingAuthor => "missing_author",
            SkipReason::Unmapped => "unmapped",
            SkipReason::MixedReplyChain => "mixed_reply_chain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Published { post_id: String },
    Skipped(SkipReason),
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to resolve conversation: {0}")]
    Resolve(#[from] ResolveError),

    #[error("failed to publish: {0}")]
    Publish(#[from] PublishError),
}

pub struct EventRouter {
    table: RoutingTable,
    resolver: ConversationResolver,
    profile_url: String,
}

impl EventRouter {
    pub fn new(table: RoutingTable, resolver: ConversationResolver, profile_url: String) -> Self {
        Self {
            table,
            resolver,
            profile_url,
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Route one event. Never fails; outcomes are logged.
    pub async fn route(&self, event: &StreamEvent, enrichment: &Enrichment) {
        match self.try_route(event, enrichment).await {
            Ok(RouteOutcome::Published { post_id }) => {
                info!(event_id = %event.id, post_id = %post_id, "Event relayed");
            }
            Ok(RouteOutcome::Skipped(reason)) => {
                debug!(
                    event_id = %event.id,
                    author = ?event.author_id,
                    reason = reason.as_str(),
                    "Event skipped"
                );
            }
            Err(e) => {
                error!(event_id = %event.id, author = ?event.author_id, error = %e, "Event dropped");
            }
        }
    }

    /// Route one event and report what happened.
    pub async fn try_route(
        &self,
        event: &StreamEvent,
        enrichment: &Enrichment,
    ) -> Result<RouteOutcome, RouteError> {
        let Some(author_id) = event.author_id.as_deref() else {
            return Ok(RouteOutcome::Skipped(SkipReason::MissingAuthor));
        };
        let Some(entry) = self.table.lookup(author_id) else {
            return Ok(RouteOutcome::Skipped(SkipReason::Unmapped));
        };

        if let (Some(conversation_id), Some(_)) =
            (event.conversation_id.as_deref(), event.replied_to())
        {
            let thread = self.resolver.fetch_thread(conversation_id).await?;
            if is_mixed_reply_chain(event, author_id, &thread) {
                return Ok(RouteOutcome::Skipped(SkipReason::MixedReplyChain));
            }
        }

        let handle = enrichment.author.as_ref().map(|a| a.handle.as_str());
        let text = transform::render(event, handle, &self.profile_url);
        let attachment_ids = self.upload_media(event, &entry.destination).await;

        let options = PublishOptions {
            visibility: entry.destination.visibility,
            attachment_ids,
        };
        let post_id = entry.destination.publisher.publish(&text, &options).await?;
        Ok(RouteOutcome::Published { post_id })
    }

    /// Upload each selected attachment in order. Failed items are left out.
    async fn upload_media(&self, event: &StreamEvent, destination: &Destination) -> Vec<String> {
        let mut ids = Vec::new();

        for media in select_media(&event.attachments) {
            let options = MediaOptions {
                sensitive: event.sensitive,
                alt_text: media.alt_text,
            };
            match destination.publisher.upload_media(&media.url, &options).await {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => {
                    warn!(
                        event_id = %event.id,
                        media_key = %media.media_key,
                        destination = %destination.name,
                        "Media source unavailable, leaving it out"
                    );
                }
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        media_key = %media.media_key,
                        destination = %destination.name,
                        error = %e,
                        "Media upload failed, leaving it out"
                    );
                }
            }
        }
        ids
    }
}

#[async_trait]
impl EventHandler for EventRouter {
    async fn on_event(&self, event: StreamEvent, enrichment: Enrichment) {
        self.route(&event, &enrichment).await;
    }
}

/// Walk the direct reply lineage of `event` and report whether any ancestor
/// was written by someone other than `author_id`.
///
/// The walk stops at the root, at a parent missing from `thread`, or at a
/// cycle. A parent without an author counts as a different author.
fn is_mixed_reply_chain(event: &StreamEvent, author_id: &str, thread: &Thread) -> bool {
    let mut visited: HashSet<&str> = HashSet::from([event.id.as_str()]);
    let mut parent_id = event.replied_to();

    while let Some(id) = parent_id {
        if !visited.insert(id) {
            debug!(event_id = %event.id, at = id, "Reply chain cycle detected, stopping walk");
            return false;
        }
        let Some(parent) = thread.get(id) else {
            return false;
        };
        if parent.author_id.as_deref() != Some(author_id) {
            return true;
        }
        parent_id = parent.replied_to();
    }
    false
}
