//! Conversation lookup for reply-chain checks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::StreamEvent;

/// One page of a conversation search.
#[derive(Debug, Clone, Default)]
pub struct ConversationPage {
    pub events: Vec<StreamEvent>,
    /// Opaque continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

/// Paginated read access to every post in a conversation.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        next_token: Option<&str>,
    ) -> Result<ConversationPage, ResolveError>;
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("conversation lookup failed (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode conversation page: {0}")]
    Decode(#[from] serde_json::Error),
}

// ============================================================================
// Thread
// ============================================================================

/// Every post of a conversation, in fetch order, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    events: Vec<StreamEvent>,
    index: HashMap<String, usize>,
}

impl Thread {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        let mut index = HashMap::with_capacity(events.len());
        for (position, event) in events.iter().enumerate() {
            index.entry(event.id.clone()).or_insert(position);
        }
        Self { events, index }
    }

    pub fn get(&self, id: &str) -> Option<&StreamEvent> {
        self.index.get(id).map(|&position| &self.events[position])
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamEvent> {
        self.events.iter()
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Fetches whole conversations on demand. Stateless; safe to share.
#[derive(Clone)]
pub struct ConversationResolver {
    source: Arc<dyn ConversationSource>,
}

impl ConversationResolver {
    pub fn new(source: Arc<dyn ConversationSource>) -> Self {
        Self { source }
    }

    /// Drain every page of `conversation_id`.
    ///
    /// Stops early, keeping what was fetched, if a page token comes back a
    /// second time.
    pub async fn fetch_thread(&self, conversation_id: &str) -> Result<Thread, ResolveError> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = self
                .source
                .fetch_page(conversation_id, next_token.as_deref())
                .await?;
            pages += 1;
            events.extend(page.events);

            match page.next_token {
                None => break,
                Some(token) if seen_tokens.contains(&token) => {
                    warn!(
                        conversation_id,
                        token = %token,
                        "Conversation lookup returned a repeated page token, stopping"
                    );
                    break;
                }
                Some(token) => {
                    seen_tokens.insert(token.clone());
                    next_token = Some(token);
                }
            }
        }

        debug!(conversation_id, pages, events = events.len(), "Conversation resolved");
        Ok(Thread::new(events))
    }
}
