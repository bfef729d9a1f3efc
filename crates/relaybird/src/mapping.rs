//! Routing table: which source accounts go to which destination.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use relaybird_protocol::{Publisher, Visibility};
use thiserror::Error;

/// A downstream account and the audience posts are published to.
#[derive(Clone)]
pub struct Destination {
    /// Label used in logs.
    pub name: String,
    pub publisher: Arc<dyn Publisher>,
    pub visibility: Visibility,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub source_account_id: String,
    pub destination: Destination,
    pub enabled: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("duplicate route for source account {0}")]
    DuplicateSource(String),
}

/// Immutable lookup from source account id to its routing entry.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: HashMap<String, RoutingEntry>,
}

impl RoutingTable {
    pub fn new(entries: Vec<RoutingEntry>) -> Result<Self, MappingError> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            let source = entry.source_account_id.clone();
            if map.insert(source.clone(), entry).is_some() {
                return Err(MappingError::DuplicateSource(source));
            }
        }
        Ok(Self { entries: map })
    }

    /// The entry for `source_account_id`, if it exists and is enabled.
    pub fn lookup(&self, source_account_id: &str) -> Option<&RoutingEntry> {
        self.get(source_account_id).filter(|entry| entry.enabled)
    }

    /// The entry for `source_account_id`, enabled or not.
    pub fn get(&self, source_account_id: &str) -> Option<&RoutingEntry> {
        self.entries.get(source_account_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.enabled).count()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.values()
    }
}
