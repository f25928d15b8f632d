//! Nostr event data model.
//!
//! Only the event *shape* lives here: signing and relay I/O are external
//! collaborators reached through the [`crate::nostr::signer`] and
//! [`crate::nostr::relay`] seams.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A signed Nostr event as received from (or published to) relays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NostrEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl NostrEvent {
    /// First value of the first tag with the given name.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().is_some_and(|t| t == name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// All first values across tags with the given name, in tag order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |tag| tag.first().is_some_and(|t| t == name))
            .filter_map(|tag| tag.get(1))
            .map(String::as_str)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|tag| tag.first().is_some_and(|t| t == name))
    }
}

/// An unsigned event handed to a [`crate::nostr::signer::NostrSigner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub created_at: i64,
}

impl EventTemplate {
    pub fn new(kind: u16, tags: Vec<Vec<String>>, content: String) -> Self {
        Self {
            kind,
            tags,
            content,
            created_at: Utc::now().timestamp(),
        }
    }
}

/// Subscription filter passed to a relay handler.
///
/// Empty fields match everything, mirroring relay filter semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub kinds: Vec<u16>,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Values of `p` tags (addressees) to match.
    #[serde(default, rename = "#p")]
    pub p_tags: Vec<String>,
    pub since: Option<i64>,
}

impl Filter {
    pub fn matches(&self, event: &NostrEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.p_tags.is_empty()
            && !event
                .tag_values("p")
                .any(|value| self.p_tags.iter().any(|wanted| wanted == value))
        {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        true
    }
}
