//! Relay collaborator seams and the observable relay selection.
//!
//! The socket-level relay protocol is out of scope; the core passes pools
//! into transports and never speaks the wire protocol itself.

use crate::core::constants::DEFAULT_RELAYS;
use crate::nostr::event::{Filter, NostrEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Socket-level relay access, implemented outside this crate.
///
/// Subscriptions deliver matching events into the provided sink until
/// dropped or explicitly unsubscribed.
#[async_trait]
pub trait RelayHandler: Send + Sync {
    fn relay_urls(&self) -> Vec<String>;

    async fn publish(&self, event: &NostrEvent) -> Result<(), String>;

    /// Opens a subscription and returns its id for later teardown.
    async fn subscribe(
        &self,
        filter: Filter,
        sink: mpsc::UnboundedSender<NostrEvent>,
    ) -> Result<String, String>;

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), String>;

    async fn close(&self) -> Result<(), String>;
}

/// Builds one relay pool per server identity from the current relay list.
pub trait RelayPoolFactory: Send + Sync {
    fn build(&self, urls: &[String]) -> Arc<dyn RelayHandler>;
}

/// The user's selected relay set, observable through a watch channel.
///
/// Consumers that need to react to changes (the session manager, UI lists)
/// hold a receiver; state lives here rather than in any UI binding.
pub struct RelayStore {
    selected: watch::Sender<Vec<String>>,
}

impl RelayStore {
    pub fn new(initial: Vec<String>) -> Self {
        let (selected, _) = watch::channel(initial);
        Self { selected }
    }

    pub fn selected(&self) -> Vec<String> {
        self.selected.borrow().clone()
    }

    pub fn set_selected(&self, relays: Vec<String>) {
        self.selected.send_replace(relays);
    }

    pub fn reset_to_defaults(&self) {
        self.set_selected(DEFAULT_RELAYS.iter().map(|url| url.to_string()).collect());
    }

    /// Removes relays matching any entry by mutual prefix, so
    /// `wss://relay.example.com` and `wss://relay.example.com/` drop the
    /// same selection entry.
    pub fn remove_relays(&self, to_remove: &[String]) {
        self.selected.send_modify(|selected| {
            selected.retain(|relay| {
                !to_remove
                    .iter()
                    .any(|candidate| relay.starts_with(candidate) || candidate.starts_with(relay))
            });
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.selected.subscribe()
    }
}

impl Default for RelayStore {
    fn default() -> Self {
        Self::new(DEFAULT_RELAYS.iter().map(|url| url.to_string()).collect())
    }
}
