//! Payment UI state registry.
//!
//! Records payment-lifecycle notifications so a UI can render them. Nothing
//! here attempts to pay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::watch;

/// CEP-8 payment notification methods.
pub const PAYMENT_REQUIRED_METHOD: &str = "notifications/payment_required";
pub const PAYMENT_ACCEPTED_METHOD: &str = "notifications/payment_accepted";
pub const PAYMENT_REJECTED_METHOD: &str = "notifications/payment_rejected";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequiredParams {
    pub amount: String,
    pub pay_req: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAcceptedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmi: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRejectedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Raw notification params as received, rendered verbatim by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentNotification {
    PaymentRequired(PaymentRequiredParams),
    PaymentAccepted(PaymentAcceptedParams),
    PaymentRejected(PaymentRejectedParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    PaymentRequired,
    PaymentAccepted,
    PaymentRejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentUiState {
    pub server_pubkey: String,
    /// Event id of the correlated request (its `e` tag).
    pub request_event_id: String,
    pub status: PaymentStatus,
    pub notification: PaymentNotification,
    pub timestamp: DateTime<Utc>,
}

/// Minimal payment UI state registry.
///
/// Two indices over the same records: latest per server (overwritten on
/// each new state) and one entry per request event id (only a later state
/// of the *same* request replaces it).
pub struct PaymentNotificationRegistry {
    latest_by_server: RwLock<HashMap<String, PaymentUiState>>,
    by_request_event_id: RwLock<HashMap<String, PaymentUiState>>,
    version: watch::Sender<u64>,
}

impl Default for PaymentNotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentNotificationRegistry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            latest_by_server: RwLock::new(HashMap::new()),
            by_request_event_id: RwLock::new(HashMap::new()),
            version,
        }
    }

    pub fn set(&self, state: PaymentUiState) {
        self.latest_by_server
            .write()
            .expect("payment registry lock poisoned")
            .insert(state.server_pubkey.clone(), state.clone());
        self.by_request_event_id
            .write()
            .expect("payment registry lock poisoned")
            .insert(state.request_event_id.clone(), state);
        self.bump();
    }

    pub fn latest_for_server(&self, server_pubkey: &str) -> Option<PaymentUiState> {
        self.latest_by_server
            .read()
            .expect("payment registry lock poisoned")
            .get(server_pubkey)
            .cloned()
    }

    pub fn by_request_event_id(&self, request_event_id: &str) -> Option<PaymentUiState> {
        self.by_request_event_id
            .read()
            .expect("payment registry lock poisoned")
            .get(request_event_id)
            .cloned()
    }

    /// Drops every record belonging to a server; called when its session
    /// disconnects.
    pub fn clear_server(&self, server_pubkey: &str) {
        self.latest_by_server
            .write()
            .expect("payment registry lock poisoned")
            .remove(server_pubkey);
        self.by_request_event_id
            .write()
            .expect("payment registry lock poisoned")
            .retain(|_, state| state.server_pubkey != server_pubkey);
        self.bump();
    }

    /// Change notifications for UI bindings; the value is a bare version
    /// counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(server: &str, request_event_id: &str, status: PaymentStatus) -> PaymentUiState {
        PaymentUiState {
            server_pubkey: server.to_string(),
            request_event_id: request_event_id.to_string(),
            status,
            notification: PaymentNotification::PaymentRequired(PaymentRequiredParams {
                amount: "100".to_string(),
                pay_req: "lnbc100n1...".to_string(),
                pmi: Some("ln".to_string()),
                description: None,
            }),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn latest_by_server_is_overwritten_per_request_is_not() {
        let registry = PaymentNotificationRegistry::new();
        registry.set(state("server-a", "req-1", PaymentStatus::PaymentRequired));
        registry.set(state("server-a", "req-2", PaymentStatus::PaymentRequired));

        let latest = registry.latest_for_server("server-a").expect("latest");
        assert_eq!(latest.request_event_id, "req-2");

        // Both requests remain individually queryable.
        assert!(registry.by_request_event_id("req-1").is_some());
        assert!(registry.by_request_event_id("req-2").is_some());
    }

    #[test]
    fn same_request_updates_replace_in_both_indices() {
        let registry = PaymentNotificationRegistry::new();
        registry.set(state("server-a", "req-1", PaymentStatus::PaymentRequired));
        registry.set(state("server-a", "req-1", PaymentStatus::PaymentAccepted));

        assert_eq!(
            registry.by_request_event_id("req-1").expect("entry").status,
            PaymentStatus::PaymentAccepted
        );
    }

    #[test]
    fn clear_server_drops_both_indices_for_that_server_only() {
        let registry = PaymentNotificationRegistry::new();
        registry.set(state("server-a", "req-1", PaymentStatus::PaymentRequired));
        registry.set(state("server-b", "req-2", PaymentStatus::PaymentRequired));

        registry.clear_server("server-a");

        assert!(registry.latest_for_server("server-a").is_none());
        assert!(registry.by_request_event_id("req-1").is_none());
        assert!(registry.latest_for_server("server-b").is_some());
        assert!(registry.by_request_event_id("req-2").is_some());
    }

    #[test]
    fn notification_serializes_with_type_tag() {
        let notification = PaymentNotification::PaymentRejected(PaymentRejectedParams {
            reason: Some("expired".to_string()),
        });
        let value = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(value.get("type").and_then(|v| v.as_str()), Some("payment_rejected"));
    }
}
