use crate::mcp::payments::notifications::{
    PaymentNotification, PaymentNotificationRegistry, PaymentRequiredParams, PaymentStatus,
    PaymentUiState,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// A payment-required signal correlated to an outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentHandlerRequest {
    pub request_event_id: String,
    pub amount: String,
    pub pay_req: String,
    pub description: Option<String>,
}

/// Reacts to payment-required signals on outgoing requests.
#[async_trait]
pub trait PaymentHandler: Send + Sync {
    /// Payment-method identifier this handler advertises via `pmi` tags.
    fn pmi(&self) -> &str;

    fn can_handle(&self, request: &PaymentHandlerRequest) -> bool;

    async fn handle(&self, request: &PaymentHandlerRequest) -> Result<(), String>;
}

/// UI-only payment handler.
///
/// Captures payment_required so the UI can render the pay request. Does NOT
/// attempt to pay.
pub struct UiOnlyPaymentHandler {
    pmi: String,
    server_pubkey: String,
    registry: Arc<PaymentNotificationRegistry>,
}

impl UiOnlyPaymentHandler {
    pub fn new(
        pmi: impl Into<String>,
        server_pubkey: impl Into<String>,
        registry: Arc<PaymentNotificationRegistry>,
    ) -> Self {
        Self {
            pmi: pmi.into(),
            server_pubkey: server_pubkey.into(),
            registry,
        }
    }
}

#[async_trait]
impl PaymentHandler for UiOnlyPaymentHandler {
    fn pmi(&self) -> &str {
        &self.pmi
    }

    fn can_handle(&self, _request: &PaymentHandlerRequest) -> bool {
        // Every notification is surfaced in the UI.
        true
    }

    async fn handle(&self, request: &PaymentHandlerRequest) -> Result<(), String> {
        self.registry.set(PaymentUiState {
            server_pubkey: self.server_pubkey.clone(),
            request_event_id: request.request_event_id.clone(),
            status: PaymentStatus::PaymentRequired,
            notification: PaymentNotification::PaymentRequired(PaymentRequiredParams {
                amount: request.amount.clone(),
                pay_req: request.pay_req.clone(),
                pmi: Some(self.pmi.clone()),
                description: request.description.clone(),
            }),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_records_payment_required_state() {
        let registry = Arc::new(PaymentNotificationRegistry::new());
        let handler = UiOnlyPaymentHandler::new("ln", "server-a", registry.clone());

        let request = PaymentHandlerRequest {
            request_event_id: "req-1".to_string(),
            amount: "2100".to_string(),
            pay_req: "lnbc21u1...".to_string(),
            description: Some("tool call".to_string()),
        };
        assert!(handler.can_handle(&request));
        handler.handle(&request).await.expect("handle");

        let state = registry.by_request_event_id("req-1").expect("recorded");
        assert_eq!(state.server_pubkey, "server-a");
        assert_eq!(state.status, PaymentStatus::PaymentRequired);
        match state.notification {
            PaymentNotification::PaymentRequired(params) => {
                assert_eq!(params.amount, "2100");
                assert_eq!(params.pmi.as_deref(), Some("ln"));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }
}
