//! Transports carrying MCP JSON-RPC messages over signed Nostr events.
//!
//! [`NostrTransport`] frames [`ClientMessage`]s into kind-25910 events and
//! routes the server's replies back out of the relay subscription.
//! [`PaymentObservingTransport`] wraps any transport to surface
//! payment-required signals without ever paying.

use crate::core::constants::{
    ANNOUNCEMENT_KINDS, MCP_MESSAGE_KIND, PROMPTS_LIST_KIND, RESOURCES_LIST_KIND,
    RESOURCE_TEMPLATES_LIST_KIND, SERVER_ANNOUNCEMENT_KIND, TOOLS_LIST_KIND,
};
use crate::mcp::payments::handler::{PaymentHandler, PaymentHandlerRequest};
use crate::mcp::payments::notifications::PAYMENT_REQUIRED_METHOD;
use crate::mcp::protocol::notification_parts;
use crate::nostr::event::{EventTemplate, Filter, NostrEvent};
use crate::nostr::relay::RelayHandler;
use crate::nostr::signer::NostrSigner;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{ClientMessage, ServerMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A decoded server message plus the event envelope it arrived in.
#[derive(Debug)]
pub struct IncomingMessage {
    pub message: ServerMessage,
    /// Id of the event that carried this message.
    pub event_id: String,
    /// Event id of the correlated outgoing request (`e` tag), when present.
    pub request_event_id: Option<String>,
}

/// Message-level transport consumed by the protocol client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the transport and returns the incoming-message stream.
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<IncomingMessage>, String>;

    /// Sends a message and returns the id of the published event.
    async fn send(&self, message: ClientMessage) -> Result<String, String>;

    async fn close(&self) -> Result<(), String>;
}

/// Transport bound to one `(signer, relay pool, server)` triple.
pub struct NostrTransport {
    signer: Arc<dyn NostrSigner>,
    relays: Arc<dyn RelayHandler>,
    server_pubkey: String,
    announcements: Arc<RwLock<HashMap<u16, NostrEvent>>>,
    subscription_ids: Mutex<Vec<String>>,
    cancel: CancellationToken,
}

impl NostrTransport {
    pub fn new(
        signer: Arc<dyn NostrSigner>,
        relays: Arc<dyn RelayHandler>,
        server_pubkey: impl Into<String>,
    ) -> Self {
        Self {
            signer,
            relays,
            server_pubkey: server_pubkey.into(),
            announcements: Arc::new(RwLock::new(HashMap::new())),
            subscription_ids: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn server_pubkey(&self) -> &str {
        &self.server_pubkey
    }

    /// Latest announcement event of the given kind seen from this server.
    pub fn server_announcement_event(&self, kind: u16) -> Option<NostrEvent> {
        self.announcements
            .read()
            .expect("announcement cache lock poisoned")
            .get(&kind)
            .cloned()
    }

    pub fn server_initialize_event(&self) -> Option<NostrEvent> {
        self.server_announcement_event(SERVER_ANNOUNCEMENT_KIND)
    }

    pub fn server_tools_list_event(&self) -> Option<NostrEvent> {
        self.server_announcement_event(TOOLS_LIST_KIND)
    }

    pub fn server_resources_list_event(&self) -> Option<NostrEvent> {
        self.server_announcement_event(RESOURCES_LIST_KIND)
    }

    pub fn server_resource_templates_list_event(&self) -> Option<NostrEvent> {
        self.server_announcement_event(RESOURCE_TEMPLATES_LIST_KIND)
    }

    pub fn server_prompts_list_event(&self) -> Option<NostrEvent> {
        self.server_announcement_event(PROMPTS_LIST_KIND)
    }

    fn cache_announcement(cache: &RwLock<HashMap<u16, NostrEvent>>, event: NostrEvent) {
        let mut cache = cache.write().expect("announcement cache lock poisoned");
        match cache.get(&event.kind) {
            Some(existing) if existing.created_at > event.created_at => {}
            _ => {
                cache.insert(event.kind, event);
            }
        }
    }

    fn decode_incoming(event: NostrEvent) -> Option<IncomingMessage> {
        let message = match serde_json::from_str::<ServerMessage>(&event.content) {
            Ok(message) => message,
            Err(err) => {
                debug!(event_id = %event.id, %err, "Dropping undecodable MCP event");
                return None;
            }
        };
        let request_event_id = event.tag_value("e").map(str::to_string);
        Some(IncomingMessage {
            message,
            event_id: event.id,
            request_event_id,
        })
    }
}

#[async_trait]
impl Transport for NostrTransport {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<IncomingMessage>, String> {
        let client_pubkey = self.signer.public_key().await?;

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let message_filter = Filter {
            kinds: vec![MCP_MESSAGE_KIND],
            authors: vec![self.server_pubkey.clone()],
            p_tags: vec![client_pubkey],
            since: None,
        };
        let message_sub = self.relays.subscribe(message_filter, raw_tx).await?;

        let (ann_tx, mut ann_rx) = mpsc::unbounded_channel();
        let announcement_filter = Filter {
            kinds: ANNOUNCEMENT_KINDS.to_vec(),
            authors: vec![self.server_pubkey.clone()],
            p_tags: Vec::new(),
            since: None,
        };
        let announcement_sub = self.relays.subscribe(announcement_filter, ann_tx).await?;

        {
            let mut ids = self
                .subscription_ids
                .lock()
                .expect("subscription id lock poisoned");
            ids.push(message_sub);
            ids.push(announcement_sub);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let announcements = self.announcements.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = raw_rx.recv() => {
                        let Some(event) = event else { break };
                        if let Some(incoming) = NostrTransport::decode_incoming(event) {
                            if out_tx.send(incoming).is_err() {
                                break;
                            }
                        }
                    }
                    event = ann_rx.recv() => {
                        if let Some(event) = event {
                            NostrTransport::cache_announcement(&announcements, event);
                        }
                    }
                }
            }
        });

        Ok(out_rx)
    }

    async fn send(&self, message: ClientMessage) -> Result<String, String> {
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        let template = EventTemplate::new(
            MCP_MESSAGE_KIND,
            vec![vec!["p".to_string(), self.server_pubkey.clone()]],
            payload,
        );
        let event = self.signer.sign_event(template).await?;
        let event_id = event.id.clone();
        self.relays.publish(&event).await?;
        Ok(event_id)
    }

    async fn close(&self) -> Result<(), String> {
        self.cancel.cancel();
        let ids: Vec<String> = self
            .subscription_ids
            .lock()
            .expect("subscription id lock poisoned")
            .drain(..)
            .collect();
        for id in ids {
            if let Err(err) = self.relays.unsubscribe(&id).await {
                debug!(subscription_id = %id, %err, "Failed to drop relay subscription");
            }
        }
        Ok(())
    }
}

/// Middleware that observes payment-required signals on outgoing requests.
///
/// Correlated `payment_required` notifications are handed to the payment
/// handler and consumed; everything else passes through untouched. This
/// layer never executes payment.
pub struct PaymentObservingTransport {
    inner: Arc<dyn Transport>,
    handler: Arc<dyn PaymentHandler>,
}

impl PaymentObservingTransport {
    pub fn new(inner: Arc<dyn Transport>, handler: Arc<dyn PaymentHandler>) -> Self {
        Self { inner, handler }
    }

    fn payment_request(incoming: &IncomingMessage, params: &Value) -> Option<PaymentHandlerRequest> {
        let Some(request_event_id) = incoming.request_event_id.clone() else {
            warn!(
                event_id = %incoming.event_id,
                "Dropping payment_required with no correlated request"
            );
            return None;
        };
        let amount = params.get("amount")?;
        let amount = match amount {
            Value::String(amount) => amount.clone(),
            Value::Number(amount) => amount.to_string(),
            _ => return None,
        };
        let pay_req = params.get("pay_req")?.as_str()?.to_string();
        let description = params
            .get("description")
            .and_then(|value| value.as_str())
            .map(str::to_string);
        Some(PaymentHandlerRequest {
            request_event_id,
            amount,
            pay_req,
            description,
        })
    }
}

#[async_trait]
impl Transport for PaymentObservingTransport {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<IncomingMessage>, String> {
        let mut inner_rx = self.inner.start().await?;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handler = self.handler.clone();

        tokio::spawn(async move {
            while let Some(incoming) = inner_rx.recv().await {
                let payment = notification_parts(&incoming.message)
                    .filter(|(method, _)| method == PAYMENT_REQUIRED_METHOD);
                if let Some((_, params)) = payment {
                    if let Some(request) = Self::payment_request(&incoming, &params) {
                        if handler.can_handle(&request) {
                            if let Err(err) = handler.handle(&request).await {
                                warn!(
                                    request_event_id = %request.request_event_id,
                                    %err,
                                    "Payment handler failed"
                                );
                            }
                        }
                    }
                    continue;
                }
                if out_tx.send(incoming).is_err() {
                    break;
                }
            }
        });

        Ok(out_rx)
    }

    async fn send(&self, message: ClientMessage) -> Result<String, String> {
        self.inner.send(message).await
    }

    async fn close(&self) -> Result<(), String> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::DEFAULT_RELAYS;
    use crate::mcp::payments::notifications::PaymentNotificationRegistry;
    use crate::mcp::payments::UiOnlyPaymentHandler;
    use crate::utils::test_utils::{FakeSigner, LoopbackRelay};
    use rust_mcp_schema::schema_utils::{
        ClientMessage, FromMessage, MessageFromClient, RequestFromClient,
    };
    use rust_mcp_schema::RequestId;

    fn ping_message() -> ClientMessage {
        ClientMessage::from_message(
            MessageFromClient::RequestFromClient(RequestFromClient::PingRequest(None)),
            Some(RequestId::Integer(0)),
        )
        .expect("message should build")
    }

    fn server_event(content: &str, tags: Vec<Vec<String>>) -> NostrEvent {
        NostrEvent {
            id: "server-evt".to_string(),
            pubkey: "server".to_string(),
            created_at: 10,
            kind: MCP_MESSAGE_KIND,
            tags,
            content: content.to_string(),
            sig: String::new(),
        }
    }

    #[tokio::test]
    async fn send_publishes_signed_kind_25910_event() {
        let relay = LoopbackRelay::new();
        let signer = Arc::new(FakeSigner::new("client"));
        let transport = NostrTransport::new(signer, relay.clone(), "server");

        let event_id = transport.send(ping_message()).await.expect("send");

        let published = relay.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, event_id);
        assert_eq!(published[0].kind, MCP_MESSAGE_KIND);
        assert_eq!(published[0].tag_value("p"), Some("server"));
        assert!(published[0].content.contains("ping"));
    }

    #[tokio::test]
    async fn incoming_events_are_decoded_with_correlation() {
        let relay = LoopbackRelay::new();
        let signer = Arc::new(FakeSigner::new("client"));
        let transport = NostrTransport::new(signer, relay.clone(), "server");

        let mut rx = transport.start().await.expect("start");
        relay.inject(server_event(
            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
            vec![
                vec!["p".to_string(), "client".to_string()],
                vec!["e".to_string(), "request-evt".to_string()],
            ],
        ));

        let incoming = rx.recv().await.expect("incoming message");
        assert_eq!(incoming.request_event_id.as_deref(), Some("request-evt"));
        assert!(matches!(incoming.message, ServerMessage::Response(_)));
    }

    #[tokio::test]
    async fn undecodable_events_are_dropped() {
        let relay = LoopbackRelay::new();
        let signer = Arc::new(FakeSigner::new("client"));
        let transport = NostrTransport::new(signer, relay.clone(), "server");

        let mut rx = transport.start().await.expect("start");
        relay.inject(server_event(
            "not json",
            vec![vec!["p".to_string(), "client".to_string()]],
        ));
        relay.inject(server_event(
            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
            vec![vec!["p".to_string(), "client".to_string()]],
        ));

        let incoming = rx.recv().await.expect("incoming message");
        assert!(matches!(incoming.message, ServerMessage::Response(_)));
    }

    #[tokio::test]
    async fn announcement_events_fill_the_accessor_cache() {
        let relay = LoopbackRelay::new();
        let signer = Arc::new(FakeSigner::new("client"));
        let transport = NostrTransport::new(signer, relay.clone(), "server");

        let _rx = transport.start().await.expect("start");
        relay.inject(NostrEvent {
            id: "ann-old".to_string(),
            pubkey: "server".to_string(),
            created_at: 5,
            kind: SERVER_ANNOUNCEMENT_KIND,
            tags: vec![vec!["cap".to_string(), "tool:search".to_string(), "100".to_string(), "sats".to_string()]],
            content: String::new(),
            sig: String::new(),
        });
        relay.inject(NostrEvent {
            id: "ann-new".to_string(),
            pubkey: "server".to_string(),
            created_at: 9,
            kind: SERVER_ANNOUNCEMENT_KIND,
            tags: Vec::new(),
            content: String::new(),
            sig: String::new(),
        });

        // The routing task runs on this runtime; yield until it caught up.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let cached = transport.server_initialize_event().expect("cached event");
        assert_eq!(cached.id, "ann-new");
        assert!(transport.server_tools_list_event().is_none());
    }

    #[tokio::test]
    async fn relay_urls_come_from_the_injected_pool() {
        let relay = LoopbackRelay::new();
        assert_eq!(relay.relay_urls(), vec![DEFAULT_RELAYS[0].to_string()]);
    }

    #[tokio::test]
    async fn payment_required_is_observed_and_consumed() {
        let relay = LoopbackRelay::new();
        let signer = Arc::new(FakeSigner::new("client"));
        let registry = Arc::new(PaymentNotificationRegistry::new());
        let handler = Arc::new(UiOnlyPaymentHandler::new("ln", "server", registry.clone()));
        let inner = Arc::new(NostrTransport::new(signer, relay.clone(), "server"));
        let transport = PaymentObservingTransport::new(inner, handler);

        let mut rx = transport.start().await.expect("start");
        relay.inject(server_event(
            r#"{"jsonrpc":"2.0","method":"notifications/payment_required","params":{"amount":"100","pay_req":"lnbc100n1..."}}"#,
            vec![
                vec!["p".to_string(), "client".to_string()],
                vec!["e".to_string(), "request-evt".to_string()],
            ],
        ));
        relay.inject(server_event(
            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
            vec![
                vec!["p".to_string(), "client".to_string()],
                vec!["e".to_string(), "request-evt".to_string()],
            ],
        ));

        // Only the response comes through; the payment signal was recorded.
        let incoming = rx.recv().await.expect("incoming message");
        assert!(matches!(incoming.message, ServerMessage::Response(_)));

        let state = registry
            .by_request_event_id("request-evt")
            .expect("payment state recorded");
        assert_eq!(state.server_pubkey, "server");
    }
}
