//! In-memory collaborators for exercising the client stack without relays.

use crate::core::constants::{DEFAULT_RELAYS, MCP_MESSAGE_KIND};
use crate::nostr::event::{EventTemplate, Filter, NostrEvent};
use crate::nostr::relay::{RelayHandler, RelayPoolFactory};
use crate::nostr::signer::NostrSigner;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Deterministic signer: ids are `<pubkey>-evt-<n>`, signatures are fake.
pub struct FakeSigner {
    pubkey: String,
    counter: AtomicU64,
}

impl FakeSigner {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl NostrSigner for FakeSigner {
    async fn public_key(&self) -> Result<String, String> {
        Ok(self.pubkey.clone())
    }

    async fn sign_event(&self, template: EventTemplate) -> Result<NostrEvent, String> {
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(NostrEvent {
            id: format!("{}-evt-{}", self.pubkey, sequence),
            pubkey: self.pubkey.clone(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: "fake-sig".to_string(),
        })
    }
}

/// A signer that always fails, for exercising connect error paths.
pub struct BrokenSigner;

#[async_trait]
impl NostrSigner for BrokenSigner {
    async fn public_key(&self) -> Result<String, String> {
        Err("signer unavailable".to_string())
    }

    async fn sign_event(&self, _template: EventTemplate) -> Result<NostrEvent, String> {
        Err("signer unavailable".to_string())
    }
}

type Responder = dyn Fn(&NostrEvent) -> Vec<NostrEvent> + Send + Sync;

struct Subscription {
    id: String,
    filter: Filter,
    sink: mpsc::UnboundedSender<NostrEvent>,
}

/// In-memory relay pool: published events are recorded and optionally
/// answered by a responder, and injected events are delivered to every
/// matching subscription.
pub struct LoopbackRelay {
    urls: Vec<String>,
    subscriptions: Mutex<Vec<Subscription>>,
    published: Mutex<Vec<NostrEvent>>,
    responder: Mutex<Option<Arc<Responder>>>,
    next_subscription: AtomicU64,
    closed: AtomicBool,
}

impl LoopbackRelay {
    pub fn new() -> Arc<Self> {
        Self::with_urls(DEFAULT_RELAYS.iter().map(|url| url.to_string()).collect())
    }

    pub fn with_urls(urls: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            urls,
            subscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            next_subscription: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_responder(
        &self,
        responder: impl Fn(&NostrEvent) -> Vec<NostrEvent> + Send + Sync + 'static,
    ) {
        *self.responder.lock().expect("responder lock poisoned") = Some(Arc::new(responder));
    }

    /// Delivers an event to every matching live subscription.
    pub fn inject(&self, event: NostrEvent) {
        let mut subscriptions = self.subscriptions.lock().expect("subscription lock poisoned");
        subscriptions.retain(|subscription| {
            if subscription.filter.matches(&event) {
                subscription.sink.send(event.clone()).is_ok()
            } else {
                !subscription.sink.is_closed()
            }
        });
    }

    pub fn published(&self) -> Vec<NostrEvent> {
        self.published.lock().expect("published lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayHandler for LoopbackRelay {
    fn relay_urls(&self) -> Vec<String> {
        self.urls.clone()
    }

    async fn publish(&self, event: &NostrEvent) -> Result<(), String> {
        if self.is_closed() {
            return Err("relay pool closed".to_string());
        }
        self.published
            .lock()
            .expect("published lock poisoned")
            .push(event.clone());

        let responder = self.responder.lock().expect("responder lock poisoned").clone();
        if let Some(responder) = responder {
            for reply in responder(event) {
                self.inject(reply);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: Filter,
        sink: mpsc::UnboundedSender<NostrEvent>,
    ) -> Result<String, String> {
        if self.is_closed() {
            return Err("relay pool closed".to_string());
        }
        let id = format!("sub-{}", self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .push(Subscription {
                id: id.clone(),
                filter,
                sink,
            });
        Ok(id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), String> {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .retain(|subscription| subscription.id != subscription_id);
        Ok(())
    }

    async fn close(&self) -> Result<(), String> {
        self.closed.store(true, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .clear();
        Ok(())
    }
}

/// Pool factory handing out loopback relays and remembering each build.
/// Published events are routed to the mock server they address.
pub struct LoopbackPoolFactory {
    servers: Vec<Arc<MockServer>>,
    pub built: Mutex<Vec<(Vec<String>, Arc<LoopbackRelay>)>>,
}

impl LoopbackPoolFactory {
    pub fn new(server: Arc<MockServer>) -> Self {
        Self::with_servers(vec![server])
    }

    pub fn with_servers(servers: Vec<Arc<MockServer>>) -> Self {
        Self {
            servers,
            built: Mutex::new(Vec::new()),
        }
    }

    pub fn last_pool(&self) -> Option<Arc<LoopbackRelay>> {
        self.built
            .lock()
            .expect("factory lock poisoned")
            .last()
            .map(|(_, pool)| pool.clone())
    }

    pub fn last_urls(&self) -> Option<Vec<String>> {
        self.built
            .lock()
            .expect("factory lock poisoned")
            .last()
            .map(|(urls, _)| urls.clone())
    }

    pub fn build_count(&self) -> usize {
        self.built.lock().expect("factory lock poisoned").len()
    }
}

impl RelayPoolFactory for LoopbackPoolFactory {
    fn build(&self, urls: &[String]) -> Arc<dyn RelayHandler> {
        let pool = LoopbackRelay::with_urls(urls.to_vec());
        let servers = self.servers.clone();
        pool.set_responder(move |event| {
            for server in &servers {
                if event.tag_value("p") == Some(server.pubkey.as_str()) {
                    return server.respond(event);
                }
            }
            Vec::new()
        });
        self.built
            .lock()
            .expect("factory lock poisoned")
            .push((urls.to_vec(), pool.clone()));
        pool
    }
}

/// Scripted MCP server living behind a loopback relay.
///
/// Answers initialize and the list/call/read/get methods; individual
/// behaviors are swappable per test.
pub struct MockServer {
    pub pubkey: String,
    counter: AtomicU64,
    /// Methods that should never be answered (to exercise timeouts).
    silent_methods: Mutex<Vec<String>>,
    /// When set, tools/call is answered with a payment_required
    /// notification before the result.
    payment_request: Mutex<Option<Value>>,
    /// When true, initialize requests are answered with a JSON-RPC error.
    fail_initialize: AtomicBool,
    /// Observed tools/call request event ids and progress tokens.
    pub tool_calls: Mutex<Vec<(String, Option<String>)>>,
}

impl MockServer {
    pub fn new(pubkey: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            pubkey: pubkey.into(),
            counter: AtomicU64::new(0),
            silent_methods: Mutex::new(Vec::new()),
            payment_request: Mutex::new(None),
            fail_initialize: AtomicBool::new(false),
            tool_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn silence_method(&self, method: &str) {
        self.silent_methods
            .lock()
            .expect("mock server lock poisoned")
            .push(method.to_string());
    }

    pub fn require_payment(&self, amount: &str, pay_req: &str) {
        *self.payment_request.lock().expect("mock server lock poisoned") = Some(json!({
            "amount": amount,
            "pay_req": pay_req,
        }));
    }

    pub fn fail_initialize(&self) {
        self.fail_initialize.store(true, Ordering::SeqCst);
    }

    pub fn restore_initialize(&self) {
        self.fail_initialize.store(false, Ordering::SeqCst);
    }

    fn next_event_id(&self) -> String {
        format!(
            "{}-evt-{}",
            self.pubkey,
            self.counter.fetch_add(1, Ordering::SeqCst)
        )
    }

    /// Wraps a JSON-RPC payload in an event addressed to `client_pubkey`,
    /// correlated to `request_event_id`.
    pub fn message_event(
        &self,
        client_pubkey: &str,
        request_event_id: &str,
        payload: Value,
    ) -> NostrEvent {
        NostrEvent {
            id: self.next_event_id(),
            pubkey: self.pubkey.clone(),
            created_at: chrono::Utc::now().timestamp(),
            kind: MCP_MESSAGE_KIND,
            tags: vec![
                vec!["p".to_string(), client_pubkey.to_string()],
                vec!["e".to_string(), request_event_id.to_string()],
            ],
            content: payload.to_string(),
            sig: "fake-sig".to_string(),
        }
    }

    pub fn progress_event(
        &self,
        client_pubkey: &str,
        request_event_id: &str,
        token: &str,
        progress: f64,
        message: Option<&str>,
    ) -> NostrEvent {
        let mut params = json!({"progressToken": token, "progress": progress, "total": 100.0});
        if let Some(message) = message {
            params["message"] = Value::String(message.to_string());
        }
        self.message_event(
            client_pubkey,
            request_event_id,
            json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": params}),
        )
    }

    /// The responder wired into loopback pools built for this server.
    pub fn respond(&self, event: &NostrEvent) -> Vec<NostrEvent> {
        if event.kind != MCP_MESSAGE_KIND || event.tag_value("p") != Some(self.pubkey.as_str()) {
            return Vec::new();
        }
        let Ok(payload) = serde_json::from_str::<Value>(&event.content) else {
            return Vec::new();
        };
        let Some(method) = payload.get("method").and_then(|m| m.as_str()) else {
            return Vec::new();
        };
        let client_pubkey = event.pubkey.clone();
        let id = payload.get("id").cloned();
        let silenced = self
            .silent_methods
            .lock()
            .expect("mock server lock poisoned")
            .iter()
            .any(|silent| silent == method);

        if silenced && method != "tools/call" {
            return Vec::new();
        }

        let result = match method {
            "initialize" => {
                if self.fail_initialize.load(Ordering::SeqCst) {
                    return vec![self.message_event(
                        &client_pubkey,
                        &event.id,
                        json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {"code": -32000, "message": "server unavailable"}
                        }),
                    )];
                }
                json!({
                    "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
                    "protocolVersion": "2025-11-25",
                    "serverInfo": {"name": "Mock Server", "version": "0.1.0", "icons": []}
                })
            }
            "notifications/initialized" => return Vec::new(),
            "tools/list" => json!({
                "tools": [{"name": "search", "inputSchema": {"type": "object"}}]
            }),
            "resources/list" => json!({
                "resources": [{"name": "motd", "uri": "file:///etc/motd"}]
            }),
            "resources/templates/list" => json!({
                "resourceTemplates": [{"name": "files", "uriTemplate": "file:///{path}"}]
            }),
            "prompts/list" => json!({
                "prompts": [{"name": "summarize"}]
            }),
            "resources/read" => json!({
                "contents": [{
                    "uri": payload["params"]["uri"],
                    "text": "hello",
                }]
            }),
            "prompts/get" => json!({
                "messages": [{
                    "role": "user",
                    "content": {"type": "text", "text": "summarize this"}
                }]
            }),
            "tools/call" => {
                let token = payload["params"]["_meta"]["progressToken"]
                    .as_str()
                    .or_else(|| payload["params"]["meta"]["progressToken"].as_str())
                    .map(str::to_string);
                self.tool_calls
                    .lock()
                    .expect("mock server lock poisoned")
                    .push((event.id.clone(), token));
                if silenced {
                    return Vec::new();
                }

                let mut replies = Vec::new();
                if let Some(payment) =
                    self.payment_request.lock().expect("mock server lock poisoned").clone()
                {
                    replies.push(self.message_event(
                        &client_pubkey,
                        &event.id,
                        json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/payment_required",
                            "params": payment
                        }),
                    ));
                }
                replies.push(self.message_event(
                    &client_pubkey,
                    &event.id,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {"content": [{"type": "text", "text": "ok"}], "isError": false}
                    }),
                ));
                return replies;
            }
            _ => {
                return vec![self.message_event(
                    &client_pubkey,
                    &event.id,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "Method not found"}
                    }),
                )];
            }
        };

        vec![self.message_event(
            &client_pubkey,
            &event.id,
            json!({"jsonrpc": "2.0", "id": id, "result": result}),
        )]
    }
}
