//! The connection session manager.
//!
//! One context object per application instance owns, per remote server
//! identity, a transport, a protocol client, a relay pool, and a
//! connection state, and exposes the request surface the rest of the
//! application uses. Connection-lifecycle failures land in per-server
//! state for inline rendering; request failures are raised to the caller.

use crate::auth::ActiveAccount;
use crate::core::constants::{DEFAULT_PMI, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::client::{McpClient, RequestOptions};
use crate::mcp::error::McpError;
use crate::mcp::payments::handler::UiOnlyPaymentHandler;
use crate::mcp::payments::notifications::{
    PaymentAcceptedParams, PaymentNotification, PaymentNotificationRegistry, PaymentRejectedParams,
    PaymentStatus, PaymentUiState, PAYMENT_ACCEPTED_METHOD, PAYMENT_REJECTED_METHOD,
};
use crate::mcp::progress::{ProgressRegistry, ProgressUpdate};
use crate::mcp::protocol::{progress_token_from_params, PROGRESS_NOTIFICATION_METHOD};
use crate::mcp::transport::{NostrTransport, PaymentObservingTransport, Transport};
use crate::nostr::relay::{RelayHandler, RelayPoolFactory, RelayStore};
use crate::nostr::signer::NostrSigner;
use chrono::Utc;
use rust_mcp_schema::{
    CallToolResult, GetPromptResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, ReadResourceResult,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Connection lifecycle state for one server identity.
///
/// `connected` is true iff a live session exists and its handshake
/// completed; `error` holds the message of the last lifecycle failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl ConnectionState {
    fn loading() -> Self {
        Self {
            connected: false,
            loading: true,
            error: None,
        }
    }

    fn established() -> Self {
        Self {
            connected: true,
            loading: false,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            connected: false,
            loading: false,
            error: Some(message),
        }
    }
}

/// Change notifications emitted toward the embedding application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStateChanged {
        server_pubkey: String,
        state: ConnectionState,
    },
    /// The selected relay set changed while sessions were open. Open
    /// sessions keep their old pools until the application confirms a
    /// `reconnect_all_clients`.
    RelaysChanged { open_sessions: usize },
}

pub struct McpSessionManager {
    accounts: Arc<ActiveAccount>,
    pool_factory: Arc<dyn RelayPoolFactory>,
    relay_store: Arc<RelayStore>,
    clients: HashMap<String, Arc<McpClient>>,
    /// Inner transports, kept beside the wrapped ones handed to clients so
    /// announcement accessors stay reachable after wrapping.
    transports: HashMap<String, Arc<NostrTransport>>,
    pools: HashMap<String, Arc<dyn RelayHandler>>,
    connection_states: HashMap<String, ConnectionState>,
    progress: Arc<ProgressRegistry>,
    payments: Arc<PaymentNotificationRegistry>,
    event_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl McpSessionManager {
    pub fn new(
        accounts: Arc<ActiveAccount>,
        pool_factory: Arc<dyn RelayPoolFactory>,
        relay_store: Arc<RelayStore>,
    ) -> Self {
        Self {
            accounts,
            pool_factory,
            relay_store,
            clients: HashMap::new(),
            transports: HashMap::new(),
            pools: HashMap::new(),
            connection_states: HashMap::new(),
            progress: Arc::new(ProgressRegistry::new()),
            payments: Arc::new(PaymentNotificationRegistry::new()),
            event_tx: None,
        }
    }

    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<SessionEvent>) {
        self.event_tx = Some(sender);
    }

    pub fn connection_state(&self, server_pubkey: &str) -> ConnectionState {
        self.connection_states
            .get(server_pubkey)
            .cloned()
            .unwrap_or_default()
    }

    pub fn open_sessions(&self) -> usize {
        self.clients.len()
    }

    /// Inner transport for a server, for announcement-event inspection.
    pub fn transport(&self, server_pubkey: &str) -> Option<Arc<NostrTransport>> {
        self.transports.get(server_pubkey).cloned()
    }

    pub fn progress(&self) -> &Arc<ProgressRegistry> {
        &self.progress
    }

    pub fn payments(&self) -> &Arc<PaymentNotificationRegistry> {
        &self.payments
    }

    /// Returns the live client for a server, lazily connecting on first
    /// use. Lifecycle failures are captured into the connection state and
    /// yield `None`.
    pub async fn get_client(&mut self, server_pubkey: &str) -> Option<Arc<McpClient>> {
        if let Some(client) = self.clients.get(server_pubkey) {
            return Some(client.clone());
        }

        self.set_state(server_pubkey, ConnectionState::loading());

        let signer = match self.resolve_signer() {
            Ok(signer) => signer,
            Err(err) => {
                self.set_state(server_pubkey, ConnectionState::failed(err.to_string()));
                return None;
            }
        };

        let pool = match self.pools.get(server_pubkey) {
            Some(pool) => pool.clone(),
            None => {
                let pool = self.pool_factory.build(&self.relay_store.selected());
                self.pools.insert(server_pubkey.to_string(), pool.clone());
                pool
            }
        };

        let (client, transport) = self.build_session(signer, server_pubkey, pool);
        match client.connect().await {
            Ok(_) => {
                self.clients.insert(server_pubkey.to_string(), client.clone());
                self.transports.insert(server_pubkey.to_string(), transport);
                self.set_state(server_pubkey, ConnectionState::established());
                Some(client)
            }
            Err(err) => {
                if let Err(close_err) = client.close().await {
                    debug!(server_pubkey, %close_err, "Cleanup close failed after handshake error");
                }
                let failure = McpError::ConnectionFailed { message: err };
                self.set_state(server_pubkey, ConnectionState::failed(failure.to_string()));
                None
            }
        }
    }

    /// Closes and forgets a server's session. No-op when none exists.
    pub async fn disconnect(&mut self, server_pubkey: &str) {
        let Some(client) = self.clients.remove(server_pubkey) else {
            return;
        };
        if let Err(err) = client.close().await {
            warn!(server_pubkey, %err, "Failed to close MCP client cleanly");
        }
        self.transports.remove(server_pubkey);
        self.pools.remove(server_pubkey);
        self.payments.clear_server(server_pubkey);
        self.progress.clear_server(server_pubkey);
        self.set_state(server_pubkey, ConnectionState::default());
    }

    /// Rebuilds and reconnects every open session against freshly built
    /// relay pools. One identity's failure never aborts the others.
    pub async fn reconnect_all_clients(&mut self) {
        let server_pubkeys: Vec<String> = self.clients.keys().cloned().collect();
        for server_pubkey in server_pubkeys {
            self.set_state(&server_pubkey, ConnectionState::loading());

            if let Some(old_client) = self.clients.remove(&server_pubkey) {
                if let Err(err) = old_client.close().await {
                    warn!(server_pubkey = %server_pubkey, %err, "Failed to close client during reconnect");
                }
            }
            self.transports.remove(&server_pubkey);

            let signer = match self.resolve_signer() {
                Ok(signer) => signer,
                Err(err) => {
                    self.set_state(&server_pubkey, ConnectionState::failed(err.to_string()));
                    continue;
                }
            };

            let pool = self.pool_factory.build(&self.relay_store.selected());
            self.pools.insert(server_pubkey.clone(), pool.clone());

            let (client, transport) = self.build_session(signer, &server_pubkey, pool);
            match client.connect().await {
                Ok(_) => {
                    self.clients.insert(server_pubkey.clone(), client);
                    self.transports.insert(server_pubkey.clone(), transport);
                    self.set_state(&server_pubkey, ConnectionState::established());
                }
                Err(err) => {
                    if let Err(close_err) = client.close().await {
                        debug!(server_pubkey = %server_pubkey, %close_err, "Cleanup close failed during reconnect");
                    }
                    let failure = McpError::ConnectionFailed { message: err };
                    self.set_state(&server_pubkey, ConnectionState::failed(failure.to_string()));
                }
            }
        }
    }

    /// Reacts to a relay selection change: every tracked identity gets a
    /// freshly built pool for future sessions, while open sessions stay on
    /// their old pools until a confirmed reconnect. The emitted event is
    /// the embedding UI's cue to offer that reconnect.
    pub fn handle_relay_change(&mut self) {
        let relays = self.relay_store.selected();
        let tracked: Vec<String> = self.pools.keys().cloned().collect();
        for server_pubkey in tracked {
            let pool = self.pool_factory.build(&relays);
            self.pools.insert(server_pubkey, pool);
        }

        if !self.clients.is_empty() {
            self.emit(SessionEvent::RelaysChanged {
                open_sessions: self.clients.len(),
            });
        }
    }

    /// Closes every open session and clears all per-identity state.
    pub async fn teardown(&mut self) {
        let server_pubkeys: Vec<String> = self.clients.keys().cloned().collect();
        for server_pubkey in &server_pubkeys {
            if let Some(client) = self.clients.remove(server_pubkey) {
                if let Err(err) = client.close().await {
                    warn!(server_pubkey = %server_pubkey, %err, "Failed to close client during teardown");
                }
            }
        }

        let known: HashSet<String> = self
            .connection_states
            .keys()
            .chain(server_pubkeys.iter())
            .cloned()
            .collect();
        for server_pubkey in known {
            self.payments.clear_server(&server_pubkey);
            self.progress.clear_server(&server_pubkey);
        }

        self.transports.clear();
        self.pools.clear();
        self.connection_states.clear();
    }

    pub async fn list_tools(&mut self, server_pubkey: &str) -> Result<ListToolsResult, McpError> {
        let client = self.require_client(server_pubkey).await?;
        client
            .list_tools(RequestOptions::default())
            .await
            .map_err(|message| McpError::RequestFailed { message })
    }

    pub async fn list_resources(
        &mut self,
        server_pubkey: &str,
    ) -> Result<ListResourcesResult, McpError> {
        let client = self.require_client(server_pubkey).await?;
        client
            .list_resources(RequestOptions::default())
            .await
            .map_err(|message| McpError::RequestFailed { message })
    }

    pub async fn list_resource_templates(
        &mut self,
        server_pubkey: &str,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        let client = self.require_client(server_pubkey).await?;
        client
            .list_resource_templates(RequestOptions::default())
            .await
            .map_err(|message| McpError::RequestFailed { message })
    }

    pub async fn list_prompts(&mut self, server_pubkey: &str) -> Result<ListPromptsResult, McpError> {
        let client = self.require_client(server_pubkey).await?;
        client
            .list_prompts(RequestOptions::default())
            .await
            .map_err(|message| McpError::RequestFailed { message })
    }

    /// Calls a tool with a fresh random progress token; the request
    /// outlives the default timeout as long as progress keeps arriving.
    pub async fn call_tool(
        &mut self,
        server_pubkey: &str,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let client = self.require_client(server_pubkey).await?;
        let token = new_progress_token().map_err(|message| McpError::RequestFailed { message })?;
        client
            .call_tool(
                name,
                arguments,
                RequestOptions {
                    timeout: DEFAULT_REQUEST_TIMEOUT,
                    reset_timeout_on_progress: true,
                    progress_token: Some(token),
                },
            )
            .await
            .map_err(|message| McpError::RequestFailed { message })
    }

    pub async fn read_resource(
        &mut self,
        server_pubkey: &str,
        uri: &str,
    ) -> Result<ReadResourceResult, McpError> {
        let client = self.require_client(server_pubkey).await?;
        client
            .read_resource(uri, RequestOptions::default())
            .await
            .map_err(|message| McpError::RequestFailed { message })
    }

    pub async fn get_prompt(
        &mut self,
        server_pubkey: &str,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult, McpError> {
        let client = self.require_client(server_pubkey).await?;
        client
            .get_prompt(name, arguments, RequestOptions::default())
            .await
            .map_err(|message| McpError::RequestFailed { message })
    }

    async fn require_client(&mut self, server_pubkey: &str) -> Result<Arc<McpClient>, McpError> {
        self.get_client(server_pubkey)
            .await
            .ok_or(McpError::NotConnected)
    }

    fn resolve_signer(&self) -> Result<Arc<dyn NostrSigner>, McpError> {
        let account = self
            .accounts
            .get_value()
            .ok_or_else(McpError::not_logged_in)?;
        account.signer.ok_or_else(McpError::no_signer)
    }

    fn build_session(
        &self,
        signer: Arc<dyn NostrSigner>,
        server_pubkey: &str,
        pool: Arc<dyn RelayHandler>,
    ) -> (Arc<McpClient>, Arc<NostrTransport>) {
        let transport = Arc::new(NostrTransport::new(signer, pool, server_pubkey));
        let handler = Arc::new(UiOnlyPaymentHandler::new(
            DEFAULT_PMI,
            server_pubkey,
            self.payments.clone(),
        ));
        let wrapped: Arc<dyn Transport> =
            Arc::new(PaymentObservingTransport::new(transport.clone(), handler));
        let client = Arc::new(McpClient::new(wrapped));
        self.register_notification_handlers(&client, server_pubkey);
        (client, transport)
    }

    fn register_notification_handlers(&self, client: &McpClient, server_pubkey: &str) {
        let progress_registry = self.progress.clone();
        let progress_server = server_pubkey.to_string();
        client.set_notification_handler(PROGRESS_NOTIFICATION_METHOD, move |envelope| {
            let Some(token) = progress_token_from_params(&envelope.params) else {
                return;
            };
            let progress = envelope
                .params
                .get("progress")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            progress_registry.upsert(ProgressUpdate {
                server_pubkey: progress_server.clone(),
                progress_token: token,
                progress,
                total: envelope.params.get("total").and_then(Value::as_f64),
                message: envelope
                    .params
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                timestamp: Utc::now(),
            });
        });

        let accepted_registry = self.payments.clone();
        let accepted_server = server_pubkey.to_string();
        client.set_notification_handler(PAYMENT_ACCEPTED_METHOD, move |envelope| {
            let Some(request_event_id) = envelope.request_event_id.clone() else {
                return;
            };
            let params: PaymentAcceptedParams =
                serde_json::from_value(envelope.params.clone()).unwrap_or(PaymentAcceptedParams {
                    amount: None,
                    pmi: None,
                });
            accepted_registry.set(PaymentUiState {
                server_pubkey: accepted_server.clone(),
                request_event_id,
                status: PaymentStatus::PaymentAccepted,
                notification: PaymentNotification::PaymentAccepted(params),
                timestamp: Utc::now(),
            });
        });

        let rejected_registry = self.payments.clone();
        let rejected_server = server_pubkey.to_string();
        client.set_notification_handler(PAYMENT_REJECTED_METHOD, move |envelope| {
            let Some(request_event_id) = envelope.request_event_id.clone() else {
                return;
            };
            let params: PaymentRejectedParams = serde_json::from_value(envelope.params.clone())
                .unwrap_or(PaymentRejectedParams { reason: None });
            rejected_registry.set(PaymentUiState {
                server_pubkey: rejected_server.clone(),
                request_event_id,
                status: PaymentStatus::PaymentRejected,
                notification: PaymentNotification::PaymentRejected(params),
                timestamp: Utc::now(),
            });
        });
    }

    fn set_state(&mut self, server_pubkey: &str, state: ConnectionState) {
        self.connection_states
            .insert(server_pubkey.to_string(), state.clone());
        self.emit(SessionEvent::ConnectionStateChanged {
            server_pubkey: server_pubkey.to_string(),
            state,
        });
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

fn new_progress_token() -> Result<String, String> {
    let mut bytes = [0_u8; 16];
    getrandom::fill(&mut bytes).map_err(|err| err.to_string())?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}

#[cfg(test)]
mod tests;
