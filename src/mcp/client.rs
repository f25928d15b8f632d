//! MCP protocol client over a [`Transport`].
//!
//! One client per live session: it owns the pending-request map, the
//! dispatch task draining the transport, and the notification handler
//! table. Request deadlines stretch while correlated progress
//! notifications keep arriving, so a slow-but-alive tool call is never
//! killed by the default timeout.

use crate::core::constants::{
    CLIENT_NAME, CLIENT_VERSION, DEFAULT_REQUEST_TIMEOUT, HANDSHAKE_TIMEOUT,
};
use crate::mcp::protocol::{
    self, progress_token_from_params, PROGRESS_NOTIFICATION_METHOD,
};
use crate::mcp::transport::{IncomingMessage, Transport};
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolMeta, CallToolRequestParams, CallToolResult, ClientCapabilities, GetPromptRequestParams,
    GetPromptResult, Implementation, InitializeRequestParams, InitializeResult, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, ReadResourceRequestParams,
    ReadResourceResult, RequestId, LATEST_PROTOCOL_VERSION,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

/// Per-request behavior knobs.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub timeout: Duration,
    /// When set, each progress notification for `progress_token` pushes the
    /// deadline out by the full timeout again.
    pub reset_timeout_on_progress: bool,
    pub progress_token: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            reset_timeout_on_progress: false,
            progress_token: None,
        }
    }
}

/// A server notification handed to registered handlers.
#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub method: String,
    pub params: Value,
    pub event_id: String,
    pub request_event_id: Option<String>,
}

type NotificationHandler = Box<dyn Fn(&NotificationEnvelope) + Send + Sync>;

/// Wakes requests waiting on progress for a specific token.
#[derive(Default)]
struct ProgressActivity {
    waiters: StdMutex<HashMap<String, Arc<Notify>>>,
}

impl ProgressActivity {
    fn register(&self, token: &str) -> Arc<Notify> {
        self.waiters
            .lock()
            .expect("progress waiter lock poisoned")
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn notify(&self, token: &str) {
        if let Some(notify) = self
            .waiters
            .lock()
            .expect("progress waiter lock poisoned")
            .get(token)
        {
            notify.notify_waiters();
        }
    }

    fn release(&self, token: &str) {
        self.waiters
            .lock()
            .expect("progress waiter lock poisoned")
            .remove(token);
    }
}

pub struct McpClient {
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>,
    next_request_id: AtomicI64,
    notification_handlers: Arc<RwLock<HashMap<String, NotificationHandler>>>,
    progress_activity: Arc<ProgressActivity>,
    server_details: RwLock<Option<InitializeResult>>,
    dispatch_task: StdMutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicI64::new(0),
            notification_handlers: Arc::new(RwLock::new(HashMap::new())),
            progress_activity: Arc::new(ProgressActivity::default()),
            server_details: RwLock::new(None),
            dispatch_task: StdMutex::new(None),
        }
    }

    /// Registers a handler for one exact notification method. Handlers must
    /// be installed before `connect` to observe handshake-time traffic.
    pub fn set_notification_handler(
        &self,
        method: impl Into<String>,
        handler: impl Fn(&NotificationEnvelope) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .write()
            .expect("notification handler lock poisoned")
            .insert(method.into(), Box::new(handler));
    }

    /// Opens the transport and performs the initialize handshake.
    pub async fn connect(&self) -> Result<InitializeResult, String> {
        let receiver = self.transport.start().await?;
        self.spawn_dispatch(receiver);

        let response = self
            .request(
                RequestFromClient::InitializeRequest(client_details()),
                RequestOptions {
                    timeout: HANDSHAKE_TIMEOUT,
                    ..RequestOptions::default()
                },
            )
            .await?;
        let details = protocol::parse_initialize_result(response)?;
        *self
            .server_details
            .write()
            .expect("server details lock poisoned") = Some(details.clone());

        let initialized = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(
                NotificationFromClient::InitializedNotification(None),
            ),
            None,
        )
        .map_err(|err| err.to_string())?;
        self.transport.send(initialized).await?;

        Ok(details)
    }

    pub fn server_details(&self) -> Option<InitializeResult> {
        self.server_details
            .read()
            .expect("server details lock poisoned")
            .clone()
    }

    fn spawn_dispatch(&self, mut receiver: mpsc::UnboundedReceiver<IncomingMessage>) {
        let pending = self.pending.clone();
        let handlers = self.notification_handlers.clone();
        let progress = self.progress_activity.clone();

        let handle = tokio::spawn(async move {
            while let Some(incoming) = receiver.recv().await {
                let response_id = match &incoming.message {
                    ServerMessage::Response(response) => Some(response.id.clone()),
                    ServerMessage::Error(error) => error.id.clone(),
                    _ => None,
                };

                if let Some(id) = response_id {
                    debug!(response_id = ?id, "Received MCP response");
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(incoming.message);
                    }
                    continue;
                }

                if let Some((method, params)) = protocol::notification_parts(&incoming.message) {
                    debug!(%method, "Received MCP notification");
                    if method == PROGRESS_NOTIFICATION_METHOD {
                        if let Some(token) = progress_token_from_params(&params) {
                            progress.notify(&token);
                        }
                    }
                    let envelope = NotificationEnvelope {
                        method: method.clone(),
                        params,
                        event_id: incoming.event_id,
                        request_event_id: incoming.request_event_id,
                    };
                    if let Some(handler) = handlers
                        .read()
                        .expect("notification handler lock poisoned")
                        .get(&method)
                    {
                        handler(&envelope);
                    }
                } else if matches!(incoming.message, ServerMessage::Request(_)) {
                    // Server-to-client requests are not part of this surface.
                    debug!(event_id = %incoming.event_id, "Ignoring server request");
                }
            }
        });

        if let Some(previous) = self
            .dispatch_task
            .lock()
            .expect("dispatch task lock poisoned")
            .replace(handle)
        {
            previous.abort();
        }
    }

    /// Sends one request and waits for its response under the configured
    /// deadline policy.
    pub async fn request(
        &self,
        request: RequestFromClient,
        options: RequestOptions,
    ) -> Result<ServerMessage, String> {
        let request_id =
            RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let progress_notify = match (&options.progress_token, options.reset_timeout_on_progress) {
            (Some(token), true) => Some(self.progress_activity.register(token)),
            _ => None,
        };

        let outcome = async {
            if let Err(err) = self.transport.send(message).await {
                return Err(err);
            }

            let timeout = options.timeout;
            let mut deadline = tokio::time::Instant::now() + timeout;
            loop {
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    return Err("MCP request timed out.".to_string());
                }
                let remaining = deadline - now;

                match &progress_notify {
                    Some(notify) => tokio::select! {
                        result = &mut rx => {
                            return result.map_err(|_| "MCP response channel closed.".to_string());
                        }
                        _ = tokio::time::sleep(remaining) => {
                            return Err("MCP request timed out.".to_string());
                        }
                        _ = notify.notified() => {
                            debug!(request_id = ?request_id, "Request deadline reset after progress");
                            deadline = tokio::time::Instant::now() + timeout;
                        }
                    },
                    None => tokio::select! {
                        result = &mut rx => {
                            return result.map_err(|_| "MCP response channel closed.".to_string());
                        }
                        _ = tokio::time::sleep(remaining) => {
                            return Err("MCP request timed out.".to_string());
                        }
                    },
                }
            }
        }
        .await;

        if outcome.is_err() {
            self.pending.lock().await.remove(&request_id);
        }
        if let Some(token) = &options.progress_token {
            self.progress_activity.release(token);
        }
        outcome
    }

    pub async fn list_tools(&self, options: RequestOptions) -> Result<ListToolsResult, String> {
        let response = self
            .request(RequestFromClient::ListToolsRequest(None), options)
            .await?;
        protocol::parse_list_tools(response)
    }

    pub async fn list_resources(
        &self,
        options: RequestOptions,
    ) -> Result<ListResourcesResult, String> {
        let response = self
            .request(RequestFromClient::ListResourcesRequest(None), options)
            .await?;
        protocol::parse_list_resources(response)
    }

    pub async fn list_resource_templates(
        &self,
        options: RequestOptions,
    ) -> Result<ListResourceTemplatesResult, String> {
        let response = self
            .request(
                RequestFromClient::ListResourceTemplatesRequest(None),
                options,
            )
            .await?;
        protocol::parse_list_resource_templates(response)
    }

    pub async fn list_prompts(&self, options: RequestOptions) -> Result<ListPromptsResult, String> {
        let response = self
            .request(RequestFromClient::ListPromptsRequest(None), options)
            .await?;
        protocol::parse_list_prompts(response)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
        options: RequestOptions,
    ) -> Result<CallToolResult, String> {
        let mut params = CallToolRequestParams::new(name);
        if let Some(arguments) = arguments {
            params = params.with_arguments(arguments);
        }
        if let Some(token) = &options.progress_token {
            params.meta = Some(CallToolMeta {
                progress_token: Some(rust_mcp_schema::ProgressToken::String(token.clone())),
                extra: None,
            });
        }
        let response = self
            .request(RequestFromClient::CallToolRequest(params), options)
            .await?;
        protocol::parse_call_tool(response)
    }

    pub async fn read_resource(
        &self,
        uri: &str,
        options: RequestOptions,
    ) -> Result<ReadResourceResult, String> {
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let response = self
            .request(RequestFromClient::ReadResourceRequest(params), options)
            .await?;
        protocol::parse_read_resource(response)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<std::collections::HashMap<String, String>>,
        options: RequestOptions,
    ) -> Result<GetPromptResult, String> {
        let params = GetPromptRequestParams {
            name: name.to_string(),
            arguments,
            meta: None,
        };
        let response = self
            .request(RequestFromClient::GetPromptRequest(params), options)
            .await?;
        protocol::parse_get_prompt(response)
    }

    /// Stops the dispatch task and closes the transport. Pending requests
    /// observe a closed response channel.
    pub async fn close(&self) -> Result<(), String> {
        if let Some(handle) = self
            .dispatch_task
            .lock()
            .expect("dispatch task lock poisoned")
            .take()
        {
            handle.abort();
        }
        self.pending.lock().await.clear();
        self.transport.close().await
    }
}

fn client_details() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: CLIENT_NAME.to_string(),
            version: CLIENT_VERSION.to_string(),
            title: Some("Remora".to_string()),
            description: Some("Nostr-native MCP client runtime".to_string()),
            icons: Vec::new(),
            website_url: Some("https://github.com/permacommons/remora".to_string()),
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}
