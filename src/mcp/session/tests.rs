use super::*;
use crate::auth::Account;
use crate::core::constants::SERVER_ANNOUNCEMENT_KIND;
use crate::mcp::error::{NOT_LOGGED_IN_MESSAGE, NO_SIGNER_MESSAGE};
use crate::mcp::payments::notifications::PaymentRequiredParams;
use crate::nostr::event::NostrEvent;
use crate::utils::test_utils::{FakeSigner, LoopbackPoolFactory, MockServer};

fn logged_in_accounts() -> Arc<ActiveAccount> {
    let accounts = Arc::new(ActiveAccount::new());
    accounts.login(Account::new("client", Arc::new(FakeSigner::new("client"))));
    accounts
}

fn manager_for(servers: Vec<Arc<MockServer>>) -> (McpSessionManager, Arc<LoopbackPoolFactory>) {
    let factory = Arc::new(LoopbackPoolFactory::with_servers(servers));
    let manager = McpSessionManager::new(
        logged_in_accounts(),
        factory.clone(),
        Arc::new(RelayStore::default()),
    );
    (manager, factory)
}

async fn drain_background_tasks() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn get_client_without_account_reports_authentication_error() {
    let factory = Arc::new(LoopbackPoolFactory::new(MockServer::new("server")));
    let mut manager = McpSessionManager::new(
        Arc::new(ActiveAccount::new()),
        factory.clone(),
        Arc::new(RelayStore::default()),
    );

    let client = manager.get_client("abc123").await;
    assert!(client.is_none());
    assert_eq!(
        manager.connection_state("abc123"),
        ConnectionState {
            connected: false,
            loading: false,
            error: Some(NOT_LOGGED_IN_MESSAGE.to_string()),
        }
    );
    // No session was built at all.
    assert_eq!(factory.build_count(), 0);
    assert_eq!(manager.open_sessions(), 0);
}

#[tokio::test]
async fn account_without_signer_reports_signer_error() {
    let accounts = Arc::new(ActiveAccount::new());
    accounts.login(Account::without_signer("client"));
    let factory = Arc::new(LoopbackPoolFactory::new(MockServer::new("server")));
    let mut manager =
        McpSessionManager::new(accounts, factory, Arc::new(RelayStore::default()));

    assert!(manager.get_client("server").await.is_none());
    assert_eq!(
        manager.connection_state("server").error.as_deref(),
        Some(NO_SIGNER_MESSAGE)
    );
}

#[tokio::test]
async fn get_client_connects_then_reuses_without_new_handshake() {
    let server = MockServer::new("server");
    let (mut manager, factory) = manager_for(vec![server.clone()]);

    let first = manager.get_client("server").await.expect("first connect");
    assert_eq!(
        manager.connection_state("server"),
        ConnectionState {
            connected: true,
            loading: false,
            error: None,
        }
    );
    let handshake_publishes = factory.last_pool().expect("pool").published().len();

    let second = manager.get_client("server").await.expect("reuse");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.build_count(), 1);
    assert_eq!(
        factory.last_pool().expect("pool").published().len(),
        handshake_publishes,
        "second get_client must not publish anything"
    );
}

#[tokio::test]
async fn failed_handshake_leaves_error_state_and_allows_retry() {
    let server = MockServer::new("server");
    server.fail_initialize();
    let (mut manager, _factory) = manager_for(vec![server.clone()]);

    assert!(manager.get_client("server").await.is_none());
    let state = manager.connection_state("server");
    assert!(!state.connected && !state.loading);
    assert!(state.error.as_deref().is_some_and(|e| e.contains("server unavailable")));
    assert_eq!(manager.open_sessions(), 0);

    // ERROR -> LOADING -> CONNECTED on the next attempt.
    server.restore_initialize();
    assert!(manager.get_client("server").await.is_some());
    assert!(manager.connection_state("server").connected);
}

#[tokio::test]
async fn state_transitions_are_observable_through_the_event_channel() {
    let server = MockServer::new("server");
    let (mut manager, _factory) = manager_for(vec![server]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.set_event_sender(tx);

    manager.get_client("server").await.expect("connect");

    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::ConnectionStateChanged { state, .. } = event {
            states.push((state.connected, state.loading));
        }
    }
    assert_eq!(states, vec![(false, true), (true, false)]);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_clears_per_server_state() {
    let server = MockServer::new("server");
    let (mut manager, _factory) = manager_for(vec![server]);
    manager.get_client("server").await.expect("connect");

    manager.progress().upsert(ProgressUpdate {
        server_pubkey: "server".to_string(),
        progress_token: "tok".to_string(),
        progress: 50.0,
        total: None,
        message: None,
        timestamp: Utc::now(),
    });
    manager.payments().set(PaymentUiState {
        server_pubkey: "server".to_string(),
        request_event_id: "req".to_string(),
        status: PaymentStatus::PaymentRequired,
        notification: PaymentNotification::PaymentRequired(PaymentRequiredParams {
            amount: "100".to_string(),
            pay_req: "lnbc100n1...".to_string(),
            pmi: None,
            description: None,
        }),
        timestamp: Utc::now(),
    });

    manager.disconnect("server").await;
    assert_eq!(manager.connection_state("server"), ConnectionState::default());
    assert_eq!(manager.open_sessions(), 0);
    assert!(manager.progress().for_server("server").is_empty());
    assert!(manager.payments().latest_for_server("server").is_none());
    assert!(manager.payments().by_request_event_id("req").is_none());
    assert!(manager.transport("server").is_none());

    // Second disconnect is a no-op.
    manager.disconnect("server").await;
    assert_eq!(manager.connection_state("server"), ConnectionState::default());
}

#[tokio::test]
async fn reconnect_all_isolates_per_identity_failures() {
    let alpha = MockServer::new("alpha");
    let beta = MockServer::new("beta");
    let (mut manager, factory) = manager_for(vec![alpha.clone(), beta.clone()]);

    manager.get_client("alpha").await.expect("alpha connects");
    manager.get_client("beta").await.expect("beta connects");
    let pools_before = factory.build_count();

    beta.fail_initialize();
    manager.reconnect_all_clients().await;

    assert!(manager.connection_state("alpha").connected);
    let beta_state = manager.connection_state("beta");
    assert!(!beta_state.connected);
    assert!(beta_state.error.as_deref().is_some_and(|e| !e.is_empty()));
    assert_eq!(manager.open_sessions(), 1);
    // One fresh pool per tracked identity.
    assert_eq!(factory.build_count(), pools_before + 2);
}

#[tokio::test]
async fn relay_change_rebuilds_pools_and_flags_open_sessions() {
    let server = MockServer::new("server");
    let relay_store = Arc::new(RelayStore::default());
    let factory = Arc::new(LoopbackPoolFactory::new(server));
    let mut manager =
        McpSessionManager::new(logged_in_accounts(), factory.clone(), relay_store.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.set_event_sender(tx);

    let client = manager.get_client("server").await.expect("connect");

    relay_store.set_selected(vec!["wss://new.relay.example".to_string()]);
    manager.handle_relay_change();

    // Pool rebuilt against the new selection...
    assert_eq!(
        factory.last_urls().expect("urls"),
        vec!["wss://new.relay.example".to_string()]
    );
    // ...but the open session was not closed, only flagged.
    let reused = manager.get_client("server").await.expect("still open");
    assert!(Arc::ptr_eq(&client, &reused));
    let flagged = std::iter::from_fn(|| rx.try_recv().ok()).any(|event| {
        matches!(event, SessionEvent::RelaysChanged { open_sessions } if open_sessions == 1)
    });
    assert!(flagged, "expected a RelaysChanged event for the open session");
}

#[tokio::test]
async fn relay_change_without_open_sessions_stays_silent() {
    let server = MockServer::new("server");
    let (mut manager, _factory) = manager_for(vec![server]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.set_event_sender(tx);

    manager.handle_relay_change();
    assert!(std::iter::from_fn(|| rx.try_recv().ok())
        .all(|event| !matches!(event, SessionEvent::RelaysChanged { .. })));
}

#[tokio::test]
async fn request_methods_reach_the_server() {
    let server = MockServer::new("server");
    let (mut manager, _factory) = manager_for(vec![server]);

    let tools = manager.list_tools("server").await.expect("tools");
    assert_eq!(tools.tools[0].name, "search");

    let resources = manager.list_resources("server").await.expect("resources");
    assert_eq!(resources.resources.len(), 1);

    let templates = manager
        .list_resource_templates("server")
        .await
        .expect("templates");
    assert_eq!(templates.resource_templates.len(), 1);

    let prompts = manager.list_prompts("server").await.expect("prompts");
    assert_eq!(prompts.prompts.len(), 1);

    let read = manager
        .read_resource("server", "file:///etc/motd")
        .await
        .expect("read");
    assert_eq!(read.contents.len(), 1);

    let prompt = manager
        .get_prompt("server", "summarize", None)
        .await
        .expect("prompt");
    assert_eq!(prompt.messages.len(), 1);
}

#[tokio::test]
async fn request_methods_fail_with_not_connected_when_unauthenticated() {
    let factory = Arc::new(LoopbackPoolFactory::new(MockServer::new("server")));
    let mut manager = McpSessionManager::new(
        Arc::new(ActiveAccount::new()),
        factory,
        Arc::new(RelayStore::default()),
    );

    let err = manager.list_tools("server").await.expect_err("no client");
    assert!(matches!(err, McpError::NotConnected));
}

#[tokio::test]
async fn call_tool_attaches_a_fresh_progress_token_per_call() {
    let server = MockServer::new("server");
    let (mut manager, _factory) = manager_for(vec![server.clone()]);

    manager
        .call_tool("server", "search", None)
        .await
        .expect("first call");
    manager
        .call_tool("server", "search", None)
        .await
        .expect("second call");

    let calls = server.tool_calls.lock().expect("calls").clone();
    assert_eq!(calls.len(), 2);
    let first_token = calls[0].1.clone().expect("token on first call");
    let second_token = calls[1].1.clone().expect("token on second call");
    assert_eq!(first_token.len(), 32);
    assert_ne!(first_token, second_token);
}

#[tokio::test]
async fn progress_notifications_upsert_the_registry() {
    let server = MockServer::new("server");
    let (mut manager, factory) = manager_for(vec![server.clone()]);
    manager.get_client("server").await.expect("connect");

    let pool = factory.last_pool().expect("pool");
    pool.inject(server.progress_event("client", "req-evt", "tok-1", 25.0, Some("one")));
    pool.inject(server.progress_event("client", "req-evt", "tok-1", 75.0, Some("two")));
    drain_background_tasks().await;

    let entries = manager.progress().for_server("server");
    assert_eq!(entries.len(), 1, "same token collapses to one record");
    assert_eq!(entries[0].progress, 75.0);
    assert_eq!(entries[0].message.as_deref(), Some("two"));
}

#[tokio::test]
async fn payment_lifecycle_flows_into_both_registry_indices() {
    let server = MockServer::new("server");
    server.require_payment("100", "lnbc100n1...");
    let (mut manager, factory) = manager_for(vec![server.clone()]);

    manager
        .call_tool("server", "search", None)
        .await
        .expect("call succeeds after the payment signal");
    drain_background_tasks().await;

    let (request_event_id, _) = server.tool_calls.lock().expect("calls")[0].clone();
    let required = manager
        .payments()
        .by_request_event_id(&request_event_id)
        .expect("payment_required recorded");
    assert_eq!(required.status, PaymentStatus::PaymentRequired);
    assert_eq!(required.server_pubkey, "server");

    // A later accepted notification for the same request flips the status.
    let pool = factory.last_pool().expect("pool");
    pool.inject(server.message_event(
        "client",
        &request_event_id,
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/payment_accepted",
            "params": {"amount": "100"}
        }),
    ));
    drain_background_tasks().await;

    let accepted = manager
        .payments()
        .by_request_event_id(&request_event_id)
        .expect("entry survives");
    assert_eq!(accepted.status, PaymentStatus::PaymentAccepted);
    assert_eq!(
        manager
            .payments()
            .latest_for_server("server")
            .expect("latest")
            .status,
        PaymentStatus::PaymentAccepted
    );
}

#[tokio::test]
async fn announcement_accessors_survive_transport_wrapping() {
    let server = MockServer::new("server");
    let (mut manager, factory) = manager_for(vec![server]);
    manager.get_client("server").await.expect("connect");

    factory.last_pool().expect("pool").inject(NostrEvent {
        id: "announce-1".to_string(),
        pubkey: "server".to_string(),
        created_at: 42,
        kind: SERVER_ANNOUNCEMENT_KIND,
        tags: vec![vec![
            "cap".to_string(),
            "tool:search".to_string(),
            "100".to_string(),
            "sats".to_string(),
        ]],
        content: String::new(),
        sig: String::new(),
    });
    drain_background_tasks().await;

    let transport = manager.transport("server").expect("side-table entry");
    let event = transport.server_initialize_event().expect("cached announcement");
    assert_eq!(event.id, "announce-1");
}

#[tokio::test]
async fn teardown_closes_sessions_and_clears_all_maps() {
    let alpha = MockServer::new("alpha");
    let beta = MockServer::new("beta");
    let (mut manager, _factory) = manager_for(vec![alpha, beta]);
    manager.get_client("alpha").await.expect("alpha");
    manager.get_client("beta").await.expect("beta");

    manager.teardown().await;

    assert_eq!(manager.open_sessions(), 0);
    assert_eq!(manager.connection_state("alpha"), ConnectionState::default());
    assert_eq!(manager.connection_state("beta"), ConnectionState::default());
    assert!(manager.transport("alpha").is_none());
    assert!(manager.transport("beta").is_none());
}
