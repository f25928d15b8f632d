//! Shared constants: event kinds, relay defaults, protocol timeouts.

use std::time::Duration;

/// Replaceable announcement event kinds published by servers.
pub const SERVER_ANNOUNCEMENT_KIND: u16 = 11316;
pub const TOOLS_LIST_KIND: u16 = 11317;
pub const RESOURCES_LIST_KIND: u16 = 11318;
pub const RESOURCE_TEMPLATES_LIST_KIND: u16 = 11319;
pub const PROMPTS_LIST_KIND: u16 = 11320;

/// Ephemeral kind carrying MCP JSON-RPC payloads in both directions.
pub const MCP_MESSAGE_KIND: u16 = 25910;

pub const ANNOUNCEMENT_KINDS: [u16; 5] = [
    SERVER_ANNOUNCEMENT_KIND,
    TOOLS_LIST_KIND,
    RESOURCES_LIST_KIND,
    RESOURCE_TEMPLATES_LIST_KIND,
    PROMPTS_LIST_KIND,
];

pub const DEFAULT_RELAYS: [&str; 1] = ["wss://relay.contextvm.org"];

/// Broad relays used for profile metadata lookups, not MCP traffic.
pub const METADATA_RELAYS: [&str; 4] = [
    "wss://0.kindpag.es/",
    "wss://relay.nostr.band",
    "wss://nos.lol",
    "wss://relay.damus.io",
];

pub const DEV_RELAY: [&str; 1] = ["ws://localhost:10547"];

/// Upper bound for a single request round-trip. Long-running tool calls
/// extend past this only while progress notifications keep arriving.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client identity sent in the initialize handshake.
pub const CLIENT_NAME: &str = "Remora MCP Client";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Payment-method identifier advertised by the UI-only payment handler.
pub const DEFAULT_PMI: &str = "lightning-bolt11";
