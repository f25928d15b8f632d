//! Remora is a client runtime for MCP tool servers announced over Nostr.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] owns the connection session manager, the protocol client,
//!   transports framing MCP messages as signed events, and the progress
//!   and payment registries the UI renders from.
//! - [`nostr`] defines the event data model and the collaborator seams
//!   (signer, relay handler) whose implementations live outside the crate.
//! - [`announce`] parses signed server announcements into typed models.
//! - [`auth`] tracks the active account and stores its secret in the
//!   platform keyring.
//! - [`core`] holds configuration and shared constants.
//! - [`wellknown`] serves the cross-origin discovery document.
//!
//! Embedding applications construct an [`mcp::McpSessionManager`] with an
//! account provider, a relay pool factory, and a relay store, then drive
//! it from their event loop and subscribe to its change notifications.

pub mod announce;
pub mod auth;
pub mod core;
pub mod logging;
pub mod mcp;
pub mod nostr;
pub mod utils;
pub mod wellknown;
