//! The `/.well-known/nostr.json` discovery document.
//!
//! Served with permissive CORS and an hour of caching so third-party
//! Nostr-aware clients can resolve names cross-origin.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const WELL_KNOWN_PATH: &str = "/.well-known/nostr.json";

/// Name → pubkey mapping with optional per-pubkey relay hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WellKnownDocument {
    pub names: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relays: BTreeMap<String, Vec<String>>,
}

impl WellKnownDocument {
    pub fn new(names: BTreeMap<String, String>, relays: BTreeMap<String, Vec<String>>) -> Self {
        Self { names, relays }
    }
}

/// Router serving the discovery document for GET and OPTIONS.
pub fn router(document: WellKnownDocument) -> Router {
    Router::new()
        .route(WELL_KNOWN_PATH, get(serve_document).options(preflight))
        .with_state(Arc::new(document))
}

fn cors_headers() -> [(header::HeaderName, &'static str); 4] {
    [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        (header::CACHE_CONTROL, "public, max-age=3600"),
    ]
}

async fn serve_document(State(document): State<Arc<WellKnownDocument>>) -> Response {
    (cors_headers(), Json(document.as_ref().clone())).into_response()
}

async fn preflight() -> Response {
    cors_headers().into_response()
}
