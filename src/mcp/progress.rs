//! Progress notification registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::watch;

/// Latest progress for one `(server, token)` pair. Updates replace the
/// stored record; no history is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub server_pubkey: String,
    pub progress_token: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct ProgressRegistry {
    entries: RwLock<HashMap<(String, String), ProgressUpdate>>,
    version: watch::Sender<u64>,
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRegistry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entries: RwLock::new(HashMap::new()),
            version,
        }
    }

    pub fn upsert(&self, update: ProgressUpdate) {
        let key = (update.server_pubkey.clone(), update.progress_token.clone());
        self.entries
            .write()
            .expect("progress registry lock poisoned")
            .insert(key, update);
        self.version.send_modify(|version| *version += 1);
    }

    pub fn get(&self, server_pubkey: &str, progress_token: &str) -> Option<ProgressUpdate> {
        self.entries
            .read()
            .expect("progress registry lock poisoned")
            .get(&(server_pubkey.to_string(), progress_token.to_string()))
            .cloned()
    }

    /// All tracked progress for one server, unordered.
    pub fn for_server(&self, server_pubkey: &str) -> Vec<ProgressUpdate> {
        self.entries
            .read()
            .expect("progress registry lock poisoned")
            .values()
            .filter(|update| update.server_pubkey == server_pubkey)
            .cloned()
            .collect()
    }

    pub fn clear_server(&self, server_pubkey: &str) {
        self.entries
            .write()
            .expect("progress registry lock poisoned")
            .retain(|(server, _), _| server != server_pubkey);
        self.version.send_modify(|version| *version += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}
