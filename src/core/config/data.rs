use crate::core::constants::DEFAULT_RELAYS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    /// Selected relays; the built-in defaults apply when unset.
    pub relays: Option<Vec<String>>,
    /// Name → pubkey entries served in the well-known discovery document.
    #[serde(default)]
    pub well_known_names: BTreeMap<String, String>,
    /// Per-name relay hints for the discovery document.
    #[serde(default)]
    pub well_known_relays: BTreeMap<String, Vec<String>>,
}

impl Config {
    pub fn selected_relays(&self) -> Vec<String> {
        match &self.relays {
            Some(relays) if !relays.is_empty() => relays.clone(),
            _ => DEFAULT_RELAYS.iter().map(|url| url.to_string()).collect(),
        }
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
