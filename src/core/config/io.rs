use crate::core::config::data::{path_display, Config};
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path_display(path), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {}", path_display(path), source)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl Config {
    pub fn load() -> Result<Config, Box<dyn StdError>> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(config_path: &PathBuf) -> Result<Config, Box<dyn StdError>> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                path: config_path.clone(),
                source,
            })?;
            let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: config_path.clone(),
                source,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn StdError>> {
        self.save_to_path(&default_config_path()?)
    }

    pub(crate) fn save_to_path(&self, config_path: &Path) -> Result<(), Box<dyn StdError>> {
        let parent = config_path
            .parent()
            .ok_or("Config path has no parent directory")?;
        fs::create_dir_all(parent)?;

        let contents = toml::to_string_pretty(self)?;

        // Write-then-rename so a crash never leaves a truncated config.
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.persist(config_path)?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, Box<dyn StdError>> {
    let project_dirs =
        ProjectDirs::from("org", "permacommons", "remora").ok_or("Unable to determine config directory")?;
    Ok(project_dirs.config_dir().join("config.toml"))
}
