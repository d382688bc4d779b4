//! Client configuration.
//!
//! Loads the list of sites and client defaults from environment variables or
//! a config file.
//!
//! ## Loading strategy
//! 1. Environment variables, if `WIKI_SITES` is set.
//! 2. Otherwise the given file, TOML or JSON by extension.
//!
//! ## Environment variables
//! - `WIKI_SITES`: comma-separated `code=url` pairs, e.g.
//!   `en=https://en.wikipedia.org/w/api.php,ru=https://ru.wikipedia.org/w/api.php`
//! - `WIKI_LOG_QUERIES`: enable the query log on every client (true/false)
//! - `WIKI_CACHE_DIR`: directory for the file-backed cookie store
//!
//! ## File format
//! ```toml
//! log_queries = false
//! cache_dir = "/var/cache/wiki"
//!
//! [sites]
//! en = "https://en.wikipedia.org/w/api.php"
//!
//! [default_parameters]
//! format = "json"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::Parameters;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};

pub const ENV_SITES: &str = "WIKI_SITES";
pub const ENV_LOG_QUERIES: &str = "WIKI_LOG_QUERIES";
pub const ENV_CACHE_DIR: &str = "WIKI_CACHE_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("missing configuration: {0}")]
    Missing(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Site code → API endpoint URL.
    pub sites: BTreeMap<String, String>,
    /// Parameters merged into every request. `format` defaults to `json`.
    pub default_parameters: Parameters,
    pub log_queries: bool,
    /// Where cookies are persisted. In-memory only when unset.
    pub cache_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Fill defaults and check invariants.
    fn normalized(mut self) -> Result<Self, ConfigError> {
        if self.sites.is_empty() {
            return Err(ConfigError::Missing("at least one site".to_string()));
        }
        if let Some(code) = self.sites.keys().find(|code| code.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("empty site code {code:?}")));
        }
        self.default_parameters
            .entry("format".to_string())
            .or_insert_with(|| "json".to_string());
        Ok(self)
    }

    /// The store cookies are persisted in: a `FileStore` under `cache_dir`,
    /// or a process-local `MemoryStore`.
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        match &self.cache_dir {
            Some(dir) => Arc::new(FileStore::new(dir.clone())),
            None => Arc::new(MemoryStore::new()),
        }
    }
}

/// Load from the environment, falling back to `path`.
pub fn load(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to load from environment, trying file");
            let path = path.ok_or_else(|| ConfigError::Missing("config file path".to_string()))?;
            load_from_file(path)
        }
    }
}

pub fn load_from_env() -> Result<ClientConfig, ConfigError> {
    from_vars(|name| std::env::var(name).ok())
}

/// Build a config from a variable lookup; `load_from_env` passes `std::env::var`.
pub fn from_vars<F>(lookup: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let sites = lookup(ENV_SITES).ok_or_else(|| ConfigError::Missing(ENV_SITES.to_string()))?;
    let log_queries = match lookup(ENV_LOG_QUERIES) {
        Some(value) => parse_bool(&value)
            .ok_or_else(|| ConfigError::Invalid(format!("{ENV_LOG_QUERIES}={value}")))?,
        None => false,
    };
    ClientConfig {
        sites: parse_sites(&sites)?,
        default_parameters: Parameters::new(),
        log_queries,
        cache_dir: lookup(ENV_CACHE_DIR).filter(|dir| !dir.is_empty()).map(PathBuf::from),
    }
    .normalized()
}

pub fn load_from_file(path: &Path) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |reason: String| ConfigError::Parse { path: path.to_path_buf(), reason };
    let config: ClientConfig = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
        _ => toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
    };
    config.normalized()
}

fn parse_sites(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (code, url) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::Invalid(format!("site entry {pair:?} is not code=url")))?;
            Ok((code.trim().to_string(), url.trim().to_string()))
        })
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
