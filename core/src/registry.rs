//! Clients keyed by site code.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::client::ApiClient;
use crate::config::{self, ClientConfig};
use crate::error::ApiError;
use crate::http::Transport;
use crate::query_log::{LogField, ProjectedRecord};
use crate::storage::KeyValueStore;

/// A set of `ApiClient`s, one per site code (usually a language code).
#[derive(Debug, Default)]
pub struct ApiRegistry {
    clients: BTreeMap<String, ApiClient>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one client per configured site. `transport` is called once per
    /// site with its code and URL; all clients share `store`.
    pub fn from_config<F>(
        config: &ClientConfig,
        mut transport: F,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ApiError>
    where
        F: FnMut(&str, &str) -> Arc<dyn Transport>,
    {
        let mut registry = Self::new();
        for (code, url) in &config.sites {
            let mut client = ApiClient::new(url, transport(code, url), store.clone())?;
            client.set_default_parameters(config.default_parameters.clone());
            if config.log_queries {
                client.enable_query_log();
            }
            registry.add(code, client)?;
        }
        debug!(sites = registry.clients.len(), "built API registry from config");
        Ok(registry)
    }

    /// Load a config file (TOML, or JSON by extension) and build from it.
    /// Cookies go to the store the config names.
    pub fn from_config_file<F>(path: &Path, transport: F) -> Result<Self, ApiError>
    where
        F: FnMut(&str, &str) -> Arc<dyn Transport>,
    {
        let config = config::load_from_file(path)?;
        Self::from_config(&config, transport, config.store())
    }

    /// Register `client` under `code`, replacing any client already there.
    pub fn add(&mut self, code: &str, client: ApiClient) -> Result<(), ApiError> {
        if code.is_empty() {
            return Err(ApiError::EmptySiteCode);
        }
        self.clients.insert(code.to_string(), client);
        Ok(())
    }

    pub fn get(&self, code: &str) -> Result<&ApiClient, ApiError> {
        self.clients.get(code).ok_or_else(|| ApiError::UnknownSite(code.to_string()))
    }

    pub fn get_mut(&mut self, code: &str) -> Result<&mut ApiClient, ApiError> {
        self.clients.get_mut(code).ok_or_else(|| ApiError::UnknownSite(code.to_string()))
    }

    pub fn has(&self, code: &str) -> bool {
        self.clients.contains_key(code)
    }

    /// Registered site codes, sorted.
    pub fn languages(&self) -> Vec<&str> {
        self.clients.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn enable_query_log(&mut self) {
        self.clients.values_mut().for_each(ApiClient::enable_query_log);
    }

    pub fn disable_query_log(&mut self) {
        self.clients.values_mut().for_each(ApiClient::disable_query_log);
    }

    /// Each client's projected log, keyed by site code.
    pub fn query_log(
        &self,
        fields: Option<&[LogField]>,
        count: Option<usize>,
    ) -> Result<BTreeMap<String, Vec<ProjectedRecord>>, ApiError> {
        self.clients
            .iter()
            .map(|(code, client)| Ok((code.clone(), client.query_log(fields, count)?)))
            .collect()
    }
}
