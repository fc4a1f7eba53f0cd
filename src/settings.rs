//! Bootstrap settings: which Consul agents to use and which folder to watch.

use std::collections::HashMap;

use serde::Deserialize;

use crate::utils::{normalize_folder, ConsulConfigError, Result};

/// Comma-separated list of Consul agent URLs.
pub const URLS_ENV: &str = "CONSUL_CONFIG_URLS";
/// KV folder holding the configuration, e.g. `App1/Server1`.
pub const FOLDER_ENV: &str = "CONSUL_CONFIG_FOLDER";

/// Settings section, usually deserialized from a `ConsulConfig` block:
///
/// ```json
/// { "ConsulConfig": { "Urls": ["http://localhost:8500"], "KeyStoreFolder": "App1/Server1" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsulConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    /// If a key is `App1/Server1/Config`, the folder is `App1/Server1`.
    #[serde(default)]
    pub key_store_folder: String,
}

impl ConsulConfig {
    pub fn new<I, S>(urls: I, key_store_folder: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            key_store_folder: key_store_folder.to_string(),
        }
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&env)
    }

    /// Read settings from a provided env map.
    pub fn from_env_map(env: &HashMap<String, String>) -> Result<Self> {
        let urls: Vec<String> = env
            .get(URLS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let folder = env.get(FOLDER_ENV).cloned().unwrap_or_default();

        let config = Self {
            urls,
            key_store_folder: folder,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot start a provider.
    pub fn validate(&self) -> Result<()> {
        if self.urls.iter().all(|u| u.trim().is_empty()) {
            return Err(ConsulConfigError::missing("No Consul endpoints configured"));
        }
        if normalize_folder(&self.key_store_folder).is_empty() {
            return Err(ConsulConfigError::missing("No Consul key store folder configured"));
        }
        Ok(())
    }
}
