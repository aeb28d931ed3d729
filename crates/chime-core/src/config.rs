use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::ReconnectPolicy;
use crate::constants::{DATA_DIR_NAME, DEFAULT_MAX_LISTENERS, DEFAULT_SERVER_URL};

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!("{}_data", DATA_DIR_NAME)))
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_max_listeners() -> usize {
    DEFAULT_MAX_LISTENERS
}

/// Runtime configuration, loadable from a JSON file. Every field has a
/// default so a partial file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Where preferences live
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Real-time feed endpoint (ws:// or wss://)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Bearer token for both the feed and the REST API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// REST base URL. Without it there is no history load or resync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_url: Option<String>,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CoreConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_url: default_server_url(),
            auth_token: None,
            history_url: None,
            reconnect: ReconnectPolicy::default(),
            max_listeners: default_max_listeners(),
        }
    }
}
