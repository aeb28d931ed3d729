use std::path::{Path, PathBuf};

use anyhow::Result;
use chime_core::constants::DATA_DIR_NAME;
use chime_core::CoreConfig;

const CONFIG_FILE: &str = "config.json";

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub server_url: Option<String>,
    pub auth_token: Option<String>,
    pub history_url: Option<String>,
}

/// `<config dir>/chime/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(DATA_DIR_NAME).join(CONFIG_FILE))
}

/// Load the config file (an explicit path must exist, the default one may
/// be absent) and apply overrides on top.
pub fn resolve_config(path: Option<&Path>, overrides: Overrides) -> Result<CoreConfig> {
    let mut config = match path {
        Some(path) => CoreConfig::load(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => CoreConfig::load(&path)?,
            None => CoreConfig::default(),
        },
    };

    if let Some(data_dir) = overrides.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(url) = overrides.server_url {
        config.server_url = url;
    }
    if overrides.auth_token.is_some() {
        config.auth_token = overrides.auth_token;
    }
    if overrides.history_url.is_some() {
        config.history_url = overrides.history_url;
    }
    Ok(config)
}
