//! Client configuration — endpoint, reconnect policy, credential defaults,
//! upload limits.
//!
//! User-level config: `~/.chatwire/config.yaml`
//! Project-level config: `.chatwire/config.yaml` (merged over the user file)
//!
//! Resolution: defaults → user config → project config → env vars
//! (`CHATWIRE_URL`, `CHATWIRE_ACCESS_TOKEN`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::AuthCredentials;

/// Errors from loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Channel endpoint and reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub url: String,
    pub reconnect_delay_ms: u64,
    /// Advisory: exceeding it is logged, retrying continues.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5999".into(),
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: Some(5),
        }
    }
}

impl WebSocketConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Defaults for every credential field except the access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialDefaults {
    pub env_url: String,
    pub tenant: String,
    pub sqlx_host: String,
    pub username: String,
    /// Usually supplied through `CHATWIRE_ACCESS_TOKEN`, not the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Default for CredentialDefaults {
    fn default() -> Self {
        Self {
            env_url: "https://testcluster-1.cloudstaging.incortalabs.com/incorta/api/v2".into(),
            tenant: "default".into(),
            sqlx_host: "jdbc:hive2://testcluster-1-sqlx.spark-cloudstaging.incortacloud-dev.com:443/;transportMode=http;httpPath=gc-us-central1-a-1/cliservice;ssl=true".into(),
            username: "admin".into(),
            access_token: None,
        }
    }
}

/// Attachment limits checked before anything is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileUploadConfig {
    pub max_file_size: u64,
    pub max_files: usize,
    /// Empty list allows every media type.
    pub allowed_types: Vec<String>,
}

impl Default for FileUploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_files: 10,
            allowed_types: [
                "application/json",
                "text/plain",
                "text/csv",
                "application/csv",
                "text/xml",
                "application/xml",
                "application/pdf",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_message_length: usize,
    /// Delay after a `tool_result` before the busy flag is dropped.
    pub tool_result_grace_ms: u64,
    pub default_model: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 10_000,
            tool_result_grace_ms: 1000,
            default_model: "claude".into(),
        }
    }
}

impl ChatConfig {
    pub fn tool_result_grace(&self) -> Duration {
        Duration::from_millis(self.tool_result_grace_ms)
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub websocket: WebSocketConfig,
    pub credentials: CredentialDefaults,
    pub file_upload: FileUploadConfig,
    pub chat: ChatConfig,
}

/// Path to `~/.chatwire/`.
fn dirs_path() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|p| PathBuf::from(p).join(".chatwire"))
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME")
            .ok()
            .map(|p| PathBuf::from(p).join(".chatwire"))
    }
}

const PROJECT_CONFIG: &str = ".chatwire/config.yaml";

/// Overlay `overlay` onto `base`, recursing into mappings.
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Fold whole-file layers in order. An empty file parses to null and
/// contributes nothing.
fn merge_layers(layers: impl IntoIterator<Item = Value>) -> Value {
    let mut merged = Value::Mapping(Default::default());
    for layer in layers {
        if layer.is_null() {
            continue;
        }
        merge_yaml(&mut merged, layer);
    }
    merged
}

fn read_yaml(path: &Path) -> ConfigResult<Value> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

impl ClientConfig {
    /// Load user + project files and apply env overrides.
    /// Missing or broken files fall back to defaults.
    pub fn load() -> Self {
        let user = dirs_path().map(|d| d.join("config.yaml"));
        let layers = user
            .iter()
            .map(PathBuf::as_path)
            .chain([Path::new(PROJECT_CONFIG)])
            .filter(|path| path.exists())
            .filter_map(|path| match read_yaml(path) {
                Ok(value) => {
                    debug!(path = %path.display(), "loaded config layer");
                    Some(value)
                }
                Err(e) => {
                    warn!("ignoring config {}: {e}", path.display());
                    None
                }
            });
        let merged = merge_layers(layers);

        let mut config = match serde_yaml::from_value::<Self>(merged) {
            Ok(config) => config,
            Err(e) => {
                warn!("invalid merged config, using defaults: {e}");
                Self::default()
            }
        };
        config.apply_env();
        config
    }

    /// Load one explicit file (plus env overrides).
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let mut config: Self = serde_yaml::from_value(merge_layers([read_yaml(path)?]))?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("CHATWIRE_URL") {
            self.websocket.url = url;
        }
        if let Ok(token) = std::env::var("CHATWIRE_ACCESS_TOKEN") {
            self.credentials.access_token = Some(token);
        }
    }

    /// Build credentials from the configured defaults.
    /// `access_token` wins over any configured token.
    pub fn credentials(&self, access_token: Option<String>) -> Option<AuthCredentials> {
        let access_token = access_token
            .or_else(|| self.credentials.access_token.clone())
            .filter(|t| !t.trim().is_empty())?;
        Some(AuthCredentials {
            endpoint_url: self.credentials.env_url.clone(),
            tenant: self.credentials.tenant.clone(),
            access_token,
            auxiliary_host: self.credentials.sqlx_host.clone(),
            username: self.credentials.username.clone(),
        })
    }
}
