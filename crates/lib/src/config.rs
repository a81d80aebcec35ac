//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatsync/config.json`) and environment.
//! Every section has defaults, so an empty `{}` file is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// REST and live socket endpoints.
    #[serde(default)]
    pub api: ApiConfig,

    /// Credentials for the token endpoint.
    #[serde(default)]
    pub auth: AuthConfig,

    /// The conversation this client follows.
    #[serde(default)]
    pub contact: ContactConfig,

    /// Outbound message formatting.
    #[serde(default)]
    pub send: SendConfig,
}

/// API base URL and live event socket URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base for REST calls; `/token`, `/chat/external/messages` and `/whatsapp/send` are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Websocket URL of the live event channel.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

fn default_base_url() -> String {
    "http://api.maximizeai.io:8100/api".to_string()
}

fn default_ws_url() -> String {
    "ws://api.maximizeai.io:8100/ws/chat".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
        }
    }
}

/// Login credentials. Overridden by CHATSYNC_EMAIL / CHATSYNC_PASSWORD env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Contact whose chat history and live messages are shown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactConfig {
    /// Phone number of the contact (e.g. "+551199999999"). Overridden by CHATSYNC_CONTACT env.
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendConfig {
    /// Bold label placed on its own line above outbound text. Empty disables the label.
    #[serde(default = "default_sender_label")]
    pub sender_label: String,
}

fn default_sender_label() -> String {
    "Usuário".to_string()
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            sender_label: default_sender_label(),
        }
    }
}

/// Resolved login credentials.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve credentials: env CHATSYNC_EMAIL / CHATSYNC_PASSWORD override config. Both must be present.
pub fn resolve_credentials(config: &Config) -> Option<Credentials> {
    let email = env_non_empty("CHATSYNC_EMAIL").or_else(|| config_non_empty(&config.auth.email))?;
    let password =
        env_non_empty("CHATSYNC_PASSWORD").or_else(|| config_non_empty(&config.auth.password))?;
    Some(Credentials { email, password })
}

/// Resolve the contact phone: env CHATSYNC_CONTACT overrides config.
pub fn resolve_contact(config: &Config) -> Option<String> {
    env_non_empty("CHATSYNC_CONTACT").or_else(|| config_non_empty(&config.contact.phone))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATSYNC_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatsync").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, the default path, or CHATSYNC_CONFIG_PATH. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
