//! Client configuration module
//!
//! Provides [`ClientConfig`], the `{serverAddress, authToken, localUserId,
//! peerId}` tuple the connection layer runs against, plus the builder and
//! the environment / TOML loaders.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::shared::error::ChatError;

/// Default backend address (host and port, no scheme)
pub const DEFAULT_SERVER_ADDRESS: &str = "localhost:8000";

/// Default page size for history requests
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Endpoint segment used when no peer is configured
pub const GENERAL_CHANNEL: &str = "general";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend host and port, e.g. `localhost:8000`
    pub server_address: String,
    /// Use `wss`/`https` instead of `ws`/`http`
    pub secure: bool,
    /// Bearer token passed on the socket query string and history requests
    pub auth_token: Option<String>,
    /// Identifier of the signed-in user
    pub local_user_id: Option<String>,
    /// Counterpart of the active conversation
    pub peer_id: Option<String>,
    /// Use the local echo generator instead of a backend socket
    pub simulated: bool,
    /// Number of messages requested per history fetch
    pub history_limit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            secure: false,
            auth_token: None,
            local_user_id: None,
            peer_id: None,
            simulated: false,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Credentials checked by `connect()`
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    /// Bearer token
    pub auth_token: &'a str,
    /// Signed-in user
    pub local_user_id: &'a str,
}

impl ClientConfig {
    /// Create a new ClientConfigBuilder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Read configuration from `CHAT_*` environment variables.
    ///
    /// Unset variables fall back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        if let Ok(address) = std::env::var("CHAT_SERVER_ADDRESS") {
            builder = builder.server_address(address);
        }
        if let Ok(secure) = std::env::var("CHAT_SECURE") {
            builder = builder.secure(parse_flag("CHAT_SECURE", &secure)?);
        }
        if let Ok(token) = std::env::var("CHAT_AUTH_TOKEN") {
            builder = builder.auth_token(token);
        }
        if let Ok(user_id) = std::env::var("CHAT_USER_ID") {
            builder = builder.local_user_id(user_id);
        }
        if let Ok(peer_id) = std::env::var("CHAT_PEER_ID") {
            builder = builder.peer_id(peer_id);
        }
        if let Ok(simulated) = std::env::var("CHAT_SIMULATED") {
            builder = builder.simulated(parse_flag("CHAT_SIMULATED", &simulated)?);
        }
        if let Ok(limit) = std::env::var("CHAT_HISTORY_LIMIT") {
            let limit = limit.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "CHAT_HISTORY_LIMIT",
                value: limit.clone(),
            })?;
            builder = builder.history_limit(limit);
        }

        builder.build()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let parsed: ClientConfig =
            toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        ClientConfigBuilder::from(parsed).build()
    }

    /// Load configuration from a TOML file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Default config file location, `<config dir>/medichat/client.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("medichat").join("client.toml"))
    }

    /// Copy of this configuration targeting another peer
    pub fn with_peer(&self, peer_id: impl Into<String>) -> Self {
        let mut config = self.clone();
        config.peer_id = Some(peer_id.into());
        config
    }

    /// Check the values `connect()` cannot proceed without.
    pub fn credentials(&self) -> Result<Credentials<'_>, ChatError> {
        let auth_token = self
            .auth_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ChatError::configuration("auth token is required to connect"))?;
        let local_user_id = self
            .local_user_id
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ChatError::configuration("local user id is required to connect"))?;

        Ok(Credentials {
            auth_token,
            local_user_id,
        })
    }

    /// Endpoint segment addressed by the socket: the peer or `general`
    pub fn channel_segment(&self) -> &str {
        self.peer_id.as_deref().unwrap_or(GENERAL_CHANNEL)
    }

    /// Full socket URL, `{ws|wss}://{host}/chat/{peer}/{user}?token={token}`.
    /// Path segments and the token are percent-encoded.
    pub fn socket_url(&self) -> Result<String, ChatError> {
        let credentials = self.credentials()?;
        Ok(format!(
            "{}://{}/chat/{}/{}?token={}",
            self.socket_scheme(),
            self.server_address,
            urlencoding::encode(self.channel_segment()),
            urlencoding::encode(credentials.local_user_id),
            urlencoding::encode(credentials.auth_token),
        ))
    }

    /// Socket URL with the token hidden, for logs
    pub fn redacted_socket_url(&self) -> String {
        format!(
            "{}://{}/chat/{}/{}?token=[hidden]",
            self.socket_scheme(),
            self.server_address,
            urlencoding::encode(self.channel_segment()),
            urlencoding::encode(self.local_user_id.as_deref().unwrap_or("?")),
        )
    }

    /// Get the full HTTP URL for an API path
    pub fn api_url(&self, path: &str) -> String {
        format!("{}://{}{}", self.http_scheme(), self.server_address, path)
    }

    /// History endpoint, `/chat/history/{peer}_{user}?limit={n}`
    pub fn history_url(&self, peer_id: &str, local_user_id: &str) -> String {
        self.api_url(&format!(
            "/chat/history/{}?limit={}",
            urlencoding::encode(&format!("{}_{}", peer_id, local_user_id)),
            self.history_limit
        ))
    }

    fn socket_scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    fn http_scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    server_address: Option<String>,
    secure: Option<bool>,
    auth_token: Option<String>,
    local_user_id: Option<String>,
    peer_id: Option<String>,
    simulated: bool,
    history_limit: Option<u32>,
}

impl From<ClientConfig> for ClientConfigBuilder {
    fn from(config: ClientConfig) -> Self {
        Self {
            server_address: Some(config.server_address),
            secure: config.secure.then_some(true),
            auth_token: config.auth_token,
            local_user_id: config.local_user_id,
            peer_id: config.peer_id,
            simulated: config.simulated,
            history_limit: Some(config.history_limit),
        }
    }
}

impl ClientConfigBuilder {
    /// Set the server address.
    ///
    /// An `http(s)://` or `ws(s)://` prefix is stripped and selects the
    /// secure flag unless it was set explicitly.
    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.server_address = Some(address.into());
        self
    }

    /// Select secure (`wss`/`https`) schemes
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Set the auth token
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the local user id
    pub fn local_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.local_user_id = Some(user_id.into());
        self
    }

    /// Set the peer id
    pub fn peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    /// Run against the local echo generator
    pub fn simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    /// Set the history page size
    pub fn history_limit(mut self, limit: u32) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let raw = self
            .server_address
            .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_string());
        let (implied_secure, address) = split_scheme(raw.trim())?;

        if address.is_empty() {
            return Err(ConfigError::MissingValue("server_address"));
        }
        if address.contains('/') || address.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidUrl(raw));
        }

        let history_limit = self.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "history_limit",
                value: "0".to_string(),
            });
        }

        Ok(ClientConfig {
            server_address: address.to_string(),
            secure: self.secure.unwrap_or(implied_secure),
            auth_token: self.auth_token.filter(|t| !t.is_empty()),
            local_user_id: self.local_user_id.filter(|u| !u.is_empty()),
            peer_id: self.peer_id.filter(|p| !p.is_empty()),
            simulated: self.simulated,
            history_limit,
        })
    }
}

fn split_scheme(raw: &str) -> Result<(bool, &str), ConfigError> {
    let (secure, rest) = match raw.split_once("://") {
        None => (false, raw),
        Some(("https" | "wss", rest)) => (true, rest),
        Some(("http" | "ws", rest)) => (false, rest),
        Some(_) => return Err(ConfigError::InvalidUrl(raw.to_string())),
    };
    Ok((secure, rest.trim_end_matches('/')))
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("failed to read config: {0}")]
    Io(String),
}
