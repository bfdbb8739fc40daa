//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ecobites_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_PUSH_CAPACITY, DEFAULT_SUGGESTION_TIMEOUT_SECS,
};

/// Secret used to sign bearer tokens when `AUTH_SECRET` is unset.
const DEV_AUTH_SECRET: &str = "ecobites-dev-secret";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:6001`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/ecobites.db`
    pub database_path: PathBuf,

    /// Allowed CORS origin (the web client).
    /// Env: `CLIENT_URL`
    /// Default: none (any origin).
    pub client_url: Option<String>,

    /// HMAC key for bearer tokens.
    /// Env: `AUTH_SECRET`
    /// Default: a fixed development secret.
    pub auth_secret: String,

    /// Token the donation side presents to update the user / item directory.
    /// Env: `SERVICE_TOKEN`
    /// Default: empty (directory API disabled).
    pub service_token: Option<String>,

    /// Gemini API key. Without one, suggestions always use the defaults.
    /// Env: `GEMINI_API_KEY`
    pub gemini_api_key: Option<String>,

    /// Env: `GEMINI_MODEL`
    /// Default: `gemini-1.5-flash`
    pub gemini_model: String,

    /// Deadline for one suggestion round trip.
    /// Env: `SUGGESTION_TIMEOUT_SECS`
    /// Default: `10`
    pub suggestion_timeout: Duration,

    /// Pushes buffered per WebSocket before new ones are dropped.
    /// Env: `WS_CHANNEL_CAPACITY`
    /// Default: `64`
    pub push_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./data/ecobites.db"),
            client_url: None,
            auth_secret: DEV_AUTH_SECRET.to_string(),
            service_token: None,
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            suggestion_timeout: Duration::from_secs(DEFAULT_SUGGESTION_TIMEOUT_SECS),
            push_capacity: DEFAULT_PUSH_CAPACITY,
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("client_url", &self.client_url)
            .field("service_token", &self.service_token.as_ref().map(|_| "<set>"))
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<set>"))
            .field("gemini_model", &self.gemini_model)
            .field("suggestion_timeout", &self.suggestion_timeout)
            .field("push_capacity", &self.push_capacity)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        config.client_url = non_empty(lookup("CLIENT_URL"));

        match non_empty(lookup("AUTH_SECRET")) {
            Some(secret) => config.auth_secret = secret,
            None => tracing::warn!("AUTH_SECRET not set, using the development secret"),
        }

        config.service_token = non_empty(lookup("SERVICE_TOKEN"));
        config.gemini_api_key = non_empty(lookup("GEMINI_API_KEY"));

        if let Some(model) = non_empty(lookup("GEMINI_MODEL")) {
            config.gemini_model = model;
        }

        if let Some(val) = lookup("SUGGESTION_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.suggestion_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid SUGGESTION_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = lookup("WS_CHANNEL_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.push_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid WS_CHANNEL_CAPACITY, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
