//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the engine can run with zero
//! configuration against a local server.

use std::path::PathBuf;

use banter_shared::constants::{DEFAULT_HTTP_URL, DEFAULT_WS_URL};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Event-channel endpoint.
    /// Env: `BANTER_WS_URL`
    /// Default: `ws://127.0.0.1:8080/ws`
    pub ws_url: String,

    /// REST fallback base URL.
    /// Env: `BANTER_HTTP_URL`
    /// Default: `http://127.0.0.1:8080`
    pub http_url: String,

    /// Media cache directory override.
    /// Env: `BANTER_CACHE_DIR`
    /// Default: the platform cache location.
    pub cache_dir: Option<PathBuf>,

    /// Page size for REST history fetches.
    pub history_page: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            http_url: DEFAULT_HTTP_URL.to_string(),
            cache_dir: None,
            history_page: 50,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("BANTER_WS_URL") {
            config.ws_url = url;
        }

        if let Ok(url) = std::env::var("BANTER_HTTP_URL") {
            config.http_url = url;
        }

        if let Ok(dir) = std::env::var("BANTER_CACHE_DIR") {
            if !dir.is_empty() {
                config.cache_dir = Some(PathBuf::from(dir));
            }
        }

        config
    }
}
