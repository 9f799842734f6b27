//! Connection and watch settings.
//!
//! [`BackendConfig`] covers everything needed to reach the coordination
//! store; [`WatchSettings`] adds the watched prefix and the per-attempt
//! watch timeout, and can be loaded from a TOML file with `KEYWATCH_`
//! environment overrides.

use std::env;
use std::time::Duration;

use ::config::Config;
use ::config::Environment;
use ::config::File;
use serde::Deserialize;

use crate::Result;

/// Connection parameters for the coordination store.
///
/// Both protocol generations are configured from the same struct: the
/// streaming generation uses the HTTP/2 keepalive and compression knobs,
/// the legacy generation only the timeouts and keepalive.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Store endpoints, e.g. `http://127.0.0.1:2379`.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Maximum time to wait for establishing a TCP connection
    /// Default: 1 second
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum time to wait for a complete point-read response
    /// Default: 3 seconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// TCP keepalive duration for idle connections
    /// Default: 5 minutes (300s)
    #[serde(default = "default_tcp_keepalive_secs")]
    pub tcp_keepalive_secs: u64,

    /// Interval for HTTP/2 keepalive pings
    /// Default: 1 minute (60s)
    #[serde(default = "default_http2_keepalive_interval_secs")]
    pub http2_keepalive_interval_secs: u64,

    /// Timeout for HTTP/2 keepalive pings
    /// Default: 20 seconds
    #[serde(default = "default_http2_keepalive_timeout_secs")]
    pub http2_keepalive_timeout_secs: u64,

    /// Enable Gzip compression on the streaming protocol generation
    /// Default: false
    #[serde(default)]
    pub enable_compression: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            tcp_keepalive_secs: default_tcp_keepalive_secs(),
            http2_keepalive_interval_secs: default_http2_keepalive_interval_secs(),
            http2_keepalive_timeout_secs: default_http2_keepalive_timeout_secs(),
            enable_compression: false,
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_secs)
    }

    pub fn http2_keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.http2_keepalive_interval_secs)
    }

    pub fn http2_keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.http2_keepalive_timeout_secs)
    }
}

/// Top-level watcher settings: one watched prefix over one backend.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSettings {
    /// Key prefix to watch, e.g. `/rules/`.
    pub prefix: String,

    /// Bounded maximum wait per underlying watch attempt, in whole seconds.
    /// Default: 90 seconds
    #[serde(default = "default_watch_timeout_secs")]
    pub watch_timeout_secs: u64,

    #[serde(default)]
    pub backend: BackendConfig,
}

impl WatchSettings {
    /// Loads settings from the file named by `CONFIG_PATH` (without
    /// extension), falling back to `config/default`.
    pub fn new() -> Result<Self> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default".into());
        Self::from_file(&config_path)
    }

    /// Loads settings from a TOML file, then applies `KEYWATCH_`-prefixed
    /// environment overrides (e.g. `KEYWATCH_WATCH_TIMEOUT_SECS=30`).
    pub fn from_file(config_path: &str) -> Result<Self> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            .add_source(Environment::with_prefix("keywatch").separator("__"))
            .build()?;

        s.try_deserialize().map_err(Into::into)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_tcp_keepalive_secs() -> u64 {
    300
}
fn default_http2_keepalive_interval_secs() -> u64 {
    60
}
fn default_http2_keepalive_timeout_secs() -> u64 {
    20
}
fn default_watch_timeout_secs() -> u64 {
    90
}
