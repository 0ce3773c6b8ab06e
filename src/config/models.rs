//! Configuration data structures for Burrow.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They
//! include defaults so that an empty config file starts a server over
//! `./routes` and `./middleware`.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::handler::DEFAULT_BODY_LIMIT;

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

/// File-tree routing options
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Directory walked for route files
    pub routes_dir: PathBuf,
    /// Directory holding named and global middleware files
    pub middleware_dir: PathBuf,
    /// Prefix every route is mounted under (e.g. "/api")
    pub base_path: String,
    /// Recognised route/middleware file extensions, in resolution order
    pub extensions: Vec<String>,
    /// Bind the built-in request logger as the last global middleware
    pub request_logging: bool,
    /// Upper bound for buffered request bodies, in bytes
    pub body_limit: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            routes_dir: PathBuf::from("./routes"),
            middleware_dir: PathBuf::from("./middleware"),
            base_path: "/".to_string(),
            extensions: vec![
                "toml".to_string(),
                "yaml".to_string(),
                "yml".to_string(),
                "json".to_string(),
            ],
            request_logging: true,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl RoutingConfig {
    pub fn new(routes_dir: impl Into<PathBuf>, middleware_dir: impl Into<PathBuf>) -> Self {
        Self {
            routes_dir: routes_dir.into(),
            middleware_dir: middleware_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }
}

/// Hot-reload options
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Quiet period after a change before rebuilding (milliseconds)
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 150,
        }
    }
}

/// Logging options; `RUST_LOG` takes precedence over `level`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration for static file serving
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Root directory for static files
    pub root: PathBuf,
    /// URL prefix for static files (e.g., "/static")
    pub url_prefix: String,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./static"),
            url_prefix: "/static".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub static_files: Option<StaticFilesConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            routing: RoutingConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
            static_files: None,
        }
    }
}
