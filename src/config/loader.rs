use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Prefix of environment overrides, e.g. `BURROW_LISTEN_ADDR` or
/// `BURROW_WATCH__DEBOUNCE_MS`.
pub const ENV_PREFIX: &str = "BURROW";

/// Load configuration from a file, with `BURROW_*` environment overrides.
/// Supports TOML, YAML, JSON and INI.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    build_config(Some(Path::new(config_path)), environment())
}

/// Like [`load_config`], but a missing file yields the defaults (still
/// subject to environment overrides).
pub async fn load_config_or_default(config_path: &str) -> Result<ServerConfig> {
    let path = Path::new(config_path);
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        build_config(Some(path), environment())
    } else {
        tracing::debug!(path = %path.display(), "Config file not found, using defaults");
        build_config(None, environment())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("routing.extensions")
}

fn build_config(config_path: Option<&Path>, env: Environment) -> Result<ServerConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        // Determine file format based on extension
        let format = match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            Some("ini") => FileFormat::Ini,
            _ => FileFormat::Toml, // Default to TOML
        };
        builder = builder.add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ));
    }

    let origin = config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());

    let settings = builder
        .add_source(env)
        .build()
        .with_context(|| format!("Failed to build config from {origin}"))?;

    let server_config: ServerConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {origin}"))?;

    Ok(server_config)
}
