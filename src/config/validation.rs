use std::net::SocketAddr;

use crate::config::models::{RoutingConfig, ServerConfig, StaticFilesConfig, WatchConfig};

/// Largest accepted watcher debounce, in milliseconds.
pub const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, reporting every problem at
    /// once.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }
        errors.extend(Self::validate_routing(&config.routing));
        if let Err(e) = Self::validate_watch(&config.watch) {
            errors.push(e);
        }
        if let Some(static_files) = &config.static_files {
            errors.extend(Self::validate_static_files(static_files, &config.routing));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_routing(routing: &RoutingConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if routing.routes_dir.as_os_str().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routing.routes_dir".to_string(),
            });
        }
        if routing.middleware_dir.as_os_str().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routing.middleware_dir".to_string(),
            });
        }
        if !routing.routes_dir.as_os_str().is_empty() {
            if routing.routes_dir == routing.middleware_dir {
                errors.push(ValidationError::InvalidField {
                    field: "routing.middleware_dir".to_string(),
                    message: "must differ from routing.routes_dir".to_string(),
                });
            } else if routing.middleware_dir.starts_with(&routing.routes_dir) {
                // Its files would also be walked as routes.
                errors.push(ValidationError::InvalidField {
                    field: "routing.middleware_dir".to_string(),
                    message: "must not be inside routing.routes_dir".to_string(),
                });
            }
        }

        if let Err(e) = Self::validate_url_path("routing.base_path", &routing.base_path) {
            errors.push(e);
        }

        if routing.extensions.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routing.extensions".to_string(),
            });
        }
        for ext in &routing.extensions {
            if ext.is_empty() || ext.starts_with('.') || ext.contains(['/', '\\']) {
                errors.push(ValidationError::InvalidField {
                    field: "routing.extensions".to_string(),
                    message: format!("'{ext}' must be a bare extension such as 'toml'"),
                });
            }
        }

        if routing.body_limit == 0 {
            errors.push(ValidationError::InvalidField {
                field: "routing.body_limit".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        errors
    }

    fn validate_watch(watch: &WatchConfig) -> ValidationResult<()> {
        if watch.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ValidationError::InvalidField {
                field: "watch.debounce_ms".to_string(),
                message: format!("must be at most {MAX_DEBOUNCE_MS}"),
            });
        }
        Ok(())
    }

    fn validate_static_files(
        static_files: &StaticFilesConfig,
        routing: &RoutingConfig,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if static_files.root.as_os_str().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "static_files.root".to_string(),
            });
        }
        match Self::validate_url_path("static_files.url_prefix", &static_files.url_prefix) {
            Err(e) => errors.push(e),
            Ok(()) if static_files.url_prefix == "/" => {
                errors.push(ValidationError::InvalidField {
                    field: "static_files.url_prefix".to_string(),
                    message: "cannot be '/', it would shadow every route".to_string(),
                });
            }
            Ok(()) => {}
        }
        if static_files.root == routing.routes_dir {
            errors.push(ValidationError::InvalidField {
                field: "static_files.root".to_string(),
                message: "must differ from routing.routes_dir".to_string(),
            });
        }

        errors
    }

    /// A URL path prefix: starts with '/', no empty, parameter or wildcard
    /// segments.
    fn validate_url_path(field: &str, path: &str) -> ValidationResult<()> {
        let invalid = |message: &str| ValidationError::InvalidField {
            field: field.to_string(),
            message: format!("'{path}' {message}"),
        };
        if !path.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }
        if path.contains("//") {
            return Err(invalid("must not contain empty segments"));
        }
        if path
            .split('/')
            .any(|s| s.starts_with(':') || s.starts_with('*') || s.contains(['{', '}', '[', ']']))
        {
            return Err(invalid("must not contain parameters or wildcards"));
        }
        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn message(config: &ServerConfig) -> String {
        match ServerConfigValidator::validate(config) {
            Err(ValidationError::ValidationFailed { message }) => message,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(ServerConfigValidator::validate(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn validate_rejects_bad_listen_address() {
        let config = ServerConfig {
            listen_addr: "localhost".to_string(),
            ..ServerConfig::default()
        };
        assert!(message(&config).contains("Invalid listen address"));
    }

    #[test]
    fn validate_rejects_parameterised_base_path() {
        let mut config = ServerConfig::default();
        config.routing.base_path = "/api/:version".to_string();
        assert!(message(&config).contains("routing.base_path"));

        config.routing.base_path = "api".to_string();
        assert!(message(&config).contains("must start with '/'"));
    }

    #[test]
    fn validate_rejects_bad_extensions_and_shared_roots() {
        let mut config = ServerConfig::default();
        config.routing.extensions = vec![".toml".to_string()];
        config.routing.middleware_dir = config.routing.routes_dir.clone();
        let msg = message(&config);
        assert!(msg.starts_with("Found 2 validation errors"), "{msg}");
        assert!(msg.contains("bare extension"));
        assert!(msg.contains("must differ"));
    }

    #[test]
    fn validate_rejects_middleware_dir_nested_in_routes() {
        let mut config = ServerConfig::default();
        config.routing.routes_dir = PathBuf::from("./app/routes");
        config.routing.middleware_dir = PathBuf::from("./app/routes/middleware");
        assert!(message(&config).contains("must not be inside routing.routes_dir"));

        // Component-wise, so a sibling sharing a name prefix is fine.
        config.routing.middleware_dir = PathBuf::from("./app/routes-middleware");
        assert!(ServerConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn validate_rejects_debounce_out_of_range() {
        let mut config = ServerConfig::default();
        config.watch.debounce_ms = MAX_DEBOUNCE_MS + 1;
        assert!(message(&config).contains("watch.debounce_ms"));
    }

    #[test]
    fn validate_rejects_root_static_prefix() {
        let config = ServerConfig {
            static_files: Some(StaticFilesConfig {
                root: PathBuf::from("./public"),
                url_prefix: "/".to_string(),
            }),
            ..ServerConfig::default()
        };
        assert!(message(&config).contains("shadow"));
    }
}
