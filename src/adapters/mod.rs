pub mod fs_watcher;
pub mod http_handler;
pub mod json_schema;
pub mod manifest_loader;
pub mod middleware;
pub mod registry_loader;

/// Re-export commonly used types from adapters
pub use fs_watcher::FsChangeWatcher;
pub use http_handler::HttpHandler;
pub use json_schema::JsonSchema;
pub use manifest_loader::ManifestLoader;
pub use middleware::{REQUEST_ID_HEADER, RequestId, request_logger};
pub use registry_loader::RegistryLoader;
