use std::{collections::HashMap, fmt, path::Path, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{definition::RouteDefinition, handler::Handler};

/// Key under which an object-shaped middleware export exposes its handler.
pub const MIDDLEWARE_EXPORT_KEY: &str = "h";

/// Error type for module loading
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LoadError {
    /// No module is known for this path
    #[error("Module not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Error when reading the module source
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The module source could not be parsed
    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// The module parsed but describes something unusable
    #[error("Invalid module {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

/// Result type alias for module loading
pub type LoadResult<T> = Result<T, LoadError>;

/// The default export of a loaded module.
#[derive(Clone)]
pub enum ModuleExport {
    /// A route file: method key -> handler configuration.
    Routes(RouteDefinition),
    /// A bare middleware function.
    Handler(Handler),
    /// An object export; middleware files expose their handler under
    /// [`MIDDLEWARE_EXPORT_KEY`].
    Object(HashMap<String, Handler>),
}

impl fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleExport::Routes(def) => f.debug_tuple("Routes").field(def).finish(),
            ModuleExport::Handler(_) => f.write_str("Handler"),
            ModuleExport::Object(map) => f
                .debug_tuple("Object")
                .field(&map.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// ModuleLoader defines the port (interface) for turning a file path into the
/// definition it exports. Implementations may cache; the rebuild coordinator
/// calls the invalidation hooks before re-reading changed files.
#[async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
    /// Load the module at `path`.
    ///
    /// # Returns
    /// `Ok(None)` when the module loads but has no default export.
    async fn load(&self, path: &Path) -> LoadResult<Option<ModuleExport>>;

    /// Drop any cached state for `path` so the next load re-reads it.
    fn invalidate(&self, _path: &Path) {}

    /// Drop all cached state.
    fn invalidate_all(&self) {}
}
