//! Middleware resolution and binding.
//!
//! Middleware files are loaded through the [`ModuleLoader`] port and bound to
//! the dispatcher either globally or scoped to a directory's route pattern.
//! Each `(file, scope)` pair is bound at most once per build generation.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;

use crate::{
    core::{
        builder::BuildReport,
        dispatcher::Dispatcher,
        handler::Handler,
    },
    ports::module_loader::{LoadError, MIDDLEWARE_EXPORT_KEY, ModuleExport, ModuleLoader},
};

/// Base names of directory-scoped middleware files, in binding order.
pub const DIRECTORY_MIDDLEWARE_NAMES: [&str; 2] = ["_middleware", "_index"];

/// Scope recorded for global bindings. Never a valid route pattern.
pub const GLOBAL_SCOPE: &str = "*";

/// Error type for middleware resolution
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MiddlewareError {
    #[error("Middleware '{name}' not found in {}", root.display())]
    NotFound { name: String, root: PathBuf },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Middleware file {} has no default export", .0.display())]
    MissingExport(PathBuf),

    #[error(
        "Invalid middleware structure in {}: expected a handler or an object with key '{}'",
        .0.display(),
        MIDDLEWARE_EXPORT_KEY
    )]
    InvalidStructure(PathBuf),
}

/// Identity of one middleware binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub file: PathBuf,
    pub scope: String,
}

impl BindingKey {
    pub fn new(file: impl Into<PathBuf>, scope: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            scope: scope.into(),
        }
    }
}

/// Bindings made in the current build generation.
#[derive(Default)]
pub struct AppliedMiddlewareRecord {
    bindings: scc::HashSet<BindingKey>,
}

impl AppliedMiddlewareRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding. Returns `false` if it was already recorded.
    pub async fn try_bind(&self, key: BindingKey) -> bool {
        self.bindings.insert_async(key).await.is_ok()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pull the handler out of a middleware file's default export.
pub fn extract_handler(path: &Path, export: ModuleExport) -> Result<Handler, MiddlewareError> {
    match export {
        ModuleExport::Handler(handler) => Ok(handler),
        ModuleExport::Object(mut object) => object
            .remove(MIDDLEWARE_EXPORT_KEY)
            .ok_or_else(|| MiddlewareError::InvalidStructure(path.to_path_buf())),
        ModuleExport::Routes(_) => Err(MiddlewareError::InvalidStructure(path.to_path_buf())),
    }
}

/// Loads middleware files, by name or by path.
#[derive(Clone)]
pub struct MiddlewareResolver {
    root: PathBuf,
    extensions: Arc<[String]>,
    loader: Arc<dyn ModuleLoader>,
}

impl MiddlewareResolver {
    pub fn new(root: PathBuf, extensions: Arc<[String]>, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            root,
            extensions,
            loader,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `<name>.<ext>` under the middleware root, trying each configured
    /// extension in order.
    pub async fn resolve(&self, name: &str) -> Result<(PathBuf, Handler), MiddlewareError> {
        let Some(path) = find_with_extensions(&self.root, name, &self.extensions).await else {
            return Err(MiddlewareError::NotFound {
                name: name.to_string(),
                root: self.root.clone(),
            });
        };
        let handler = self.load_file(&path).await?;
        Ok((path, handler))
    }

    pub async fn load_file(&self, path: &Path) -> Result<Handler, MiddlewareError> {
        match self.loader.load(path).await? {
            Some(export) => extract_handler(path, export),
            None => Err(MiddlewareError::MissingExport(path.to_path_buf())),
        }
    }

    /// Bind the conventional middleware files found directly in `dir` to
    /// `scope`. Pairs already bound this generation are skipped silently.
    pub async fn apply_directory(
        &self,
        dir: &Path,
        scope: &str,
        dispatcher: &mut Dispatcher,
        record: &AppliedMiddlewareRecord,
        report: &mut BuildReport,
    ) {
        for name in DIRECTORY_MIDDLEWARE_NAMES {
            let Some(path) = find_with_extensions(dir, name, &self.extensions).await else {
                continue;
            };
            if !record.try_bind(BindingKey::new(&path, scope)).await {
                continue;
            }
            match self.load_file(&path).await {
                Ok(handler) => match dispatcher.use_scoped(scope, vec![handler]) {
                    Ok(()) => {
                        tracing::debug!(file = %path.display(), scope, "Bound directory middleware");
                        report.scoped_middleware += 1;
                    }
                    Err(e) => report.failure(&path, e.to_string()),
                },
                Err(e) => report.middleware_problem(&path, e),
            }
        }
    }

    /// Bind every underscore-prefixed file directly in the middleware root as
    /// global middleware, sorted by file name, then the optional request
    /// logger.
    pub async fn apply_global(
        &self,
        dispatcher: &mut Dispatcher,
        record: &AppliedMiddlewareRecord,
        report: &mut BuildReport,
        logger: Option<Handler>,
    ) {
        let files = match list_global_files(&self.root, &self.extensions).await {
            Ok(files) => files,
            Err(e) => {
                report.failure(&self.root, format!("cannot read middleware directory: {e}"));
                Vec::new()
            }
        };

        for path in files {
            if !record.try_bind(BindingKey::new(&path, GLOBAL_SCOPE)).await {
                continue;
            }
            match self.load_file(&path).await {
                Ok(handler) => {
                    tracing::debug!(file = %path.display(), "Bound global middleware");
                    dispatcher.use_global(handler);
                    report.global_middleware += 1;
                }
                Err(e) => report.middleware_problem(&path, e),
            }
        }

        if let Some(logger) = logger {
            dispatcher.use_global(logger);
            report.global_middleware += 1;
        }
    }
}

/// First existing, non-empty `<dir>/<name>.<ext>`.
async fn find_with_extensions(dir: &Path, name: &str, extensions: &[String]) -> Option<PathBuf> {
    for ext in extensions {
        let candidate = dir.join(format!("{name}.{ext}"));
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => return Some(candidate),
            _ => {}
        }
    }
    None
}

async fn list_global_files(root: &Path, extensions: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() || meta.len() == 0 {
            continue;
        }
        let path = entry.path();
        let global = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('_'));
        if global && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x == e))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        adapters::registry_loader::RegistryLoader,
        core::{definition::RouteDefinition, handler::Context},
    };

    fn noop() -> Handler {
        Handler::middleware(|ctx: Context, next: crate::core::handler::Next| async move {
            next.run(ctx).await
        })
    }

    fn exts() -> Arc<[String]> {
        vec!["toml".to_string(), "json".to_string()].into()
    }

    #[test]
    fn test_extract_handler_shapes() {
        let path = Path::new("/mw/a.toml");
        assert!(extract_handler(path, ModuleExport::Handler(noop())).is_ok());
        assert!(
            extract_handler(
                path,
                ModuleExport::Object(HashMap::from([("h".to_string(), noop())]))
            )
            .is_ok()
        );
        assert!(matches!(
            extract_handler(
                path,
                ModuleExport::Object(HashMap::from([("handler".to_string(), noop())]))
            ),
            Err(MiddlewareError::InvalidStructure(_))
        ));
        assert!(matches!(
            extract_handler(path, ModuleExport::Routes(RouteDefinition::new())),
            Err(MiddlewareError::InvalidStructure(_))
        ));
    }

    #[tokio::test]
    async fn test_record_binds_once() {
        let record = AppliedMiddlewareRecord::new();
        assert!(record.try_bind(BindingKey::new("/m/_a.toml", "/users")).await);
        assert!(!record.try_bind(BindingKey::new("/m/_a.toml", "/users")).await);
        assert!(record.try_bind(BindingKey::new("/m/_a.toml", "/")).await);
        assert_eq!(record.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_tries_extensions_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("auth.json");
        std::fs::write(&json, "{}").unwrap();

        let loader = Arc::new(RegistryLoader::new());
        loader.register_middleware(&json, noop());
        let resolver = MiddlewareResolver::new(dir.path().to_path_buf(), exts(), loader.clone());

        let (path, _) = resolver.resolve("auth").await.unwrap();
        assert_eq!(path, json);

        let toml = dir.path().join("auth.toml");
        std::fs::write(&toml, "x = 1").unwrap();
        loader.register_middleware(&toml, noop());
        let (path, _) = resolver.resolve("auth").await.unwrap();
        assert_eq!(path, toml);

        assert!(matches!(
            resolver.resolve("missing").await,
            Err(MiddlewareError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_global_and_directory_bindings_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mw_root = dir.path().join("middleware");
        let users = dir.path().join("routes/users");
        std::fs::create_dir_all(&mw_root).unwrap();
        std::fs::create_dir_all(&users).unwrap();

        let loader = Arc::new(RegistryLoader::new());
        for (path, contents) in [
            (mw_root.join("_b.toml"), "x = 1"),
            (mw_root.join("_a.toml"), "x = 1"),
            (mw_root.join("named.toml"), "x = 1"),
            (mw_root.join("_empty.toml"), ""),
            (users.join("_middleware.toml"), "x = 1"),
        ] {
            std::fs::write(&path, contents).unwrap();
            loader.register_middleware(&path, noop());
        }

        let resolver = MiddlewareResolver::new(mw_root, exts(), loader);
        let record = AppliedMiddlewareRecord::new();
        let mut report = BuildReport::default();
        let mut dispatcher = Dispatcher::new(1, "/");

        for _ in 0..2 {
            resolver
                .apply_global(&mut dispatcher, &record, &mut report, None)
                .await;
            resolver
                .apply_directory(&users, "/users", &mut dispatcher, &record, &mut report)
                .await;
        }

        assert_eq!(dispatcher.global_count(), 2);
        assert_eq!(report.global_middleware, 2);
        assert_eq!(report.scoped_middleware, 1);
        assert_eq!(record.len(), 3);
        assert!(report.failures.is_empty());
    }
}
