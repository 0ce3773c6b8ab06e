//! Route builder: walks the routes tree and assembles one generation of the
//! route table.
//!
//! Sibling files are loaded concurrently, then registered one by one in file
//! name order so that "first registration wins" is deterministic.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use futures_util::future::{BoxFuture, join_all};
use thiserror::Error;

use crate::{
    config::models::RoutingConfig,
    core::{
        definition::{MethodConfig, MethodKey, RouteDoc, RouteKey},
        dispatcher::Dispatcher,
        handler::{Context, Handler, Next},
        middleware::{AppliedMiddlewareRecord, MiddlewareError, MiddlewareResolver, has_extension},
        path::{resolve_directory_path, resolve_route_path},
        validator::build_validators,
    },
    ports::module_loader::{LoadResult, ModuleExport, ModuleLoader},
};

/// Directory names never descended into, besides dot-directories.
pub const IGNORED_DIRECTORIES: [&str; 6] =
    ["node_modules", "dist", "build", "target", "public", "static"];

/// Errors that abort a whole build. File-local problems never do; they end up
/// in the [`BuildReport`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    #[error("Cannot create {kind} directory {}: {source}", path.display())]
    CreateRoot {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read routes directory {}: {source}", path.display())]
    ReadRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRoute {
    pub key: RouteKey,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub file: PathBuf,
    pub message: String,
}

/// What one build generation registered and what it had to skip.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub generation: u64,
    /// Registered keys in registration order, including `USE` entries.
    pub routes: Vec<RouteKey>,
    pub files_loaded: usize,
    pub global_middleware: usize,
    pub scoped_middleware: usize,
    pub duplicates: Vec<DuplicateRoute>,
    pub failures: Vec<BuildFailure>,
    pub warnings: Vec<String>,
    routes_root: PathBuf,
    middleware_root: PathBuf,
}

impl BuildReport {
    fn new(generation: u64, config: &RoutingConfig) -> Self {
        Self {
            generation,
            routes_root: config.routes_dir.clone(),
            middleware_root: config.middleware_dir.clone(),
            ..Self::default()
        }
    }

    /// `path` relative to whichever root contains it.
    pub fn display_path(&self, path: &Path) -> String {
        [&self.routes_root, &self.middleware_root]
            .into_iter()
            .filter(|root| !root.as_os_str().is_empty())
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or(path)
            .display()
            .to_string()
    }

    pub(crate) fn failure(&mut self, file: &Path, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(file = %self.display_path(file), "Failed to load: {}", message);
        self.failures.push(BuildFailure {
            file: file.to_path_buf(),
            message,
        });
    }

    pub(crate) fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub(crate) fn middleware_problem(&mut self, file: &Path, error: MiddlewareError) {
        match error {
            MiddlewareError::Load(e) => self.failure(file, e.to_string()),
            other => {
                let message = format!("{}: {}", self.display_path(file), other);
                self.warning(message);
            }
        }
    }
}

/// Bookkeeping scoped to one build generation. Replaced wholesale on rebuild.
struct Generation {
    dispatcher: Dispatcher,
    registered: scc::HashSet<RouteKey>,
    applied: AppliedMiddlewareRecord,
    processed_dirs: scc::HashSet<PathBuf>,
    report: BuildReport,
}

struct Entry {
    path: PathBuf,
    is_dir: bool,
    len: u64,
}

/// Walks the routes tree and produces a fresh [`Dispatcher`].
#[derive(Clone)]
pub struct RouteBuilder {
    config: RoutingConfig,
    extensions: Arc<[String]>,
    loader: Arc<dyn ModuleLoader>,
    resolver: MiddlewareResolver,
    request_logger: Option<Handler>,
}

impl RouteBuilder {
    pub fn new(config: RoutingConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let extensions: Arc<[String]> = config.extensions.clone().into();
        let resolver =
            MiddlewareResolver::new(config.middleware_dir.clone(), extensions.clone(), loader.clone());
        Self {
            config,
            extensions,
            loader,
            resolver,
            request_logger: None,
        }
    }

    /// Global middleware bound after every custom global middleware.
    pub fn with_request_logger(mut self, logger: Handler) -> Self {
        self.request_logger = Some(logger);
        self
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    /// Build generation `generation` from the current state of the filesystem.
    pub async fn build(&self, generation: u64) -> Result<(Dispatcher, BuildReport), BuildError> {
        let started = Instant::now();
        let routes_root = self.config.routes_dir.clone();

        ensure_dir(&routes_root, "routes").await?;
        ensure_dir(&self.config.middleware_dir, "middleware").await?;

        let entries = read_entries(&routes_root)
            .await
            .map_err(|source| BuildError::ReadRoot {
                path: routes_root.clone(),
                source,
            })?;

        let mut state = Generation {
            dispatcher: Dispatcher::new(generation, &self.config.base_path)
                .with_body_limit(self.config.body_limit),
            registered: scc::HashSet::default(),
            applied: AppliedMiddlewareRecord::new(),
            processed_dirs: scc::HashSet::default(),
            report: BuildReport::new(generation, &self.config),
        };

        self.resolver
            .apply_global(
                &mut state.dispatcher,
                &state.applied,
                &mut state.report,
                self.request_logger.clone(),
            )
            .await;
        self.walk_entries(&mut state, &routes_root, entries).await;

        let report = &state.report;
        tracing::info!(
            generation,
            routes = report.routes.len(),
            files = report.files_loaded,
            duplicates = report.duplicates.len(),
            failures = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Route table built"
        );
        Ok((state.dispatcher, state.report))
    }

    fn walk<'a>(&'a self, state: &'a mut Generation, dir: PathBuf) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match read_entries(&dir).await {
                Ok(entries) => self.walk_entries(state, &dir, entries).await,
                Err(e) => state
                    .report
                    .failure(&dir, format!("cannot read directory: {e}")),
            }
        })
    }

    async fn walk_entries(&self, state: &mut Generation, dir: &Path, entries: Vec<Entry>) {
        self.apply_directory_middleware(state, dir).await;

        let (dirs, files): (Vec<Entry>, Vec<Entry>) = entries.into_iter().partition(|e| e.is_dir);

        for sub in dirs {
            if is_ignored_dir(&sub.path) {
                tracing::trace!(dir = %sub.path.display(), "Skipping ignored directory");
                continue;
            }
            self.walk(state, sub.path).await;
        }

        let candidates: Vec<PathBuf> = files
            .into_iter()
            .filter(|f| self.is_route_candidate(f))
            .map(|f| f.path)
            .collect();
        let loaded = join_all(candidates.iter().map(|path| self.loader.load(path))).await;

        for (path, result) in candidates.iter().zip(loaded) {
            self.register_file(state, path, result).await;
        }
    }

    /// Supported extension, non-empty, and not an underscore (middleware) file.
    fn is_route_candidate(&self, entry: &Entry) -> bool {
        if entry.len == 0 || !has_extension(&entry.path, &self.extensions) {
            return false;
        }
        entry
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| !stem.starts_with('_'))
    }

    async fn apply_directory_middleware(&self, state: &mut Generation, dir: &Path) {
        if state.processed_dirs.insert_async(dir.to_path_buf()).await.is_err() {
            return;
        }
        let Some(scope) = resolve_directory_path(&self.config.routes_dir, dir) else {
            return;
        };
        self.resolver
            .apply_directory(
                dir,
                &scope,
                &mut state.dispatcher,
                &state.applied,
                &mut state.report,
            )
            .await;
    }

    /// Registration pipeline for one route file. Problems are recorded and the
    /// file's routes are left out; they never abort the build.
    async fn register_file(
        &self,
        state: &mut Generation,
        path: &Path,
        loaded: LoadResult<Option<ModuleExport>>,
    ) {
        let rel = state.report.display_path(path);
        let definition = match loaded {
            Ok(Some(ModuleExport::Routes(definition))) => definition,
            Ok(Some(other)) => {
                state
                    .report
                    .warning(format!("{rel}: export is not a route definition ({other:?}), skipped"));
                return;
            }
            Ok(None) => {
                state
                    .report
                    .warning(format!("{rel}: no default export, skipped"));
                return;
            }
            Err(e) => {
                state.report.failure(path, e.to_string());
                return;
            }
        };
        state.report.files_loaded += 1;

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return;
        };
        let Some(pattern) = resolve_route_path(&self.config.routes_dir, path, stem) else {
            return;
        };

        if let Some(parent) = path.parent() {
            self.apply_directory_middleware(state, parent).await;
        }

        for (method, config) in definition.iter() {
            let key = RouteKey::new(method, pattern.clone());
            if state.registered.insert_async(key.clone()).await.is_err() {
                tracing::warn!(route = %key, file = %rel, "Duplicate route ignored; first registration wins");
                state.report.duplicates.push(DuplicateRoute {
                    key,
                    file: path.to_path_buf(),
                });
                continue;
            }

            let (chain, doc) = self.build_chain(state, path, &key, config).await;
            let registered = match method {
                MethodKey::Use => state.dispatcher.use_scoped(&pattern, chain),
                _ => state.dispatcher.add_route(method, &pattern, chain),
            };
            match registered {
                Ok(()) => {
                    tracing::debug!(route = %key, file = %rel, "Registered");
                    if method == MethodKey::Use {
                        state.report.scoped_middleware += 1;
                    }
                    if let Some(doc) = doc {
                        state.dispatcher.add_doc(doc);
                    }
                    state.report.routes.push(key);
                }
                Err(e) => {
                    state.registered.remove_async(&key).await;
                    state.report.failure(path, e.to_string());
                }
            }
        }
    }

    /// Documentation unit, named middleware, validation units, then the handler.
    /// The doc entry is returned separately so that only registered routes are
    /// documented.
    async fn build_chain(
        &self,
        state: &mut Generation,
        file: &Path,
        key: &RouteKey,
        config: &MethodConfig,
    ) -> (Vec<Handler>, Option<RouteDoc>) {
        let config = match config {
            MethodConfig::Plain(handler) => return (vec![handler.clone()], None),
            MethodConfig::Configured(config) => config,
        };

        let mut chain = Vec::with_capacity(config.middleware.len() + config.schema.len() + 2);

        let doc = config.openapi.as_ref().map(|meta| RouteDoc {
            key: key.clone(),
            meta: meta.clone(),
            source: file.to_path_buf(),
        });
        if let Some(doc) = &doc {
            chain.push(describe_route(doc.clone()));
        }

        for name in &config.middleware {
            match self.resolver.resolve(name).await {
                Ok((_, handler)) => chain.push(handler),
                Err(e) => {
                    let message = format!(
                        "{}: middleware '{}' skipped for {}: {}",
                        state.report.display_path(file),
                        name,
                        key,
                        e
                    );
                    state.report.warning(message);
                }
            }
        }

        chain.extend(build_validators(&config.schema));
        chain.push(config.handler.clone());
        (chain, doc)
    }
}

/// Chain element that exposes the route's documentation entry to later
/// handlers through request extensions.
fn describe_route(doc: RouteDoc) -> Handler {
    Handler::middleware(move |mut ctx: Context, next: Next| {
        ctx.extensions_mut().insert(doc.clone());
        next.run(ctx)
    })
}

fn is_ignored_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.') || IGNORED_DIRECTORIES.contains(&name))
}

async fn ensure_dir(path: &Path, kind: &'static str) -> Result<(), BuildError> {
    if tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir()) {
        return Ok(());
    }
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| BuildError::CreateRoot {
            kind,
            path: path.to_path_buf(),
            source,
        })?;
    tracing::info!(dir = %path.display(), "Created {} directory", kind);
    Ok(())
}

/// Directory entries sorted by file name. Symlinked files are followed;
/// symlinked directories are skipped so a link back up the tree cannot loop.
async fn read_entries(dir: &Path) -> std::io::Result<Vec<Entry>> {
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Cannot stat entry: {}", e);
                continue;
            }
        };
        let is_symlink = entry
            .file_type()
            .await
            .is_ok_and(|file_type| file_type.is_symlink());
        if is_symlink && meta.is_dir() {
            tracing::debug!(path = %path.display(), "Skipping symlinked directory");
            continue;
        }
        out.push(Entry {
            is_dir: meta.is_dir(),
            len: meta.len(),
            path,
        });
    }
    out.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(out)
}
