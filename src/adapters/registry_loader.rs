use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;

use crate::{
    core::{definition::RouteDefinition, handler::Handler},
    ports::module_loader::{LoadError, LoadResult, ModuleExport, ModuleLoader},
};

/// In-memory module loader mapping file paths to compiled exports.
///
/// The files still have to exist on disk for the tree walk to find them; the
/// registry only decides what they export. Useful for embedding native
/// handlers and for tests.
#[derive(Default)]
pub struct RegistryLoader {
    modules: RwLock<HashMap<PathBuf, Option<ModuleExport>>>,
}

impl RegistryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl Into<PathBuf>, export: ModuleExport) {
        self.insert(path.into(), Some(export));
    }

    pub fn register_route(&self, path: impl AsRef<Path>, definition: RouteDefinition) {
        self.insert(path.as_ref().to_path_buf(), Some(ModuleExport::Routes(definition)));
    }

    pub fn register_middleware(&self, path: impl AsRef<Path>, handler: Handler) {
        self.insert(path.as_ref().to_path_buf(), Some(ModuleExport::Handler(handler)));
    }

    /// A module that loads fine but has no default export.
    pub fn register_without_export(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref().to_path_buf(), None);
    }

    pub fn unregister(&self, path: impl AsRef<Path>) -> bool {
        match self.modules.write() {
            Ok(mut modules) => modules.remove(path.as_ref()).is_some(),
            Err(e) => {
                tracing::warn!("Module registry lock poisoned: {}", e);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.modules.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, path: PathBuf, export: Option<ModuleExport>) {
        match self.modules.write() {
            Ok(mut modules) => {
                modules.insert(path, export);
            }
            Err(e) => tracing::warn!("Module registry lock poisoned: {}", e),
        }
    }
}

#[async_trait]
impl ModuleLoader for RegistryLoader {
    async fn load(&self, path: &Path) -> LoadResult<Option<ModuleExport>> {
        let modules = self.modules.read().map_err(|e| LoadError::Invalid {
            path: path.to_path_buf(),
            message: format!("module registry lock poisoned: {e}"),
        })?;
        modules
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handler::Context;

    #[tokio::test]
    async fn test_registry_round_trip() {
        let loader = RegistryLoader::new();
        let handler = Handler::new(|ctx: Context| async move { Ok(ctx.text("hi")) });
        loader.register_route("/r/a.toml", RouteDefinition::new().get(handler.clone()));
        loader.register_middleware("/m/auth.toml", handler);
        loader.register_without_export("/r/empty.toml");

        assert!(matches!(
            loader.load(Path::new("/r/a.toml")).await,
            Ok(Some(ModuleExport::Routes(def))) if def.len() == 1
        ));
        assert!(matches!(
            loader.load(Path::new("/m/auth.toml")).await,
            Ok(Some(ModuleExport::Handler(_)))
        ));
        assert!(matches!(loader.load(Path::new("/r/empty.toml")).await, Ok(None)));
        assert!(matches!(
            loader.load(Path::new("/r/missing.toml")).await,
            Err(LoadError::NotFound(_))
        ));

        assert!(loader.unregister("/r/a.toml"));
        assert!(!loader.unregister("/r/a.toml"));
        assert_eq!(loader.len(), 2);
    }
}
