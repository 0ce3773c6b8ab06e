pub mod change_watcher;
pub mod module_loader;
pub mod schema;

pub use change_watcher::{ChangeWatcher, FileEvent, FileEventKind};
pub use module_loader::{LoadError, LoadResult, MIDDLEWARE_EXPORT_KEY, ModuleExport, ModuleLoader};
pub use schema::{Schema, SchemaError, SchemaFn, SchemaIssue, SchemaMap, ValidationTarget};
