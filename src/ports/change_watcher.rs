use std::path::PathBuf;

use tokio::sync::mpsc;

/// Kind of filesystem change under a watched root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Add,
    Change,
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Trait for sources of file-change notifications.
pub trait ChangeWatcher: Send + Sync {
    /// Return a channel of change events. Every event kind triggers the same
    /// full rebuild.
    fn watch(&self) -> mpsc::Receiver<FileEvent>;
}
