use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use eyre::{Result, WrapErr};
use notify::{EventKind, RecursiveMode, Watcher, event::ModifyKind};
use tokio::sync::mpsc;

use crate::ports::change_watcher::{ChangeWatcher, FileEvent, FileEventKind};

const EVENT_BUFFER: usize = 256;

/// Change watcher over the routes and middleware roots, backed by `notify`.
pub struct FsChangeWatcher {
    roots: Vec<PathBuf>,
    // Dropping the watcher stops notifications, so it lives as long as we do.
    _watcher: notify::RecommendedWatcher,
    // Taken once by `watch()`.
    events_rx: Mutex<Option<mpsc::Receiver<FileEvent>>>,
}

impl FsChangeWatcher {
    /// Watch every root recursively. Roots must exist.
    pub fn new<I, P>(roots: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots: Vec<PathBuf> = roots.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let Some(kind) = classify(&event.kind) else {
                            return;
                        };
                        for path in event.paths {
                            tracing::trace!(?kind, path = %path.display(), "Watched file changed");
                            // A full channel already guarantees a pending rebuild.
                            let _ = tx.try_send(FileEvent::new(kind, path));
                        }
                    }
                    Err(e) => tracing::error!("File watch error: {:?}", e),
                }
            })?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .wrap_err_with(|| format!("Failed to watch {}", root.display()))?;
            tracing::info!(dir = %root.display(), "Watching for route changes");
        }

        Ok(Self {
            roots,
            _watcher: watcher,
            events_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

fn classify(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Add),
        EventKind::Remove(_) => Some(FileEventKind::Unlink),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(FileEventKind::Change),
        _ => None,
    }
}

impl ChangeWatcher for FsChangeWatcher {
    /// The receiver can be taken once; later calls get a closed channel.
    fn watch(&self) -> mpsc::Receiver<FileEvent> {
        let taken = match self.events_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                tracing::error!("Watcher receiver lock poisoned: {}", e);
                None
            }
        };
        taken.unwrap_or_else(|| {
            tracing::warn!("FsChangeWatcher::watch called more than once");
            mpsc::channel(1).1
        })
    }
}

#[cfg(test)]
mod tests {
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use tokio::time::{Duration, timeout};

    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(FileEventKind::Add)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File)),
            Some(FileEventKind::Unlink)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(FileEventKind::Change)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            None
        );
    }

    #[tokio::test]
    async fn test_reports_new_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let watcher = FsChangeWatcher::new([dir.path()])?;
        let mut rx = watcher.watch();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("hello.toml"), "[get]\ntext = \"hi\"\n")?;

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .wrap_err("timed out waiting for a change event")?;
        assert!(event.is_some(), "channel closed unexpectedly");
        Ok(())
    }
}
