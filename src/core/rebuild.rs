//! Rebuild coordination: owns the live route table and swaps in fresh
//! generations.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, mpsc};

use crate::{
    core::{
        builder::{BuildError, BuildReport, RouteBuilder},
        dispatcher::Dispatcher,
    },
    ports::change_watcher::FileEvent,
};

/// Holds the current [`Dispatcher`] and rebuilds it on demand.
///
/// Rebuilds are serialized: a trigger that arrives while one is running waits
/// for it, and watcher events that pile up meanwhile are coalesced into a
/// single follow-up rebuild. A failed build leaves the previous table live.
pub struct RebuildCoordinator {
    builder: RouteBuilder,
    current: Arc<ArcSwap<Dispatcher>>,
    generation: AtomicU64,
    last_report: ArcSwap<BuildReport>,
    lock: Mutex<()>,
}

impl RebuildCoordinator {
    /// Build the first generation. Fails only if the routes root cannot be
    /// prepared or read.
    pub async fn start(builder: RouteBuilder) -> Result<Arc<Self>, BuildError> {
        let (dispatcher, report) = builder.build(1).await?;
        Ok(Arc::new(Self {
            builder,
            current: Arc::new(ArcSwap::from_pointee(dispatcher)),
            generation: AtomicU64::new(1),
            last_report: ArcSwap::from_pointee(report),
            lock: Mutex::new(()),
        }))
    }

    /// Handle shared with the HTTP layer. Each request loads it once.
    pub fn handle(&self) -> Arc<ArcSwap<Dispatcher>> {
        self.current.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn last_report(&self) -> Arc<BuildReport> {
        self.last_report.load_full()
    }

    /// Discard the route table and rebuild it from the filesystem.
    pub async fn rebuild(&self) -> Result<Arc<BuildReport>, BuildError> {
        let _guard = self.lock.lock().await;

        self.builder.loader().invalidate_all();
        let generation = self.generation.load(Ordering::SeqCst) + 1;

        match self.builder.build(generation).await {
            Ok((dispatcher, report)) => {
                let report = Arc::new(report);
                self.current.store(Arc::new(dispatcher));
                self.generation.store(generation, Ordering::SeqCst);
                self.last_report.store(report.clone());
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    generation,
                    "Rebuild failed: {}. Keeping generation {}.",
                    e,
                    generation - 1
                );
                Err(e)
            }
        }
    }

    /// React to watcher events until the channel closes. Each burst is
    /// debounced, drained and turned into one rebuild.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<FileEvent>, debounce: Duration) {
        tracing::info!("Route watcher task started.");
        while let Some(first) = events.recv().await {
            let mut changed = vec![first];
            if !debounce.is_zero() {
                tokio::time::sleep(debounce).await;
            }
            while let Ok(event) = events.try_recv() {
                changed.push(event);
            }

            for event in &changed {
                tracing::debug!(kind = ?event.kind, path = %event.path.display(), "File changed");
            }
            tracing::info!(events = changed.len(), "Rebuilding routes");

            if let Ok(report) = self.rebuild().await {
                for warning in &report.warnings {
                    tracing::debug!(generation = report.generation, "{}", warning);
                }
            }
        }
        tracing::info!("Route watcher task is shutting down.");
    }
}
