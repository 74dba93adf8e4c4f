//! Recursive filesystem watcher feeding raw events to the engine.

use std::path::Path;
use std::sync::Arc;

use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::error::WatchError;
use super::event::RawEvent;
use super::registry::WatchRegistry;

/// Capacity of the bridge between notify's thread and the async side.
const NOTIFY_CHANNEL_CAPACITY: usize = 256;

/// Handle for adding watch roots, usable while the watcher is running.
#[derive(Clone)]
pub struct WatchRoots {
    watcher: Arc<Mutex<notify::RecommendedWatcher>>,
}

impl WatchRoots {
    /// Watch a directory tree recursively.
    pub async fn add(&self, root: &Path) -> Result<(), WatchError> {
        let mut watcher = self.watcher.lock().await;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// Forwards notify events as [`RawEvent`]s, in arrival order.
pub struct FsWatcher {
    roots: WatchRoots,
    notify_rx: mpsc::Receiver<notify::Result<Event>>,
    events_tx: mpsc::Sender<RawEvent>,
}

impl FsWatcher {
    /// Create a watcher that sends raw events to `events_tx`.
    ///
    /// Nothing is watched until roots are added.
    pub fn new(events_tx: mpsc::Sender<RawEvent>) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        Ok(Self {
            roots: WatchRoots {
                watcher: Arc::new(Mutex::new(watcher)),
            },
            notify_rx: rx,
            events_tx,
        })
    }

    pub fn roots(&self) -> WatchRoots {
        self.roots.clone()
    }

    /// Watch every directory in the registry.
    ///
    /// Directories that cannot be watched are logged and skipped. Fails only
    /// when none could be watched. Returns the number of watched roots.
    pub async fn watch_registry(&self, registry: &WatchRegistry) -> Result<usize, WatchError> {
        let mut watched = 0;

        for dir in registry.directories() {
            match self.roots.add(&dir.path).await {
                Ok(()) => {
                    watched += 1;
                    crate::log_event!(
                        "watcher",
                        "watching",
                        "{} library folder {}",
                        dir.library,
                        dir.path.display()
                    );
                }
                Err(e) => {
                    tracing::warn!("[watcher] {e}");
                }
            }
        }

        if watched == 0 {
            return Err(WatchError::NothingWatched);
        }
        Ok(watched)
    }

    /// Forward events until cancelled or the engine hangs up.
    ///
    /// Watcher errors are logged and never stop the loop. Dropping `self` on
    /// return closes the engine's event stream.
    pub async fn run(mut self, cancel: CancellationToken) {
        crate::log_event!("watcher", "started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::log_event!("watcher", "stopped");
                    return;
                }

                res = self.notify_rx.recv() => {
                    match res {
                        Some(Ok(event)) => {
                            for raw in RawEvent::from_notify(event) {
                                crate::debug_event!(
                                    "watcher",
                                    "event",
                                    "{:?} {}",
                                    raw.operation,
                                    raw.path.display()
                                );
                                if self.events_tx.send(raw).await.is_err() {
                                    crate::log_event!("watcher", "engine gone, stopping");
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            let err = WatchError::EventError { details: e.to_string() };
                            tracing::error!("[watcher] {err}");
                        }
                        None => {
                            tracing::warn!("[watcher] notify channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchMode;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_watch_registry_skips_missing_directories() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("movies");
        std::fs::create_dir(&present).unwrap();

        let registry = WatchRegistry::from_entries(
            vec![
                ("movies", vec![present.clone()]),
                ("shows", vec![temp_dir.path().join("missing")]),
            ],
            MatchMode::Segment,
        )
        .unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let watcher = FsWatcher::new(tx).unwrap();
        assert_eq!(watcher.watch_registry(&registry).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_watch_registry_fails_when_nothing_watchable() {
        let temp_dir = TempDir::new().unwrap();
        let registry = WatchRegistry::from_entries(
            vec![("movies", vec![temp_dir.path().join("missing")])],
            MatchMode::Segment,
        )
        .unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let watcher = FsWatcher::new(tx).unwrap();
        assert!(matches!(
            watcher.watch_registry(&registry).await,
            Err(WatchError::NothingWatched)
        ));
    }

    #[tokio::test]
    async fn test_forwards_created_file() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let watcher = FsWatcher::new(tx).unwrap();
        watcher.roots().add(temp_dir.path()).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(cancel.clone()));

        let file = temp_dir.path().join("nested.mkv");
        std::fs::write(&file, b"data").unwrap();

        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if event.path.ends_with("nested.mkv") {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(found, "expected an event for the created file");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_root_added_while_running() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let watcher = FsWatcher::new(tx).unwrap();
        let roots = watcher.roots();
        roots.add(first.path()).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(cancel.clone()));

        roots.add(second.path()).await.unwrap();
        std::fs::write(second.path().join("late.mkv"), b"data").unwrap();

        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if event.path.ends_with("late.mkv") {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(found, "expected an event from the late root");

        cancel.cancel();
        handle.await.unwrap();
    }
}
