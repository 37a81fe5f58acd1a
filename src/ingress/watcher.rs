//! File-backed ingress source with change notification.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::ingress::IngressUpdate;

/// Error type for reading an entries file.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Read one snapshot from a JSON file containing an array of entries.
pub fn load_entries(path: &Path) -> Result<IngressUpdate, SourceError> {
    let content = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// A watcher that re-reads the entries file whenever it changes.
pub struct EntriesWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<IngressUpdate>,
}

impl EntriesWatcher {
    /// Create a new watcher.
    ///
    /// Returns the watcher and a receiver for parsed snapshots.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<IngressUpdate>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive for events to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        match load_entries(&path) {
                            Ok(update) => {
                                tracing::debug!(entries = update.entries.len(), "Ingress entries changed");
                                let _ = tx.send(update);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload ingress entries, keeping current state");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Ingress entries watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.json");
        fs::write(&path, r#"[{"host": "a.com", "path": "/x", "serviceAddress": "svc", "servicePort": 80}]"#)
            .unwrap();

        let update = load_entries(&path).unwrap();
        assert_eq!(update.entries.len(), 1);
        assert_eq!(update.entries[0].service_port, 80);
    }

    #[test]
    fn test_load_entries_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.json");
        fs::write(&path, "{not json").unwrap();

        let err = load_entries(&path).unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
        assert!(err.to_string().contains("entries.json"));
    }
}
