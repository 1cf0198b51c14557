//! Snapshot persistence of the whole metric store to one JSON file.
//!
//! With `interval_secs = 0` every successful write is followed by a flush
//! (write-through); otherwise a background task flushes on a fixed period and
//! once more on shutdown.

use crate::config::SnapshotConfig;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemon_storage::{StorageEngine, StorageError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct PersistenceScheduler {
    storage: Arc<dyn StorageEngine>,
    path: PathBuf,
    interval: Duration,
    file_lock: Mutex<()>,
}

impl PersistenceScheduler {
    /// Returns `None` when no snapshot path is configured.
    pub fn from_config(storage: Arc<dyn StorageEngine>, config: &SnapshotConfig) -> Option<Arc<Self>> {
        let path = config.path.as_deref().filter(|p| !p.is_empty())?;
        Some(Arc::new(Self::new(storage, path, config.interval())))
    }

    pub fn new(storage: Arc<dyn StorageEngine>, path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            storage,
            path: path.into(),
            interval,
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_write_through(&self) -> bool {
        self.interval.is_zero()
    }

    /// Sets every metric named in the snapshot file to its snapshot value, so
    /// a backend that kept its own rows across a restart is not counted
    /// twice. A missing file is not an error; a malformed one is.
    pub fn restore(&self) -> Result<usize, StorageError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No snapshot to restore");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let restored = self.storage.load(&mut BufReader::new(file))?;
        tracing::info!(path = %self.path.display(), restored, "Snapshot restored");
        Ok(restored)
    }

    /// Writes the current store to a temporary sibling file and renames it
    /// over the snapshot.
    pub fn flush(&self) -> Result<usize, StorageError> {
        let _guard = self
            .file_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let written = self.storage.flush(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), written, "Snapshot flushed");
        Ok(written)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Called after every successful write. Only write-through mode flushes
    /// here; a failed flush is logged and the write still stands.
    ///
    /// The flush is synchronous: it serializes the whole store and fsyncs the
    /// file on the calling thread, which for the HTTP and gRPC handlers is a
    /// tokio worker. Large stores or slow disks should use a periodic
    /// interval instead.
    pub fn after_write(&self) {
        if !self.is_write_through() {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::error!(path = %self.path.display(), error = %e, "Write-through snapshot flush failed");
        }
    }

    /// Starts the periodic flush task. It flushes every interval and once more
    /// when `cancel` fires; in write-through mode it only does the final flush.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.is_write_through() {
                cancel.cancelled().await;
            } else {
                let mut tick = tokio::time::interval_at(
                    tokio::time::Instant::now() + self.interval,
                    self.interval,
                );
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            if let Err(e) = self.flush() {
                                tracing::error!(path = %self.path.display(), error = %e, "Periodic snapshot flush failed");
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            }

            match self.flush() {
                Ok(written) => tracing::info!(written, "Final snapshot written"),
                Err(e) => tracing::error!(error = %e, "Final snapshot flush failed"),
            }
        })
    }
}
