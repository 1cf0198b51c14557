//! Metric storage for the telemon collector.
//!
//! Two backends implement [`StorageEngine`]: [`memory::MemoryStorageEngine`]
//! keeps everything in a lock-guarded map, [`engine::SqliteStorageEngine`]
//! stores one row per metric in SQLite. [`open_storage`] picks one from a DSN.
//! Both merge writes per kind: counters accumulate deltas, gauges keep the
//! last value applied. Snapshot loads bypass the merge and set each value.

pub mod engine;
pub mod error;
pub mod memory;


use std::io::{Read, Write};
use std::sync::Arc;
use telemon_common::types::{MetricKind, MetricRecord, NormalizedMetric};

pub use engine::SqliteStorageEngine;
pub use error::{Result, StorageError};
pub use memory::MemoryStorageEngine;

/// Persistence backend for metric records.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because the HTTP handlers, the gRPC service and the snapshot task all
/// reach storage concurrently.
pub trait StorageEngine: Send + Sync {
    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;

    /// Prepares the backend (creates tables and so on). Idempotent.
    fn init(&self) -> Result<()>;

    /// Releases what the backend can release before process exit.
    fn close(&self) -> Result<()>;

    /// Liveness check.
    fn ping(&self) -> Result<()>;

    /// Merges one record and returns the stored value after the merge.
    fn upsert(&self, record: &MetricRecord) -> Result<MetricRecord>;

    /// Merges all records or none of them. A counter that would overflow
    /// fails the whole batch with [`StorageError::Metric`].
    fn mass_upsert(&self, records: &[MetricRecord]) -> Result<()>;

    /// Sets every record to the given value, counters included, all or none.
    /// Keys not named in `records` are left untouched.
    fn replace_all(&self, records: &[MetricRecord]) -> Result<()>;

    /// Point lookup; [`StorageError::NotFound`] when the key is unknown.
    fn get(&self, kind: MetricKind, name: &str) -> Result<MetricRecord>;

    /// Every stored record, ordered by kind then name.
    fn get_all(&self) -> Result<Vec<MetricRecord>>;

    /// Writes all records as a JSON array of [`NormalizedMetric`]. Returns the
    /// number of records written.
    fn flush(&self, writer: &mut dyn Write) -> Result<usize> {
        let snapshot: Vec<NormalizedMetric> =
            self.get_all()?.iter().map(NormalizedMetric::from).collect();
        serde_json::to_writer(&mut *writer, &snapshot)?;
        writer.flush()?;
        Ok(snapshot.len())
    }

    /// Applies a snapshot written by [`StorageEngine::flush`] with
    /// [`StorageEngine::replace_all`], so loading the same snapshot twice
    /// leaves the same totals. Returns the number of records applied.
    fn load(&self, reader: &mut dyn Read) -> Result<usize> {
        let snapshot: Vec<NormalizedMetric> =
            serde_json::from_reader(reader).map_err(|e| StorageError::Snapshot(e.to_string()))?;
        let records = snapshot
            .iter()
            .map(NormalizedMetric::to_record)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Snapshot(e.to_string()))?;
        self.replace_all(&records)?;
        Ok(records.len())
    }
}

/// Opens and initializes the backend named by `dsn`.
///
/// | DSN                               | backend   |
/// |-----------------------------------|-----------|
/// | `""`, `memory://`                 | in-memory |
/// | `sqlite://<path>`                 | SQLite file |
/// | `sqlite://:memory:`               | SQLite, in-memory |
///
/// # Examples
///
/// ```
/// let storage = telemon_storage::open_storage("memory://").unwrap();
/// assert_eq!(storage.backend(), "memory");
/// assert!(telemon_storage::open_storage("postgres://db").is_err());
/// ```
pub fn open_storage(dsn: &str) -> Result<Arc<dyn StorageEngine>> {
    let dsn = dsn.trim();
    let engine: Arc<dyn StorageEngine> = match dsn.split_once("://") {
        None if dsn.is_empty() => Arc::new(MemoryStorageEngine::new()),
        Some(("memory", _)) => Arc::new(MemoryStorageEngine::new()),
        Some(("sqlite", path)) if !path.is_empty() => Arc::new(SqliteStorageEngine::open(path)?),
        _ => {
            return Err(StorageError::UnsupportedDsn {
                dsn: dsn.to_string(),
            })
        }
    };
    engine.init()?;
    tracing::info!(backend = engine.backend(), "Storage engine ready");
    Ok(engine)
}
