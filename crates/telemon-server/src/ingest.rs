//! Transport-independent ingestion: validation, merge-aware writes, lookups.
//!
//! The HTTP handlers and the gRPC service are thin adapters over
//! [`IngestService`].

use crate::persistence::PersistenceScheduler;
use crate::subnet::TrustedSubnets;
use std::net::IpAddr;
use std::sync::Arc;
use telemon_common::error::MetricError;
use telemon_common::types::{MetricKind, MetricRecord, NormalizedMetric, StructuredMetric};
use telemon_storage::{StorageEngine, StorageError};

/// Ingestion failures, each mapped to one client-visible status.
///
/// # Examples
///
/// ```rust
/// use telemon_common::error::MetricError;
/// use telemon_server::ingest::IngestError;
///
/// let err = IngestError::from(MetricError::NotInteger { value: "10.55".into() });
/// assert_eq!(err.to_string(), "not integer");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The metric failed validation; the message is the client-facing body.
    #[error(transparent)]
    BadRequest(MetricError),

    /// Unknown metric, or a metric without a name.
    #[error("not found")]
    NotFound,

    /// The storage backend failed; details are logged, never returned.
    #[error("internal error")]
    Internal(#[source] StorageError),

    /// The source address is outside the trusted subnets.
    #[error("forbidden")]
    Forbidden,
}

impl From<MetricError> for IngestError {
    fn from(e: MetricError) -> Self {
        match e {
            MetricError::MissingName => IngestError::NotFound,
            other => IngestError::BadRequest(other),
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => IngestError::NotFound,
            StorageError::Metric(MetricError::CounterOverflow) => {
                IngestError::BadRequest(MetricError::CounterOverflow)
            }
            other => {
                tracing::error!(error = %other, "Storage operation failed");
                IngestError::Internal(other)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

pub struct IngestService {
    storage: Arc<dyn StorageEngine>,
    persistence: Option<Arc<PersistenceScheduler>>,
    trusted: TrustedSubnets,
}

impl IngestService {
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        persistence: Option<Arc<PersistenceScheduler>>,
        trusted: TrustedSubnets,
    ) -> Self {
        Self {
            storage,
            persistence,
            trusted,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    /// Rejects sources outside the trusted subnets.
    pub fn authorize(&self, source: Option<IpAddr>) -> Result<()> {
        if self.trusted.admits(source) {
            Ok(())
        } else {
            tracing::warn!(source = ?source, "Rejected update from untrusted source");
            Err(IngestError::Forbidden)
        }
    }

    fn written(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.after_write();
        }
    }

    /// Path-encoded update: `kind`, `name` and `value` as raw strings.
    pub fn update_path(&self, kind: &str, name: &str, value: &str) -> Result<MetricRecord> {
        let record = NormalizedMetric::parse(kind, name, value)?;
        let merged = self.storage.upsert(&record)?;
        self.written();
        Ok(merged)
    }

    /// Single structured update; echoes the value stored after the merge.
    pub fn update_one(&self, metric: &StructuredMetric) -> Result<StructuredMetric> {
        let record = metric.to_record()?;
        let merged = self.storage.upsert(&record)?;
        self.written();
        Ok(StructuredMetric::from(&merged))
    }

    /// Batch update. Every element is validated before anything is written,
    /// so one bad element rejects the whole batch.
    pub fn update_batch(&self, metrics: &[StructuredMetric]) -> Result<usize> {
        let records = metrics
            .iter()
            .map(StructuredMetric::to_record)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if records.is_empty() {
            return Ok(0);
        }
        self.storage.mass_upsert(&records)?;
        self.written();
        tracing::debug!(count = records.len(), "Batch ingested");
        Ok(records.len())
    }

    /// Lookup by raw kind string, as used by the HTTP API.
    pub fn value(&self, kind: &str, name: &str) -> Result<MetricRecord> {
        let kind: MetricKind = kind.parse()?;
        self.lookup(kind, name)
    }

    /// Lookup by the `{id, type}` of a structured request.
    pub fn value_of(&self, metric: &StructuredMetric) -> Result<StructuredMetric> {
        let record = self.value(&metric.kind, &metric.id)?;
        Ok(StructuredMetric::from(&record))
    }

    pub fn lookup(&self, kind: MetricKind, name: &str) -> Result<MetricRecord> {
        if name.is_empty() {
            return Err(IngestError::NotFound);
        }
        Ok(self.storage.get(kind, name)?)
    }

    pub fn all(&self) -> Result<Vec<MetricRecord>> {
        Ok(self.storage.get_all()?)
    }

    pub fn ping(&self) -> Result<()> {
        Ok(self.storage.ping()?)
    }
}
