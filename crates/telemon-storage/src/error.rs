use telemon_common::error::MetricError;
use telemon_common::types::MetricKind;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use telemon_common::types::MetricKind;
/// use telemon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     kind: MetricKind::Gauge,
///     name: "Alloc".to_string(),
/// };
/// assert!(err.to_string().contains("gauge/Alloc"));
/// assert!(err.is_not_found());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No record exists under the requested `(kind, name)` key.
    #[error("Storage: metric {kind}/{name} not found")]
    NotFound { kind: MetricKind, name: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization failure while writing a snapshot.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure while writing or reading a snapshot stream.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot that is not a JSON array of valid metrics.
    #[error("Storage: malformed snapshot: {0}")]
    Snapshot(String),

    /// The DSN scheme does not name a known backend.
    #[error("Storage: unsupported DSN '{dsn}'")]
    UnsupportedDsn { dsn: String },

    /// A row whose columns do not match its kind.
    #[error("Storage: unexpected value in column '{column}': expected {expected}")]
    UnexpectedColumnType {
        column: &'static str,
        expected: &'static str,
    },

    #[error("Storage: {0}")]
    Metric(#[from] MetricError),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
