/// Validation failures raised while converting a wire-level metric into a
/// typed record.
///
/// The `Display` text of every variant except `MissingName` is the exact
/// body the collector answers with, so it must stay stable.
///
/// # Examples
///
/// ```rust
/// use telemon_common::error::MetricError;
///
/// let err = MetricError::NotFloat { value: "preved".to_string() };
/// assert_eq!(err.to_string(), "not float");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricError {
    /// A gauge value that does not parse as a finite floating point number,
    /// or a gauge submitted without a value.
    #[error("not float")]
    NotFloat { value: String },

    /// A counter value that does not parse as a signed 64-bit integer, or a
    /// counter submitted without a delta.
    #[error("not integer")]
    NotInteger { value: String },

    /// A metric kind other than `gauge` or `counter`.
    #[error("not supported")]
    NotSupportedKind { kind: String },

    /// The metric name (JSON `id`) is empty.
    #[error("metric name is required")]
    MissingName,

    /// A counter delta that would take the stored total past the `i64` range.
    #[error("counter overflow")]
    CounterOverflow,
}

/// Convenience `Result` alias for metric validation.
pub type Result<T> = std::result::Result<T, MetricError>;
