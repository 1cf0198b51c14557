use crate::error::{MetricError, Result};
use crate::proto;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimals a gauge is rendered with.
const GAUGE_PRECISION: usize = 3;

/// The two metric kinds the pipeline understands.
///
/// # Examples
///
/// ```
/// use telemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("preved".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }

    /// Maps the gRPC enum discriminant onto a kind.
    pub fn from_proto(value: i32) -> Result<Self> {
        match proto::MetricType::try_from(value) {
            Ok(proto::MetricType::Gauge) => Ok(MetricKind::Gauge),
            Ok(proto::MetricType::Counter) => Ok(MetricKind::Counter),
            _ => Err(MetricError::NotSupportedKind {
                kind: value.to_string(),
            }),
        }
    }

    pub fn to_proto(self) -> proto::MetricType {
        match self {
            MetricKind::Gauge => proto::MetricType::Gauge,
            MetricKind::Counter => proto::MetricType::Counter,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(MetricError::NotSupportedKind {
                kind: s.to_string(),
            }),
        }
    }
}

/// A typed metric value; the variant doubles as the metric kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Applies `incoming` on top of `self` following the kind's merge rule:
    /// counters add, gauges take the incoming value.
    ///
    /// A kind mismatch cannot happen for records sharing a storage key, but
    /// is resolved in favour of `incoming`. A counter sum outside the `i64`
    /// range is [`MetricError::CounterOverflow`].
    pub fn merge(self, incoming: MetricValue) -> Result<MetricValue> {
        match (self, incoming) {
            (MetricValue::Counter(old), MetricValue::Counter(delta)) => old
                .checked_add(delta)
                .map(MetricValue::Counter)
                .ok_or(MetricError::CounterOverflow),
            (_, incoming) => Ok(incoming),
        }
    }

    /// Human-facing rendering: gauges rounded to three decimals with trailing
    /// zeros trimmed, counters as plain integers.
    pub fn render(&self) -> String {
        match self {
            MetricValue::Gauge(v) => format_gauge(*v),
            MetricValue::Counter(v) => v.to_string(),
        }
    }

    /// Lossless rendering used on the wire and in snapshots.
    pub fn encode(&self) -> String {
        match self {
            MetricValue::Gauge(v) => v.to_string(),
            MetricValue::Counter(v) => v.to_string(),
        }
    }
}

/// A validated metric as held by storage, keyed by `(kind, name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub value: MetricValue,
}

impl MetricRecord {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Path-encoded form used by `POST /update/{kind}/{name}/{value}`.
    pub fn update_path(&self) -> String {
        format!("update/{}/{}/{}", self.kind(), self.name, self.value.encode())
    }
}

/// Canonical string-valued form used for path-encoded updates and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMetric {
    pub kind: MetricKind,
    pub name: String,
    pub value: String,
}

impl NormalizedMetric {
    /// Validates raw path segments into a record. The kind is checked first,
    /// then the value against the kind.
    pub fn parse(kind: &str, name: &str, value: &str) -> Result<MetricRecord> {
        let kind: MetricKind = kind.parse()?;
        Self {
            kind,
            name: name.to_string(),
            value: value.to_string(),
        }
        .to_record()
    }

    pub fn to_record(&self) -> Result<MetricRecord> {
        if self.name.is_empty() {
            return Err(MetricError::MissingName);
        }
        let value = match self.kind {
            MetricKind::Gauge => MetricValue::Gauge(parse_gauge(&self.value)?),
            MetricKind::Counter => MetricValue::Counter(parse_counter(&self.value)?),
        };
        Ok(MetricRecord {
            name: self.name.clone(),
            value,
        })
    }
}

impl From<&MetricRecord> for NormalizedMetric {
    fn from(record: &MetricRecord) -> Self {
        Self {
            kind: record.kind(),
            name: record.name.clone(),
            value: record.value.encode(),
        }
    }
}

/// JSON form accepted by `/update/`, `/updates/` and `/value/`.
///
/// `type` stays a raw string so that an unknown kind is reported as
/// `not supported` instead of a generic decode failure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructuredMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl StructuredMetric {
    /// Validates the metric; the field matching `type` must be present.
    pub fn to_record(&self) -> Result<MetricRecord> {
        let kind = self.metric_kind()?;
        if self.id.is_empty() {
            return Err(MetricError::MissingName);
        }
        let value = match kind {
            MetricKind::Gauge => match self.value {
                Some(v) if v.is_finite() => MetricValue::Gauge(v),
                other => {
                    return Err(MetricError::NotFloat {
                        value: format!("{other:?}"),
                    })
                }
            },
            MetricKind::Counter => match self.delta {
                Some(d) => MetricValue::Counter(d),
                None => {
                    return Err(MetricError::NotInteger {
                        value: "None".to_string(),
                    })
                }
            },
        };
        Ok(MetricRecord {
            name: self.id.clone(),
            value,
        })
    }

    pub fn metric_kind(&self) -> Result<MetricKind> {
        self.kind.parse()
    }
}

impl From<&MetricRecord> for StructuredMetric {
    fn from(record: &MetricRecord) -> Self {
        let (delta, value) = match record.value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };
        Self {
            id: record.name.clone(),
            kind: record.kind().to_string(),
            delta,
            value,
        }
    }
}

impl From<proto::Metric> for StructuredMetric {
    fn from(metric: proto::Metric) -> Self {
        let kind = match MetricKind::from_proto(metric.r#type) {
            Ok(kind) => kind.to_string(),
            Err(_) => format!("type#{}", metric.r#type),
        };
        Self {
            id: metric.id,
            kind,
            delta: metric.delta,
            value: metric.value,
        }
    }
}

impl From<&MetricRecord> for proto::Metric {
    fn from(record: &MetricRecord) -> Self {
        let (delta, value) = match record.value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };
        Self {
            id: record.name.clone(),
            r#type: record.kind().to_proto() as i32,
            delta,
            value,
        }
    }
}

fn parse_gauge(raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(MetricError::NotFloat {
            value: raw.to_string(),
        }),
    }
}

fn parse_counter(raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|_| MetricError::NotInteger {
        value: raw.to_string(),
    })
}

/// Renders a gauge with at most three decimals.
///
/// Rounding is half away from zero and works on the shortest decimal
/// representation of `value`, so `10.9005` renders as `10.901` even though
/// the nearest binary double sits slightly below the midpoint.
///
/// # Examples
///
/// ```
/// use telemon_common::types::format_gauge;
///
/// assert_eq!(format_gauge(10.9005), "10.901");
/// assert_eq!(format_gauge(3.0), "3");
/// assert_eq!(format_gauge(-0.0004), "0");
/// assert_eq!(format_gauge(9.9996), "10");
/// ```
pub fn format_gauge(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let repr = value.to_string();
    let (negative, digits) = match repr.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, repr.as_str()),
    };
    let Some((int_part, frac_part)) = digits.split_once('.') else {
        // Integral, NaN or infinite: nothing to round.
        return repr;
    };

    let mut kept: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().take(GAUGE_PRECISION))
        .collect();
    let frac_len = frac_part.len().min(GAUGE_PRECISION);

    if frac_part.len() > GAUGE_PRECISION && frac_part.as_bytes()[GAUGE_PRECISION] >= b'5' {
        let mut i = kept.len();
        loop {
            if i == 0 {
                kept.insert(0, b'1');
                break;
            }
            i -= 1;
            if kept[i] == b'9' {
                kept[i] = b'0';
            } else {
                kept[i] += 1;
                break;
            }
        }
    }

    let split = kept.len() - frac_len;
    let int_digits = String::from_utf8_lossy(&kept[..split]);
    let frac_digits = String::from_utf8_lossy(&kept[split..]);
    let frac_digits = frac_digits.trim_end_matches('0');

    let mut out = String::with_capacity(kept.len() + 2);
    let is_zero = int_digits.bytes().all(|b| b == b'0') && frac_digits.is_empty();
    if negative && !is_zero {
        out.push('-');
    }
    out.push_str(&int_digits);
    if !frac_digits.is_empty() {
        out.push('.');
        out.push_str(frac_digits);
    }
    out
}
