//! Wire shapes accepted by the telemetry backend.
//!
//! These types are built at render or submission time and serialized directly
//! into request bodies. Nothing here aggregates; values carried are final.

use serde::{Deserialize, Serialize};

/// Classification of a metric series.
///
/// The class decides how the backend interprets the value: a `Count` is a sum
/// over the flush interval, a `Rate` is a per-second figure and a `Gauge` is a
/// point-in-time reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricClass {
    /// Sum of all values recorded during the flush interval.
    Count,
    /// Sum of all values divided by the elapsed interval in seconds.
    Rate,
    /// The last value recorded before the flush snapshot.
    Gauge,
}

/// One rendered metric series entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Series {
    /// Metric name. Namespace-prefixed before delivery.
    pub metric: String,
    /// Originating host. Filled with the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Tags attached to this series.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Aggregation class of the series.
    #[serde(rename = "type")]
    pub class: MetricClass,
    /// The rendered value.
    pub value: f64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

impl Series {
    /// Create a new [`Series`] with no host and no tags.
    #[must_use]
    pub fn new(metric: impl Into<String>, class: MetricClass, value: f64, timestamp: u64) -> Self {
        Self {
            metric: metric.into(),
            host: None,
            tags: Vec::new(),
            class,
            value,
            timestamp,
        }
    }

    /// Set the originating host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the tags of this series.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Status codes of a [`ServiceCheck`], serialized as the conventional
/// integers: 0 ok, 1 warning, 2 critical, 3 unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// The checked service operates normally.
    Ok,
    /// The checked service is degraded.
    Warning,
    /// The checked service is down.
    Critical,
    /// The state of the checked service cannot be determined.
    Unknown,
}

impl CheckStatus {
    /// The wire code of this status.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            CheckStatus::Ok => 0,
            CheckStatus::Warning => 1,
            CheckStatus::Critical => 2,
            CheckStatus::Unknown => 3,
        }
    }
}

impl Serialize for CheckStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for CheckStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match u8::deserialize(deserializer)? {
            0 => Ok(CheckStatus::Ok),
            1 => Ok(CheckStatus::Warning),
            2 => Ok(CheckStatus::Critical),
            3 => Ok(CheckStatus::Unknown),
            code => Err(serde::de::Error::custom(format!(
                "invalid check status code: {code}"
            ))),
        }
    }
}

/// One service check submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceCheck {
    /// Name of the check. Namespace-prefixed before delivery.
    pub check: String,
    /// Host the check reports on.
    pub hostname: String,
    /// Free-form message attached to the check.
    pub message: String,
    /// Status reported by the check.
    pub status: CheckStatus,
    /// Tags attached to the check.
    pub tags: Vec<String>,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

/// Priority of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// Default priority.
    Normal,
    /// Reduced visibility.
    Low,
}

/// Alert classification of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAlertType {
    /// Something failed.
    Error,
    /// Something is degraded.
    Warning,
    /// Purely informational.
    Info,
    /// Something recovered or completed.
    Success,
}

/// One event submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    /// Event title.
    pub title: String,
    /// Event body text.
    pub text: String,
    /// Host the event relates to. Filled with the configured default when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Key used by the backend to group related events. Namespace-prefixed
    /// before delivery when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_key: Option<String>,
    /// Display priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<EventPriority>,
    /// Alert classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<EventAlertType>,
    /// Tags attached to the event.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix timestamp in seconds. Filled at submission time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_happened: Option<u64>,
}

impl Event {
    /// Create a new [`Event`] with only a title and body.
    #[must_use]
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            host: None,
            aggregation_key: None,
            priority: None,
            alert_type: None,
            tags: Vec::new(),
            date_happened: None,
        }
    }
}
