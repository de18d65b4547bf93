//! Aggregation state for one flush epoch.
//!
//! A [`Metric`] is the in-memory accumulator of a single identity -- a
//! `(name, tag set)` pair -- between two flush snapshots. An epoch begins
//! empty and accumulates until the snapshot, after which the accumulator is
//! rendered into its wire shape and discarded.
//!
//! # Semantics
//!
//! The update rule depends on the class:
//!
//! * `Count` and `Rate` sum: `update(v)` performs `value += v`. Summation is
//!   commutative over the epoch, so dispatch order across identities does not
//!   matter.
//! * `Gauge` overwrites: `update(v)` performs `value = v`. Overwrite does not
//!   commute, which is why every update of one name must be serialized by a
//!   single worker -- "last" is then the last dispatched update.
//!
//! At render time `Count` and `Gauge` emit the accumulated value as-is while
//! `Rate` divides by the elapsed interval in seconds. The interval is
//! strictly positive: the pipeline initializes its flush clock at startup and
//! measures every epoch against the previous snapshot.

use std::time::Duration;

use consign_client::{MetricClass, Series};

use crate::key;

/// In-memory aggregation state of one metric identity during one flush
/// epoch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Metric {
    name: String,
    tags: Vec<String>,
    class: MetricClass,
    value: f64,
}

impl Metric {
    pub(crate) fn new(name: String, class: MetricClass, value: f64, tags: Vec<String>) -> Self {
        Self {
            name,
            tags,
            class,
            value,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn value(&self) -> f64 {
        self.value
    }

    /// The identity key of this accumulator. Sorts the tag list in place, so
    /// a stored accumulator always carries sorted tags.
    pub(crate) fn identity_key(&mut self) -> String {
        key::identity_key(&self.name, &mut self.tags)
    }

    /// Fold a later update into this accumulator per its class rule.
    pub(crate) fn update(&mut self, value: f64) {
        match self.class {
            MetricClass::Count | MetricClass::Rate => self.value += value,
            MetricClass::Gauge => self.value = value,
        }
    }

    /// Render into the outbound wire shape.
    ///
    /// The name gains the namespace prefix, the host is filled from the
    /// configured default and the global tags are merged into the call-site
    /// tags with duplicates dropped.
    pub(crate) fn render(
        self,
        namespace: &str,
        host: &str,
        global_tags: &[String],
        elapsed: Duration,
        timestamp: u64,
    ) -> Series {
        let value = match self.class {
            MetricClass::Count | MetricClass::Gauge => self.value,
            MetricClass::Rate => self.value / elapsed.as_secs_f64(),
        };

        Series {
            metric: key::prepend_namespace(namespace, &self.name),
            host: if host.is_empty() {
                None
            } else {
                Some(host.to_string())
            },
            tags: key::combine_tags(global_tags, &self.tags),
            class: self.class,
            value,
            timestamp,
        }
    }
}
