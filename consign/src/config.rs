//! Configuration of the pipeline.
//!
//! A [`Config`] can be assembled three ways: deserialized from a
//! configuration file, built up with the `with_*` methods, or loaded from
//! `CONSIGN_*` environment variables. Validation happens at pipeline
//! construction, not here, so a partially built config is always
//! representable.

use std::time::Duration;

use serde::Deserialize;

/// Errors produced by [`Config`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An environment variable held a value that does not parse as an
    /// integer.
    #[error("invalid value in {var}: {source}")]
    InvalidEnv {
        /// Name of the offending variable.
        var: &'static str,
        /// Underlying parse failure.
        #[source]
        source: std::num::ParseIntError,
    },
    /// The worker pool cannot be empty.
    #[error("worker_count must be greater than zero")]
    ZeroWorkers,
    /// Job queues cannot have zero capacity.
    #[error("worker_buffer and metric_buffer must be greater than zero")]
    ZeroBuffer,
    /// The periodic flush cadence cannot be zero.
    #[error("flush_interval_seconds must be greater than zero")]
    ZeroFlushInterval,
}

fn default_flush_interval_seconds() -> u64 {
    15
}

fn default_worker_count() -> usize {
    4
}

fn default_worker_buffer() -> usize {
    100
}

fn default_metric_buffer() -> usize {
    1_000
}

fn default_max_errors() -> usize {
    100
}

fn default_endpoint() -> String {
    consign_client::http::DEFAULT_ENDPOINT.to_string()
}

/// Main configuration of the pipeline.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Prefix applied to every metric, check and event name that does not
    /// already carry it.
    #[serde(default)]
    pub namespace: String,
    /// Default host attached to outbound entries that carry none.
    #[serde(default)]
    pub host: String,
    /// Tags merged into every outbound entry.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Cadence of periodic flushes, in seconds.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
    /// Number of workers, equally the number of accumulator shards.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Capacity of each worker's private job queue.
    #[serde(default = "default_worker_buffer")]
    pub worker_buffer: usize,
    /// Capacity of the top-level job queue. Once full, updates are dropped
    /// and counted.
    #[serde(default = "default_metric_buffer")]
    pub metric_buffer: usize,
    /// Number of delivery errors retained for inspection, oldest evicted
    /// first.
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
    /// Backend endpoint, without trailing slash.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Api key used to construct the default HTTP client.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            host: String::new(),
            tags: Vec::new(),
            flush_interval_seconds: default_flush_interval_seconds(),
            worker_count: default_worker_count(),
            worker_buffer: default_worker_buffer(),
            metric_buffer: default_metric_buffer(),
            max_errors: default_max_errors(),
            endpoint: default_endpoint(),
            api_key: None,
        }
    }
}

impl Config {
    /// Create a [`Config`] with every field at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `CONSIGN_*` environment variables.
    ///
    /// Unset variables keep their defaults. `CONSIGN_TAGS` is parsed as a
    /// comma-separated list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnv`] when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(namespace) = lookup("CONSIGN_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(host) = lookup("CONSIGN_HOST") {
            config.host = host;
        }
        if let Some(tags) = lookup("CONSIGN_TAGS") {
            config.tags = tags
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(endpoint) = lookup("CONSIGN_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(api_key) = lookup("CONSIGN_API_KEY") {
            config.api_key = Some(api_key);
        }

        config.flush_interval_seconds = parse_var(
            &lookup,
            "CONSIGN_FLUSH_INTERVAL_SECONDS",
            config.flush_interval_seconds,
        )?;
        config.worker_count = parse_var(&lookup, "CONSIGN_WORKER_COUNT", config.worker_count)?;
        config.worker_buffer = parse_var(&lookup, "CONSIGN_WORKER_BUFFER", config.worker_buffer)?;
        config.metric_buffer = parse_var(&lookup, "CONSIGN_METRIC_BUFFER", config.metric_buffer)?;
        config.max_errors = parse_var(&lookup, "CONSIGN_MAX_ERRORS", config.max_errors)?;

        Ok(config)
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the default host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the global tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the api key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the backend endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the periodic flush cadence, in seconds.
    #[must_use]
    pub fn with_flush_interval_seconds(mut self, seconds: u64) -> Self {
        self.flush_interval_seconds = seconds;
        self
    }

    /// Set the worker pool size.
    #[must_use]
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Set the per-worker queue capacity.
    #[must_use]
    pub fn with_worker_buffer(mut self, capacity: usize) -> Self {
        self.worker_buffer = capacity;
        self
    }

    /// Set the top-level queue capacity.
    #[must_use]
    pub fn with_metric_buffer(mut self, capacity: usize) -> Self {
        self.metric_buffer = capacity;
        self
    }

    /// Set the number of retained delivery errors.
    #[must_use]
    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Check the configuration for values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero worker count, zero queue capacity or zero
    /// flush interval.
    pub fn validate(&self) -> Result<(), Error> {
        if self.worker_count == 0 {
            return Err(Error::ZeroWorkers);
        }
        if self.worker_buffer == 0 || self.metric_buffer == 0 {
            return Err(Error::ZeroBuffer);
        }
        if self.flush_interval_seconds == 0 {
            return Err(Error::ZeroFlushInterval);
        }
        Ok(())
    }

    pub(crate) fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }
}

fn parse_var<T>(
    lookup: impl Fn(&str) -> Option<String>,
    var: &'static str,
    current: T,
) -> Result<T, Error>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|source| Error::InvalidEnv { var, source }),
        None => Ok(current),
    }
}
