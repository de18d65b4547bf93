//! The aggregation and dispatch pipeline.
//!
//! One control task owns the top-level job queue, the shard array and all
//! flush bookkeeping. Metric jobs fan out by name hash to a pool of workers,
//! each the only writer of its shard of accumulators. Flush jobs snapshot
//! every shard and hand the batch to an asynchronous sender; shutdown jobs
//! drain the whole pipeline and terminate it.
//!
//! Two gates coordinate the fan-out. The ingest gate counts metric jobs
//! dispatched to workers but not yet applied: a snapshot may only be taken
//! once it settles, which is what makes the snapshot consistent without a
//! global lock. The send gate counts in-flight deliveries: explicit flushes
//! and shutdown wait on it, ingestion never does.

use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use consign_client::{ApiClient, CheckStatus, Event, HttpClient, MetricClass, Series, ServiceCheck};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::accumulator::Metric;
use crate::config::Config;
use crate::gate::Gate;
use crate::key;

/// Callback invoked with every attempted batch after a flush.
pub type FlushCallback = Box<dyn Fn(&[Series]) + Send + Sync>;

/// Callback invoked when a delivery fails, with the error and the attempted
/// batch.
pub type ErrorCallback = Box<dyn Fn(&consign_client::Error, &[Series]) + Send + Sync>;

/// Errors produced by [`Stats`] construction.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Neither an api key nor a prebuilt client was supplied.
    #[error("no client configured")]
    NoClient,
    /// The configuration failed validation.
    #[error("config error: {0}")]
    Config(#[from] crate::config::Error),
}

/// Jobs consumed by the control task.
enum Job {
    Metric(Metric),
    Flush,
    Shutdown,
}

/// Jobs consumed by one worker.
enum WorkerJob {
    Metric(Metric),
    Stop,
}

type Shard = FxHashMap<String, Metric>;

/// Bounded FIFO of delivery errors.
struct ErrorRing {
    entries: VecDeque<Arc<consign_client::Error>>,
    capacity: usize,
}

impl ErrorRing {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, error: Arc<consign_client::Error>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(error);
    }

    fn snapshot(&self) -> Vec<Arc<consign_client::Error>> {
        self.entries.iter().cloned().collect()
    }
}

/// State shared between the pipeline handle, the control task and the
/// per-flush sender tasks.
struct Inner {
    namespace: String,
    host: String,
    tags: Vec<String>,
    client: Arc<dyn ApiClient>,
    queued: Mutex<Vec<Series>>,
    errors: Mutex<ErrorRing>,
    dropped: AtomicU64,
    flush_callback: Mutex<Option<FlushCallback>>,
    error_callback: Mutex<Option<ErrorCallback>>,
}

impl Inner {
    /// Fill the default host, prefix the namespace and merge the global tags
    /// into a prebuilt series.
    fn normalize(&self, mut series: Series) -> Series {
        if series.host.is_none() && !self.host.is_empty() {
            series.host = Some(self.host.clone());
        }
        series.metric = key::prepend_namespace(&self.namespace, &series.metric);
        series.tags = key::combine_tags(&self.tags, &series.tags);
        series
    }

    /// Render one flush snapshot and deliver it, together with any queued
    /// series, to the backend.
    async fn send(&self, snapshot: Shard, elapsed: Duration) {
        let queued: Vec<Series> = mem::take(&mut *self.queued.lock().expect("lock poisoned"));
        if snapshot.is_empty() && queued.is_empty() {
            return;
        }

        let timestamp = unix_now();
        let mut batch = Vec::with_capacity(queued.len() + snapshot.len());
        batch.extend(queued);
        for metric in snapshot.into_values() {
            batch.push(metric.render(&self.namespace, &self.host, &self.tags, elapsed, timestamp));
        }

        debug!(series = batch.len(), "delivering flush batch");
        if let Err(error) = self.client.send_series(&batch).await {
            warn!("failed to deliver batch of {len} series: {error}", len = batch.len());
            let error = Arc::new(error);
            self.errors
                .lock()
                .expect("lock poisoned")
                .push(Arc::clone(&error));
            if let Some(callback) = self.error_callback.lock().expect("lock poisoned").as_ref() {
                callback(&error, &batch);
            }
        }

        if let Some(callback) = self.flush_callback.lock().expect("lock poisoned").as_ref() {
            callback(&batch);
        }
    }
}

/// Sequential processor of one shard's job queue.
///
/// The worker is the only writer of its shard; the control task reads the
/// shard only after the ingest gate settles, so the lock is uncontended.
async fn worker(mut jobs: mpsc::Receiver<WorkerJob>, shard: Arc<Mutex<Shard>>, gate: Arc<Gate>) {
    while let Some(job) = jobs.recv().await {
        match job {
            WorkerJob::Stop => {
                gate.done();
                return;
            }
            WorkerJob::Metric(mut metric) => {
                let identity = metric.identity_key();
                {
                    let mut shard = shard.lock().expect("lock poisoned");
                    match shard.entry(identity) {
                        Entry::Occupied(mut entry) => entry.get_mut().update(metric.value()),
                        Entry::Vacant(entry) => {
                            entry.insert(metric);
                        }
                    }
                }
                gate.done();
            }
        }
    }
}

/// Emit a flush job on every interval tick until told to stop.
async fn ticker(
    interval: Duration,
    jobs: mpsc::Sender<Job>,
    send_gate: Arc<Gate>,
    mut stop: oneshot::Receiver<()>,
) {
    // The first tick fires one full interval after startup, not immediately.
    let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                send_gate.add(1);
                if jobs.send(Job::Flush).await.is_err() {
                    send_gate.done();
                    return;
                }
            }
            _ = &mut stop => return,
        }
    }
}

/// The control task: single consumer of the top-level job queue.
struct ControlLoop {
    jobs: mpsc::Receiver<Job>,
    workers: Vec<mpsc::Sender<WorkerJob>>,
    shards: Vec<Arc<Mutex<Shard>>>,
    ingest_gate: Arc<Gate>,
    send_gate: Arc<Gate>,
    inner: Arc<Inner>,
    last_flush: Instant,
    ticker_stop: Option<oneshot::Sender<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl ControlLoop {
    async fn run(mut self, ready: oneshot::Sender<()>) {
        // Channels and workers exist before this task is spawned; the ready
        // signal keeps the constructor from returning before the loop
        // consumes jobs, so an early recording call cannot race startup.
        let _ = ready.send(());
        self.last_flush = Instant::now();

        while let Some(job) = self.jobs.recv().await {
            match job {
                Job::Metric(metric) => {
                    self.ingest_gate.add(1);
                    let index = key::shard_index(metric.name(), self.workers.len());
                    if self.workers[index]
                        .send(WorkerJob::Metric(metric))
                        .await
                        .is_err()
                    {
                        // Workers outlive the control task; a closed queue
                        // means the runtime is tearing down. Balance the gate
                        // and move on.
                        self.ingest_gate.done();
                    }
                }
                Job::Flush => self.commit_flush().await,
                Job::Shutdown => {
                    self.shutdown().await;
                    return;
                }
            }
        }
    }

    /// Snapshot every shard and hand the flattened result to an asynchronous
    /// sender.
    ///
    /// Runs only on the control task. No new metric jobs are dispatched while
    /// this waits, so the ingest gate can settle; identities are
    /// shard-disjoint so the merge cannot collide.
    async fn commit_flush(&mut self) {
        self.ingest_gate.settled().await;

        let mut snapshot = Shard::default();
        for shard in &self.shards {
            let drained = mem::take(&mut *shard.lock().expect("lock poisoned"));
            snapshot.extend(drained);
        }

        let elapsed = self.last_flush.elapsed();
        self.last_flush = Instant::now();

        let inner = Arc::clone(&self.inner);
        let send_gate = Arc::clone(&self.send_gate);
        tokio::spawn(async move {
            inner.send(snapshot, elapsed).await;
            send_gate.done();
        });
    }

    async fn shutdown(&mut self) {
        info!("shutdown requested, draining pipeline");
        self.commit_flush().await;

        for worker in &self.workers {
            self.ingest_gate.add(1);
            if worker.send(WorkerJob::Stop).await.is_err() {
                self.ingest_gate.done();
            }
        }

        if let Some(stop) = self.ticker_stop.take() {
            let _ = stop.send(());
        }
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.await;
        }

        // The ticker may have queued a flush between the final commit and its
        // stop signal; that job will never run, so balance the send gate.
        // Buffered metric jobs are dropped, they were never gate-counted.
        while let Ok(job) = self.jobs.try_recv() {
            if matches!(job, Job::Flush) {
                self.send_gate.done();
            }
        }

        self.ingest_gate.settled().await;
        self.send_gate.settled().await;
        info!("pipeline drained");
    }
}

#[allow(missing_debug_implementations)]
/// Handle to the aggregation and delivery pipeline.
///
/// Recording methods never block and never fail: a saturated queue discards
/// the update and increments [`Stats::dropped_metric_count`]. Aggregated
/// state is shipped to the backend on every flush interval, on
/// [`Stats::flush`] and once more during [`Stats::close`].
///
/// Recording after [`Stats::close`] is silently dropped and counted.
pub struct Stats {
    inner: Arc<Inner>,
    jobs: mpsc::Sender<Job>,
    send_gate: Arc<Gate>,
    /// Join handle of the control task; taken by the first `close` call, so
    /// a second call finds `None` and returns immediately.
    control: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Stats {
    /// Create a pipeline whose backend client is built from the configured
    /// api key and endpoint.
    ///
    /// Returns once the pipeline is ready to consume jobs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoClient`] when no api key is configured and
    /// [`Error::Config`] when the configuration fails validation.
    pub async fn new(config: Config) -> Result<Self, Error> {
        let client = match config.api_key.as_deref() {
            Some(api_key) if !api_key.is_empty() => {
                HttpClient::with_endpoint(api_key, config.endpoint.clone())
            }
            _ => return Err(Error::NoClient),
        };
        Self::with_client(config, Arc::new(client)).await
    }

    /// Create a pipeline around a prebuilt backend client. Any configured api
    /// key is ignored: an explicit client takes precedence.
    ///
    /// Returns once the pipeline is ready to consume jobs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration fails validation.
    pub async fn with_client(config: Config, client: Arc<dyn ApiClient>) -> Result<Self, Error> {
        config.validate()?;

        let inner = Arc::new(Inner {
            namespace: config.namespace.clone(),
            host: config.host.clone(),
            tags: config.tags.clone(),
            client,
            queued: Mutex::new(Vec::new()),
            errors: Mutex::new(ErrorRing::new(config.max_errors)),
            dropped: AtomicU64::new(0),
            flush_callback: Mutex::new(None),
            error_callback: Mutex::new(None),
        });
        let ingest_gate = Arc::new(Gate::default());
        let send_gate = Arc::new(Gate::default());

        let (jobs_tx, jobs_rx) = mpsc::channel(config.metric_buffer);

        let mut workers = Vec::with_capacity(config.worker_count);
        let mut shards = Vec::with_capacity(config.worker_count);
        for _ in 0..config.worker_count {
            let (worker_tx, worker_rx) = mpsc::channel(config.worker_buffer);
            let shard = Arc::new(Mutex::new(Shard::default()));
            tokio::spawn(worker(
                worker_rx,
                Arc::clone(&shard),
                Arc::clone(&ingest_gate),
            ));
            workers.push(worker_tx);
            shards.push(shard);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let ticker_handle = tokio::spawn(ticker(
            config.flush_interval(),
            jobs_tx.clone(),
            Arc::clone(&send_gate),
            stop_rx,
        ));

        let (ready_tx, ready_rx) = oneshot::channel();
        let control = ControlLoop {
            jobs: jobs_rx,
            workers,
            shards,
            ingest_gate: Arc::clone(&ingest_gate),
            send_gate: Arc::clone(&send_gate),
            inner: Arc::clone(&inner),
            last_flush: Instant::now(),
            ticker_stop: Some(stop_tx),
            ticker: Some(ticker_handle),
        };
        let control_handle = tokio::spawn(control.run(ready_tx));
        let _ = ready_rx.await;

        Ok(Self {
            inner,
            jobs: jobs_tx,
            send_gate,
            control: tokio::sync::Mutex::new(Some(control_handle)),
        })
    }

    /// Create or add to a count metric. Counts are shipped as the sum of all
    /// values recorded during the flush interval.
    pub fn count(&self, name: impl Into<String>, value: f64, tags: &[&str]) {
        self.enqueue(Metric::new(
            name.into(),
            MetricClass::Count,
            value,
            owned_tags(tags),
        ));
    }

    /// Create or increment a count metric by one.
    pub fn increment(&self, name: impl Into<String>, tags: &[&str]) {
        self.count(name, 1.0, tags);
    }

    /// Create or decrement a count metric by one.
    pub fn decrement(&self, name: impl Into<String>, tags: &[&str]) {
        self.count(name, -1.0, tags);
    }

    /// Create or add to a rate metric. Rates are shipped as the accumulated
    /// sum divided by the seconds elapsed since the previous flush.
    pub fn rate(&self, name: impl Into<String>, value: f64, tags: &[&str]) {
        self.enqueue(Metric::new(
            name.into(),
            MetricClass::Rate,
            value,
            owned_tags(tags),
        ));
    }

    /// Create or increment a rate metric by one.
    pub fn increment_rate(&self, name: impl Into<String>, tags: &[&str]) {
        self.rate(name, 1.0, tags);
    }

    /// Create or decrement a rate metric by one.
    pub fn decrement_rate(&self, name: impl Into<String>, tags: &[&str]) {
        self.rate(name, -1.0, tags);
    }

    /// Create or update a gauge metric. Gauges ship the last value recorded
    /// before the flush snapshot.
    pub fn gauge(&self, name: impl Into<String>, value: f64, tags: &[&str]) {
        self.enqueue(Metric::new(
            name.into(),
            MetricClass::Gauge,
            value,
            owned_tags(tags),
        ));
    }

    fn enqueue(&self, metric: Metric) {
        if self.jobs.try_send(Job::Metric(metric)).is_err() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Immediately deliver a batch of prebuilt series, bypassing aggregation.
    ///
    /// Each entry gets the default host when it carries none, the namespace
    /// prefix and the merged global tags.
    ///
    /// # Errors
    ///
    /// Returns the delivery error from the backend client.
    pub async fn send_series(&self, series: Vec<Series>) -> Result<(), consign_client::Error> {
        let batch: Vec<Series> = series
            .into_iter()
            .map(|entry| self.inner.normalize(entry))
            .collect();
        self.inner.client.send_series(&batch).await
    }

    /// Queue prebuilt series for inclusion in the next flush. Entries are
    /// normalized the same way as [`Stats::send_series`]; no network call
    /// happens now.
    pub fn queue_series(&self, series: Vec<Series>) {
        let mut batch: Vec<Series> = series
            .into_iter()
            .map(|entry| self.inner.normalize(entry))
            .collect();
        self.inner
            .queued
            .lock()
            .expect("lock poisoned")
            .append(&mut batch);
    }

    /// Immediately deliver a service check. The check name gains the
    /// namespace prefix; host, timestamp and global tags are filled in.
    ///
    /// # Errors
    ///
    /// Returns the delivery error from the backend client.
    pub async fn service_check(
        &self,
        check: impl Into<String>,
        message: impl Into<String>,
        status: CheckStatus,
        tags: &[&str],
    ) -> Result<(), consign_client::Error> {
        let check = ServiceCheck {
            check: key::prepend_namespace(&self.inner.namespace, &check.into()),
            hostname: self.inner.host.clone(),
            message: message.into(),
            status,
            tags: key::combine_tags(&self.inner.tags, &owned_tags(tags)),
            timestamp: unix_now(),
        };
        self.inner.client.send_service_check(&check).await
    }

    /// Immediately deliver an event. Host and timestamp are filled when
    /// absent, the aggregation key gains the namespace prefix and the global
    /// tags are merged in.
    ///
    /// # Errors
    ///
    /// Returns the delivery error from the backend client.
    pub async fn event(&self, mut event: Event) -> Result<(), consign_client::Error> {
        if event.host.is_none() && !self.inner.host.is_empty() {
            event.host = Some(self.inner.host.clone());
        }
        if event.date_happened.is_none() {
            event.date_happened = Some(unix_now());
        }
        if let Some(aggregation_key) = event.aggregation_key.take() {
            event.aggregation_key = Some(key::prepend_namespace(
                &self.inner.namespace,
                &aggregation_key,
            ));
        }
        event.tags = key::combine_tags(&self.inner.tags, &event.tags);
        self.inner.client.send_event(&event).await
    }

    /// Snapshot and ship all aggregated state now, blocking until every
    /// in-flight delivery completes.
    pub async fn flush(&self) {
        self.send_gate.add(1);
        if self.jobs.send(Job::Flush).await.is_err() {
            // Pipeline already shut down; nothing will consume the job.
            self.send_gate.done();
            return;
        }
        self.send_gate.settled().await;
    }

    /// Shut the pipeline down: one final flush, then drain every worker and
    /// every pending delivery. Idempotent; a second call returns immediately.
    ///
    /// After this returns the job queue is gone: later recording calls are
    /// dropped and counted, never serviced.
    pub async fn close(&self) {
        let mut control = self.control.lock().await;
        let Some(handle) = control.take() else {
            return;
        };

        self.send_gate.add(1);
        if self.jobs.send(Job::Shutdown).await.is_err() {
            self.send_gate.done();
            return;
        }
        // The control task drains workers, the ticker and all pending sends
        // before it returns.
        let _ = handle.await;
    }

    /// Number of updates discarded because the ingestion queue was
    /// saturated. Monotonically non-decreasing.
    pub fn dropped_metric_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Delivery errors recorded so far, oldest first, capped at the
    /// configured maximum.
    pub fn errors(&self) -> Vec<Arc<consign_client::Error>> {
        self.inner.errors.lock().expect("lock poisoned").snapshot()
    }

    /// Register a callback invoked with every attempted batch after a flush.
    pub fn set_flush_callback(&self, callback: FlushCallback) {
        *self.inner.flush_callback.lock().expect("lock poisoned") = Some(callback);
    }

    /// Register a callback invoked whenever a delivery fails.
    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.inner.error_callback.lock().expect("lock poisoned") = Some(callback);
    }
}

fn owned_tags(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|tag| (*tag).to_string()).collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("UNIX_EPOCH is earlier than the provided time")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    /// Backend double that records everything delivered to it and can be
    /// primed to fail upcoming series deliveries.
    #[derive(Debug, Default)]
    struct RecordingClient {
        batches: Mutex<Vec<Vec<Series>>>,
        checks: Mutex<Vec<ServiceCheck>>,
        events: Mutex<Vec<Event>>,
        fail_statuses: Mutex<VecDeque<u16>>,
    }

    impl RecordingClient {
        fn batches(&self) -> Vec<Vec<Series>> {
            self.batches.lock().expect("lock poisoned").clone()
        }

        fn fail_next(&self, status: u16) {
            self.fail_statuses
                .lock()
                .expect("lock poisoned")
                .push_back(status);
        }
    }

    #[async_trait]
    impl ApiClient for RecordingClient {
        async fn send_series(&self, series: &[Series]) -> Result<(), consign_client::Error> {
            if let Some(status) = self.fail_statuses.lock().expect("lock poisoned").pop_front() {
                return Err(consign_client::Error::Api { status });
            }
            self.batches
                .lock()
                .expect("lock poisoned")
                .push(series.to_vec());
            Ok(())
        }

        async fn send_service_check(
            &self,
            check: &ServiceCheck,
        ) -> Result<(), consign_client::Error> {
            self.checks.lock().expect("lock poisoned").push(check.clone());
            Ok(())
        }

        async fn send_event(&self, event: &Event) -> Result<(), consign_client::Error> {
            self.events.lock().expect("lock poisoned").push(event.clone());
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config::new()
            .with_worker_count(4)
            .with_worker_buffer(16)
            .with_metric_buffer(64)
            .with_max_errors(4)
    }

    async fn recording_stats(config: Config) -> (Stats, Arc<RecordingClient>) {
        let client = Arc::new(RecordingClient::default());
        let stats = Stats::with_client(config, Arc::clone(&client) as Arc<dyn ApiClient>)
            .await
            .expect("construct stats");
        (stats, client)
    }

    fn single_series(client: &RecordingClient) -> Series {
        let batches = client.batches();
        assert_eq!(batches.len(), 1, "expected exactly one batch");
        assert_eq!(batches[0].len(), 1, "expected exactly one series");
        batches[0][0].clone()
    }

    #[test]
    fn error_ring_evicts_oldest_first() {
        let mut ring = ErrorRing::new(2);
        for status in [500, 501, 502] {
            ring.push(Arc::new(consign_client::Error::Api { status }));
        }

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(matches!(*snapshot[0], consign_client::Error::Api { status: 501 }));
        assert!(matches!(*snapshot[1], consign_client::Error::Api { status: 502 }));

        // A zero-capacity ring retains nothing.
        let mut ring = ErrorRing::new(0);
        ring.push(Arc::new(consign_client::Error::Api { status: 500 }));
        assert!(ring.snapshot().is_empty());
    }

    #[tokio::test]
    async fn construction_without_client_fails() {
        assert!(matches!(
            Stats::new(Config::new()).await,
            Err(Error::NoClient)
        ));
        assert!(matches!(
            Stats::new(Config::new().with_api_key("")).await,
            Err(Error::NoClient)
        ));
    }

    #[tokio::test]
    async fn construction_rejects_invalid_config() {
        let client = Arc::new(RecordingClient::default());
        let result =
            Stats::with_client(test_config().with_worker_count(0), client as Arc<dyn ApiClient>)
                .await;

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn counts_aggregate_to_their_sum() {
        let (stats, client) = recording_stats(test_config()).await;

        stats.count("requests", 5.0, &[]);
        stats.count("requests", -2.0, &[]);
        stats.flush().await;

        let series = single_series(&client);
        assert_eq!(series.metric, "requests");
        assert_eq!(series.class, MetricClass::Count);
        assert!((series.value - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn gauges_keep_the_last_value() {
        let (stats, client) = recording_stats(test_config()).await;

        stats.gauge("mem", 10.0, &[]);
        stats.gauge("mem", 42.0, &[]);
        stats.flush().await;

        let series = single_series(&client);
        assert_eq!(series.class, MetricClass::Gauge);
        assert!((series.value - 42.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn tag_order_is_one_identity() {
        let (stats, client) = recording_stats(test_config()).await;

        stats.count("requests", 1.0, &["a", "b"]);
        stats.count("requests", 1.0, &["b", "a"]);
        stats.flush().await;

        let series = single_series(&client);
        assert!((series.value - 2.0).abs() < f64::EPSILON);
        assert_eq!(series.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn distinct_names_are_distinct_series() {
        let (stats, client) = recording_stats(test_config()).await;

        stats.count("requests", 1.0, &["env:prod"]);
        stats.count("responses", 1.0, &["env:prod"]);
        stats.flush().await;

        let batches = client.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rates_divide_by_the_elapsed_interval() {
        let (stats, client) = recording_stats(test_config()).await;

        stats.rate("rps", 30.0, &[]);
        tokio::time::advance(Duration::from_secs(10)).await;
        stats.flush().await;

        let series = single_series(&client);
        assert_eq!(series.class, MetricClass::Rate);
        assert!((series.value - 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn rendering_applies_namespace_host_and_global_tags() {
        let config = test_config()
            .with_namespace("app")
            .with_host("web-1")
            .with_tags(vec!["env:prod".to_string()]);
        let (stats, client) = recording_stats(config).await;

        stats.count("requests", 1.0, &["env:prod", "route:/"]);
        stats.flush().await;

        let series = single_series(&client);
        assert_eq!(series.metric, "app.requests");
        assert_eq!(series.host.as_deref(), Some("web-1"));
        assert_eq!(
            series.tags,
            vec!["env:prod".to_string(), "route:/".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_flush_sends_nothing() {
        let (stats, client) = recording_stats(test_config()).await;

        let called = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&called);
        stats.set_flush_callback(Box::new(move |_batch| {
            observed.fetch_add(1, Ordering::SeqCst);
        }));

        stats.flush().await;

        assert!(client.batches().is_empty());
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn queued_series_ride_the_next_flush() {
        let config = test_config().with_namespace("app").with_host("web-1");
        let (stats, client) = recording_stats(config).await;

        stats.queue_series(vec![Series::new("custom", MetricClass::Count, 7.0, 123)]);
        stats.count("requests", 1.0, &[]);
        stats.flush().await;

        let batches = client.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);

        let custom = batches[0]
            .iter()
            .find(|series| series.metric == "app.custom")
            .expect("queued series present");
        assert_eq!(custom.host.as_deref(), Some("web-1"));
        assert_eq!(custom.timestamp, 123);

        // The queue drained: the next flush carries nothing.
        stats.flush().await;
        assert_eq!(client.batches().len(), 1);
    }

    #[tokio::test]
    async fn queued_series_alone_trigger_delivery() {
        let (stats, client) = recording_stats(test_config()).await;

        stats.queue_series(vec![Series::new("custom", MetricClass::Gauge, 1.0, 5)]);
        stats.flush().await;

        assert_eq!(client.batches().len(), 1);
    }

    #[tokio::test]
    async fn error_ring_keeps_only_the_latest() {
        let (stats, client) = recording_stats(test_config().with_max_errors(1)).await;
        client.fail_next(500);
        client.fail_next(503);

        stats.count("requests", 1.0, &[]);
        stats.flush().await;
        stats.count("requests", 1.0, &[]);
        stats.flush().await;

        let errors = stats.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            *errors[0],
            consign_client::Error::Api { status: 503 }
        ));
    }

    #[tokio::test]
    async fn callbacks_observe_failures_and_batches() {
        let (stats, client) = recording_stats(test_config()).await;
        client.fail_next(500);

        let failures = Arc::new(Mutex::new(Vec::new()));
        let flushes = Arc::new(AtomicU64::new(0));
        {
            let failures = Arc::clone(&failures);
            stats.set_error_callback(Box::new(move |error, batch| {
                failures
                    .lock()
                    .expect("lock poisoned")
                    .push((error.to_string(), batch.len()));
            }));
        }
        {
            let flushes = Arc::clone(&flushes);
            stats.set_flush_callback(Box::new(move |_batch| {
                flushes.fetch_add(1, Ordering::SeqCst);
            }));
        }

        stats.count("requests", 1.0, &[]);
        stats.flush().await;

        let failures = failures.lock().expect("lock poisoned");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1, 1);
        // The flush callback runs whether or not delivery failed.
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_performs_a_final_flush_and_is_idempotent() {
        let (stats, client) = recording_stats(test_config()).await;

        stats.count("requests", 3.0, &[]);
        stats.close().await;

        let series = single_series(&client);
        assert!((series.value - 3.0).abs() < f64::EPSILON);

        // Second close returns without another flush.
        stats.close().await;
        assert_eq!(client.batches().len(), 1);
    }

    #[tokio::test]
    async fn recording_after_close_is_dropped_and_counted() {
        let (stats, client) = recording_stats(test_config()).await;

        stats.close().await;
        assert_eq!(stats.dropped_metric_count(), 0);

        stats.increment("requests", &[]);
        assert_eq!(stats.dropped_metric_count(), 1);
        assert!(client.batches().is_empty());
    }

    // The runtime is single threaded and nothing yields between the
    // recording calls, so the control task cannot drain the queue while it
    // fills.
    #[tokio::test]
    async fn saturated_queue_drops_and_counts() {
        let (stats, client) =
            recording_stats(test_config().with_worker_count(1).with_metric_buffer(4)).await;

        for _ in 0..4 {
            stats.increment("requests", &[]);
        }
        assert_eq!(stats.dropped_metric_count(), 0);

        stats.increment("requests", &[]);
        assert_eq!(stats.dropped_metric_count(), 1);

        stats.flush().await;
        let series = single_series(&client);
        assert!((series.value - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_flushes_on_the_configured_cadence() {
        let (stats, client) =
            recording_stats(test_config().with_flush_interval_seconds(1)).await;

        stats.count("requests", 1.0, &[]);
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        // Let the spawned sender finish.
        for _ in 0..32 {
            if !client.batches().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let series = single_series(&client);
        assert!((series.value - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.dropped_metric_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_the_ticker() {
        let (stats, client) =
            recording_stats(test_config().with_flush_interval_seconds(1)).await;

        stats.close().await;
        stats.count("requests", 1.0, &[]);
        tokio::time::sleep(Duration::from_secs(5)).await;

        // No periodic flush fired after shutdown and the update was dropped.
        assert!(client.batches().is_empty());
        assert_eq!(stats.dropped_metric_count(), 1);
    }

    #[tokio::test]
    async fn send_series_delivers_immediately_and_surfaces_errors() {
        let config = test_config().with_namespace("app").with_host("web-1");
        let (stats, client) = recording_stats(config).await;

        stats
            .send_series(vec![Series::new("custom", MetricClass::Count, 7.0, 9)])
            .await
            .expect("send series");

        let series = single_series(&client);
        assert_eq!(series.metric, "app.custom");
        assert_eq!(series.host.as_deref(), Some("web-1"));

        client.fail_next(500);
        let err = stats
            .send_series(vec![Series::new("custom", MetricClass::Count, 7.0, 9)])
            .await
            .expect_err("primed failure");
        assert!(matches!(err, consign_client::Error::Api { status: 500 }));
    }

    #[tokio::test]
    async fn service_check_is_filled_and_delivered() {
        let config = test_config()
            .with_namespace("app")
            .with_host("web-1")
            .with_tags(vec!["env:prod".to_string()]);
        let (stats, client) = recording_stats(config).await;

        stats
            .service_check("up", "all good", CheckStatus::Ok, &["shard:1"])
            .await
            .expect("send check");

        let checks = client.checks.lock().expect("lock poisoned");
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].check, "app.up");
        assert_eq!(checks[0].hostname, "web-1");
        assert_eq!(checks[0].status, CheckStatus::Ok);
        assert_eq!(
            checks[0].tags,
            vec!["env:prod".to_string(), "shard:1".to_string()]
        );
        assert!(checks[0].timestamp > 0);
    }

    #[tokio::test]
    async fn event_is_filled_and_delivered() {
        let config = test_config().with_namespace("app").with_host("web-1");
        let (stats, client) = recording_stats(config).await;

        let event = Event {
            aggregation_key: Some("deploys".to_string()),
            ..Event::new("deploy", "rolled out v2")
        };
        stats.event(event).await.expect("send event");

        let events = client.events.lock().expect("lock poisoned");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].host.as_deref(), Some("web-1"));
        assert_eq!(events[0].aggregation_key.as_deref(), Some("app.deploys"));
        assert!(events[0].date_happened.expect("filled") > 0);
    }
}
