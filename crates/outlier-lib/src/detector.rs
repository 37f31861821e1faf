//! Outlier detector: public query surface and lifecycle
//!
//! Producers call [`OutlierDetector::mark`] from any number of tasks or
//! threads. A background task sweeps all groups on a fixed delay and a
//! second task feeds snapshots to the configured reporting sink.

use crate::classifier::{Classifier, SweepReport};
use crate::clock::{Clock, MonotonicClock};
use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};
use crate::models::{GroupSnapshot, RateAlgorithm, Status};
use crate::observability::DetectorMetrics;
use crate::registry::{GroupRecord, GroupRegistry};
use crate::reporter::{
    sink_for, ReportSink, Reporter, ReportingChannel, ReportingInterval, SnapshotSource,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State shared between the handle and its background tasks
struct DetectorInner {
    config: DetectorConfig,
    registry: GroupRegistry,
    classifier: Classifier,
    /// Keeps an explicit sweep from overlapping the periodic one
    sweep_lock: tokio::sync::Mutex<()>,
}

impl DetectorInner {
    fn record(&self, group_id: &str) -> Result<Arc<GroupRecord>> {
        self.registry
            .get(group_id)
            .ok_or_else(|| DetectorError::unknown_group(group_id))
    }

    async fn sweep(&self) -> SweepReport {
        let _guard = self.sweep_lock.lock().await;
        self.classifier.sweep(&self.registry)
    }
}

impl SnapshotSource for DetectorInner {
    fn snapshot(&self) -> Vec<GroupSnapshot> {
        self.registry
            .snapshot_all()
            .iter()
            .map(|record| {
                let estimator = record.estimator();
                GroupSnapshot {
                    group_id: record.group_id().to_string(),
                    status: record.status(),
                    rate: estimator.rate(),
                    actual_rate: estimator.actual_rate(),
                    ema_rate: estimator.ema_rate(),
                }
            })
            .collect()
    }
}

/// Background tasks started by `init()`
struct RunningTasks {
    shutdown_tx: broadcast::Sender<()>,
    sweep: JoinHandle<()>,
    reporter: JoinHandle<()>,
}

/// Rate-based outlier classifier for a dynamic set of groups
///
/// Cloning is cheap; clones share the same registry and background tasks.
#[derive(Clone)]
pub struct OutlierDetector {
    inner: Arc<DetectorInner>,
    sink: Arc<dyn ReportSink>,
    tasks: Arc<Mutex<Option<RunningTasks>>>,
}

impl OutlierDetector {
    /// Create a detector from a validated configuration
    pub fn new(config: DetectorConfig) -> Result<Self> {
        OutlierDetectorBuilder::new().config(config).build()
    }

    pub fn builder() -> OutlierDetectorBuilder {
        OutlierDetectorBuilder::new()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.inner.config
    }

    /// Record one event for `group_id`
    pub fn mark(&self, group_id: &str) {
        self.mark_n(group_id, 1);
    }

    /// Record `n` events for `group_id`, registering the group on first sight
    pub fn mark_n(&self, group_id: &str, n: u64) {
        if n == 0 {
            return;
        }
        self.inner.registry.get_or_create(group_id).observe(n);
    }

    /// Status decided by the last sweep
    pub fn status(&self, group_id: &str) -> Result<Status> {
        Ok(self.inner.record(group_id)?.status())
    }

    pub fn is_outlier(&self, group_id: &str) -> Result<bool> {
        Ok(self.status(group_id)? == Status::Outlier)
    }

    /// Rate under the configured algorithm, in events/sec
    pub fn rate(&self, group_id: &str) -> Result<f64> {
        Ok(self.inner.record(group_id)?.estimator().rate())
    }

    pub fn actual_rate(&self, group_id: &str) -> Result<f64> {
        Ok(self.inner.record(group_id)?.estimator().actual_rate())
    }

    pub fn ema_rate(&self, group_id: &str) -> Result<f64> {
        Ok(self.inner.record(group_id)?.estimator().ema_rate())
    }

    /// Whether the group's current rate is strictly above the threshold
    pub fn exceeds_threshold(&self, group_id: &str) -> Result<bool> {
        if self.inner.registry.is_empty() {
            return Err(DetectorError::NoGroupsRegistered {
                group_id: group_id.to_string(),
            });
        }
        let rate = self.rate(group_id)?;
        Ok(self.inner.classifier.exceeds(rate))
    }

    /// Current state of every group in insertion order
    pub fn snapshot(&self) -> Vec<GroupSnapshot> {
        self.inner.snapshot()
    }

    pub fn group_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Run one classification pass immediately
    pub async fn sweep_now(&self) -> SweepReport {
        self.inner.sweep().await
    }

    pub fn is_running(&self) -> bool {
        self.lock_tasks().is_some()
    }

    /// Start the periodic sweep and the reporter on the current tokio runtime
    pub fn init(&self) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| DetectorError::NoRuntime)?;
        let mut tasks = self.lock_tasks();
        if tasks.is_some() {
            return Err(DetectorError::AlreadyRunning);
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let sweep = handle.spawn(sweep_loop(
            Arc::clone(&self.inner),
            shutdown_tx.subscribe(),
        ));

        let reporter = Reporter::new(
            Arc::clone(&self.inner) as Arc<dyn SnapshotSource>,
            Arc::clone(&self.sink),
            self.inner.config.reporting_interval(),
        );
        let reporter = handle.spawn(reporter.run(shutdown_tx.subscribe()));

        info!(
            threshold = self.inner.config.outlier_rate_threshold,
            max_outlier_percent = self.inner.config.max_outlier_percent,
            algorithm = %self.inner.config.rate_algorithm,
            sweep_interval_ms = self.inner.config.sweep_interval_ms,
            "Outlier detector started"
        );

        *tasks = Some(RunningTasks {
            shutdown_tx,
            sweep,
            reporter,
        });
        Ok(())
    }

    /// Stop the background tasks and discard every group
    ///
    /// Marks racing with shutdown may be lost or recreate a group after the
    /// registry is cleared.
    pub async fn shutdown(&self) {
        let running = self.lock_tasks().take();

        if let Some(running) = running {
            let _ = running.shutdown_tx.send(());
            for (name, task) in [("sweep", running.sweep), ("reporter", running.reporter)] {
                if let Err(e) = task.await {
                    warn!(task = name, error = %e, "Background task ended abnormally");
                }
            }
        }

        let groups = self.inner.registry.len();
        self.inner.registry.clear();
        DetectorMetrics::new().reset_groups();
        info!(groups, "Outlier detector shut down");
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Option<RunningTasks>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed-delay sweep: the next pass is scheduled only after the previous one
/// has finished
async fn sweep_loop(inner: Arc<DetectorInner>, mut shutdown: broadcast::Receiver<()>) {
    let delay = inner.config.sweep_interval();
    info!(interval_ms = delay.as_millis() as u64, "Starting sweep loop");

    let mut sweep_count = 0u64;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let report = inner.sweep().await;
                sweep_count += 1;
                debug!(
                    sweep = sweep_count,
                    evaluated = report.evaluated,
                    outliers = report.outliers,
                    "Sweep finished"
                );
            }
            _ = shutdown.recv() => {
                info!(sweeps = sweep_count, "Shutting down sweep loop");
                break;
            }
        }
    }
}

/// Builder for [`OutlierDetector`]
pub struct OutlierDetectorBuilder {
    config: DetectorConfig,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Arc<dyn ReportSink>>,
}

impl OutlierDetectorBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DetectorConfig::default(),
            clock: None,
            sink: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the rate threshold in events/sec
    pub fn threshold(mut self, events_per_sec: f64) -> Self {
        self.config.outlier_rate_threshold = events_per_sec;
        self
    }

    /// Set the maximum fraction of groups flagged at once
    pub fn max_outlier_percent(mut self, fraction: f64) -> Self {
        self.config.max_outlier_percent = fraction;
        self
    }

    pub fn algorithm(mut self, algorithm: RateAlgorithm) -> Self {
        self.config.rate_algorithm = algorithm;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the trailing window of the actual rate and its bucket count
    pub fn rate_window(mut self, window: Duration, buckets: usize) -> Self {
        self.config.rate_window_ms = window.as_millis() as u64;
        self.config.rate_window_buckets = buckets;
        self
    }

    /// Set the decay tick and time constant of the moving average
    pub fn ema(mut self, tick: Duration, window: Duration) -> Self {
        self.config.ema_tick_interval_ms = tick.as_millis() as u64;
        self.config.ema_window_ms = window.as_millis() as u64;
        self
    }

    pub fn reporting_channel(mut self, channel: ReportingChannel) -> Self {
        self.config.reporting_channel = channel;
        self
    }

    pub fn reporting_interval(mut self, interval: ReportingInterval) -> Self {
        self.config.reporting_interval_ms = interval.as_duration().as_millis() as u64;
        self
    }

    /// Use a custom time source for all estimators
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a custom sink instead of the one selected by the reporting channel
    pub fn sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and build the detector
    pub fn build(self) -> Result<OutlierDetector> {
        self.config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let sink = self
            .sink
            .unwrap_or_else(|| sink_for(self.config.reporting_channel));
        let registry = GroupRegistry::new(self.config.estimator_config(), clock);
        let classifier = Classifier::new(
            self.config.outlier_rate_threshold,
            self.config.max_outlier_percent,
        );

        Ok(OutlierDetector {
            inner: Arc::new(DetectorInner {
                config: self.config,
                registry,
                classifier,
                sweep_lock: tokio::sync::Mutex::new(()),
            }),
            sink,
            tasks: Arc::new(Mutex::new(None)),
        })
    }
}

impl Default for OutlierDetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn detector(clock: &ManualClock) -> OutlierDetector {
        OutlierDetector::builder()
            .threshold(40.0)
            .max_outlier_percent(0.3)
            .reporting_interval(ReportingInterval::PER_MIN)
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_status_of_unmarked_group_fails() {
        let detector = detector(&ManualClock::new());
        let err = detector.status("ghost").unwrap_err();
        assert_eq!(
            err,
            DetectorError::UnknownGroup {
                group_id: "ghost".into()
            }
        );
        assert!(detector.rate("ghost").is_err());
    }

    #[test]
    fn test_exceeds_threshold_errors() {
        let detector = detector(&ManualClock::new());
        assert!(matches!(
            detector.exceeds_threshold("a"),
            Err(DetectorError::NoGroupsRegistered { .. })
        ));

        detector.mark_n("a", 41);
        assert!(detector.exceeds_threshold("a").unwrap());
        assert!(matches!(
            detector.exceeds_threshold("b"),
            Err(DetectorError::UnknownGroup { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = OutlierDetector::builder().max_outlier_percent(-0.1).build();
        assert!(matches!(result, Err(DetectorError::InvalidConfig(_))));
    }

    #[test]
    fn test_init_requires_runtime() {
        let detector = detector(&ManualClock::new());
        assert_eq!(detector.init(), Err(DetectorError::NoRuntime));
        assert!(!detector.is_running());
    }

    #[tokio::test]
    async fn test_mark_does_not_change_status_until_sweep() {
        let detector = detector(&ManualClock::new());
        detector.mark_n("loud", 500);
        detector.mark("quiet");
        detector.mark_n("quiet", 0);

        assert_eq!(detector.status("loud").unwrap(), Status::GoodCitizen);
        assert_eq!(detector.actual_rate("quiet").unwrap(), 1.0);

        let report = detector.sweep_now().await;
        assert_eq!(report.evaluated, 2);
        assert!(detector.is_outlier("loud").unwrap());
        assert!(!detector.is_outlier("quiet").unwrap());
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let detector = detector(&ManualClock::new());
        detector.init().unwrap();
        assert_eq!(detector.init(), Err(DetectorError::AlreadyRunning));
        detector.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_and_shutdown() {
        let clock = ManualClock::new();
        let detector = detector(&clock);
        detector.mark_n("a", 99);
        detector.mark_n("b", 5);

        detector.init().unwrap();
        assert!(detector.is_running());

        // No sweep before the first tick
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(detector.status("a").unwrap(), Status::GoodCitizen);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(detector.status("a").unwrap(), Status::Outlier);
        assert_eq!(detector.status("b").unwrap(), Status::GoodCitizen);

        detector.shutdown().await;
        assert!(!detector.is_running());
        assert_eq!(detector.group_count(), 0);
        assert!(detector.status("a").is_err());

        // Restartable after shutdown
        detector.init().unwrap();
        detector.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_reports_both_signals() {
        let clock = ManualClock::new();
        let detector = OutlierDetector::builder()
            .algorithm(RateAlgorithm::EmaRatePerMinute)
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        detector.mark_n("a", 100);
        clock.advance(Duration::from_secs(5));

        let snapshot = detector.snapshot();
        assert_eq!(snapshot.len(), 1);
        let group = &snapshot[0];
        assert_eq!(group.actual_rate, 0.0);
        assert!(group.ema_rate > 0.0);
        assert_eq!(group.rate, group.ema_rate);
    }
}
