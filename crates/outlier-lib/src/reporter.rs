//! Periodic reporting of group rates
//!
//! A reporter polls a snapshot of every group on its own interval and hands
//! it to a sink. Sinks cover structured logs, a console table and the
//! Prometheus gauges in [`observability`](crate::observability).

use crate::models::GroupSnapshot;
use crate::observability::DetectorMetrics;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Where periodic reports are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportingChannel {
    /// One structured log event per group
    #[default]
    Log,
    /// Aligned table on stdout
    Console,
    /// Per-group gauges in the global Prometheus registry
    Prometheus,
}

/// Delay between two reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingInterval(Duration);

impl ReportingInterval {
    pub const PER_SEC: Self = Self(Duration::from_secs(1));
    pub const PER_5_SEC: Self = Self(Duration::from_secs(5));
    pub const PER_10_SEC: Self = Self(Duration::from_secs(10));
    pub const PER_30_SEC: Self = Self(Duration::from_secs(30));
    pub const PER_MIN: Self = Self(Duration::from_secs(60));

    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub const fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for ReportingInterval {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

/// Read access to the current per-group state
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> Vec<GroupSnapshot>;
}

/// Destination for one report
pub trait ReportSink: Send + Sync {
    fn report(&self, groups: &[GroupSnapshot]);
}

/// Build the sink for a configured channel
pub fn sink_for(channel: ReportingChannel) -> Arc<dyn ReportSink> {
    match channel {
        ReportingChannel::Log => Arc::new(LogSink),
        ReportingChannel::Console => Arc::new(ConsoleSink),
        ReportingChannel::Prometheus => Arc::new(PrometheusSink::new()),
    }
}

/// Reports through `tracing`
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, groups: &[GroupSnapshot]) {
        for group in groups {
            info!(
                target: "outlier_detector::report",
                group_id = %group.group_id,
                status = %group.status,
                rate = group.rate,
                actual_rate = group.actual_rate,
                ema_rate = group.ema_rate,
                "Group rate"
            );
        }
    }
}

/// Prints a table to stdout
pub struct ConsoleSink;

impl ConsoleSink {
    /// Render the table printed for `groups`
    pub fn render(groups: &[GroupSnapshot]) -> String {
        let width = groups
            .iter()
            .map(|g| g.group_id.len())
            .max()
            .unwrap_or(0)
            .max("group".len());

        let mut out = String::new();
        let _ = writeln!(out, "-- Groups @ {} --", chrono::Utc::now().to_rfc3339());
        let _ = writeln!(
            out,
            "{:<width$}  {:<12}  {:>12}  {:>12}",
            "group", "status", "actual/s", "ema/s"
        );
        for group in groups {
            let _ = writeln!(
                out,
                "{:<width$}  {:<12}  {:>12.3}  {:>12.3}",
                group.group_id,
                group.status.as_str(),
                group.actual_rate,
                group.ema_rate
            );
        }
        out
    }
}

impl ReportSink for ConsoleSink {
    fn report(&self, groups: &[GroupSnapshot]) {
        println!("{}", Self::render(groups));
    }
}

/// Publishes per-group gauges
pub struct PrometheusSink {
    metrics: DetectorMetrics,
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self {
            metrics: DetectorMetrics::new(),
        }
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportSink for PrometheusSink {
    fn report(&self, groups: &[GroupSnapshot]) {
        self.metrics.record_groups(groups);
    }
}

/// Loop that feeds snapshots to a sink until shutdown
pub struct Reporter {
    source: Arc<dyn SnapshotSource>,
    sink: Arc<dyn ReportSink>,
    interval: ReportingInterval,
}

impl Reporter {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        sink: Arc<dyn ReportSink>,
        interval: ReportingInterval,
    ) -> Self {
        Self {
            source,
            sink,
            interval,
        }
    }

    /// Report once
    pub fn report_now(&self) {
        let groups = self.source.snapshot();
        self.sink.report(&groups);
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.interval.as_duration();
        info!(interval_ms = period.as_millis() as u64, "Starting reporter");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report_now();
                }
                _ = shutdown.recv() => {
                    debug!("Shutting down reporter");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;
    use std::sync::Mutex;

    struct FixedSource(Vec<GroupSnapshot>);

    impl SnapshotSource for FixedSource {
        fn snapshot(&self) -> Vec<GroupSnapshot> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<usize>>,
    }

    impl ReportSink for RecordingSink {
        fn report(&self, groups: &[GroupSnapshot]) {
            self.reports.lock().unwrap().push(groups.len());
        }
    }

    fn snapshot(id: &str, status: Status, rate: f64) -> GroupSnapshot {
        GroupSnapshot {
            group_id: id.to_string(),
            status,
            rate,
            actual_rate: rate,
            ema_rate: rate / 2.0,
        }
    }

    #[test]
    fn test_interval_presets() {
        assert_eq!(ReportingInterval::PER_SEC.as_duration(), Duration::from_secs(1));
        assert_eq!(ReportingInterval::PER_MIN.as_duration(), Duration::from_secs(60));
        assert_eq!(ReportingInterval::from_millis(5_000), ReportingInterval::PER_5_SEC);
    }

    #[test]
    fn test_channel_serde() {
        let channel: ReportingChannel = serde_json::from_str("\"CONSOLE\"").unwrap();
        assert_eq!(channel, ReportingChannel::Console);
        assert!(serde_json::from_str::<ReportingChannel>("\"GRAPHITE\"").is_err());
    }

    #[test]
    fn test_console_render() {
        let table = ConsoleSink::render(&[
            snapshot("289", Status::Outlier, 99.0),
            snapshot("5643", Status::GoodCitizen, 1.0),
        ]);

        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("group"));
        assert!(lines[2].starts_with("289 "));
        assert!(lines[2].contains("OUTLIER"));
        assert!(lines[2].contains("99.000"));
        assert!(lines[3].contains("GOOD_CITIZEN"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_polls_on_interval() {
        let source = Arc::new(FixedSource(vec![
            snapshot("a", Status::Outlier, 50.0),
            snapshot("b", Status::GoodCitizen, 5.0),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let reporter = Reporter::new(source, sink.clone(), ReportingInterval::PER_SEC);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(reporter.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(*sink.reports.lock().unwrap(), vec![2, 2, 2]);
    }
}
