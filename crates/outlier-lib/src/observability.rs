//! Prometheus metrics for the detector
//!
//! Provides sweep latency, group and outlier counts, transition counters,
//! and per-group rate/status gauges for the Prometheus reporting channel.

use crate::models::{GroupSnapshot, Status};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge,
    register_int_gauge_vec, GaugeVec, Histogram, IntCounter, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;

/// Histogram buckets for sweep latency (in seconds)
const SWEEP_LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DetectorMetricsInner> = OnceLock::new();

struct DetectorMetricsInner {
    sweep_latency_seconds: Histogram,
    groups_tracked: IntGauge,
    outliers_flagged: IntGauge,
    promotions: IntCounter,
    demotions: IntCounter,
    swaps: IntCounter,
    sweep_errors: IntCounter,
    group_rate: GaugeVec,
    group_outlier: IntGaugeVec,
}

impl DetectorMetricsInner {
    fn new() -> Self {
        Self {
            sweep_latency_seconds: register_histogram!(
                "outlier_detector_sweep_latency_seconds",
                "Time spent classifying all groups in one sweep",
                SWEEP_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sweep_latency_seconds"),

            groups_tracked: register_int_gauge!(
                "outlier_detector_groups_tracked",
                "Number of groups currently known to the detector"
            )
            .expect("Failed to register groups_tracked"),

            outliers_flagged: register_int_gauge!(
                "outlier_detector_outliers_flagged",
                "Number of groups classified OUTLIER after the last sweep"
            )
            .expect("Failed to register outliers_flagged"),

            promotions: register_int_counter!(
                "outlier_detector_promotions_total",
                "Groups promoted to OUTLIER"
            )
            .expect("Failed to register promotions"),

            demotions: register_int_counter!(
                "outlier_detector_demotions_total",
                "Groups demoted to GOOD_CITIZEN"
            )
            .expect("Failed to register demotions"),

            swaps: register_int_counter!(
                "outlier_detector_swaps_total",
                "Weaker outliers swapped out for stronger candidates"
            )
            .expect("Failed to register swaps"),

            sweep_errors: register_int_counter!(
                "outlier_detector_sweep_errors_total",
                "Per-group evaluation failures during sweeps"
            )
            .expect("Failed to register sweep_errors"),

            group_rate: register_gauge_vec!(
                "outlier_detector_group_rate",
                "Event rate per group in events/sec",
                &["group", "signal"]
            )
            .expect("Failed to register group_rate"),

            group_outlier: register_int_gauge_vec!(
                "outlier_detector_group_outlier",
                "1 if the group is currently classified OUTLIER",
                &["group"]
            )
            .expect("Failed to register group_outlier"),
        }
    }
}

/// Handle to the process-wide detector metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct DetectorMetrics {
    _private: (),
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DetectorMetricsInner {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new)
    }

    pub fn observe_sweep_latency(&self, duration_secs: f64) {
        self.inner().sweep_latency_seconds.observe(duration_secs);
    }

    pub fn set_group_counts(&self, tracked: usize, outliers: usize) {
        self.inner().groups_tracked.set(tracked as i64);
        self.inner().outliers_flagged.set(outliers as i64);
    }

    pub fn inc_promotions(&self, by: u64) {
        self.inner().promotions.inc_by(by);
    }

    pub fn inc_demotions(&self, by: u64) {
        self.inner().demotions.inc_by(by);
    }

    pub fn inc_swaps(&self, by: u64) {
        self.inner().swaps.inc_by(by);
    }

    pub fn inc_sweep_errors(&self, by: u64) {
        self.inner().sweep_errors.inc_by(by);
    }

    /// Publish per-group gauges from a snapshot
    pub fn record_groups(&self, groups: &[GroupSnapshot]) {
        let inner = self.inner();
        for group in groups {
            let id = group.group_id.as_str();
            inner
                .group_rate
                .with_label_values(&[id, "actual"])
                .set(group.actual_rate);
            inner
                .group_rate
                .with_label_values(&[id, "ema"])
                .set(group.ema_rate);
            inner
                .group_outlier
                .with_label_values(&[id])
                .set(i64::from(group.status == Status::Outlier));
        }
    }

    /// Drop all per-group series, e.g. after the registry is cleared
    pub fn reset_groups(&self) {
        self.inner().group_rate.reset();
        self.inner().group_outlier.reset();
        self.set_group_counts(0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_metrics_creation() {
        let metrics = DetectorMetrics::new();
        let other = metrics.clone();

        metrics.observe_sweep_latency(0.0002);
        metrics.set_group_counts(4, 2);
        metrics.inc_promotions(2);
        other.inc_swaps(1);
        metrics.record_groups(&[GroupSnapshot {
            group_id: "metrics-test".into(),
            status: Status::Outlier,
            rate: 12.0,
            actual_rate: 12.0,
            ema_rate: 3.5,
        }]);

        let gathered = prometheus::gather();
        assert!(gathered
            .iter()
            .any(|family| family.get_name() == "outlier_detector_promotions_total"));
    }
}
