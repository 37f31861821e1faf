//! Periodic classification sweep
//!
//! Re-evaluates every group in insertion order against the rate threshold
//! and the global outlier cap. The outlier fraction is re-read before each
//! group's decision, so promotions made earlier in a pass are visible to
//! the groups evaluated after them. A single pass can therefore end with
//! more outliers than the nominal cap.

use crate::error::{DetectorError, Result};
use crate::models::Status;
use crate::observability::DetectorMetrics;
use crate::registry::{GroupRecord, GroupRegistry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A weaker outlier replaced by a stronger candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Swap {
    pub promoted: String,
    pub promoted_rate: f64,
    pub demoted: String,
    pub demoted_rate: f64,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub evaluated: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub swaps: Vec<Swap>,
    pub errors: usize,
    pub outliers: usize,
    pub elapsed: Duration,
}

/// Decision taken for a single group
enum Decision {
    Unchanged,
    Promoted,
    Demoted,
    Swapped(Swap),
}

/// Threshold and cap applied on every sweep
#[derive(Clone)]
pub struct Classifier {
    threshold: f64,
    max_outlier_percent: f64,
    metrics: DetectorMetrics,
}

impl Classifier {
    pub fn new(threshold: f64, max_outlier_percent: f64) -> Self {
        Self {
            threshold,
            max_outlier_percent,
            metrics: DetectorMetrics::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn max_outlier_percent(&self) -> f64 {
        self.max_outlier_percent
    }

    /// Strictly above the threshold; equal never counts
    pub fn exceeds(&self, rate: f64) -> bool {
        rate > self.threshold
    }

    /// Classify every group currently in `registry`
    pub fn sweep(&self, registry: &GroupRegistry) -> SweepReport {
        self.sweep_records(registry, registry.snapshot_all())
    }

    pub(crate) fn sweep_records(
        &self,
        registry: &GroupRegistry,
        records: Vec<Arc<GroupRecord>>,
    ) -> SweepReport {
        let start = Instant::now();
        let mut report = SweepReport::default();

        if records.is_empty() {
            return report;
        }

        let total = records.len();
        // Only the sweep writes status, so a running count stays equal to a
        // fresh scan of the records throughout the pass.
        let mut outliers = records
            .iter()
            .filter(|r| r.status() == Status::Outlier)
            .count();

        for record in &records {
            match self.evaluate(registry, record, &records, &mut outliers, total) {
                Ok(decision) => {
                    report.evaluated += 1;
                    match decision {
                        Decision::Unchanged => {}
                        Decision::Promoted => report.promoted += 1,
                        Decision::Demoted => report.demoted += 1,
                        Decision::Swapped(swap) => report.swaps.push(swap),
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        group_id = %record.group_id(),
                        error = %e,
                        "Failed to classify group, continuing sweep"
                    );
                }
            }
        }

        report.outliers = outliers;
        report.elapsed = start.elapsed();
        self.record_metrics(registry, &report);

        debug!(
            groups = total,
            outliers = report.outliers,
            promoted = report.promoted,
            demoted = report.demoted,
            swapped = report.swaps.len(),
            errors = report.errors,
            elapsed_us = report.elapsed.as_micros() as u64,
            "Sweep complete"
        );

        report
    }

    fn evaluate(
        &self,
        registry: &GroupRegistry,
        record: &Arc<GroupRecord>,
        records: &[Arc<GroupRecord>],
        outliers: &mut usize,
        total: usize,
    ) -> Result<Decision> {
        let group_id = record.group_id();
        // A group cleared and recreated mid-pass is left for the next sweep
        let live = registry
            .get(group_id)
            .filter(|live| Arc::ptr_eq(live, record))
            .ok_or_else(|| DetectorError::unknown_group(group_id))?;
        let estimator = live.estimator();
        let rate = estimator.rate();
        let exceeds = self.exceeds(rate);
        let outlier_fraction = *outliers as f64 / total as f64;

        debug!(
            group_id = %group_id,
            current_rate = rate,
            actual_rate = estimator.actual_rate(),
            ema_rate = estimator.ema_rate(),
            outlier_fraction,
            "Evaluating group"
        );

        let previous = record.status();

        if !exceeds {
            record.set_status(Status::GoodCitizen);
            if previous == Status::Outlier {
                *outliers -= 1;
                info!(
                    group_id = %group_id,
                    rate,
                    threshold = self.threshold,
                    "Group demoted to GOOD_CITIZEN"
                );
                return Ok(Decision::Demoted);
            }
            return Ok(Decision::Unchanged);
        }

        if outlier_fraction < self.max_outlier_percent {
            if previous != Status::Outlier {
                record.set_status(Status::Outlier);
                *outliers += 1;
                info!(
                    group_id = %group_id,
                    rate,
                    threshold = self.threshold,
                    outlier_fraction,
                    "Group promoted to OUTLIER"
                );
                return Ok(Decision::Promoted);
            }
            return Ok(Decision::Unchanged);
        }

        if previous == Status::Outlier {
            return Ok(Decision::Unchanged);
        }

        Ok(self
            .try_swap(record, rate, records)
            .map(Decision::Swapped)
            .unwrap_or(Decision::Unchanged))
    }

    /// Bump the weakest current outlier if `candidate` is strictly stronger.
    ///
    /// Ties on rate go to the earliest inserted outlier.
    fn try_swap(
        &self,
        candidate: &Arc<GroupRecord>,
        candidate_rate: f64,
        records: &[Arc<GroupRecord>],
    ) -> Option<Swap> {
        let (weakest, weakest_rate) = records
            .iter()
            .filter(|r| r.status() == Status::Outlier && !Arc::ptr_eq(r, candidate))
            .map(|r| (r, r.estimator().rate()))
            .min_by(|(a, a_rate), (b, b_rate)| {
                a_rate.total_cmp(b_rate).then_with(|| a.seq().cmp(&b.seq()))
            })?;

        if weakest_rate >= candidate_rate {
            return None;
        }

        weakest.set_status(Status::GoodCitizen);
        candidate.set_status(Status::Outlier);

        info!(
            promoted = %candidate.group_id(),
            promoted_rate = candidate_rate,
            demoted = %weakest.group_id(),
            demoted_rate = weakest_rate,
            "Swapped weaker outlier for group with higher rate"
        );

        Some(Swap {
            promoted: candidate.group_id().to_string(),
            promoted_rate: candidate_rate,
            demoted: weakest.group_id().to_string(),
            demoted_rate: weakest_rate,
        })
    }

    fn record_metrics(&self, registry: &GroupRegistry, report: &SweepReport) {
        self.metrics.observe_sweep_latency(report.elapsed.as_secs_f64());
        self.metrics.set_group_counts(registry.len(), report.outliers);
        self.metrics.inc_promotions(report.promoted as u64);
        self.metrics.inc_demotions(report.demoted as u64);
        self.metrics.inc_swaps(report.swaps.len() as u64);
        self.metrics.inc_sweep_errors(report.errors as u64);
    }
}
