//! Detector configuration

use crate::error::{DetectorError, Result};
use crate::models::RateAlgorithm;
use crate::rate::EstimatorConfig;
use crate::reporter::{ReportingChannel, ReportingInterval};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Construction-time settings for an [`OutlierDetector`](crate::OutlierDetector)
///
/// Durations are expressed in milliseconds so the struct maps directly onto
/// flat config files and environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Classification boundary in events/sec; a group must be strictly above it
    pub outlier_rate_threshold: f64,
    /// Cap on the fraction of groups flagged at once (0.0 - 1.0)
    pub max_outlier_percent: f64,
    pub rate_algorithm: RateAlgorithm,
    /// Delay between the end of one sweep and the start of the next
    pub sweep_interval_ms: u64,
    pub rate_window_ms: u64,
    pub rate_window_buckets: usize,
    pub ema_tick_interval_ms: u64,
    pub ema_window_ms: u64,
    pub reporting_channel: ReportingChannel,
    pub reporting_interval_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            outlier_rate_threshold: 40.0,
            max_outlier_percent: 0.3,
            rate_algorithm: RateAlgorithm::default(),
            sweep_interval_ms: 1_000,
            rate_window_ms: 1_000,
            rate_window_buckets: 10,
            ema_tick_interval_ms: 5_000,
            ema_window_ms: 60_000,
            reporting_channel: ReportingChannel::default(),
            reporting_interval_ms: ReportingInterval::PER_5_SEC.as_duration().as_millis() as u64,
        }
    }
}

impl DetectorConfig {
    /// Reject values the classifier cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.outlier_rate_threshold.is_finite() || self.outlier_rate_threshold <= 0.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "outlier_rate_threshold must be a positive number, got {}",
                self.outlier_rate_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.max_outlier_percent) {
            return Err(DetectorError::InvalidConfig(format!(
                "max_outlier_percent must be within 0.0..=1.0, got {}",
                self.max_outlier_percent
            )));
        }
        if self.rate_window_buckets == 0 {
            return Err(DetectorError::InvalidConfig(
                "rate_window_buckets must be at least 1".into(),
            ));
        }

        let durations = [
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("rate_window_ms", self.rate_window_ms),
            ("ema_tick_interval_ms", self.ema_tick_interval_ms),
            ("ema_window_ms", self.ema_window_ms),
            ("reporting_interval_ms", self.reporting_interval_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(DetectorError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn reporting_interval(&self) -> ReportingInterval {
        ReportingInterval::from_millis(self.reporting_interval_ms)
    }

    /// Settings handed to every per-group estimator
    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            algorithm: self.rate_algorithm,
            window: Duration::from_millis(self.rate_window_ms),
            window_buckets: self.rate_window_buckets,
            ema_tick_interval: Duration::from_millis(self.ema_tick_interval_ms),
            ema_window: Duration::from_millis(self.ema_window_ms),
        }
    }
}
