//! Combined per-group estimator
//!
//! Every group tracks both rate signals regardless of which one drives
//! classification, so either can be logged and reported side by side.

use super::decaying::{DecayingRate, DEFAULT_AVERAGING_WINDOW, DEFAULT_TICK_INTERVAL};
use super::windowed::{WindowedCounter, DEFAULT_BUCKETS, DEFAULT_WINDOW};
use crate::clock::Clock;
use crate::models::RateAlgorithm;
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by all estimators of one detector
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    /// Algorithm used by [`RateEstimator::rate`]
    pub algorithm: RateAlgorithm,
    /// Trailing window for the actual rate
    pub window: Duration,
    /// Buckets the window is divided into
    pub window_buckets: usize,
    /// Interval between decay ticks of the moving average
    pub ema_tick_interval: Duration,
    /// Time constant of the moving average
    pub ema_window: Duration,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            algorithm: RateAlgorithm::default(),
            window: DEFAULT_WINDOW,
            window_buckets: DEFAULT_BUCKETS,
            ema_tick_interval: DEFAULT_TICK_INTERVAL,
            ema_window: DEFAULT_AVERAGING_WINDOW,
        }
    }
}

/// Rate state for a single group
pub struct RateEstimator {
    algorithm: RateAlgorithm,
    actual: WindowedCounter,
    ema: DecayingRate,
}

impl RateEstimator {
    pub fn new(config: &EstimatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            algorithm: config.algorithm,
            actual: WindowedCounter::new(Arc::clone(&clock), config.window, config.window_buckets),
            ema: DecayingRate::new(clock, config.ema_tick_interval, config.ema_window),
        }
    }

    /// Register `n` events at the current instant
    pub fn observe(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.ema.observe(n);
        self.actual.observe(n);
    }

    /// Rate under the configured algorithm, in events/sec
    pub fn rate(&self) -> f64 {
        match self.algorithm {
            RateAlgorithm::ActualRatePerSec => self.actual_rate(),
            RateAlgorithm::EmaRatePerMinute => self.ema_rate(),
        }
    }

    /// Events per second in the trailing window, whatever the algorithm
    pub fn actual_rate(&self) -> f64 {
        self.actual.rate()
    }

    /// Decayed one-minute average, whatever the algorithm
    pub fn ema_rate(&self) -> f64 {
        self.ema.rate()
    }

    pub fn algorithm(&self) -> RateAlgorithm {
        self.algorithm
    }
}
