//! Per-group rate estimation
//!
//! This module provides the two rate signals tracked for every group:
//! - Windowed actual rate (events counted in a trailing window)
//! - Exponentially decayed average rate (meter-style moving average)

mod decaying;
mod estimator;
mod windowed;

pub use decaying::DecayingRate;
pub use estimator::{EstimatorConfig, RateEstimator};
pub use windowed::WindowedCounter;
