//! Rate-based outlier detection for event producers
//!
//! This crate provides the core functionality for:
//! - Per-group rate estimation (windowed actual rate and decayed average)
//! - A concurrent group registry with lazy registration
//! - A periodic, percent-capped classification sweep with outlier swapping
//! - Periodic reporting of group rates to logs, console or Prometheus

pub mod classifier;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod models;
pub mod observability;
pub mod rate;
pub mod registry;
pub mod reporter;

pub use classifier::{Classifier, Swap, SweepReport};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::DetectorConfig;
pub use detector::{OutlierDetector, OutlierDetectorBuilder};
pub use error::{DetectorError, Result};
pub use models::*;
pub use observability::DetectorMetrics;
pub use reporter::{ReportSink, ReportingChannel, ReportingInterval};
