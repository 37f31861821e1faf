//! Outlier agent: bootstrap around the outlier detector
//!
//! Hosts the detector in a standalone process with configuration loading,
//! an HTTP surface for status and Prometheus metrics, and an optional
//! synthetic traffic driver.

pub mod api;
pub mod config;
pub mod driver;
