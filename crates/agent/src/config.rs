//! Agent configuration

use anyhow::{Context, Result};
use outlier_lib::DetectorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "OUTLIER_AGENT_CONFIG";

/// Prefix for environment overrides, e.g. `OUTLIER_AGENT_API_PORT` or
/// `OUTLIER_AGENT_DETECTOR__OUTLIER_RATE_THRESHOLD`
pub const ENV_PREFIX: &str = "OUTLIER_AGENT";

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Synthetic traffic fed into the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub enabled: bool,
    /// Seconds of traffic before the driver goes quiet
    pub burst_seconds: u64,
    pub profiles: Vec<TrafficProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficProfile {
    pub group: String,
    pub events_per_second: u64,
}

impl TrafficProfile {
    fn new(group: &str, events_per_second: u64) -> Self {
        Self {
            group: group.to_string(),
            events_per_second,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            burst_seconds: 5,
            profiles: vec![
                TrafficProfile::new("289", 99),
                TrafficProfile::new("3231", 65),
                TrafficProfile::new("3434", 50),
                TrafficProfile::new("5643", 1),
            ],
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            log_format: LogFormat::default(),
            detector: DetectorConfig::default(),
            driver: DriverConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from(file.as_deref().map(Path::new))
    }

    /// Load configuration from `file` (if any), overridden by environment
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read agent configuration")?;

        let agent: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        agent.detector.validate()?;

        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outlier_lib::{RateAlgorithm, ReportingChannel};
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AgentConfig::load_from(None).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.detector, DetectorConfig::default());
        assert!(!config.driver.enabled);
        assert_eq!(config.driver.profiles.len(), 4);
    }

    #[test]
    fn test_load_from_toml() {
        let file = write_config(
            r#"
api_port = 9100
log_format = "pretty"

[detector]
outlier_rate_threshold = 100.0
rate_algorithm = "EXPONENTIAL_MOVING_AVG_RATE_PER_MIN"
reporting_channel = "CONSOLE"

[driver]
enabled = true
profiles = [{ group = "tenant-a", events_per_second = 250 }]
"#,
        );

        let config = AgentConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.detector.outlier_rate_threshold, 100.0);
        assert_eq!(config.detector.rate_algorithm, RateAlgorithm::EmaRatePerMinute);
        assert_eq!(config.detector.reporting_channel, ReportingChannel::Console);
        assert_eq!(config.detector.max_outlier_percent, 0.3);
        assert!(config.driver.enabled);
        assert_eq!(config.driver.burst_seconds, 5);
        assert_eq!(
            config.driver.profiles,
            vec![TrafficProfile::new("tenant-a", 250)]
        );
    }

    #[test]
    fn test_rejects_invalid_detector_settings() {
        let file = write_config("[detector]\nmax_outlier_percent = 2.0\n");
        let err = AgentConfig::load_from(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("max_outlier_percent"));
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let file = write_config("[detector]\nrate_algorithm = \"P99\"\n");
        assert!(AgentConfig::load_from(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AgentConfig::load_from(Some(Path::new("/nonexistent/outlier-agent.toml")));
        assert!(result.is_err());
    }
}
