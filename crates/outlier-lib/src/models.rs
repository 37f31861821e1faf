//! Core data models for the outlier detector

use crate::error::DetectorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of a group as decided by the last sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Emitting at or below the threshold, or held back by the outlier cap
    #[default]
    GoodCitizen,
    /// Emitting above the threshold and admitted under the outlier cap
    Outlier,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::GoodCitizen => "GOOD_CITIZEN",
            Status::Outlier => "OUTLIER",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Status::GoodCitizen => 0,
            Status::Outlier => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        if value == 1 {
            Status::Outlier
        } else {
            Status::GoodCitizen
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate signal used for classification, fixed for the lifetime of a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum RateAlgorithm {
    /// Count of events in the trailing window. Reacts to every fluctuation.
    #[default]
    ActualRatePerSec,
    /// Exponentially decayed one-minute average. Smooths short bursts.
    EmaRatePerMinute,
}

impl RateAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAlgorithm::ActualRatePerSec => "ACTUAL_RATE_PER_SEC",
            RateAlgorithm::EmaRatePerMinute => "EMA_RATE_PER_MINUTE",
        }
    }
}

impl fmt::Display for RateAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateAlgorithm {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTUAL_RATE_PER_SEC" | "ACTUAL" => Ok(RateAlgorithm::ActualRatePerSec),
            "EMA_RATE_PER_MINUTE" | "EXPONENTIAL_MOVING_AVG_RATE_PER_MIN" | "EMA" => {
                Ok(RateAlgorithm::EmaRatePerMinute)
            }
            _ => Err(DetectorError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for RateAlgorithm {
    type Error = DetectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RateAlgorithm> for String {
    fn from(value: RateAlgorithm) -> Self {
        value.as_str().to_string()
    }
}

/// Point-in-time view of one group, polled by reporting sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group_id: String,
    pub status: Status,
    /// Rate under the configured algorithm
    pub rate: f64,
    pub actual_rate: f64,
    pub ema_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "ACTUAL_RATE_PER_SEC".parse::<RateAlgorithm>().unwrap(),
            RateAlgorithm::ActualRatePerSec
        );
        assert_eq!(
            "exponential_moving_avg_rate_per_min"
                .parse::<RateAlgorithm>()
                .unwrap(),
            RateAlgorithm::EmaRatePerMinute
        );

        let err = "MEDIAN".parse::<RateAlgorithm>().unwrap_err();
        assert_eq!(err, DetectorError::UnsupportedAlgorithm("MEDIAN".into()));
    }

    #[test]
    fn test_algorithm_serde() {
        let json = serde_json::to_string(&RateAlgorithm::EmaRatePerMinute).unwrap();
        assert_eq!(json, "\"EMA_RATE_PER_MINUTE\"");

        let parsed: RateAlgorithm = serde_json::from_str("\"ACTUAL_RATE_PER_SEC\"").unwrap();
        assert_eq!(parsed, RateAlgorithm::ActualRatePerSec);

        assert!(serde_json::from_str::<RateAlgorithm>("\"P99\"").is_err());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&Status::Outlier).unwrap(), "\"OUTLIER\"");
        assert_eq!(Status::default(), Status::GoodCitizen);
        assert_eq!(Status::from_u8(Status::Outlier.to_u8()), Status::Outlier);
        assert_eq!(Status::GoodCitizen.to_string(), "GOOD_CITIZEN");
    }
}
