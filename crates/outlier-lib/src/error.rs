//! Error types for the outlier detector

use thiserror::Error;

/// Errors surfaced by detector queries, construction and lifecycle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// Rate or status query for a group that was never marked
    #[error("no group with id '{group_id}' found, mark it first")]
    UnknownGroup { group_id: String },

    /// Threshold comparison attempted while the registry is empty
    #[error("no groups registered, register group '{group_id}' first")]
    NoGroupsRegistered { group_id: String },

    /// Unrecognized rate algorithm tag
    #[error("unsupported rate algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Construction-time configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `init()` called on a detector that is already running
    #[error("detector is already running")]
    AlreadyRunning,

    /// `init()` called outside of a tokio runtime
    #[error("no tokio runtime available to drive the sweep")]
    NoRuntime,
}

impl DetectorError {
    pub(crate) fn unknown_group(group_id: impl Into<String>) -> Self {
        Self::UnknownGroup {
            group_id: group_id.into(),
        }
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, DetectorError>;
