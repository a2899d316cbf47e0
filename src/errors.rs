//! Failures of the polling pipeline
//!
//! A fetch error names the channel that produced no snapshot. A compute error
//! only marks one derived metric unavailable for the current tick.

use std::time::Duration;

use crate::catalog::Channel;

/// A poll cycle that produced no snapshot
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to fetch {channel} data after retry: {reason}")]
    Failed { channel: Channel, reason: String },

    #[error("Fetching {channel} data timed out after {timeout:?}")]
    TimedOut { channel: Channel, timeout: Duration },

    #[error("Failed to start {channel} fetch worker: {source}")]
    Worker {
        channel: Channel,
        #[source]
        source: std::io::Error,
    },

    #[error("A {channel} fetch is already in flight")]
    Busy { channel: Channel },

    #[error("The {channel} poller is stopped")]
    Stopped { channel: Channel },
}

impl FetchError {
    pub fn channel(&self) -> Channel {
        match self {
            FetchError::Failed { channel, .. }
            | FetchError::TimedOut { channel, .. }
            | FetchError::Worker { channel, .. }
            | FetchError::Busy { channel }
            | FetchError::Stopped { channel } => *channel,
        }
    }
}

/// Persisted state errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write state file '{path}': {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to serialize state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A persisted value that could not be turned back into state
#[derive(Debug, thiserror::Error)]
#[error("Could not restore '{key}': {reason}")]
pub struct RestoreFailed {
    pub key: String,
    pub reason: String,
}

/// Why a derived metric is unavailable for one tick
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputeError {
    #[error("{0} snapshot not available")]
    NoSnapshot(Channel),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Field is not numeric: {0}")]
    NotNumeric(&'static str),

    #[error("Division by zero: {0} is zero")]
    DivisionByZero(&'static str),

    #[error("{0} is not positive")]
    NotPositive(&'static str),
}

/// MQTT connection and publishing errors
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Failed to publish message to topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Failed to serialize data: {error:?}")]
    SerializationError { error: serde_json::Error },

    #[error("MQTT client error: {0}")]
    ClientError(String),
}

/// Pipeline assembly errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to start {component} timer: {source}")]
    Timer {
        component: String,
        #[source]
        source: std::io::Error,
    },
}
