//! Error types for BlockClock rotation.

use thiserror::Error;

/// Errors that can occur while configuring or running a rotation.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// Device API returned an error status code
    #[error("device returned error status {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Configuration file missing, unreadable, or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Every configured device failed the liveness check
    #[error("no devices are reachable - check network settings and device addresses")]
    NoReachableDevices,

    /// A rotation run is already active
    #[error("text rotation is already running")]
    AlreadyRunning,

    /// No rotation run is active
    #[error("text rotation is not running")]
    NotRunning,

    /// Manual text sent too soon after the previous one
    #[error("please wait {retry_after_secs} seconds before sending another text")]
    RateLimited {
        /// Seconds until the next manual text is accepted
        retry_after_secs: u64,
    },

    /// JSON or YAML (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Request(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
