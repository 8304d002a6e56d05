// Cardiac Node — Errors
//
// Error types for the node's collaborators.

use thiserror::Error;

/// Pulse-oximeter / ECG front-end failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("sensor not detected (part id {0:#04x})")]
    NotDetected(u8),

    #[error("sensor bus error: {0}")]
    Bus(String),

    #[error("sensor init failed after {0} attempts")]
    InitFailed(u32),
}

/// Wi-Fi link, scan and time-sync failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("no credentials configured")]
    NoCredentials,

    #[error("wifi driver error: {0}")]
    Driver(String),

    #[error("scan could not be started: {0}")]
    Scan(String),

    #[error("time sync could not be started: {0}")]
    TimeSync(String),
}

/// Credential store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored value for '{0}' is not valid UTF-8")]
    InvalidData(String),
}

/// Failures of a single HTTP submission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network not ready")]
    NotReady,

    #[error("network error: {0}")]
    Network(String),
}

/// The window could not be turned into a request body.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload of {0} bytes exceeds the {1} byte limit")]
    TooLarge(usize, usize),
}
