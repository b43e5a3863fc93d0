//! Error types for the benchmark harness

use std::io;
use thiserror::Error;

use crate::backend::DeviceId;

/// Result type alias for benchmark operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Main error type for the benchmark harness
#[derive(Error, Debug)]
pub enum BenchError {
    /// Compute runtime missing or not initialised on this machine
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend initialised but reports no device
    #[error("No devices: {0}")]
    NoDevices(String),

    /// Allocation failed even at the size floor
    #[error("Out of memory on device {device} ({elements} elements)")]
    OutOfMemory { device: DeviceId, elements: usize },

    /// Driver or kernel failure
    #[error("Device error: {0}")]
    Device(String),

    /// Timed region reported a non-positive duration
    #[error("Timing error: {0}")]
    Timing(String),

    /// Every worker of a multi-device run failed
    #[error("All workers failed: {0}")]
    AllWorkersFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No backend produced a result
    #[error("No compute backend produced a result")]
    NoBackendSucceeded,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    /// Whether this error is the device's out-of-memory signal
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, BenchError::OutOfMemory { .. })
    }

    /// Whether this error means the backend does not apply on this machine
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            BenchError::BackendUnavailable(_) | BenchError::NoDevices(_)
        )
    }
}
