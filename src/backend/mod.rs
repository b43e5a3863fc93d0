//! Compute backends
//!
//! Each backend is one vendor runtime able to enumerate devices, place the
//! four benchmark vectors on a device and run the fused-multiply-add
//! recurrence over them:
//!
//! ```text
//! x = fma(x, y, z); y = fma(y, z, x); z = fma(z, x, y)   // `iters` times
//! out = x + y + z
//! ```
//!
//! Backends form a closed set ([`BackendKind`]). Availability is resolved once
//! with [`BackendKind::connect`]; the runners only ever see the
//! [`ComputeBackend`] trait.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BenchError, Result};

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod host;

#[cfg(test)]
pub(crate) mod fake;

/// Backend-specific device index
pub type DeviceId = usize;

/// Device memory at one point in time (best effort, not a reservation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

/// Four equal-length f32 buffers resident on one device.
///
/// Dropping the workload frees the buffers.
pub trait Workload {
    /// Elements per buffer
    fn len(&self) -> usize;

    /// Run `iters` iterations of the recurrence over every element and wait
    /// for the device to finish. Returns the time of the timed region.
    fn run(&mut self, iters: u32) -> Result<Duration>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capabilities every backend provides
pub trait ComputeBackend: Send + Sync {
    /// Short backend name used in reports
    fn name(&self) -> &str;

    /// Devices the runtime reports
    fn list_devices(&self) -> Result<Vec<DeviceId>>;

    /// Human-readable device name
    fn device_name(&self, device: DeviceId) -> Result<String>;

    /// Free/total memory of a device, `None` if the backend cannot tell
    fn query_memory(&self, device: DeviceId) -> Option<MemorySnapshot>;

    /// Allocate and initialise the four buffers on `device`.
    ///
    /// Fails with [`BenchError::OutOfMemory`] when the device cannot hold them.
    fn allocate(&self, device: DeviceId, elements: usize) -> Result<Box<dyn Workload>>;
}

/// The backends this harness knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// NVIDIA CUDA (driver API + NVRTC)
    Cuda,
    /// Host CPU threads
    Host,
}

impl BackendKind {
    /// Every backend, in the order they are tried
    pub const ALL: [BackendKind; 2] = [BackendKind::Cuda, BackendKind::Host];

    /// Short name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Host => "host",
        }
    }

    /// Initialise the backend if its runtime is present.
    pub fn connect(&self) -> Result<Box<dyn ComputeBackend>> {
        match self {
            #[cfg(feature = "cuda")]
            Self::Cuda => Ok(Box::new(cuda::CudaBackend::new()?)),
            #[cfg(not(feature = "cuda"))]
            Self::Cuda => Err(BenchError::BackendUnavailable(
                "cuda support not compiled in (enable the `cuda` feature)".to_string(),
            )),
            Self::Host => Ok(Box::new(host::HostBackend::new())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cuda" | "nvidia" => Ok(Self::Cuda),
            "host" | "cpu" => Ok(Self::Host),
            other => Err(BenchError::Configuration(format!(
                "unknown backend '{}', expected one of: cuda, host",
                other
            ))),
        }
    }
}
