// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Benchmark runners
//!
//! [`BenchRunner::run_mono`] measures one device; [`BenchRunner::run_multi`]
//! measures every device of a backend concurrently with a shared iteration
//! count. Both return their telemetry alongside the score instead of keeping
//! "last run" state around.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::{ComputeBackend, DeviceId, MemorySnapshot, Workload};
use crate::config::BenchConfig;
use crate::error::{BenchError, Result};
use crate::sizing::{allocate_with_retry, SizingPolicy};

mod mono;
mod multi;

pub use multi::{aggregate_throughput, is_heterogeneous, DeviceMeasurement};

/// Floating-point operations per element per iteration (3 FMA x 2)
pub const FLOPS_PER_ELEMENT_ITER: f64 = 6.0;

/// Bytes per megabyte in reports
pub const BYTES_PER_MB: f64 = 1e6;

/// Device memory used by a run against what the device has
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VramUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl VramUsage {
    pub fn used_mb(&self) -> f64 {
        self.used_bytes as f64 / BYTES_PER_MB
    }

    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / BYTES_PER_MB
    }

    /// Used share of total, 0 when the total is unknown
    pub fn used_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64 * 100.0
        }
    }
}

/// What a single-device run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonoTelemetry {
    pub device: DeviceId,
    pub device_name: String,
    /// Final vector length after sizing and OOM retries
    pub elements: usize,
    pub iters: u32,
    /// Only present when the backend reported device memory
    pub vram: Option<VramUsage>,
}

/// Score of a single-device run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonoResult {
    /// FLOP/s
    pub throughput: f64,
    pub telemetry: MonoTelemetry,
}

/// One worker of a multi-device run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    pub device: DeviceId,
    pub device_name: String,
    pub elements: usize,
    pub flops: f64,
    pub elapsed_secs: f64,
    pub used_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// A worker that did not produce a measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub device: DeviceId,
    pub error: String,
}

/// What a multi-device run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiTelemetry {
    /// Iteration count shared by every device
    pub iters: u32,
    pub per_device: Vec<DeviceTelemetry>,
    pub failed: Vec<DeviceFailure>,
}

impl MultiTelemetry {
    pub fn used_bytes_sum(&self) -> u64 {
        self.per_device.iter().map(|d| d.used_bytes).sum()
    }

    pub fn total_bytes_sum(&self) -> u64 {
        self.per_device.iter().filter_map(|d| d.total_bytes).sum()
    }

    /// Summed usage, `None` when no device reported its capacity
    pub fn vram(&self) -> Option<VramUsage> {
        if self.per_device.iter().all(|d| d.total_bytes.is_none()) {
            return None;
        }
        Some(VramUsage {
            used_bytes: self.used_bytes_sum(),
            total_bytes: self.total_bytes_sum(),
        })
    }

    /// Devices with differing memory capacity
    pub fn heterogeneous(&self) -> bool {
        is_heterogeneous(self.per_device.iter().map(|d| d.total_bytes))
    }
}

/// Score of a multi-device run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiResult {
    /// Aggregate FLOP/s
    pub throughput: f64,
    pub telemetry: MultiTelemetry,
}

/// FLOP/s of `iters` iterations over `elements` elements in `elapsed`
pub fn throughput(iters: u32, elements: usize, elapsed: Duration) -> Result<f64> {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return Err(BenchError::Timing(format!(
            "measurement of {} iterations reported {:?}",
            iters, elapsed
        )));
    }
    Ok(flops(iters, elements) / secs)
}

/// Floating-point operations of one launch
pub fn flops(iters: u32, elements: usize) -> f64 {
    FLOPS_PER_ELEMENT_ITER * iters as f64 * elements as f64
}

/// Runs the benchmark protocol against one backend
#[derive(Clone, Copy)]
pub struct BenchRunner<'a> {
    backend: &'a dyn ComputeBackend,
    config: &'a BenchConfig,
}

impl<'a> BenchRunner<'a> {
    pub fn new(backend: &'a dyn ComputeBackend, config: &'a BenchConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &'a dyn ComputeBackend {
        self.backend
    }

    pub fn config(&self) -> &'a BenchConfig {
        self.config
    }

    fn policy(&self) -> SizingPolicy {
        SizingPolicy::new(self.config.vram_target)
    }

    fn target(&self) -> Result<Duration> {
        self.config.target_duration()
    }

    /// Size the workload for `device` and allocate it, halving on OOM
    fn allocate(
        &self,
        device: DeviceId,
        requested: usize,
        snapshot: Option<MemorySnapshot>,
    ) -> Result<(Box<dyn Workload>, usize)> {
        let elements = self.policy().adjust_for(requested, snapshot);
        allocate_with_retry(elements, |n| self.backend.allocate(device, n))
    }

    fn vram_line(&self, elements: usize, snapshot: MemorySnapshot) -> String {
        let used = self.policy().bytes_for(elements);
        let frac = if snapshot.total_bytes > 0 {
            used as f64 / snapshot.total_bytes as f64
        } else {
            0.0
        };
        format!(
            "VRAM target={:.1}% alloc~{:.1}% bytes={:.1}MB total={:.1}MB",
            self.config.vram_target * 100.0,
            frac * 100.0,
            used as f64 / BYTES_PER_MB,
            snapshot.total_bytes as f64 / BYTES_PER_MB
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_formula() {
        let t = throughput(100, 1000, Duration::from_secs(2)).unwrap();
        assert_eq!(t, 6.0 * 100.0 * 1000.0 / 2.0);
    }

    #[test]
    fn test_throughput_rejects_zero_time() {
        assert!(matches!(
            throughput(100, 1000, Duration::ZERO),
            Err(BenchError::Timing(_))
        ));
    }

    #[test]
    fn test_unsanitized_huge_duration_is_an_error() {
        use crate::backend::fake::{FakeBackend, FakeDevice};
        use crate::config::BenchConfig;

        let backend = FakeBackend::new(
            "fake",
            vec![
                FakeDevice::new("gpu0", Duration::from_millis(10)),
                FakeDevice::new("gpu1", Duration::from_millis(10)),
            ],
        );
        let config = BenchConfig {
            duration_secs: 1e30,
            ..BenchConfig::default()
        };
        let runner = BenchRunner::new(&backend, &config);
        assert!(matches!(runner.run_mono(0), Err(BenchError::Configuration(_))));
        assert!(matches!(
            runner.run_multi(&[0, 1]),
            Err(BenchError::Configuration(_))
        ));
        assert!(backend.allocations().is_empty());
    }

    #[test]
    fn test_vram_usage_units() {
        let usage = VramUsage {
            used_bytes: 250_000_000,
            total_bytes: 1_000_000_000,
        };
        assert_eq!(usage.used_mb(), 250.0);
        assert_eq!(usage.total_mb(), 1000.0);
        assert_eq!(usage.used_pct(), 25.0);
        let unknown = VramUsage {
            used_bytes: 10,
            total_bytes: 0,
        };
        assert_eq!(unknown.used_pct(), 0.0);
    }

    fn device(device: DeviceId, used: u64, total: Option<u64>) -> DeviceTelemetry {
        DeviceTelemetry {
            device,
            device_name: format!("dev{}", device),
            elements: (used / 16) as usize,
            flops: 1.0,
            elapsed_secs: 1.0,
            used_bytes: used,
            total_bytes: total,
        }
    }

    #[test]
    fn test_multi_telemetry_sums() {
        let telemetry = MultiTelemetry {
            iters: 256,
            per_device: vec![device(0, 100, Some(1000)), device(1, 300, Some(1000))],
            failed: vec![],
        };
        assert_eq!(
            telemetry.vram(),
            Some(VramUsage {
                used_bytes: 400,
                total_bytes: 2000
            })
        );
        assert!(!telemetry.heterogeneous());
    }

    #[test]
    fn test_multi_telemetry_without_capacity() {
        let telemetry = MultiTelemetry {
            iters: 256,
            per_device: vec![device(0, 100, None), device(1, 300, None)],
            failed: vec![],
        };
        assert_eq!(telemetry.vram(), None);
        assert!(!telemetry.heterogeneous());
    }
}
