// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Concurrent multi-device run
//!
//! The iteration count is calibrated once on the first device, then every
//! device runs the same count on its own thread. Aggregate throughput is the
//! summed work over the slowest device's time.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::backend::DeviceId;
use crate::calibrate::{calibrate, warmup};
use crate::error::{BenchError, Result};

use super::{
    flops, BenchRunner, DeviceFailure, DeviceTelemetry, MultiResult, MultiTelemetry,
};

/// Work done by one device and how long it took
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceMeasurement {
    pub device: DeviceId,
    pub flops: f64,
    pub elapsed: Duration,
}

/// Summed FLOPs over the longest elapsed time
pub fn aggregate_throughput(measurements: &[DeviceMeasurement]) -> Result<f64> {
    if measurements.is_empty() {
        return Err(BenchError::AllWorkersFailed(
            "no device measurements".to_string(),
        ));
    }
    let total_flops: f64 = measurements.iter().map(|m| m.flops).sum();
    let slowest = measurements
        .iter()
        .map(|m| m.elapsed.as_secs_f64())
        .fold(0.0f64, f64::max);
    if slowest <= 0.0 {
        return Err(BenchError::Timing(
            "all devices reported zero elapsed time".to_string(),
        ));
    }
    Ok(total_flops / slowest)
}

/// More than one distinct known capacity. Unknown entries are ignored.
pub fn is_heterogeneous<I>(totals: I) -> bool
where
    I: IntoIterator<Item = Option<u64>>,
{
    totals.into_iter().flatten().collect::<BTreeSet<_>>().len() > 1
}

impl BenchRunner<'_> {
    /// Measure every device in `devices` concurrently.
    ///
    /// A single device degrades to [`run_mono`](Self::run_mono). Workers that
    /// fail are reported in the telemetry; the run only fails when none
    /// succeeded.
    pub fn run_multi(&self, devices: &[DeviceId]) -> Result<MultiResult> {
        let backend = self.backend();
        let config = self.config();

        let reference = match devices {
            [] => return Err(BenchError::NoDevices(backend.name().to_string())),
            [only] => return self.single_device_multi(*only),
            [first, ..] => *first,
        };

        let target = self.target()?;
        let iters = {
            let snapshot = backend.query_memory(reference);
            let (mut workload, _) = self.allocate(reference, config.size, snapshot)?;
            warmup(workload.as_mut(), config.warmup_steps)?;
            // reference buffers are released before the workers allocate
            calibrate(workload.as_mut(), target)?.iters
        };

        let outcomes: Vec<Result<(DeviceTelemetry, DeviceMeasurement)>> =
            std::thread::scope(|s| {
                let handles: Vec<_> = devices
                    .iter()
                    .map(|&device| s.spawn(move || self.measure_device(device, iters)))
                    .collect();
                handles
                    .into_iter()
                    .zip(devices)
                    .map(|(handle, &device)| {
                        handle.join().unwrap_or_else(|_| {
                            Err(BenchError::Device(format!(
                                "worker for device {} panicked",
                                device
                            )))
                        })
                    })
                    .collect()
            });

        let mut per_device = Vec::with_capacity(devices.len());
        let mut measurements = Vec::with_capacity(devices.len());
        let mut failed = Vec::new();
        for (outcome, &device) in outcomes.into_iter().zip(devices) {
            match outcome {
                Ok((telemetry, measurement)) => {
                    per_device.push(telemetry);
                    measurements.push(measurement);
                }
                Err(e) => failed.push(DeviceFailure {
                    device,
                    error: e.to_string(),
                }),
            }
        }

        if measurements.is_empty() {
            let reasons: Vec<String> = failed
                .iter()
                .map(|f| format!("dev{}: {}", f.device, f.error))
                .collect();
            return Err(BenchError::AllWorkersFailed(reasons.join("; ")));
        }
        for failure in &failed {
            log::warn!(
                "{} multi: device {} excluded from aggregate: {}",
                backend.name(),
                failure.device,
                failure.error
            );
        }

        let throughput = aggregate_throughput(&measurements)?;
        if config.verbose {
            let names: Vec<&str> = per_device.iter().map(|d| d.device_name.as_str()).collect();
            log::info!(
                "BACKEND {} DEVICES {:?} NAMES {:?} WARMUP {} ITERS {} TARGET {:.3}s",
                backend.name(),
                devices,
                names,
                config.warmup_steps,
                iters,
                target.as_secs_f64()
            );
        }

        Ok(MultiResult {
            throughput,
            telemetry: MultiTelemetry {
                iters,
                per_device,
                failed,
            },
        })
    }

    fn single_device_multi(&self, device: DeviceId) -> Result<MultiResult> {
        let mono = self.run_mono(device)?;
        let t = mono.telemetry;
        let elapsed_secs = if mono.throughput > 0.0 {
            flops(t.iters, t.elements) / mono.throughput
        } else {
            0.0
        };
        Ok(MultiResult {
            throughput: mono.throughput,
            telemetry: MultiTelemetry {
                iters: t.iters,
                per_device: vec![DeviceTelemetry {
                    device,
                    flops: flops(t.iters, t.elements),
                    elapsed_secs,
                    used_bytes: self.policy().bytes_for(t.elements),
                    total_bytes: t.vram.map(|v| v.total_bytes),
                    device_name: t.device_name,
                    elements: t.elements,
                }],
                failed: Vec::new(),
            },
        })
    }

    /// Worker body: size and allocate on `device`, warm up, run `iters`.
    fn measure_device(
        &self,
        device: DeviceId,
        iters: u32,
    ) -> Result<(DeviceTelemetry, DeviceMeasurement)> {
        let backend = self.backend();
        let config = self.config();

        let device_name = backend
            .device_name(device)
            .unwrap_or_else(|_| format!("device {}", device));
        let snapshot = backend.query_memory(device);
        let (mut workload, elements) = self.allocate(device, config.size, snapshot)?;
        if config.verbose {
            match snapshot {
                Some(mem) => log::info!(
                    "{} dev{} multi {} N={}",
                    backend.name(),
                    device,
                    self.vram_line(elements, mem),
                    elements
                ),
                None => log::info!("{} dev{} multi N={}", backend.name(), device, elements),
            }
        }

        warmup(workload.as_mut(), config.warmup_steps)?;
        let elapsed = workload.run(iters)?;
        let work = flops(iters, elements);

        Ok((
            DeviceTelemetry {
                device,
                device_name,
                elements,
                flops: work,
                elapsed_secs: elapsed.as_secs_f64(),
                used_bytes: self.policy().bytes_for(elements),
                total_bytes: snapshot.map(|m| m.total_bytes),
            },
            DeviceMeasurement {
                device,
                flops: work,
                elapsed,
            },
        ))
    }
}
