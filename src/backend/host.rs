// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Host CPU backend
//!
//! Runs the recurrence on the host with one scoped thread per logical CPU.
//! The whole machine is a single device. Host RAM is not reported as device
//! memory, so sizing keeps the requested length and no VRAM telemetry is
//! produced.

use std::time::{Duration, Instant};

use super::{ComputeBackend, DeviceId, MemorySnapshot, Workload};
use crate::error::{BenchError, Result};

/// Host CPU backend
pub struct HostBackend {
    threads: usize,
    cpu_name: String,
}

impl HostBackend {
    /// Create a backend using every logical CPU
    pub fn new() -> Self {
        Self::with_threads(num_cpus::get())
    }

    /// Create a backend with an explicit worker count
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            cpu_name: read_cpu_name().unwrap_or_else(|| "Host CPU".to_string()),
        }
    }

    /// Worker threads per launch
    pub fn threads(&self) -> usize {
        self.threads
    }

    fn check_device(&self, device: DeviceId) -> Result<()> {
        if device == 0 {
            Ok(())
        } else {
            Err(BenchError::Device(format!("host has no device {}", device)))
        }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn read_cpu_name() -> Option<String> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split(':').nth(1))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_name() -> Option<String> {
    None
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn list_devices(&self) -> Result<Vec<DeviceId>> {
        Ok(vec![0])
    }

    fn device_name(&self, device: DeviceId) -> Result<String> {
        self.check_device(device)?;
        Ok(format!("{} ({} threads)", self.cpu_name, self.threads))
    }

    fn query_memory(&self, _device: DeviceId) -> Option<MemorySnapshot> {
        None
    }

    fn allocate(&self, device: DeviceId, elements: usize) -> Result<Box<dyn Workload>> {
        self.check_device(device)?;
        let a = try_buffer(device, elements, |i| seed(i, 7919))?;
        let b = try_buffer(device, elements, |i| seed(i, 104729))?;
        let c = try_buffer(device, elements, |i| seed(i, 1299709))?;
        let out = try_buffer(device, elements, |_| 0.0)?;
        Ok(Box::new(HostWorkload {
            a,
            b,
            c,
            out,
            threads: self.threads,
        }))
    }
}

/// Deterministic values in [0, 1)
fn seed(i: usize, prime: usize) -> f32 {
    (i.wrapping_mul(prime) % 1024) as f32 / 1024.0
}

fn try_buffer(device: DeviceId, elements: usize, fill: impl Fn(usize) -> f32) -> Result<Vec<f32>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(elements)
        .map_err(|_| BenchError::OutOfMemory { device, elements })?;
    buf.extend((0..elements).map(fill));
    Ok(buf)
}

/// Host-resident buffers
struct HostWorkload {
    a: Vec<f32>,
    b: Vec<f32>,
    c: Vec<f32>,
    out: Vec<f32>,
    threads: usize,
}

/// `a * b + c`, fused when the target has an FMA unit.
///
/// Without one `mul_add` lowers to a libm call, so the plain multiply-add is
/// used there.
#[cfg(any(target_feature = "fma", target_arch = "aarch64"))]
#[inline(always)]
fn fma(a: f32, b: f32, c: f32) -> f32 {
    a.mul_add(b, c)
}

#[cfg(not(any(target_feature = "fma", target_arch = "aarch64")))]
#[inline(always)]
fn fma(a: f32, b: f32, c: f32) -> f32 {
    a * b + c
}

fn fma_loop(a: &[f32], b: &[f32], c: &[f32], out: &mut [f32], iters: u32) {
    for (i, o) in out.iter_mut().enumerate() {
        let (mut x, mut y, mut z) = (a[i], b[i], c[i]);
        for _ in 0..iters {
            x = fma(x, y, z);
            y = fma(y, z, x);
            z = fma(z, x, y);
        }
        *o = x + y + z;
    }
}

impl Workload for HostWorkload {
    fn len(&self) -> usize {
        self.out.len()
    }

    fn run(&mut self, iters: u32) -> Result<Duration> {
        if self.out.is_empty() {
            return Ok(Duration::ZERO);
        }
        let start = Instant::now();
        run_parallel(&self.a, &self.b, &self.c, &mut self.out, iters, self.threads);
        Ok(start.elapsed())
    }
}

/// Split the element range into one contiguous chunk per thread
fn run_parallel(a: &[f32], b: &[f32], c: &[f32], out: &mut [f32], iters: u32, threads: usize) {
    let chunk = out.len().div_ceil(threads.max(1)).max(1);
    std::thread::scope(|s| {
        for (idx, out_chunk) in out.chunks_mut(chunk).enumerate() {
            let lo = idx * chunk;
            let hi = lo + out_chunk.len();
            let (a, b, c) = (&a[lo..hi], &b[lo..hi], &c[lo..hi]);
            s.spawn(move || fma_loop(a, b, c, out_chunk, iters));
        }
    });
}
