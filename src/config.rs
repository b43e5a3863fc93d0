// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Benchmark configuration
//!
//! Loaded from an optional TOML file, then overridden by command-line flags.
//! The configuration is built before any benchmark runs and only read while
//! devices are busy, so it is shared by reference with the worker threads.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::BackendKind;
use crate::error::{BenchError, Result};

/// Default fraction of device memory the four buffers should occupy
pub const DEFAULT_VRAM_TARGET: f64 = 0.80;
/// Accepted range for the VRAM target fraction
pub const VRAM_TARGET_RANGE: (f64, f64) = (0.05, 0.95);
/// Default number of untimed warmup launches
pub const DEFAULT_WARMUP_STEPS: u32 = 3;
/// Upper bound for the warmup override
pub const MAX_WARMUP_STEPS: u32 = 50;

/// Benchmark configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BenchConfig {
    /// Target wall-clock duration of one measurement, in seconds
    pub duration_secs: f64,
    /// Requested vector length (may be grown by sizing, halved on OOM)
    pub size: usize,
    /// Trials per (backend, mode)
    pub repeats: u32,
    /// Fraction of device memory to fill
    pub vram_target: f64,
    /// Untimed warmup launches before calibration
    pub warmup_steps: u32,
    /// Emit per-device diagnostics
    pub verbose: bool,
    /// Directory holding `gpu_<node>.csv`
    pub csv_dir: PathBuf,
    /// Node id for the CSV (hostname when unset)
    pub node: Option<String>,
    /// Backends to try, in order
    pub backends: Vec<BackendKind>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            duration_secs: 3.0,
            size: 1 << 23,
            repeats: 5,
            vram_target: DEFAULT_VRAM_TARGET,
            warmup_steps: DEFAULT_WARMUP_STEPS,
            verbose: false,
            csv_dir: PathBuf::from("outputs"),
            node: None,
            backends: BackendKind::ALL.to_vec(),
        }
    }
}

impl BenchConfig {
    /// Load from TOML file
    pub fn from_toml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BenchError::Configuration(format!("Cannot read {}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| BenchError::Configuration(format!("TOML parse error: {}", e)))?;
        config.sanitize()?;
        Ok(config)
    }

    /// Override the VRAM target fraction.
    ///
    /// Values outside [0.05, 0.95] are ignored and the previous target is
    /// kept. Returns whether the value was accepted.
    pub fn set_vram_target(&mut self, fraction: f64) -> bool {
        let (lo, hi) = VRAM_TARGET_RANGE;
        if (lo..=hi).contains(&fraction) {
            self.vram_target = fraction;
            true
        } else {
            false
        }
    }

    /// Override the warmup step count (0..=50); out-of-range values are ignored.
    pub fn set_warmup_steps(&mut self, steps: u32) -> bool {
        if steps <= MAX_WARMUP_STEPS {
            self.warmup_steps = steps;
            true
        } else {
            false
        }
    }

    /// Validate values that came from a file.
    pub fn sanitize(&mut self) -> Result<()> {
        let requested = self.vram_target;
        self.vram_target = DEFAULT_VRAM_TARGET;
        if !self.set_vram_target(requested) {
            log::warn!(
                "vram_target {} outside [{}, {}], using {}",
                requested,
                VRAM_TARGET_RANGE.0,
                VRAM_TARGET_RANGE.1,
                DEFAULT_VRAM_TARGET
            );
        }

        let requested = self.warmup_steps;
        self.warmup_steps = DEFAULT_WARMUP_STEPS;
        if !self.set_warmup_steps(requested) {
            log::warn!(
                "warmup_steps {} above {}, using {}",
                requested,
                MAX_WARMUP_STEPS,
                DEFAULT_WARMUP_STEPS
            );
        }

        self.target_duration()?;
        if self.repeats == 0 {
            return Err(BenchError::Configuration(
                "repeats must be at least 1".to_string(),
            ));
        }
        if self.backends.is_empty() {
            return Err(BenchError::Configuration(
                "at least one backend is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Measurement target as a `Duration`; rejects non-positive and
    /// unrepresentable values.
    pub fn target_duration(&self) -> Result<Duration> {
        match Duration::try_from_secs_f64(self.duration_secs) {
            Ok(target) if !target.is_zero() => Ok(target),
            _ => Err(BenchError::Configuration(format!(
                "duration_secs must be a positive number of seconds, got {}",
                self.duration_secs
            ))),
        }
    }

    /// Node id used in the CSV file name and rows
    pub fn node_name(&self) -> String {
        if let Some(node) = self.node.as_deref().filter(|n| !n.is_empty()) {
            return node.to_string();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .and_then(|h| h.split('.').next().map(str::to_string))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Generate sample config
    pub fn sample_toml() -> String {
        r#"# fmabench configuration
duration_secs = 3.0
size = 8388608
repeats = 5
# Fraction of device memory filled by the a/b/c/out buffers (0.05 - 0.95)
vram_target = 0.80
# Untimed warmup launches before calibration (0 - 50)
warmup_steps = 3
verbose = false
csv_dir = "outputs"
# node = "gpu-node-01"
backends = ["cuda", "host"]
"#
        .into()
    }
}
