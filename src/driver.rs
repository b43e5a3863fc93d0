// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Backend iteration driver
//!
//! For each backend in order: `repeats` mono trials on the first device, then
//! `repeats` multi trials across all devices. A failing backend is recorded
//! and skipped; the run as a whole only fails when no backend produced a
//! report.

use serde::{Deserialize, Serialize};

use crate::backend::{BackendKind, ComputeBackend};
use crate::bench::{BenchRunner, VramUsage};
use crate::config::BenchConfig;
use crate::error::{BenchError, Result};
use crate::stats::Stats;

/// Benchmark mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Mono,
    Multi,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Mono => "mono",
            Mode::Multi => "multi",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of all trials of one (backend, mode) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeReport {
    pub backend: String,
    pub mode: Mode,
    pub device_count: usize,
    /// Target measurement duration
    pub duration_secs: f64,
    /// Throughput of every trial in FLOP/s
    pub samples: Vec<f64>,
    pub stats: Stats,
    /// Memory telemetry of the last trial
    pub vram: Option<VramUsage>,
    pub heterogeneous: bool,
}

impl ModeReport {
    pub fn trial_count(&self) -> usize {
        self.samples.len()
    }
}

/// A backend that was skipped or aborted
#[derive(Debug)]
pub struct BackendFailure {
    pub backend: String,
    pub error: BenchError,
}

/// Everything a driver run produced
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<ModeReport>,
    pub failures: Vec<BackendFailure>,
}

/// Connect to every configured backend once, keeping the failures for the driver
pub fn connect_backends(
    config: &BenchConfig,
) -> Vec<(String, Result<Box<dyn ComputeBackend>>)> {
    config
        .backends
        .iter()
        .map(|kind: &BackendKind| (kind.as_str().to_string(), kind.connect()))
        .collect()
}

/// Where a backend run stopped
enum Step {
    /// The backend or one of its trials failed
    Backend(BenchError),
    /// The report sink failed
    Sink(BenchError),
}

impl From<BenchError> for Step {
    fn from(e: BenchError) -> Self {
        Step::Backend(e)
    }
}

/// Drives the trials of every backend
pub struct BenchDriver<'a> {
    config: &'a BenchConfig,
}

impl<'a> BenchDriver<'a> {
    pub fn new(config: &'a BenchConfig) -> Self {
        Self { config }
    }

    /// Run every backend, handing each report to `sink` as soon as it exists.
    ///
    /// Backend errors of any kind, I/O included, are collected in the summary.
    /// Only errors returned by `sink` abort the run.
    pub fn run<F>(
        &self,
        backends: Vec<(String, Result<Box<dyn ComputeBackend>>)>,
        mut sink: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(&ModeReport) -> Result<()>,
    {
        let mut summary = RunSummary::default();

        for (name, connected) in backends {
            let outcome = match connected {
                Ok(backend) => self.run_backend(backend.as_ref(), &mut sink, &mut summary),
                Err(e) => Err(Step::Backend(e)),
            };
            match outcome {
                Ok(()) => {}
                Err(Step::Sink(e)) => return Err(e),
                Err(Step::Backend(e)) => {
                    if e.is_unavailable() && !self.config.verbose {
                        log::info!("backend {} skipped: {}", name, e);
                    } else {
                        log::warn!("backend {} unavailable/failed: {}", name, e);
                    }
                    summary.failures.push(BackendFailure {
                        backend: name,
                        error: e,
                    });
                }
            }
        }

        if summary.reports.is_empty() {
            return Err(BenchError::NoBackendSucceeded);
        }
        Ok(summary)
    }

    fn run_backend<F>(
        &self,
        backend: &dyn ComputeBackend,
        sink: &mut F,
        summary: &mut RunSummary,
    ) -> std::result::Result<(), Step>
    where
        F: FnMut(&ModeReport) -> Result<()>,
    {
        let runner = BenchRunner::new(backend, self.config);
        let devices = backend.list_devices()?;
        let first = *devices
            .first()
            .ok_or_else(|| BenchError::NoDevices(backend.name().to_string()))?;

        let mut samples = Vec::with_capacity(self.config.repeats as usize);
        let mut vram = None;
        for i in 0..self.config.repeats {
            let result = runner.run_mono(first)?;
            self.log_trial(backend.name(), Mode::Mono, i, result.throughput);
            samples.push(result.throughput);
            vram = result.telemetry.vram;
        }
        self.emit(
            backend.name(),
            Mode::Mono,
            1,
            samples,
            vram,
            false,
            &mut *sink,
            summary,
        )?;

        let mut samples = Vec::with_capacity(self.config.repeats as usize);
        let mut vram = None;
        let mut heterogeneous = false;
        let mut contributing = devices.len();
        for i in 0..self.config.repeats {
            let result = runner.run_multi(&devices)?;
            self.log_trial(backend.name(), Mode::Multi, i, result.throughput);
            samples.push(result.throughput);
            vram = result.telemetry.vram();
            heterogeneous = result.telemetry.heterogeneous();
            contributing = contributing.min(result.telemetry.per_device.len());
        }
        if contributing < devices.len() {
            log::warn!(
                "{} multi: only {} of {} devices contributed to every trial",
                backend.name(),
                contributing,
                devices.len()
            );
        }
        self.emit(
            backend.name(),
            Mode::Multi,
            contributing,
            samples,
            vram,
            heterogeneous,
            &mut *sink,
            summary,
        )
    }

    fn log_trial(&self, backend: &str, mode: Mode, index: u32, score: f64) {
        if self.config.verbose {
            log::info!(
                "[{} {}] run {}/{}: {:.3}",
                backend,
                mode,
                index + 1,
                self.config.repeats,
                score
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit<F>(
        &self,
        backend: &str,
        mode: Mode,
        device_count: usize,
        samples: Vec<f64>,
        vram: Option<VramUsage>,
        heterogeneous: bool,
        sink: &mut F,
        summary: &mut RunSummary,
    ) -> std::result::Result<(), Step>
    where
        F: FnMut(&ModeReport) -> Result<()>,
    {
        let report = ModeReport {
            backend: backend.to_string(),
            mode,
            device_count,
            duration_secs: self.config.duration_secs,
            stats: Stats::from_samples(&samples),
            samples,
            vram,
            heterogeneous,
        };
        sink(&report).map_err(Step::Sink)?;
        summary.reports.push(report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, FakeDevice};
    use std::time::Duration;

    fn config(repeats: u32) -> BenchConfig {
        BenchConfig {
            duration_secs: 1.0,
            size: 1 << 18,
            repeats,
            vram_target: 0.80,
            ..BenchConfig::default()
        }
    }

    fn boxed(backend: FakeBackend) -> Result<Box<dyn ComputeBackend>> {
        Ok(Box::new(backend))
    }

    fn gpu(name: &str) -> FakeDevice {
        FakeDevice::new(name, Duration::from_millis(100)).with_memory(1_000_000_000, 800_000_000)
    }

    #[test]
    fn test_end_to_end_single_device() {
        let config = config(2);
        let backend = FakeBackend::new("fake", vec![gpu("gpu0")]);
        let mut seen = Vec::new();
        let summary = BenchDriver::new(&config)
            .run(vec![("fake".to_string(), boxed(backend))], |report| {
                seen.push((report.backend.clone(), report.mode));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                ("fake".to_string(), Mode::Mono),
                ("fake".to_string(), Mode::Multi)
            ]
        );
        assert!(summary.failures.is_empty());

        let mono = &summary.reports[0];
        assert_eq!(mono.device_count, 1);
        assert_eq!(mono.trial_count(), 2);
        assert_eq!(mono.stats.stddev, 0.0);
        let vram = mono.vram.unwrap();
        // 4 buffers * 4 bytes * 42.5M elements over 1 GB
        assert_eq!(vram.used_bytes, 4 * 4 * 42_500_000);
        assert!((vram.used_pct() - 68.0).abs() < 1e-9);
        assert!(!mono.heterogeneous);

        let multi = &summary.reports[1];
        assert_eq!(multi.mode, Mode::Multi);
        assert_eq!(multi.device_count, 1);
        assert_eq!(multi.stats.mean, mono.stats.mean);
    }

    #[test]
    fn test_multi_device_report() {
        let config = config(1);
        let backend = FakeBackend::new(
            "fake",
            vec![
                gpu("gpu0"),
                FakeDevice::new("gpu1", Duration::from_millis(100))
                    .with_memory(2_000_000_000, 1_600_000_000),
            ],
        );
        let summary = BenchDriver::new(&config)
            .run(vec![("fake".to_string(), boxed(backend))], |_| Ok(()))
            .unwrap();
        let multi = &summary.reports[1];
        assert_eq!(multi.device_count, 2);
        assert!(multi.heterogeneous);
        let vram = multi.vram.unwrap();
        assert_eq!(vram.total_bytes, 3_000_000_000);
        assert_eq!(vram.used_bytes, 16 * (42_500_000 + 85_000_000));
    }

    #[test]
    fn test_failed_backend_does_not_stop_run() {
        let config = config(1);
        let backends = vec![
            (
                "missing".to_string(),
                Err(BenchError::BackendUnavailable("not installed".into())),
            ),
            (
                "empty".to_string(),
                boxed(FakeBackend::new("empty", Vec::new())),
            ),
            ("fake".to_string(), boxed(FakeBackend::new("fake", vec![gpu("gpu0")]))),
        ];
        let summary = BenchDriver::new(&config).run(backends, |_| Ok(())).unwrap();
        assert_eq!(summary.reports.len(), 2);
        let failed: Vec<&str> = summary
            .failures
            .iter()
            .map(|f| f.backend.as_str())
            .collect();
        assert_eq!(failed, vec!["missing", "empty"]);
        assert!(matches!(
            summary.failures[1].error,
            BenchError::NoDevices(_)
        ));
    }

    #[test]
    fn test_mono_report_survives_multi_failure() {
        let config = config(1);
        // one allocation for the mono trial, the multi reference fails
        let backend = FakeBackend::new(
            "fake",
            vec![
                FakeDevice::new("gpu0", Duration::from_millis(100)).with_max_allocations(1),
                FakeDevice::new("gpu1", Duration::from_millis(100)),
            ],
        );
        let summary = BenchDriver::new(&config)
            .run(vec![("fake".to_string(), boxed(backend))], |_| Ok(()))
            .unwrap();
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].mode, Mode::Mono);
        assert_eq!(summary.failures.len(), 1);
    }

    #[test]
    fn test_no_backend_succeeded() {
        let config = config(1);
        let backends = vec![(
            "broken".to_string(),
            boxed(FakeBackend::new(
                "broken",
                vec![FakeDevice::new("gpu0", Duration::from_millis(1)).broken()],
            )),
        )];
        let err = BenchDriver::new(&config).run(backends, |_| Ok(())).unwrap_err();
        assert!(matches!(err, BenchError::NoBackendSucceeded));
    }

    #[test]
    fn test_sink_error_aborts() {
        let config = config(1);
        let backends = vec![("fake".to_string(), boxed(FakeBackend::new("fake", vec![gpu("gpu0")])))];
        let err = BenchDriver::new(&config)
            .run(backends, |_| {
                Err(BenchError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )))
            })
            .unwrap_err();
        assert!(matches!(err, BenchError::Io(_)));
    }

    #[test]
    fn test_backend_io_error_is_a_failure() {
        let config = config(1);
        let backends = vec![
            (
                "flaky".to_string(),
                boxed(FakeBackend::new(
                    "flaky",
                    vec![FakeDevice::new("gpu0", Duration::from_millis(100)).with_io_error()],
                )),
            ),
            ("fake".to_string(), boxed(FakeBackend::new("fake", vec![gpu("gpu0")]))),
        ];
        let summary = BenchDriver::new(&config).run(backends, |_| Ok(())).unwrap();
        assert_eq!(summary.reports.len(), 2);
        assert!(summary.reports.iter().all(|r| r.backend == "fake"));
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].backend, "flaky");
        assert!(matches!(summary.failures[0].error, BenchError::Io(_)));
    }

    #[test]
    fn test_multi_device_count_excludes_failed_workers() {
        let config = config(2);
        let backend = FakeBackend::new(
            "fake",
            vec![
                gpu("gpu0"),
                gpu("gpu1"),
                FakeDevice::new("gpu2", Duration::from_millis(100)).broken(),
            ],
        );
        let summary = BenchDriver::new(&config)
            .run(vec![("fake".to_string(), boxed(backend))], |_| Ok(()))
            .unwrap();
        let multi = &summary.reports[1];
        assert_eq!(multi.mode, Mode::Multi);
        assert_eq!(multi.device_count, 2);
        assert_eq!(multi.trial_count(), 2);
        assert_eq!(multi.vram.unwrap().total_bytes, 2_000_000_000);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Mono.to_string(), "mono");
        assert_eq!(Mode::Multi.to_string(), "multi");
        assert_eq!(serde_json::to_string(&Mode::Multi).unwrap(), "\"multi\"");
    }
}
