//! fma-bench: compute throughput micro-benchmark
//!
//! Runs a fused-multiply-add kernel over four f32 vectors on every available
//! compute backend, first on a single device and then on all devices at once,
//! and reports FLOP/s statistics over repeated trials.
//!
//! # Pipeline
//!
//! 1. [`sizing`] grows the requested vector length toward a fraction of device
//!    memory and halves it again on out-of-memory.
//! 2. [`calibrate`] times a fixed baseline launch and scales the iteration
//!    count toward the target duration.
//! 3. [`bench`] measures one device ([`BenchRunner::run_mono`]) or all of them
//!    concurrently ([`BenchRunner::run_multi`]).
//! 4. [`driver`] repeats both modes per backend and reduces the samples with
//!    [`stats`]; [`report`] writes the results file.
//!
//! # Example
//!
//! ```no_run
//! use fmalib::{BenchConfig, BenchDriver, driver::connect_backends};
//!
//! let config = BenchConfig::default();
//! let summary = BenchDriver::new(&config)
//!     .run(connect_backends(&config), |report| {
//!         println!("{} {}: {:.3}", report.backend, report.mode, report.stats.mean);
//!         Ok(())
//!     })?;
//! println!("{} reports", summary.reports.len());
//! # Ok::<(), fmalib::BenchError>(())
//! ```

pub mod backend;
pub mod bench;
pub mod calibrate;
pub mod config;
pub mod driver;
pub mod error;
pub mod report;
pub mod sizing;
pub mod stats;

pub use backend::{BackendKind, ComputeBackend, DeviceId, MemorySnapshot, Workload};
pub use bench::{BenchRunner, MonoResult, MultiResult, VramUsage};
pub use config::BenchConfig;
pub use driver::{BenchDriver, Mode, ModeReport, RunSummary};
pub use error::{BenchError, Result};
pub use report::ResultsCsv;
pub use sizing::{adjust_size, SizingPolicy};
pub use stats::Stats;
