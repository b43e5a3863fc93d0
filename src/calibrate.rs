//! Calibrate-then-measure iteration counting
//!
//! Launch and synchronisation overheads differ per device and backend, so the
//! iteration count is derived from one short timed trial at a fixed baseline.

use std::time::Duration;

use crate::backend::Workload;
use crate::error::Result;

/// Iterations of the calibration trial
pub const BASELINE_ITERS: u32 = 256;
/// Lower clamp for the rescale factor
pub const MIN_SCALE: f64 = 0.5;
/// Upper clamp for the rescale factor
pub const MAX_SCALE: f64 = 64.0;

/// Outcome of a calibration trial
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Time of the baseline trial
    pub elapsed: Duration,
    /// Clamped rescale factor, `None` when the trial time was zero
    pub scale: Option<f64>,
    /// Iteration count for the measurement
    pub iters: u32,
}

/// Clamped rescale factor, or `None` if the calibration time is not positive.
pub fn scale_factor(target: Duration, calibration: Duration) -> Option<f64> {
    let secs = calibration.as_secs_f64();
    if secs > 0.0 {
        Some((target.as_secs_f64() / secs).clamp(MIN_SCALE, MAX_SCALE))
    } else {
        None
    }
}

/// Iteration count for a measurement that should last about `target`.
pub fn iterations_for(target: Duration, calibration: Duration) -> u32 {
    match scale_factor(target, calibration) {
        Some(scale) => ((BASELINE_ITERS as f64 * scale).round() as u32).max(1),
        None => BASELINE_ITERS,
    }
}

/// Untimed launches of one inner iteration each
pub fn warmup(workload: &mut dyn Workload, steps: u32) -> Result<()> {
    for _ in 0..steps {
        workload.run(1)?;
    }
    Ok(())
}

/// Run the baseline trial and derive the measurement iteration count
pub fn calibrate(workload: &mut dyn Workload, target: Duration) -> Result<Calibration> {
    let elapsed = workload.run(BASELINE_ITERS)?;
    let scale = scale_factor(target, elapsed);
    let iters = iterations_for(target, elapsed);
    log::debug!(
        "calibration: {} iters in {:.3} ms, scale {:?} -> {} iters",
        BASELINE_ITERS,
        elapsed.as_secs_f64() * 1e3,
        scale,
        iters
    );
    Ok(Calibration {
        elapsed,
        scale,
        iters,
    })
}
