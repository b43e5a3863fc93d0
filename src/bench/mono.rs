//! Single-device run

use crate::backend::DeviceId;
use crate::calibrate::{calibrate, warmup};
use crate::error::Result;

use super::{throughput, BenchRunner, MonoResult, MonoTelemetry, VramUsage};

impl BenchRunner<'_> {
    /// Size, allocate, warm up, calibrate and measure one device.
    pub fn run_mono(&self, device: DeviceId) -> Result<MonoResult> {
        let backend = self.backend();
        let config = self.config();

        let device_name = backend.device_name(device)?;
        let snapshot = backend.query_memory(device);
        let (mut workload, elements) = self.allocate(device, config.size, snapshot)?;

        warmup(workload.as_mut(), config.warmup_steps)?;
        let target = self.target()?;
        let cal = calibrate(workload.as_mut(), target)?;

        if config.verbose {
            log::info!(
                "BACKEND {} DEVICE_IDX {} DEVICE {}",
                backend.name(),
                device,
                device_name
            );
            if let Some(mem) = snapshot {
                log::info!("{}", self.vram_line(elements, mem));
            }
            log::info!(
                "WARMUP {} PARAM N {} ITERS {} TARGET {:.3}s",
                config.warmup_steps,
                elements,
                cal.iters,
                target.as_secs_f64()
            );
        }

        let elapsed = workload.run(cal.iters)?;
        let throughput = throughput(cal.iters, elements, elapsed)?;
        log::debug!(
            "{} dev{}: {} iters over {} elements in {:.3}s",
            backend.name(),
            device,
            cal.iters,
            elements,
            elapsed.as_secs_f64()
        );

        let vram = snapshot.map(|mem| VramUsage {
            used_bytes: self.policy().bytes_for(elements),
            total_bytes: mem.total_bytes,
        });

        Ok(MonoResult {
            throughput,
            telemetry: MonoTelemetry {
                device,
                device_name,
                elements,
                iters: cal.iters,
                vram,
            },
        })
    }
}
