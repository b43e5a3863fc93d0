// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! NVIDIA CUDA backend
//!
//! Uses the driver API through `cudarc` with dynamic loading, so the binary
//! starts on machines without `libcuda` and simply reports the backend as
//! unavailable. The kernel is compiled once with NVRTC and loaded into each
//! device's primary context on allocation. Launches are timed with CUDA
//! events on the context's default stream.

use std::sync::Arc;
use std::time::Duration;

use cudarc::driver::{
    result, sys, CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, DriverError,
    LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::{compile_ptx, Ptx};

use super::{ComputeBackend, DeviceId, MemorySnapshot, Workload};
use crate::error::{BenchError, Result};

const BLOCK_SIZE: u32 = 256;

const FMA_KERNEL_SRC: &str = r#"
extern "C" __global__ void seed_buffers(float* a, float* b, float* c, unsigned long long n) {
    unsigned long long i = (unsigned long long)blockIdx.x * blockDim.x + threadIdx.x;
    if (i >= n) return;
    a[i] = (float)((i * 7919ULL) % 1024ULL) / 1024.0f;
    b[i] = (float)((i * 104729ULL) % 1024ULL) / 1024.0f;
    c[i] = (float)((i * 1299709ULL) % 1024ULL) / 1024.0f;
}

extern "C" __global__ void fma_loop(const float* a, const float* b, const float* c,
                                    float* out, unsigned long long n, unsigned int iters) {
    unsigned long long i = (unsigned long long)blockIdx.x * blockDim.x + threadIdx.x;
    if (i >= n) return;
    float x = a[i], y = b[i], z = c[i];
    for (unsigned int k = 0; k < iters; ++k) {
        x = fmaf(x, y, z);
        y = fmaf(y, z, x);
        z = fmaf(z, x, y);
    }
    out[i] = x + y + z;
}
"#;

/// CUDA backend
pub struct CudaBackend {
    device_count: usize,
    ptx: Ptx,
}

impl CudaBackend {
    /// Load the driver, count devices and compile the kernel.
    pub fn new() -> Result<Self> {
        // Dynamic loading panics when libcuda is missing
        let count = std::panic::catch_unwind(CudaContext::device_count)
            .map_err(|_| BenchError::BackendUnavailable("libcuda could not be loaded".to_string()))?
            .map_err(|e| BenchError::BackendUnavailable(format!("CUDA driver: {:?}", e)))?;
        if count <= 0 {
            return Err(BenchError::NoDevices("cuda".to_string()));
        }

        let ptx = std::panic::catch_unwind(|| compile_ptx(FMA_KERNEL_SRC))
            .map_err(|_| BenchError::BackendUnavailable("libnvrtc could not be loaded".to_string()))?
            .map_err(|e| BenchError::BackendUnavailable(format!("NVRTC compile failed: {:?}", e)))?;

        log::debug!("cuda: {} device(s), kernel compiled", count);
        Ok(Self {
            device_count: count as usize,
            ptx,
        })
    }

    fn context(&self, device: DeviceId) -> Result<Arc<CudaContext>> {
        if device >= self.device_count {
            return Err(BenchError::Device(format!("cuda has no device {}", device)));
        }
        CudaContext::new(device).map_err(driver_err)
    }
}

fn driver_err(e: DriverError) -> BenchError {
    BenchError::Device(format!("CUDA driver: {:?}", e))
}

fn alloc_err(e: DriverError, device: DeviceId, elements: usize) -> BenchError {
    if e.0 == sys::cudaError_enum::CUDA_ERROR_OUT_OF_MEMORY {
        BenchError::OutOfMemory { device, elements }
    } else {
        driver_err(e)
    }
}

fn launch_config(elements: usize) -> LaunchConfig {
    let blocks = (elements as u64).div_ceil(BLOCK_SIZE as u64).max(1);
    LaunchConfig {
        grid_dim: (blocks.min(u32::MAX as u64) as u32, 1, 1),
        block_dim: (BLOCK_SIZE, 1, 1),
        shared_mem_bytes: 0,
    }
}

impl ComputeBackend for CudaBackend {
    fn name(&self) -> &str {
        "cuda"
    }

    fn list_devices(&self) -> Result<Vec<DeviceId>> {
        Ok((0..self.device_count).collect())
    }

    fn device_name(&self, device: DeviceId) -> Result<String> {
        self.context(device)?.name().map_err(driver_err)
    }

    fn query_memory(&self, device: DeviceId) -> Option<MemorySnapshot> {
        let ctx = self.context(device).ok()?;
        ctx.bind_to_thread().ok()?;
        let (free, total) = result::mem_get_info().ok()?;
        Some(MemorySnapshot {
            free_bytes: free as u64,
            total_bytes: total as u64,
        })
    }

    fn allocate(&self, device: DeviceId, elements: usize) -> Result<Box<dyn Workload>> {
        let ctx = self.context(device)?;
        let stream = ctx.default_stream();
        let module = ctx.load_module(self.ptx.clone()).map_err(driver_err)?;
        let seed = module.load_function("seed_buffers").map_err(driver_err)?;
        let function = module.load_function("fma_loop").map_err(driver_err)?;

        let mut a = stream
            .alloc_zeros::<f32>(elements)
            .map_err(|e| alloc_err(e, device, elements))?;
        let mut b = stream
            .alloc_zeros::<f32>(elements)
            .map_err(|e| alloc_err(e, device, elements))?;
        let mut c = stream
            .alloc_zeros::<f32>(elements)
            .map_err(|e| alloc_err(e, device, elements))?;
        let out = stream
            .alloc_zeros::<f32>(elements)
            .map_err(|e| alloc_err(e, device, elements))?;

        let cfg = launch_config(elements);
        let n = elements as u64;
        let mut launch = stream.launch_builder(&seed);
        launch.arg(&mut a).arg(&mut b).arg(&mut c).arg(&n);
        unsafe { launch.launch(cfg) }.map_err(driver_err)?;
        stream.synchronize().map_err(driver_err)?;

        Ok(Box::new(CudaWorkload {
            _ctx: ctx,
            stream,
            _module: module,
            function,
            cfg,
            a,
            b,
            c,
            out,
            len: elements,
        }))
    }
}

/// Buffers on one device
struct CudaWorkload {
    _ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    _module: Arc<CudaModule>,
    function: CudaFunction,
    cfg: LaunchConfig,
    a: CudaSlice<f32>,
    b: CudaSlice<f32>,
    c: CudaSlice<f32>,
    out: CudaSlice<f32>,
    len: usize,
}

impl Workload for CudaWorkload {
    fn len(&self) -> usize {
        self.len
    }

    fn run(&mut self, iters: u32) -> Result<Duration> {
        let timing = Some(sys::CUevent_flags::CU_EVENT_DEFAULT);
        let start = self.stream.record_event(timing).map_err(driver_err)?;

        let n = self.len as u64;
        let mut launch = self.stream.launch_builder(&self.function);
        launch
            .arg(&self.a)
            .arg(&self.b)
            .arg(&self.c)
            .arg(&mut self.out)
            .arg(&n)
            .arg(&iters);
        unsafe { launch.launch(self.cfg) }.map_err(driver_err)?;

        let end = self.stream.record_event(timing).map_err(driver_err)?;
        end.synchronize().map_err(driver_err)?;
        let ms = start.elapsed_ms(&end).map_err(driver_err)?;
        Ok(Duration::from_secs_f64(f64::from(ms.max(0.0)) / 1e3))
    }
}
