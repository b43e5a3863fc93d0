//! Scripted backend for tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ComputeBackend, DeviceId, MemorySnapshot, Workload};
use crate::error::{BenchError, Result};
use crate::sizing::SizingPolicy;

/// One scripted device
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub name: String,
    pub memory: Option<MemorySnapshot>,
    /// Reported time of every launch
    pub elapsed: Duration,
    /// Allocations above this many elements fail with out-of-memory
    pub oom_above: Option<usize>,
    /// Allocations fail with a device error
    pub broken: bool,
    /// Allocations after this many fail with a device error
    pub max_allocations: Option<usize>,
    /// Allocations fail with an I/O error
    pub io_error: bool,
}

impl FakeDevice {
    pub fn new(name: &str, elapsed: Duration) -> Self {
        Self {
            name: name.to_string(),
            memory: None,
            elapsed,
            oom_above: None,
            broken: false,
            max_allocations: None,
            io_error: false,
        }
    }

    pub fn with_memory(mut self, total_bytes: u64, free_bytes: u64) -> Self {
        self.memory = Some(MemorySnapshot {
            free_bytes,
            total_bytes,
        });
        self
    }

    pub fn with_oom_above(mut self, elements: usize) -> Self {
        self.oom_above = Some(elements);
        self
    }

    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn with_max_allocations(mut self, count: usize) -> Self {
        self.max_allocations = Some(count);
        self
    }

    pub fn with_io_error(mut self) -> Self {
        self.io_error = true;
        self
    }
}

/// Bytes held by live workloads, per device
type LiveBytes = Arc<Mutex<HashMap<DeviceId, u64>>>;

/// Scripted backend
pub struct FakeBackend {
    name: String,
    devices: Vec<FakeDevice>,
    allocations: Mutex<Vec<(DeviceId, usize)>>,
    launches: Arc<Mutex<Vec<(DeviceId, u32)>>>,
    live: LiveBytes,
}

impl FakeBackend {
    pub fn new(name: &str, devices: Vec<FakeDevice>) -> Self {
        Self {
            name: name.to_string(),
            devices,
            allocations: Mutex::new(Vec::new()),
            launches: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bytes currently held by workloads on `device`
    pub fn live_bytes(&self, device: DeviceId) -> u64 {
        self.live.lock().unwrap().get(&device).copied().unwrap_or(0)
    }

    /// Every attempted allocation, successful or not
    pub fn allocations(&self) -> Vec<(DeviceId, usize)> {
        self.allocations.lock().unwrap().clone()
    }

    /// Every launch as (device, iters)
    pub fn launches(&self) -> Vec<(DeviceId, u32)> {
        self.launches.lock().unwrap().clone()
    }

    fn device(&self, device: DeviceId) -> Result<&FakeDevice> {
        self.devices
            .get(device)
            .ok_or_else(|| BenchError::Device(format!("no fake device {}", device)))
    }
}

impl ComputeBackend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_devices(&self) -> Result<Vec<DeviceId>> {
        if self.devices.is_empty() {
            return Err(BenchError::NoDevices(self.name.clone()));
        }
        Ok((0..self.devices.len()).collect())
    }

    fn device_name(&self, device: DeviceId) -> Result<String> {
        Ok(self.device(device)?.name.clone())
    }

    /// Scripted free memory minus what live workloads hold
    fn query_memory(&self, device: DeviceId) -> Option<MemorySnapshot> {
        let mut mem = self.devices.get(device).and_then(|d| d.memory)?;
        mem.free_bytes = mem.free_bytes.saturating_sub(self.live_bytes(device));
        Some(mem)
    }

    fn allocate(&self, device: DeviceId, elements: usize) -> Result<Box<dyn Workload>> {
        let scripted = self.device(device)?;
        let previous = {
            let mut allocations = self.allocations.lock().unwrap();
            let previous = allocations.iter().filter(|&&(d, _)| d == device).count();
            allocations.push((device, elements));
            previous
        };
        if scripted.max_allocations.is_some_and(|limit| previous >= limit) {
            return Err(BenchError::Device(format!("{} lost its context", scripted.name)));
        }
        if scripted.broken {
            return Err(BenchError::Device(format!("{} is broken", scripted.name)));
        }
        if scripted.io_error {
            return Err(BenchError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} driver node went away", scripted.name),
            )));
        }
        if scripted.oom_above.is_some_and(|limit| elements > limit) {
            return Err(BenchError::OutOfMemory { device, elements });
        }
        let bytes = workload_bytes(elements);
        *self.live.lock().unwrap().entry(device).or_insert(0) += bytes;
        Ok(Box::new(FakeWorkload {
            device,
            len: elements,
            elapsed: scripted.elapsed,
            launches: Arc::clone(&self.launches),
            live: Arc::clone(&self.live),
        }))
    }
}

fn workload_bytes(elements: usize) -> u64 {
    SizingPolicy::new(0.0).bytes_for(elements)
}

/// Workload that reports a fixed time per launch
pub struct FakeWorkload {
    device: DeviceId,
    len: usize,
    elapsed: Duration,
    launches: Arc<Mutex<Vec<(DeviceId, u32)>>>,
    live: LiveBytes,
}

impl FakeWorkload {
    pub fn new(len: usize, elapsed: Duration) -> Self {
        let live: LiveBytes = Arc::new(Mutex::new(HashMap::new()));
        live.lock().unwrap().insert(0, workload_bytes(len));
        Self {
            device: 0,
            len,
            elapsed,
            launches: Arc::new(Mutex::new(Vec::new())),
            live,
        }
    }

    /// Iteration counts of every launch so far
    pub fn launches(&self) -> Vec<u32> {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .map(|&(_, iters)| iters)
            .collect()
    }
}

impl Workload for FakeWorkload {
    fn len(&self) -> usize {
        self.len
    }

    fn run(&mut self, iters: u32) -> Result<Duration> {
        self.launches.lock().unwrap().push((self.device, iters));
        Ok(self.elapsed)
    }
}

impl Drop for FakeWorkload {
    fn drop(&mut self) {
        if let Ok(mut live) = self.live.lock() {
            if let Some(held) = live.get_mut(&self.device) {
                *held = held.saturating_sub(workload_bytes(self.len));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_workload_reduces_free_memory() {
        let backend = FakeBackend::new(
            "fake",
            vec![FakeDevice::new("gpu0", Duration::from_millis(1))
                .with_memory(1_000_000_000, 800_000_000)],
        );
        let workload = backend.allocate(0, 10_000_000).unwrap();
        assert_eq!(backend.live_bytes(0), 160_000_000);
        assert_eq!(backend.query_memory(0).unwrap().free_bytes, 640_000_000);
        assert_eq!(backend.query_memory(0).unwrap().total_bytes, 1_000_000_000);

        drop(workload);
        assert_eq!(backend.live_bytes(0), 0);
        assert_eq!(backend.query_memory(0).unwrap().free_bytes, 800_000_000);
    }

    #[test]
    fn test_failed_allocation_holds_nothing() {
        let backend = FakeBackend::new(
            "fake",
            vec![FakeDevice::new("gpu0", Duration::from_millis(1))
                .with_memory(1_000_000_000, 800_000_000)
                .with_oom_above(1)],
        );
        assert!(backend.allocate(0, 1024).err().unwrap().is_out_of_memory());
        assert_eq!(backend.live_bytes(0), 0);
    }

    #[test]
    fn test_io_error_device() {
        let backend = FakeBackend::new(
            "fake",
            vec![FakeDevice::new("gpu0", Duration::from_millis(1)).with_io_error()],
        );
        assert!(matches!(backend.allocate(0, 1024), Err(BenchError::Io(_))));
    }
}
