//! Working-set sizing under memory pressure
//!
//! The requested vector length is grown toward a fraction of device memory,
//! then allocation is retried with halved lengths on out-of-memory until the
//! floor of 2^18 elements is reached.

use crate::backend::MemorySnapshot;
use crate::error::Result;

/// Smallest vector length the retry loop will halve down to
pub const MIN_ELEMENTS: usize = 1 << 18;
/// Buffers per workload (a, b, c, out)
pub const BUFFER_COUNT: usize = 4;
/// Bytes per f32 element
pub const ELEMENT_BYTES: usize = std::mem::size_of::<f32>();
/// Extra fraction allowed on the free-memory bound
pub const FREE_MEMORY_CUSHION: f64 = 0.05;

/// Sizing policy for one workload shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingPolicy {
    pub buffer_count: usize,
    pub element_bytes: usize,
    pub target_fraction: f64,
}

impl SizingPolicy {
    /// Four f32 buffers at the given target fraction
    pub fn new(target_fraction: f64) -> Self {
        Self {
            buffer_count: BUFFER_COUNT,
            element_bytes: ELEMENT_BYTES,
            target_fraction,
        }
    }

    /// Bytes used by one workload of `elements` elements
    pub fn bytes_for(&self, elements: usize) -> u64 {
        (self.buffer_count * self.element_bytes) as u64 * elements as u64
    }

    /// Adjusted element count for a device with the given memory.
    ///
    /// Unknown (zero) memory returns the request unchanged. The result is
    /// never smaller than the request.
    pub fn adjust(&self, requested: usize, total_bytes: u64, free_bytes: u64) -> usize {
        let base = if requested == 0 { MIN_ELEMENTS } else { requested };
        if total_bytes == 0 || free_bytes == 0 {
            return base;
        }

        let budget = (self.target_fraction * total_bytes as f64)
            .min((self.target_fraction + FREE_MEMORY_CUSHION) * free_bytes as f64);
        let bytes_per_element = (self.buffer_count * self.element_bytes).max(1) as f64;
        if budget <= 0.0 {
            return base;
        }

        let target = (budget / bytes_per_element).floor() as usize;
        target.max(base)
    }

    /// [`adjust`](Self::adjust) against an optional snapshot
    pub fn adjust_for(&self, requested: usize, snapshot: Option<MemorySnapshot>) -> usize {
        match snapshot {
            Some(mem) => self.adjust(requested, mem.total_bytes, mem.free_bytes),
            None => self.adjust(requested, 0, 0),
        }
    }
}

/// Free-function form of the sizing policy
pub fn adjust_size(
    requested: usize,
    total_bytes: u64,
    free_bytes: u64,
    buffer_count: usize,
    element_bytes: usize,
    target_fraction: f64,
) -> usize {
    SizingPolicy {
        buffer_count,
        element_bytes,
        target_fraction,
    }
    .adjust(requested, total_bytes, free_bytes)
}

/// Number of allocation attempts needed to walk `elements` down to the floor
pub fn retry_budget(elements: usize) -> u32 {
    let mut attempts = 1;
    let mut n = elements;
    while n > MIN_ELEMENTS {
        n /= 2;
        attempts += 1;
    }
    attempts
}

/// Run `allocate` with halving retries on out-of-memory.
///
/// Returns the allocation and the element count that succeeded. Errors other
/// than out-of-memory, and out-of-memory at or below the floor, propagate.
pub fn allocate_with_retry<T, F>(elements: usize, mut allocate: F) -> Result<(T, usize)>
where
    F: FnMut(usize) -> Result<T>,
{
    let mut n = elements;
    let budget = retry_budget(elements);
    let mut attempt = 1;
    loop {
        match allocate(n) {
            Ok(value) => return Ok((value, n)),
            Err(e) if e.is_out_of_memory() && n > MIN_ELEMENTS && attempt < budget => {
                log::warn!("allocation of {} elements failed ({}), retrying with {}", n, e, n / 2);
                n /= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
