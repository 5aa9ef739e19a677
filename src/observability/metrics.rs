//! Metrics collection using metrics-rs.

use crate::memory::MemoryType;
use metrics::{Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const REGIONS_ALLOCATED: &str = "parallax_alloc_regions_allocated";
const REGIONS_FREED: &str = "parallax_alloc_regions_freed";
const REGIONS_SHARED: &str = "parallax_alloc_regions_shared";
const BYTES_ALLOCATED: &str = "parallax_alloc_bytes_allocated";
const REGION_SIZE_BYTES: &str = "parallax_alloc_region_size_bytes";
const ALLOCATION_FAILURES: &str = "parallax_alloc_allocation_failures";
const MAP_CONFLICTS: &str = "parallax_alloc_map_conflicts";
const POOL_SLOTS_AVAILABLE: &str = "parallax_alloc_pool_slots_available";

/// Initialize metrics descriptions.
///
/// Call this once at application startup, after installing a recorder.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        REGIONS_ALLOCATED,
        Unit::Count,
        "Total number of owning regions created"
    );
    metrics::describe_counter!(
        REGIONS_FREED,
        Unit::Count,
        "Total number of owning regions released"
    );
    metrics::describe_counter!(
        REGIONS_SHARED,
        Unit::Count,
        "Total number of zero-copy shares created"
    );
    metrics::describe_counter!(
        BYTES_ALLOCATED,
        Unit::Bytes,
        "Total backing bytes handed out"
    );
    metrics::describe_histogram!(
        REGION_SIZE_BYTES,
        Unit::Bytes,
        "Backing size of each allocated region"
    );
    metrics::describe_counter!(
        ALLOCATION_FAILURES,
        Unit::Count,
        "Allocations that returned an error"
    );
    metrics::describe_counter!(
        MAP_CONFLICTS,
        Unit::Count,
        "Map requests rejected by the mapping lock"
    );
    metrics::describe_gauge!(
        POOL_SLOTS_AVAILABLE,
        Unit::Count,
        "Available slots in pool allocators"
    );
}

/// Record a new owning region of `bytes` backing bytes.
#[inline]
pub fn record_region_allocated(mem_type: MemoryType, bytes: usize) {
    counter!(REGIONS_ALLOCATED, "mem_type" => mem_type.as_str()).increment(1);
    counter!(BYTES_ALLOCATED, "mem_type" => mem_type.as_str()).increment(bytes as u64);
    histogram!(REGION_SIZE_BYTES, "mem_type" => mem_type.as_str()).record(bytes as f64);
}

/// Record an owning region handing its backing back to the allocator.
#[inline]
pub fn record_region_freed(mem_type: MemoryType) {
    counter!(REGIONS_FREED, "mem_type" => mem_type.as_str()).increment(1);
}

/// Record a share.
#[inline]
pub fn record_region_shared(mem_type: MemoryType) {
    counter!(REGIONS_SHARED, "mem_type" => mem_type.as_str()).increment(1);
}

/// Record a failed allocation.
#[inline]
pub fn record_allocation_failure(mem_type: MemoryType) {
    counter!(ALLOCATION_FAILURES, "mem_type" => mem_type.as_str()).increment(1);
}

/// Record a map rejected because of a conflicting lock state.
#[inline]
pub fn record_map_conflict(mem_type: MemoryType) {
    counter!(MAP_CONFLICTS, "mem_type" => mem_type.as_str()).increment(1);
}

/// Record available slots of the named pool.
#[inline]
pub fn record_pool_available(pool_name: &str, available: usize) {
    gauge!(POOL_SLOTS_AVAILABLE, "pool" => pool_name.to_string()).set(available as f64);
}
