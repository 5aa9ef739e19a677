//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! All metrics carry a `mem_type` label (`SystemMemory`, `PoolMemory`, or the
//! name of a custom allocator), except the pool gauge, which is labelled with
//! the pool name.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `parallax_alloc_regions_allocated` | Counter | Owning regions created |
//! | `parallax_alloc_regions_freed` | Counter | Owning regions released |
//! | `parallax_alloc_regions_shared` | Counter | Shares created |
//! | `parallax_alloc_bytes_allocated` | Counter | Backing bytes handed out |
//! | `parallax_alloc_region_size_bytes` | Histogram | Backing size per region |
//! | `parallax_alloc_allocation_failures` | Counter | Failed allocations |
//! | `parallax_alloc_map_conflicts` | Counter | Maps rejected by the lock |
//! | `parallax_alloc_pool_slots_available` | Gauge | Free pool slots |
//!
//! ## Tracing
//!
//! Region creation and release are logged at `trace` level; registry
//! mutations and pool exhaustion at `debug`.
//!
//! ## Example
//!
//! ```rust
//! use parallax_alloc::observability::init_metrics;
//!
//! // Initialize metrics (call once at startup)
//! init_metrics();
//!
//! // Metrics are recorded automatically; install an exporter
//! // (prometheus, statsd, etc.) to collect them.
//! ```

mod metrics;

pub use self::metrics::{
    init_metrics, record_allocation_failure, record_map_conflict, record_pool_available,
    record_region_allocated, record_region_freed, record_region_shared,
};
