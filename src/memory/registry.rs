//! Named allocator registry.

use super::defaults::SYSTEM_MEMORY;
use super::{AllocationParams, AllocatorRef, Region, SystemAllocator};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Table of named allocators plus a default.
///
/// Registries are plain values so tests and embedders can keep isolated
/// instances; [`AllocatorRegistry::global`] provides the process-wide one.
///
/// # Example
///
/// ```rust
/// use parallax_alloc::memory::{AllocationParams, AllocatorRegistry};
///
/// let registry = AllocatorRegistry::new();
/// let region = registry.alloc(None, 64, &AllocationParams::default()).unwrap();
/// assert_eq!(region.mem_type().as_str(), "SystemMemory");
/// ```
pub struct AllocatorRegistry {
    allocators: RwLock<HashMap<String, AllocatorRef>>,
    default: RwLock<AllocatorRef>,
}

impl AllocatorRegistry {
    /// Create a registry holding the system allocator, registered as
    /// `"SystemMemory"` and set as default.
    pub fn new() -> Self {
        let system = SystemAllocator::shared();
        let mut allocators = HashMap::new();
        allocators.insert(SYSTEM_MEMORY.to_string(), Arc::clone(&system));
        Self {
            allocators: RwLock::new(allocators),
            default: RwLock::new(system),
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static AllocatorRegistry {
        static GLOBAL: OnceLock<AllocatorRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            tracing::debug!("initialising global allocator registry");
            AllocatorRegistry::new()
        })
    }

    /// Register `allocator` under `name`, returning the allocator it replaced.
    pub fn register(&self, name: impl Into<String>, allocator: AllocatorRef) -> Option<AllocatorRef> {
        let name = name.into();
        tracing::debug!(%name, mem_type = %allocator.mem_type(), "registering allocator");
        self.allocators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, allocator)
    }

    /// Remove the allocator registered under `name`.
    ///
    /// Regions already allocated from it keep it alive. The default slot is
    /// not touched.
    pub fn unregister(&self, name: &str) -> Option<AllocatorRef> {
        let removed = self
            .allocators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            tracing::debug!(name, "unregistered allocator");
        }
        removed
    }

    /// Look up an allocator by name, or the default when `name` is `None`.
    pub fn find(&self, name: Option<&str>) -> Option<AllocatorRef> {
        match name {
            Some(name) => self
                .allocators
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned(),
            None => Some(self.default_allocator()),
        }
    }

    /// Replace the default allocator, returning the previous one.
    pub fn set_default(&self, allocator: AllocatorRef) -> AllocatorRef {
        tracing::debug!(mem_type = %allocator.mem_type(), "setting default allocator");
        let mut default = self.default.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *default, allocator)
    }

    /// The current default allocator.
    pub fn default_allocator(&self) -> AllocatorRef {
        Arc::clone(&self.default.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Allocate from the allocator named `name` (or the default).
    pub fn alloc(
        &self,
        name: Option<&str>,
        size: usize,
        params: &AllocationParams,
    ) -> Result<Region> {
        let allocator = self
            .find(name)
            .ok_or_else(|| Error::UnknownAllocator(name.unwrap_or_default().to_string()))?;
        Region::alloc(&allocator, size, params)
    }

    /// Names of all registered allocators, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .allocators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for AllocatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AllocatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorRegistry")
            .field("allocators", &self.names())
            .field("default", &self.default_allocator().mem_type())
            .finish()
    }
}
