//! Registry of mapped regions by shared-memory object handle

use crate::region::ShmRegion;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use trace_common::types::{INVALID_SHM_OBJECT_HANDLE, ShmObjectHandle};
use tracing::debug;

/// Maps handles to the regions they were registered for.
///
/// Readers resolve a [`SharedMemoryLocation`](trace_common::types::SharedMemoryLocation)
/// by looking up its handle here and translating the offset in the result.
#[derive(Debug, Default)]
pub struct MemoryResourceRegistry {
    resources: RwLock<BTreeMap<ShmObjectHandle, Arc<ShmRegion>>>,
}

impl MemoryResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `region` under `handle`.
    ///
    /// Returns `false` for the invalid handle or one that is already taken.
    pub fn insert(&self, handle: ShmObjectHandle, region: Arc<ShmRegion>) -> bool {
        if handle == INVALID_SHM_OBJECT_HANDLE {
            return false;
        }
        let mut resources = self.resources.write();
        if resources.contains_key(&handle) {
            return false;
        }
        debug!("Registered shm object handle {}", handle);
        resources.insert(handle, region);
        true
    }

    /// Unregister `handle`, returning its region.
    pub fn remove(&self, handle: ShmObjectHandle) -> Option<Arc<ShmRegion>> {
        self.resources.write().remove(&handle)
    }

    /// Region registered under `handle`.
    pub fn get(&self, handle: ShmObjectHandle) -> Option<Arc<ShmRegion>> {
        self.resources.read().get(&handle).cloned()
    }

    /// Region containing `ptr`, with its handle.
    pub fn find_by_address(&self, ptr: *const u8) -> Option<(ShmObjectHandle, Arc<ShmRegion>)> {
        self.resources
            .read()
            .iter()
            .find(|(_, region)| region.offset_of(ptr).is_some())
            .map(|(handle, region)| (*handle, Arc::clone(region)))
    }

    /// Number of registered regions.
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}
