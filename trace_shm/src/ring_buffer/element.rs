//! Ring buffer slot shared between producers and the daemon

use static_assertions::const_assert_eq;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU32, AtomicU64, Ordering};
use trace_common::types::{GlobalTraceContextId, SharedMemoryLocation};

/// Lifecycle of a ring buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TraceJobStatus {
    /// Free for producers
    #[default]
    Empty = 0,
    /// Claimed by a producer, not yet filled
    Allocated = 1,
    /// Filled, waiting for the daemon
    Ready = 2,
    /// Abandoned by its producer; the daemon skips it
    Invalid = 3,
}

impl TraceJobStatus {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Empty),
            1 => Some(Self::Allocated),
            2 => Some(Self::Ready),
            3 => Some(Self::Invalid),
            _ => None,
        }
    }
}

/// One slot of the shared ring buffer.
///
/// Fields are atomics because the slot is written by one process and read
/// by another. `status` is written last with release ordering; readers load
/// it with acquire ordering before touching the other fields.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ShmRingBufferElement {
    chunk_list_offset: AtomicU64,
    context_id: AtomicU32,
    chunk_list_handle: AtomicI32,
    client_id: AtomicU8,
    status: AtomicU8,
    _padding: [u8; 6],
}

const_assert_eq!(core::mem::size_of::<ShmRingBufferElement>(), 24);

impl ShmRingBufferElement {
    /// Current status; unknown raw values read as `Invalid`.
    #[inline]
    pub fn status(&self) -> TraceJobStatus {
        TraceJobStatus::from_u8(self.status.load(Ordering::Acquire))
            .unwrap_or(TraceJobStatus::Invalid)
    }

    /// Publish a new status.
    #[inline]
    pub fn set_status(&self, status: TraceJobStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Context the job belongs to.
    pub fn global_context_id(&self) -> GlobalTraceContextId {
        GlobalTraceContextId::new(
            self.client_id.load(Ordering::Relaxed),
            self.context_id.load(Ordering::Relaxed),
        )
    }

    /// Set the context the job belongs to.
    pub fn set_global_context_id(&self, id: GlobalTraceContextId) {
        self.client_id.store(id.client_id, Ordering::Relaxed);
        self.context_id.store(id.context_id, Ordering::Relaxed);
    }

    /// Location of the persisted chunk list.
    pub fn chunk_list(&self) -> SharedMemoryLocation {
        SharedMemoryLocation::new(
            self.chunk_list_handle.load(Ordering::Relaxed),
            self.chunk_list_offset.load(Ordering::Relaxed),
        )
    }

    /// Set the location of the persisted chunk list.
    pub fn set_chunk_list(&self, location: SharedMemoryLocation) {
        self.chunk_list_handle.store(location.shm_object_handle, Ordering::Relaxed);
        self.chunk_list_offset.store(location.offset, Ordering::Relaxed);
    }

    /// Hand a processed slot back to producers.
    ///
    /// The context is cleared first so a producer watching for completion
    /// never sees its own id on an empty slot.
    pub fn release(&self) {
        self.set_global_context_id(GlobalTraceContextId::default());
        self.set_chunk_list(SharedMemoryLocation::default());
        self.set_status(TraceJobStatus::Empty);
    }

    pub(crate) fn reset(&self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        for val in 0..=3u8 {
            assert_eq!(TraceJobStatus::from_u8(val).unwrap() as u8, val);
        }
        assert!(TraceJobStatus::from_u8(4).is_none());

        let element = ShmRingBufferElement::default();
        element.status.store(200, Ordering::Relaxed);
        assert_eq!(element.status(), TraceJobStatus::Invalid);
    }

    #[test]
    fn test_fields_and_release() {
        let element = ShmRingBufferElement::default();
        assert_eq!(element.status(), TraceJobStatus::Empty);

        element.set_global_context_id(GlobalTraceContextId::new(3, 77));
        element.set_chunk_list(SharedMemoryLocation::new(1, 512));
        element.set_status(TraceJobStatus::Ready);
        assert_eq!(element.global_context_id(), GlobalTraceContextId::new(3, 77));
        assert_eq!(element.chunk_list(), SharedMemoryLocation::new(1, 512));
        assert_eq!(element.status(), TraceJobStatus::Ready);

        element.release();
        assert_eq!(element.global_context_id(), GlobalTraceContextId::default());
        assert_eq!(element.status(), TraceJobStatus::Empty);
    }
}
