//! Published trace jobs waiting for the daemon to finish with them

use crate::atomic_ring_buffer::AtomicRingBuffer;
use trace_common::TraceResult;
use trace_common::consts::TRACE_JOB_CONTAINER_SIZE;
use trace_common::types::{GlobalTraceContextId, SharedMemoryLocation};
use trace_shm::ShmRingBufferElementRef;
use tracing::trace;

/// Where the metadata of a job was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceJobType {
    /// Metadata allocated in shared memory, payload owned by the client
    ShmJob,
    /// Everything copied into shared memory by the library
    LocalJob,
}

/// Book-keeping for one published job.
#[derive(Debug, Clone)]
pub struct TraceJobContainerElement {
    /// Ring buffer slot the job was published in
    pub ring_buffer_element: ShmRingBufferElementRef,
    /// Context id the slot carried at publish time
    pub original_trace_context_id: GlobalTraceContextId,
    /// Who owns the chunks
    pub job_type: TraceJobType,
    /// Persisted chunk list
    pub chunk_list: SharedMemoryLocation,
}

/// Fixed-capacity queue of published jobs.
///
/// Any number of threads may [`add`](Self::add); draining is meant for the
/// job processor.
#[derive(Debug, Default)]
pub struct TraceJobContainer<const N: usize = TRACE_JOB_CONTAINER_SIZE> {
    ring: AtomicRingBuffer<TraceJobContainerElement, N>,
}

impl<const N: usize> TraceJobContainer<N> {
    /// Empty container.
    pub fn new() -> Self {
        Self {
            ring: AtomicRingBuffer::new(),
        }
    }

    /// Publish a job. `false` if no slot is free.
    pub fn add(&self, element: TraceJobContainerElement) -> bool {
        match self.ring.push(element) {
            Ok(()) => true,
            Err(err) => {
                trace!("Trace job container add failed: {}", err);
                false
            }
        }
    }

    /// Oldest published job, left in the container.
    pub fn get_ready_element(&self) -> TraceResult<TraceJobContainerElement> {
        self.ring.get_ready_element()
    }

    /// Take exclusive responsibility for the oldest job before releasing it.
    pub fn claim_ready_element(&self) -> Option<TraceJobContainerElement> {
        self.ring.claim_ready_element()
    }

    /// Remove the oldest job. `false` if there is none.
    pub fn release_ready_element(&self) -> bool {
        self.ring.release_ready_element()
    }

    /// Capacity.
    pub const fn size(&self) -> usize {
        N
    }

    /// Free slots.
    pub fn get_empty_elements_count(&self) -> usize {
        self.ring.empty_elements_count()
    }
}
