//! # Trace Shared Memory
//!
//! Shared-memory plumbing underneath the trace job allocator. Producers
//! and the consumer daemon map the same objects at different addresses, so
//! nothing stored in shared memory holds a pointer: every cross-process
//! reference is a [`SharedMemoryLocation`](trace_common::types::SharedMemoryLocation)
//! resolved against the reader's own mapping.
//!
//! ## Components
//!
//! - [`region::ShmRegion`] - a mapped object under `/dev/shm`, or an anonymous mapping
//! - [`location`] - pointer/offset translation with bounds and alignment checks
//! - [`registry::MemoryResourceRegistry`] - handle to region lookup for readers
//! - [`allocator::FlexibleCircularAllocator`] - first-fit, circular, coalescing allocator
//! - [`chunk_list`] - chunk lists and their persisted [`chunk_list::ShmChunkVector`]
//! - [`ring_buffer`] - the fixed-slot ring buffer shared with the daemon
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │ trace metadata region    │      │ ring buffer region           │
//! │                          │      │                              │
//! │ [meta][ts][ShmChunkVec]  │◄─────┤ [header|slot 0|slot 1|...]   │
//! │  circular allocator      │ loc  │  slot = ctx id, chunk list,  │
//! └──────────────────────────┘      │         status               │
//!                                   └──────────────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! - [`region::ShmRegion`] is shared through `Arc`; writers coordinate through
//!   the allocator and ring buffer protocols
//! - [`allocator::FlexibleCircularAllocator`] serializes on an internal mutex
//! - [`ring_buffer::ShmRingBufferImpl`] is lock-free across processes

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod chunk_list;
pub mod error;
pub mod location;
pub mod platform;
pub mod region;
pub mod registry;
pub mod ring_buffer;

pub use allocator::{FlexibleAllocator, FlexibleCircularAllocator};
pub use chunk_list::{
    ChunkListReader, LocalDataChunkList, ShmChunkVector, ShmDataChunkList, persist_chunk_vector,
};
pub use error::{ShmError, ShmResult};
pub use location::{offset_from_pointer, pointer_from_chunk, pointer_from_location};
pub use region::{ResourcePointer, ShmRegion};
pub use registry::MemoryResourceRegistry;
pub use ring_buffer::{
    RingBufferStatistics, ShmRingBuffer, ShmRingBufferElement, ShmRingBufferElementRef,
    ShmRingBufferImpl, TraceJobStatus,
};

/// Install a `tracing` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"info"`) when the variable is unset.
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
