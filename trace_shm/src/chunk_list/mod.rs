//! Chunk lists describing the pieces of one trace job
//!
//! A producer assembles a list of chunks (metadata, timestamp, payload),
//! then persists it as a [`ShmChunkVector`] inside trace metadata memory so
//! the daemon can walk it by offset.

mod local;
mod reader;
mod shm;
mod vector;

pub use local::LocalDataChunkList;
pub use reader::ChunkListReader;
pub use shm::ShmDataChunkList;
pub use vector::{ShmChunkVector, persist_chunk_vector};

use trace_common::consts::MAX_ALIGN;

/// Bytes the allocator hands out for `size`, rounded to `MAX_ALIGN`.
pub(crate) const fn aligned_allocation_size(size: usize) -> usize {
    size.div_ceil(MAX_ALIGN) * MAX_ALIGN
}
