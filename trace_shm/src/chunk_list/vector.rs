use crate::allocator::FlexibleAllocator;
use crate::location::{offset_from_pointer, pointer_from_location};
use crate::region::ShmRegion;
use static_assertions::const_assert_eq;
use std::ptr::NonNull;
use trace_common::consts::{MAX_ALIGN, MAX_CHUNKS_PER_ONE_TRACE_REQUEST};
use trace_common::types::{
    INVALID_SHM_OBJECT_HANDLE, SharedMemoryChunk, SharedMemoryLocation, ShmObjectHandle,
};
use trace_common::{ErrorCode, TraceResult};

/// Fixed-capacity chunk list as stored in shared memory.
///
/// Plain data with a stable layout; `len` is clamped on read so a corrupted
/// length never indexes past the array.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShmChunkVector {
    len: u64,
    chunks: [SharedMemoryChunk; MAX_CHUNKS_PER_ONE_TRACE_REQUEST],
}

const_assert_eq!(core::mem::size_of::<ShmChunkVector>(), 8 + 24 * MAX_CHUNKS_PER_ONE_TRACE_REQUEST);

impl ShmChunkVector {
    /// Empty vector.
    pub const fn new() -> Self {
        Self {
            len: 0,
            chunks: [SharedMemoryChunk::new(SharedMemoryLocation::new(0, 0), 0);
                MAX_CHUNKS_PER_ONE_TRACE_REQUEST],
        }
    }

    /// Copy of `chunks`, or `None` if there are more than fit.
    pub fn from_slice(chunks: &[SharedMemoryChunk]) -> Option<Self> {
        if chunks.len() > MAX_CHUNKS_PER_ONE_TRACE_REQUEST {
            return None;
        }
        let mut vector = Self::new();
        vector.chunks[..chunks.len()].copy_from_slice(chunks);
        vector.len = chunks.len() as u64;
        Some(vector)
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        (self.len as usize).min(MAX_CHUNKS_PER_ONE_TRACE_REQUEST)
    }

    /// Whether there are no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of chunks.
    pub const fn capacity(&self) -> usize {
        MAX_CHUNKS_PER_ONE_TRACE_REQUEST
    }

    /// Chunk at `index`.
    pub fn at(&self, index: usize) -> TraceResult<SharedMemoryChunk> {
        self.as_slice()
            .get(index)
            .copied()
            .ok_or(ErrorCode::IndexOutOfBoundsInSharedListRecoverable)
    }

    /// Append a chunk; `false` when full.
    pub fn push(&mut self, chunk: SharedMemoryChunk) -> bool {
        let len = self.len();
        if len == MAX_CHUNKS_PER_ONE_TRACE_REQUEST {
            return false;
        }
        self.chunks[len] = chunk;
        self.len = (len + 1) as u64;
        true
    }

    /// Drop all chunks.
    pub fn clear(&mut self) {
        self.chunks = [SharedMemoryChunk::default(); MAX_CHUNKS_PER_ONE_TRACE_REQUEST];
        self.len = 0;
    }

    /// Chunks in order.
    pub fn as_slice(&self) -> &[SharedMemoryChunk] {
        &self.chunks[..self.len()]
    }

    /// Iterate over chunks.
    pub fn iter(&self) -> std::slice::Iter<'_, SharedMemoryChunk> {
        self.as_slice().iter()
    }

    /// Locate a persisted vector in `region`.
    pub fn resolve(location: &SharedMemoryLocation, region: &ShmRegion) -> Option<NonNull<Self>> {
        pointer_from_location::<Self>(location, region)
    }
}

/// Write `chunks` into allocator memory as a [`ShmChunkVector`].
///
/// Returns the vector's location under `handle`. Nothing stays allocated
/// when this fails.
pub fn persist_chunk_vector(
    chunks: &[SharedMemoryChunk],
    region: &ShmRegion,
    handle: ShmObjectHandle,
    allocator: &dyn FlexibleAllocator,
) -> TraceResult<SharedMemoryLocation> {
    if handle == INVALID_SHM_OBJECT_HANDLE {
        return Err(ErrorCode::InvalidArgumentFatal);
    }
    let vector = ShmChunkVector::from_slice(chunks).ok_or(ErrorCode::InvalidArgumentFatal)?;

    let size = std::mem::size_of::<ShmChunkVector>();
    let ptr = allocator
        .allocate(size, MAX_ALIGN)
        .ok_or(ErrorCode::NotEnoughMemoryRecoverable)?;
    let offset = match offset_from_pointer(ptr.as_ptr().cast_const(), region) {
        Ok(offset) => offset,
        Err(err) => {
            allocator.deallocate(ptr, size);
            return Err(err);
        }
    };

    // SAFETY: `ptr` is a fresh MAX_ALIGN aligned allocation of `size` bytes.
    unsafe { ptr.cast::<ShmChunkVector>().as_ptr().write(vector) };
    Ok(SharedMemoryLocation::new(handle, offset))
}
