use super::aligned_allocation_size;
use super::vector::{ShmChunkVector, persist_chunk_vector};
use crate::allocator::FlexibleAllocator;
use crate::location::offset_from_pointer;
use crate::region::ShmRegion;
use std::borrow::Cow;
use std::ptr::NonNull;
use trace_common::consts::{MAX_ALIGN, MAX_CHUNKS_PER_ONE_TRACE_REQUEST};
use trace_common::types::{
    INVALID_SHM_OBJECT_HANDLE, SharedMemoryChunk, SharedMemoryLocation, ShmObjectHandle,
};
use trace_common::{ErrorCode, TraceResult};
use tracing::debug;

/// Chunks that live in process-local memory and must be copied before the
/// daemon can see them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalDataChunkList<'a> {
    chunks: heapless::Vec<Cow<'a, [u8]>, MAX_CHUNKS_PER_ONE_TRACE_REQUEST>,
}

impl<'a> LocalDataChunkList<'a> {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// List holding only `root`.
    pub fn with_root(root: impl Into<Cow<'a, [u8]>>) -> Self {
        let mut list = Self::new();
        list.append(root);
        list
    }

    /// Append at the tail; ignored when full.
    pub fn append(&mut self, chunk: impl Into<Cow<'a, [u8]>>) -> bool {
        self.chunks.push(chunk.into()).is_ok()
    }

    /// Insert at the head. When full, the last chunk falls off.
    pub fn append_front(&mut self, chunk: impl Into<Cow<'a, [u8]>>) {
        if self.chunks.is_full() {
            self.chunks.pop();
        }
        let _ = self.chunks.insert(0, chunk.into());
    }

    /// Number of chunks.
    pub fn size(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drop all chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Chunks in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(|chunk| chunk.as_ref())
    }

    /// Bytes the allocator must provide to persist this list.
    pub fn required_memory(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| aligned_allocation_size(chunk.len()))
            .sum::<usize>()
            + aligned_allocation_size(std::mem::size_of::<ShmChunkVector>())
    }

    /// Copy every non-empty chunk into allocator memory and persist the
    /// resulting chunk list.
    ///
    /// Either everything is persisted or nothing stays allocated.
    pub fn save_to_shared_memory(
        &self,
        region: &ShmRegion,
        handle: ShmObjectHandle,
        allocator: &dyn FlexibleAllocator,
    ) -> TraceResult<SharedMemoryLocation> {
        if handle == INVALID_SHM_OBJECT_HANDLE {
            return Err(ErrorCode::InvalidArgumentFatal);
        }
        if allocator.available_memory() < self.required_memory() {
            return Err(ErrorCode::NotEnoughMemoryRecoverable);
        }

        let mut copies: heapless::Vec<(NonNull<u8>, usize), MAX_CHUNKS_PER_ONE_TRACE_REQUEST> =
            heapless::Vec::new();
        let mut shm_chunks: heapless::Vec<SharedMemoryChunk, MAX_CHUNKS_PER_ONE_TRACE_REQUEST> =
            heapless::Vec::new();

        let result = self.copy_chunks(region, handle, allocator, &mut copies, &mut shm_chunks);
        let result =
            result.and_then(|()| persist_chunk_vector(&shm_chunks, region, handle, allocator));
        if result.is_err() {
            debug!("Local chunk list not persisted, releasing {} copies", copies.len());
            for (ptr, size) in copies {
                allocator.deallocate(ptr, size);
            }
        }
        result
    }

    fn copy_chunks(
        &self,
        region: &ShmRegion,
        handle: ShmObjectHandle,
        allocator: &dyn FlexibleAllocator,
        copies: &mut heapless::Vec<(NonNull<u8>, usize), MAX_CHUNKS_PER_ONE_TRACE_REQUEST>,
        shm_chunks: &mut heapless::Vec<SharedMemoryChunk, MAX_CHUNKS_PER_ONE_TRACE_REQUEST>,
    ) -> TraceResult<()> {
        for chunk in self.chunks.iter().filter(|chunk| !chunk.is_empty()) {
            let ptr = allocator
                .allocate(chunk.len(), MAX_ALIGN)
                .ok_or(ErrorCode::NotEnoughMemoryRecoverable)?;
            // Both vectors share the list's capacity, so pushes cannot fail.
            let _ = copies.push((ptr, chunk.len()));
            // SAFETY: fresh allocation of chunk.len() bytes, disjoint from `chunk`.
            unsafe { std::ptr::copy_nonoverlapping(chunk.as_ptr(), ptr.as_ptr(), chunk.len()) };

            let offset = offset_from_pointer(ptr.as_ptr().cast_const(), region)?;
            let _ = shm_chunks.push(SharedMemoryChunk::new(
                SharedMemoryLocation::new(handle, offset),
                chunk.len() as u64,
            ));
        }
        Ok(())
    }
}
