use super::aligned_allocation_size;
use super::vector::{ShmChunkVector, persist_chunk_vector};
use crate::allocator::FlexibleAllocator;
use crate::region::ShmRegion;
use trace_common::consts::MAX_CHUNKS_PER_ONE_TRACE_REQUEST;
use trace_common::types::{SharedMemoryChunk, SharedMemoryLocation, ShmObjectHandle};
use trace_common::{ErrorCode, TraceResult};

/// Chunks that already live in registered shared-memory objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShmDataChunkList {
    chunks: heapless::Vec<SharedMemoryChunk, MAX_CHUNKS_PER_ONE_TRACE_REQUEST>,
}

impl ShmDataChunkList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// List holding only `root`.
    pub fn with_root(root: SharedMemoryChunk) -> Self {
        let mut list = Self::new();
        list.append(root);
        list
    }

    /// Append at the tail; ignored when full.
    pub fn append(&mut self, chunk: SharedMemoryChunk) -> bool {
        self.chunks.push(chunk).is_ok()
    }

    /// Insert at the head. When full, the last chunk falls off.
    pub fn append_front(&mut self, chunk: SharedMemoryChunk) {
        if self.chunks.is_full() {
            self.chunks.pop();
        }
        let _ = self.chunks.insert(0, chunk);
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
    pub fn chunks(&self) -> &[SharedMemoryChunk] {
        &self.chunks
    }

    /// Persist the descriptors into allocator memory.
    ///
    /// Only the list is copied; the chunks keep pointing at their objects.
    pub fn save_to_shared_memory(
        &self,
        region: &ShmRegion,
        handle: ShmObjectHandle,
        allocator: &dyn FlexibleAllocator,
    ) -> TraceResult<SharedMemoryLocation> {
        let required = aligned_allocation_size(std::mem::size_of::<ShmChunkVector>());
        if allocator.available_memory() < required {
            return Err(ErrorCode::NotEnoughMemoryRecoverable);
        }
        persist_chunk_vector(&self.chunks, region, handle, allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FlexibleCircularAllocator;
    use std::sync::Arc;
    use trace_common::types::INVALID_SHM_OBJECT_HANDLE;

    fn chunk(offset: u64) -> SharedMemoryChunk {
        SharedMemoryChunk::new(SharedMemoryLocation::new(2, offset), 8)
    }

    #[test]
    fn test_append_front_orders_head_first() {
        let mut list = ShmDataChunkList::with_root(chunk(100));
        list.append_front(chunk(1));
        list.append_front(chunk(0));
        let offsets: Vec<_> = list.chunks().iter().map(|c| c.start.offset).collect();
        assert_eq!(offsets, vec![0, 1, 100]);
    }

    #[test]
    fn test_append_front_drops_tail_when_full() {
        let mut list = ShmDataChunkList::new();
        for i in 0..MAX_CHUNKS_PER_ONE_TRACE_REQUEST as u64 {
            assert!(list.append(chunk(i)));
        }
        assert!(!list.append(chunk(99)));

        list.append_front(chunk(50));
        assert_eq!(list.size(), MAX_CHUNKS_PER_ONE_TRACE_REQUEST);
        assert_eq!(list.chunks()[0].start.offset, 50);
        assert_eq!(
            list.chunks().last().unwrap().start.offset,
            MAX_CHUNKS_PER_ONE_TRACE_REQUEST as u64 - 2
        );
    }

    #[test]
    fn test_save_to_shared_memory() {
        let region = Arc::new(ShmRegion::anonymous(4096).unwrap());
        let allocator = FlexibleCircularAllocator::for_region(Arc::clone(&region)).unwrap();
        let mut list = ShmDataChunkList::with_root(chunk(64));
        list.append_front(chunk(0));

        let location = list.save_to_shared_memory(&region, 9, &allocator).unwrap();
        let vector = ShmChunkVector::resolve(&location, &region).unwrap();
        // SAFETY: freshly persisted.
        assert_eq!(unsafe { vector.as_ref() }.as_slice(), list.chunks());
        assert_eq!(allocator.allocation_count(), 1);
    }

    #[test]
    fn test_save_with_invalid_handle() {
        let region = Arc::new(ShmRegion::anonymous(4096).unwrap());
        let allocator = FlexibleCircularAllocator::for_region(Arc::clone(&region)).unwrap();
        let list = ShmDataChunkList::with_root(chunk(0));
        assert_eq!(
            list.save_to_shared_memory(&region, INVALID_SHM_OBJECT_HANDLE, &allocator),
            Err(ErrorCode::InvalidArgumentFatal)
        );
    }

    #[test]
    fn test_save_without_memory() {
        let region = Arc::new(ShmRegion::anonymous(4096).unwrap());
        let allocator = FlexibleCircularAllocator::new(Arc::clone(&region), 0, 64).unwrap();
        let list = ShmDataChunkList::with_root(chunk(0));
        assert_eq!(
            list.save_to_shared_memory(&region, 1, &allocator),
            Err(ErrorCode::NotEnoughMemoryRecoverable)
        );
    }
}
