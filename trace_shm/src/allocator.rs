//! Flexible circular allocator over a range of a mapped region
//!
//! Trace metadata, timestamps and chunk vectors are short-lived and freed
//! roughly in allocation order. Searching for space starting just after the
//! latest allocation keeps the allocator walking around the region like a
//! ring instead of fragmenting its start.

use crate::region::ResourcePointer;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use trace_common::consts::MAX_ALIGN;
use trace_common::{ErrorCode, TraceResult};
use tracing::trace;

/// Variable-size allocator handing out memory of a shared region.
pub trait FlexibleAllocator: Send + Sync {
    /// Allocate `size` bytes aligned to `alignment` (a power of two).
    ///
    /// Returns `None` when no block is large enough.
    fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>>;

    /// Release memory returned by [`allocate`](Self::allocate).
    ///
    /// Returns `false` if `ptr` is not a live allocation.
    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> bool;

    /// Total free bytes, possibly fragmented.
    fn available_memory(&self) -> usize;

    /// First byte managed by the allocator.
    fn base_address(&self) -> NonNull<u8>;

    /// Number of bytes managed.
    fn size(&self) -> usize;

    /// Whether `[ptr, ptr + size)` lies inside the managed range.
    fn is_in_bounds(&self, ptr: *const u8, size: usize) -> bool {
        let base = self.base_address().as_ptr() as usize;
        let address = ptr as usize;
        size <= self.size() && address >= base && address <= base + (self.size() - size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemoryBlock {
    offset: usize,
    size: usize,
}

impl MemoryBlock {
    const fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[derive(Debug)]
struct AllocatorState {
    /// Sorted by offset; neighbours are never adjacent.
    free_blocks: Vec<MemoryBlock>,
    /// Offset -> aligned size of live allocations.
    allocated_blocks: BTreeMap<usize, usize>,
    /// Where the next search starts.
    latest_allocated: usize,
}

impl AllocatorState {
    fn carve(&mut self, index: usize, offset: usize, len: usize) {
        let block = self.free_blocks[index];
        let front = MemoryBlock {
            offset: block.offset,
            size: offset - block.offset,
        };
        let back = MemoryBlock {
            offset: offset + len,
            size: block.end() - (offset + len),
        };
        match (front.size > 0, back.size > 0) {
            (false, false) => {
                self.free_blocks.remove(index);
            }
            (true, false) => self.free_blocks[index] = front,
            (false, true) => self.free_blocks[index] = back,
            (true, true) => {
                self.free_blocks[index] = front;
                self.free_blocks.insert(index + 1, back);
            }
        }
    }

    fn release(&mut self, mut block: MemoryBlock) {
        let mut index = self.free_blocks.partition_point(|b| b.offset < block.offset);
        if index > 0 && self.free_blocks[index - 1].end() == block.offset {
            index -= 1;
            let previous = self.free_blocks.remove(index);
            block.offset = previous.offset;
            block.size += previous.size;
        }
        if index < self.free_blocks.len() && self.free_blocks[index].offset == block.end() {
            let next = self.free_blocks.remove(index);
            block.size += next.size;
        }
        self.free_blocks.insert(index, block);
    }
}

/// First-fit allocator that resumes its search after the latest allocation.
///
/// Blocks are split on allocation and coalesced with free neighbours on
/// release. Bookkeeping lives in this process; the managed bytes live in
/// the region so other processes can read them by offset.
pub struct FlexibleCircularAllocator {
    region: ResourcePointer,
    base: NonNull<u8>,
    total_size: usize,
    state: Mutex<AllocatorState>,
}

// SAFETY: `base` points into `region`, which is kept alive by the Arc.
// Bookkeeping is behind the mutex.
unsafe impl Send for FlexibleCircularAllocator {}
unsafe impl Sync for FlexibleCircularAllocator {}

impl FlexibleCircularAllocator {
    /// Manage `size` bytes of `region` starting at `start_offset`.
    ///
    /// `start_offset` must be `MAX_ALIGN` aligned and the range must lie
    /// inside the region.
    pub fn new(region: ResourcePointer, start_offset: usize, size: usize) -> TraceResult<Self> {
        let in_range = start_offset
            .checked_add(size)
            .is_some_and(|end| end <= region.size());
        if size == 0 || !in_range || start_offset % MAX_ALIGN != 0 {
            return Err(ErrorCode::InvalidArgumentFatal);
        }
        // SAFETY: start_offset + size <= region.size().
        let base = unsafe { NonNull::new_unchecked(region.base_ptr().as_ptr().add(start_offset)) };
        Ok(Self {
            region,
            base,
            total_size: size,
            state: Mutex::new(AllocatorState {
                free_blocks: vec![MemoryBlock { offset: 0, size }],
                allocated_blocks: BTreeMap::new(),
                latest_allocated: 0,
            }),
        })
    }

    /// Manage the whole of `region`.
    pub fn for_region(region: ResourcePointer) -> TraceResult<Self> {
        let size = region.size();
        Self::new(region, 0, size)
    }

    /// Region the managed bytes belong to.
    pub fn region(&self) -> &ResourcePointer {
        &self.region
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.state.lock().allocated_blocks.len()
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let base = self.base.as_ptr() as usize;
        let address = ptr.as_ptr() as usize;
        address
            .checked_sub(base)
            .filter(|offset| *offset < self.total_size)
    }
}

fn align_up(value: usize, alignment: usize) -> Option<usize> {
    value
        .checked_add(alignment - 1)
        .map(|v| v & !(alignment - 1))
}

impl FlexibleAllocator for FlexibleCircularAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }
        let aligned_size = align_up(size, alignment)?;
        if aligned_size >= self.total_size {
            return None;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let count = state.free_blocks.len();
        if count == 0 {
            return None;
        }

        let base_address = self.base.as_ptr() as usize;
        let latest = state.latest_allocated;
        let first = state.free_blocks.partition_point(|b| b.offset < latest);
        for step in 0..count {
            let index = (first + step) % count;
            let block = state.free_blocks[index];
            let address = base_address + block.offset;
            let padding = align_up(address, alignment)? - address;
            if block.size < padding + aligned_size {
                continue;
            }

            let offset = block.offset + padding;
            state.carve(index, offset, aligned_size);
            state.allocated_blocks.insert(offset, aligned_size);
            state.latest_allocated = offset + aligned_size;
            // SAFETY: offset + aligned_size <= total_size.
            return NonNull::new(unsafe { self.base.as_ptr().add(offset) });
        }

        trace!(
            "No block for {} bytes, {} free blocks",
            aligned_size,
            state.free_blocks.len()
        );
        None
    }

    fn deallocate(&self, ptr: NonNull<u8>, _size: usize) -> bool {
        let Some(offset) = self.offset_of(ptr) else {
            return false;
        };
        let mut state = self.state.lock();
        let Some(size) = state.allocated_blocks.remove(&offset) else {
            return false;
        };
        state.release(MemoryBlock { offset, size });
        true
    }

    fn available_memory(&self) -> usize {
        self.state.lock().free_blocks.iter().map(|b| b.size).sum()
    }

    fn base_address(&self) -> NonNull<u8> {
        self.base
    }

    fn size(&self) -> usize {
        self.total_size
    }
}

impl std::fmt::Debug for FlexibleCircularAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlexibleCircularAllocator")
            .field("base", &self.base)
            .field("total_size", &self.total_size)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::ShmRegion;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn allocator(size: usize) -> FlexibleCircularAllocator {
        let region = Arc::new(ShmRegion::anonymous(size).unwrap());
        FlexibleCircularAllocator::for_region(region).unwrap()
    }

    #[test]
    fn test_allocate_and_release_restores_memory() {
        let alloc = allocator(1024);
        let a = alloc.allocate(35, MAX_ALIGN).unwrap();
        let b = alloc.allocate(8, MAX_ALIGN).unwrap();
        assert_eq!(alloc.available_memory(), 1024 - 48 - 16);
        assert_eq!(alloc.allocation_count(), 2);

        assert!(alloc.deallocate(a, 35));
        assert!(alloc.deallocate(b, 8));
        assert_eq!(alloc.available_memory(), 1024);
        assert_eq!(alloc.allocation_count(), 0);
    }

    #[test]
    fn test_alignment_is_honoured() {
        let alloc = allocator(4096);
        let _small = alloc.allocate(3, 1).unwrap();
        let aligned = alloc.allocate(10, 64).unwrap();
        assert_eq!(aligned.as_ptr() as usize % 64, 0);
        assert!(alloc.allocate(8, 3).is_none());
    }

    #[test]
    fn test_too_large_and_zero_sized_requests_fail() {
        let alloc = allocator(256);
        assert!(alloc.allocate(256, MAX_ALIGN).is_none());
        assert!(alloc.allocate(250, MAX_ALIGN).is_none());
        assert!(alloc.allocate(0, MAX_ALIGN).is_none());
        assert!(alloc.allocate(240, MAX_ALIGN).is_some());
    }

    #[test]
    fn test_exhaustion() {
        let alloc = allocator(256);
        let mut live = Vec::new();
        while let Some(ptr) = alloc.allocate(16, MAX_ALIGN) {
            live.push(ptr);
        }
        assert_eq!(live.len(), 16);
        assert_eq!(alloc.available_memory(), 0);
        assert!(alloc.deallocate(live.pop().unwrap(), 16));
        assert!(alloc.allocate(16, MAX_ALIGN).is_some());
    }

    #[test]
    fn test_unknown_and_double_free_rejected() {
        let alloc = allocator(512);
        let ptr = alloc.allocate(32, MAX_ALIGN).unwrap();
        let mut local = 0u8;
        assert!(!alloc.deallocate(NonNull::from(&mut local), 1));
        // Interior pointer is not an allocation start.
        let interior = NonNull::new(ptr.as_ptr().wrapping_add(16)).unwrap();
        assert!(!alloc.deallocate(interior, 16));
        assert!(alloc.deallocate(ptr, 32));
        assert!(!alloc.deallocate(ptr, 32));
    }

    #[test]
    fn test_search_resumes_after_latest_allocation() {
        let alloc = allocator(1024);
        let first = alloc.allocate(64, MAX_ALIGN).unwrap();
        let second = alloc.allocate(64, MAX_ALIGN).unwrap();
        assert!(alloc.deallocate(first, 64));

        // The freed block at the start is skipped while space remains ahead.
        let third = alloc.allocate(64, MAX_ALIGN).unwrap();
        assert!(third.as_ptr() > second.as_ptr());
    }

    #[test]
    fn test_search_wraps_around() {
        let alloc = allocator(256);
        let a = alloc.allocate(96, MAX_ALIGN).unwrap();
        let _b = alloc.allocate(96, MAX_ALIGN).unwrap();
        assert!(alloc.deallocate(a, 96));
        // 64 bytes remain at the end, so a 96-byte request wraps to the start.
        let c = alloc.allocate(96, MAX_ALIGN).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_coalescing_allows_large_allocation() {
        let alloc = allocator(512);
        let blocks: Vec<_> = (0..4).map(|_| alloc.allocate(100, MAX_ALIGN).unwrap()).collect();
        // Free out of order; neighbours must merge back into one block.
        for index in [1, 3, 0, 2] {
            assert!(alloc.deallocate(blocks[index], 100));
        }
        assert_eq!(alloc.available_memory(), 512);
        assert!(alloc.allocate(496, MAX_ALIGN).is_some());
    }

    #[test]
    fn test_in_bounds() {
        let alloc = allocator(256);
        let base = alloc.base_address().as_ptr() as *const u8;
        assert!(alloc.is_in_bounds(base, 256));
        assert!(alloc.is_in_bounds(base.wrapping_add(200), 56));
        assert!(!alloc.is_in_bounds(base.wrapping_add(200), 57));
        assert!(!alloc.is_in_bounds(base, 257));
    }

    #[test]
    fn test_sub_range_must_fit_region() {
        let region = Arc::new(ShmRegion::anonymous(4096).unwrap());
        assert!(FlexibleCircularAllocator::new(Arc::clone(&region), 1024, 3072).is_ok());
        assert_eq!(
            FlexibleCircularAllocator::new(Arc::clone(&region), 1024, 3073).err(),
            Some(ErrorCode::InvalidArgumentFatal)
        );
        assert!(FlexibleCircularAllocator::new(region, 8, 64).is_err());
    }

    proptest! {
        #[test]
        fn prop_free_plus_allocated_is_total(
            ops in prop::collection::vec((1usize..200, any::<bool>()), 1..100)
        ) {
            let alloc = allocator(4096);
            let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();
            for (size, free_one) in ops {
                if free_one && !live.is_empty() {
                    let (ptr, len) = live.remove(size % live.len());
                    prop_assert!(alloc.deallocate(ptr, len));
                } else if let Some(ptr) = alloc.allocate(size, MAX_ALIGN) {
                    live.push((ptr, size.div_ceil(MAX_ALIGN) * MAX_ALIGN));
                }
                let used: usize = live.iter().map(|(_, len)| len).sum();
                prop_assert_eq!(alloc.available_memory() + used, 4096);
            }

            let mut ranges: Vec<(usize, usize)> = live
                .iter()
                .map(|(ptr, len)| (ptr.as_ptr() as usize, ptr.as_ptr() as usize + len))
                .collect();
            ranges.sort_unstable();
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].1 <= pair[1].0);
            }
        }
    }
}
