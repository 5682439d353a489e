//! Translation between process-local pointers and shared-memory offsets
//!
//! Offsets are the only form in which references cross a process
//! boundary; each side resolves them against its own mapping.

use crate::region::ShmRegion;
use std::ptr::NonNull;
use trace_common::types::{SharedMemoryChunk, SharedMemoryLocation};
use trace_common::{ErrorCode, TraceResult};

/// Offset of `ptr` inside `region`.
///
/// Fails with [`ErrorCode::InvalidArgumentFatal`] when the pointer does not
/// belong to the region.
pub fn offset_from_pointer<T>(ptr: *const T, region: &ShmRegion) -> TraceResult<u64> {
    region
        .offset_of(ptr.cast::<u8>())
        .map(|offset| offset as u64)
        .ok_or(ErrorCode::InvalidArgumentFatal)
}

/// Resolve `location` to a typed pointer inside `region`.
///
/// Returns `None` when a whole `T` does not fit behind the offset or the
/// resulting address is misaligned for `T`. The handle is not checked: the
/// caller picks the region that belongs to it.
pub fn pointer_from_location<T>(
    location: &SharedMemoryLocation,
    region: &ShmRegion,
) -> Option<NonNull<T>> {
    let ptr = resolve(location.offset, std::mem::size_of::<T>(), region)?;
    if (ptr.as_ptr() as usize) % std::mem::align_of::<T>() != 0 {
        return None;
    }
    Some(ptr.cast())
}

/// Resolve the first byte of `chunk`, requiring all `chunk.size` bytes to be mapped.
pub fn pointer_from_chunk(chunk: &SharedMemoryChunk, region: &ShmRegion) -> Option<NonNull<u8>> {
    let len = usize::try_from(chunk.size).ok()?;
    resolve(chunk.start.offset, len, region)
}

fn resolve(offset: u64, len: usize, region: &ShmRegion) -> Option<NonNull<u8>> {
    let offset = usize::try_from(offset).ok()?;
    let end = offset.checked_add(len)?;
    if end > region.size() || offset >= region.size() {
        return None;
    }
    // SAFETY: offset < size, so the result stays inside the mapping.
    NonNull::new(unsafe { region.base_ptr().as_ptr().add(offset) })
}
