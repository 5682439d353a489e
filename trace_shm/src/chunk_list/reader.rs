use super::vector::ShmChunkVector;
use crate::location::pointer_from_chunk;
use crate::registry::MemoryResourceRegistry;
use trace_common::types::{SharedMemoryChunk, SharedMemoryLocation};
use trace_common::{ErrorCode, TraceResult};

/// Daemon-side view of a persisted chunk list.
pub struct ChunkListReader;

impl ChunkListReader {
    /// Chunk descriptors stored at `location`.
    pub fn chunks(
        location: &SharedMemoryLocation,
        registry: &MemoryResourceRegistry,
    ) -> TraceResult<Vec<SharedMemoryChunk>> {
        let region = registry
            .get(location.shm_object_handle)
            .ok_or(ErrorCode::InvalidShmObjectHandleFatal)?;
        let vector =
            ShmChunkVector::resolve(location, &region).ok_or(ErrorCode::InvalidArgumentFatal)?;
        // SAFETY: resolve checked bounds and alignment; the producer wrote the
        // vector before publishing its location.
        Ok(unsafe { vector.as_ref() }.as_slice().to_vec())
    }

    /// Copy out the bytes of every chunk stored at `location`.
    pub fn read(
        location: &SharedMemoryLocation,
        registry: &MemoryResourceRegistry,
    ) -> TraceResult<Vec<Vec<u8>>> {
        Self::chunks(location, registry)?
            .iter()
            .map(|chunk| {
                let region = registry
                    .get(chunk.start.shm_object_handle)
                    .ok_or(ErrorCode::InvalidShmObjectHandleFatal)?;
                let ptr =
                    pointer_from_chunk(chunk, &region).ok_or(ErrorCode::InvalidArgumentFatal)?;
                // SAFETY: pointer_from_chunk checked that chunk.size bytes are mapped.
                let bytes =
                    unsafe { std::slice::from_raw_parts(ptr.as_ptr(), chunk.size as usize) };
                Ok(bytes.to_vec())
            })
            .collect()
    }
}
