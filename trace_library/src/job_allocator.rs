//! Turns trace calls into jobs published through the shared ring buffer
//!
//! A job is laid out in trace metadata memory as
//!
//! ```text
//! chunk list: [timestamp (8 B)] [metadata record (35 B)] [payload chunks...]
//! ```
//!
//! and announced by filling a reserved ring buffer slot with the client and
//! context id plus the location of the persisted chunk list.

use crate::job_container::{TraceJobContainer, TraceJobContainerElement, TraceJobType};
use crate::logger_time::{LoggerTime, serialize_to_plp};
use crate::meta_info::MetaInfoVariant;
use crate::trace_format::AraComMetaInfoTraceFormat;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use trace_common::consts::MAX_ALIGN;
use trace_common::types::{
    AppIdType, BindingType, GlobalTraceContextId, SharedMemoryChunk, SharedMemoryLocation,
    ShmObjectHandle, TraceClientId, TraceContextId,
};
use trace_common::{ErrorCode, TraceResult};
use trace_shm::{
    FlexibleAllocator, LocalDataChunkList, ResourcePointer, ShmChunkVector, ShmDataChunkList,
    ShmRingBuffer, ShmRingBufferElementRef, TraceJobStatus, offset_from_pointer, pointer_from_chunk,
};
use tracing::{debug, error, trace};

/// Chunks a shm job owns: timestamp and metadata record.
const LOCALLY_CREATED_ELEMENTS: usize = 2;

/// Allocates, publishes and frees trace jobs.
///
/// Shareable between threads; every method takes `&self`.
pub struct TraceJobAllocator {
    container: Arc<TraceJobContainer>,
    metadata_region: ResourcePointer,
    metadata_handle: AtomicI32,
    ring_buffer: RwLock<Box<dyn ShmRingBuffer>>,
    /// Next local job id; held while a local job is built so ids stay
    /// unique and are only consumed by published jobs.
    job_id: Mutex<TraceContextId>,
    allocator: Arc<dyn FlexibleAllocator>,
    logger_time: Option<Arc<dyn LoggerTime>>,
}

impl TraceJobAllocator {
    /// Allocator publishing into `container`.
    ///
    /// `allocator` must manage memory inside `metadata_region`. The metadata
    /// handle starts at 0; see
    /// [`set_trace_meta_data_shm_object_handle`](Self::set_trace_meta_data_shm_object_handle).
    pub fn new(
        container: Arc<TraceJobContainer>,
        metadata_region: ResourcePointer,
        allocator: Arc<dyn FlexibleAllocator>,
        ring_buffer: Box<dyn ShmRingBuffer>,
        logger_time: Option<Arc<dyn LoggerTime>>,
    ) -> Self {
        Self {
            container,
            metadata_region,
            metadata_handle: AtomicI32::new(0),
            ring_buffer: RwLock::new(ring_buffer),
            job_id: Mutex::new(0),
            allocator,
            logger_time,
        }
    }

    /// Allocator with a container of its own.
    pub fn with_defaults(
        metadata_region: ResourcePointer,
        allocator: Arc<dyn FlexibleAllocator>,
        ring_buffer: Box<dyn ShmRingBuffer>,
        logger_time: Option<Arc<dyn LoggerTime>>,
    ) -> Self {
        Self::new(
            Arc::new(<TraceJobContainer>::new()),
            metadata_region,
            allocator,
            ring_buffer,
            logger_time,
        )
    }

    /// Container jobs are published into.
    pub fn container(&self) -> &Arc<TraceJobContainer> {
        &self.container
    }

    /// Handle the metadata region is registered under.
    pub fn trace_meta_data_shm_object_handle(&self) -> ShmObjectHandle {
        self.metadata_handle.load(Ordering::Acquire)
    }

    /// Set the handle the metadata region is registered under.
    pub fn set_trace_meta_data_shm_object_handle(&self, handle: ShmObjectHandle) {
        self.metadata_handle.store(handle, Ordering::Release);
    }

    /// Publish a job whose payload already lives in shared memory.
    ///
    /// The timestamp and metadata chunks are prepended to `data`. On failure
    /// the reserved slot is marked `Invalid` and everything allocated here
    /// is released again.
    #[allow(clippy::too_many_arguments)]
    pub fn allocate_shm_job(
        &self,
        client: TraceClientId,
        meta_info: &MetaInfoVariant,
        binding_type: BindingType,
        app_instance_id: &AppIdType,
        data: &mut ShmDataChunkList,
        context_id: TraceContextId,
    ) -> TraceResult<()> {
        let element = self.ring_buffer.read().get_empty_element()?;
        let result = self.build_shm_job(
            &element,
            client,
            meta_info,
            binding_type,
            app_instance_id,
            data,
            context_id,
        );
        if let Err(err) = result {
            debug!("Shm job for client {} context {} failed: {}", client, context_id, err);
            element.set_status(TraceJobStatus::Invalid);
        }
        result
    }

    /// Publish a job whose chunks live in process memory.
    ///
    /// Every chunk is copied into metadata memory. The context id is taken
    /// from an internal counter that advances on success only.
    pub fn allocate_local_job(
        &self,
        client: TraceClientId,
        meta_info: &MetaInfoVariant,
        binding_type: BindingType,
        app_instance_id: &AppIdType,
        data: &mut LocalDataChunkList<'_>,
    ) -> TraceResult<()> {
        let element = self.ring_buffer.read().get_empty_element()?;
        let mut job_id = self.job_id.lock();
        let result = self.build_local_job(
            &element,
            client,
            meta_info,
            binding_type,
            app_instance_id,
            data,
            *job_id,
        );
        match result {
            Ok(()) => {
                *job_id = job_id.wrapping_add(1);
            }
            Err(err) => {
                debug!("Local job for client {} failed: {}", client, err);
                element.set_status(TraceJobStatus::Invalid);
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn build_shm_job(
        &self,
        element: &ShmRingBufferElementRef,
        client: TraceClientId,
        meta_info: &MetaInfoVariant,
        binding_type: BindingType,
        app_instance_id: &AppIdType,
        data: &mut ShmDataChunkList,
        context_id: TraceContextId,
    ) -> TraceResult<()> {
        let meta_info = meta_info.ara_com()?;
        let handle = self.trace_meta_data_shm_object_handle();

        let format = AraComMetaInfoTraceFormat::new(meta_info, binding_type, app_instance_id);
        let meta_chunk = self.write_to_metadata(&format.encode(), handle)?;
        let timestamp = self.get_time_stamp().to_ne_bytes();
        let timestamp_chunk = match self.write_to_metadata(&timestamp, handle) {
            Ok(chunk) => chunk,
            Err(err) => {
                self.release_chunk(&meta_chunk);
                return Err(err);
            }
        };
        data.append_front(meta_chunk);
        data.append_front(timestamp_chunk);

        let saved =
            data.save_to_shared_memory(&self.metadata_region, handle, self.allocator.as_ref());
        let chunk_list = match saved {
            Ok(location) => location,
            Err(err) => {
                self.release_chunk(&timestamp_chunk);
                self.release_chunk(&meta_chunk);
                return Err(err);
            }
        };

        let global_id = GlobalTraceContextId::new(client, context_id);
        if !self.publish(element, global_id, TraceJobType::ShmJob, chunk_list) {
            self.discard_chunk_list(chunk_list, LOCALLY_CREATED_ELEMENTS);
            return Err(ErrorCode::NotEnoughMemoryRecoverable);
        }
        trace!("Published shm job {:?} in slot {}", global_id, element.index());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_local_job(
        &self,
        element: &ShmRingBufferElementRef,
        client: TraceClientId,
        meta_info: &MetaInfoVariant,
        binding_type: BindingType,
        app_instance_id: &AppIdType,
        data: &mut LocalDataChunkList<'_>,
        context_id: TraceContextId,
    ) -> TraceResult<()> {
        let meta_info = meta_info.ara_com()?;
        let handle = self.trace_meta_data_shm_object_handle();

        let format = AraComMetaInfoTraceFormat::new(meta_info, binding_type, app_instance_id);
        data.append_front(format.encode().to_vec());
        data.append_front(self.get_time_stamp().to_ne_bytes().to_vec());

        let chunk_list =
            data.save_to_shared_memory(&self.metadata_region, handle, self.allocator.as_ref())?;

        let global_id = GlobalTraceContextId::new(client, context_id);
        if !self.publish(element, global_id, TraceJobType::LocalJob, chunk_list) {
            self.discard_chunk_list(chunk_list, usize::MAX);
            return Err(ErrorCode::NotEnoughMemoryRecoverable);
        }
        trace!("Published local job {:?} in slot {}", global_id, element.index());
        Ok(())
    }

    /// Fill the slot and hand the job to the container. The slot becomes
    /// `Ready` only once the container accepted the job.
    fn publish(
        &self,
        element: &ShmRingBufferElementRef,
        global_id: GlobalTraceContextId,
        job_type: TraceJobType,
        chunk_list: SharedMemoryLocation,
    ) -> bool {
        element.set_global_context_id(global_id);
        element.set_chunk_list(chunk_list);
        let added = self.container.add(TraceJobContainerElement {
            ring_buffer_element: element.clone(),
            original_trace_context_id: global_id,
            job_type,
            chunk_list,
        });
        if added {
            element.set_status(TraceJobStatus::Ready);
        }
        added
    }

    /// Copy `bytes` into a fresh metadata allocation.
    fn write_to_metadata(
        &self,
        bytes: &[u8],
        handle: ShmObjectHandle,
    ) -> TraceResult<SharedMemoryChunk> {
        let ptr = self
            .allocator
            .allocate(bytes.len(), MAX_ALIGN)
            .ok_or(ErrorCode::NotEnoughMemoryRecoverable)?;
        let Ok(offset) = offset_from_pointer(ptr.as_ptr().cast_const(), &self.metadata_region)
        else {
            self.allocator.deallocate(ptr, bytes.len());
            return Err(ErrorCode::NotEnoughMemoryRecoverable);
        };
        // SAFETY: fresh allocation of bytes.len() bytes inside the region.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        Ok(SharedMemoryChunk::new(
            SharedMemoryLocation::new(handle, offset),
            bytes.len() as u64,
        ))
    }

    fn release_chunk(&self, chunk: &SharedMemoryChunk) {
        if let Some(ptr) = pointer_from_chunk(chunk, &self.metadata_region) {
            self.allocator.deallocate(ptr, chunk.size as usize);
        }
    }

    /// Free the first `owned` chunks of a persisted list and the list itself.
    fn discard_chunk_list(&self, chunk_list: SharedMemoryLocation, owned: usize) {
        let Some(mut vector) = ShmChunkVector::resolve(&chunk_list, &self.metadata_region) else {
            return;
        };
        // SAFETY: the list was persisted by this allocator and never published.
        let vector = unsafe { vector.as_mut() };
        for chunk in vector.iter().take(owned) {
            self.release_chunk(chunk);
        }
        vector.clear();
        self.allocator.deallocate(
            std::ptr::NonNull::from(vector).cast(),
            std::mem::size_of::<ShmChunkVector>(),
        );
    }

    /// Free what the library allocated for a job.
    ///
    /// Shm jobs release their first two chunks (timestamp and metadata);
    /// local jobs release every chunk. Failures to free single chunks are
    /// ignored.
    pub fn deallocate_job(
        &self,
        chunk_list: SharedMemoryLocation,
        job_type: TraceJobType,
    ) -> TraceResult<()> {
        if chunk_list.shm_object_handle != self.trace_meta_data_shm_object_handle() {
            return Err(ErrorCode::WrongHandleRecoverable);
        }
        let Some(mut vector) = ShmChunkVector::resolve(&chunk_list, &self.metadata_region) else {
            error!("Chunk list at offset {} cannot be resolved", chunk_list.offset);
            return Err(ErrorCode::InvalidArgumentFatal);
        };
        // SAFETY: resolved inside the region; the daemon is done with the job.
        let vector = unsafe { vector.as_mut() };
        let count = match job_type {
            TraceJobType::ShmJob => LOCALLY_CREATED_ELEMENTS,
            TraceJobType::LocalJob => vector.len(),
        };
        for index in 0..count {
            if let Ok(chunk) = vector.at(index) {
                self.release_chunk(&chunk);
            }
        }
        vector.clear();
        self.allocator.deallocate(
            std::ptr::NonNull::from(vector).cast(),
            std::mem::size_of::<ShmChunkVector>(),
        );
        Ok(())
    }

    /// Current timestamp in wire form, 0 without a clock.
    pub fn get_time_stamp(&self) -> u64 {
        self.logger_time
            .as_ref()
            .map_or(0, |logger_time| serialize_to_plp(logger_time.now()))
    }

    /// Whether jobs carry real timestamps.
    pub fn is_logger_time_available(&self) -> bool {
        self.logger_time.is_some()
    }

    /// Detach from the ring buffer.
    pub fn close_ring_buffer(&self) {
        self.ring_buffer.write().close();
    }

    /// Reset the ring buffer.
    pub fn reset_ring_buffer(&self) {
        self.ring_buffer.write().reset();
    }
}

impl std::fmt::Debug for TraceJobAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceJobAllocator")
            .field("metadata_handle", &self.trace_meta_data_shm_object_handle())
            .field("job_id", &*self.job_id.lock())
            .field("logger_time_available", &self.is_logger_time_available())
            .finish()
    }
}
