//! Wiring of a complete client-side trace runtime from configuration

use crate::job_allocator::TraceJobAllocator;
use crate::job_container::{TraceJobContainer, TraceJobType};
use crate::job_processor::{TraceJobDeallocator, TraceJobProcessor};
use crate::logger_time::{LoggerTime, SteadyClockLoggerTime};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use trace_common::ErrorCode;
use trace_common::config::{ConfigError, TraceLibraryConfig};
use trace_common::types::SharedMemoryLocation;
use trace_shm::platform::shm_path;
use trace_shm::{
    FlexibleCircularAllocator, MemoryResourceRegistry, ResourcePointer, ShmRegion, ShmRingBuffer,
    ShmRingBufferImpl,
};
use tracing::{error, info, warn};

/// Failure while building a [`TraceRuntime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A component could not be created
    #[error("Trace runtime initialization failed: {0}")]
    Trace(#[from] ErrorCode),
}

/// Install the tracing subscriber at the configured level. `RUST_LOG`
/// takes precedence.
pub fn init_logging(config: &TraceLibraryConfig) {
    trace_shm::init_tracing(config.shared.log_level.as_directive());
}

/// Everything a trace client needs, wired together.
pub struct TraceRuntime {
    registry: Arc<MemoryResourceRegistry>,
    metadata_region: ResourcePointer,
    metadata_path: Option<PathBuf>,
    allocator: Arc<FlexibleCircularAllocator>,
    job_allocator: Arc<TraceJobAllocator>,
    processor: TraceJobProcessor,
}

impl TraceRuntime {
    /// Build the runtime described by `config`.
    ///
    /// Maps the metadata region, attaches the ring buffer and connects the
    /// job allocator and processor through one container.
    pub fn from_config(config: &TraceLibraryConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let metadata = &config.metadata;

        let metadata_path = metadata.region_path.as_deref().map(shm_path);
        let region = match &metadata_path {
            Some(path) => ShmRegion::create(path, metadata.region_size),
            None => ShmRegion::anonymous(metadata.region_size),
        }
        .map_err(|err| {
            error!("Failed to map trace metadata region: {}", err);
            ErrorCode::TraceJobAllocatorInitializationFailedFatal
        })?;
        let region: ResourcePointer = Arc::new(region);

        let allocator = Arc::new(FlexibleCircularAllocator::new(
            Arc::clone(&region),
            0,
            metadata.allocator_size,
        )?);

        let registry = Arc::new(MemoryResourceRegistry::new());
        if !registry.insert(metadata.shm_object_handle, Arc::clone(&region)) {
            return Err(ErrorCode::SharedMemoryObjectAlreadyRegisteredRecoverable.into());
        }

        let ring_config = &config.ring_buffer;
        let mut ring_buffer = ShmRingBufferImpl::new(
            shm_path(&ring_config.path),
            ring_config.number_of_elements,
            ring_config.statistics_enabled,
        );
        ring_buffer.create_or_open(ring_config.is_owner).inspect_err(|err| {
            error!("Failed to attach trace ring buffer {}: {}", ring_config.path, err);
        })?;

        let logger_time =
            SteadyClockLoggerTime::init().map(|clock| Arc::new(clock) as Arc<dyn LoggerTime>);
        let container = Arc::new(<TraceJobContainer>::new());
        let job_allocator = Arc::new(TraceJobAllocator::new(
            Arc::clone(&container),
            Arc::clone(&region),
            allocator.clone(),
            Box::new(ring_buffer),
            logger_time,
        ));
        job_allocator.set_trace_meta_data_shm_object_handle(metadata.shm_object_handle);

        let deallocator: TraceJobDeallocator = {
            let job_allocator = Arc::clone(&job_allocator);
            Arc::new(move |chunk_list: SharedMemoryLocation, job_type: TraceJobType| {
                job_allocator.deallocate_job(chunk_list, job_type)
            })
        };
        let processor =
            TraceJobProcessor::new(container, Some(deallocator), Arc::new(AtomicBool::new(false)));

        info!(
            "Trace runtime '{}' ready: {} ring elements, {} bytes metadata memory",
            config.shared.service_name, ring_config.number_of_elements, metadata.allocator_size
        );
        Ok(Self {
            registry,
            metadata_region: region,
            metadata_path,
            allocator,
            job_allocator,
            processor,
        })
    }

    /// Job allocator of this runtime.
    pub fn job_allocator(&self) -> &Arc<TraceJobAllocator> {
        &self.job_allocator
    }

    /// Processor draining this runtime's jobs.
    pub fn processor(&self) -> &TraceJobProcessor {
        &self.processor
    }

    /// Registered shared-memory objects.
    pub fn registry(&self) -> &Arc<MemoryResourceRegistry> {
        &self.registry
    }

    /// Trace metadata region.
    pub fn metadata_region(&self) -> &ResourcePointer {
        &self.metadata_region
    }

    /// Allocator over the metadata region.
    pub fn allocator(&self) -> &Arc<FlexibleCircularAllocator> {
        &self.allocator
    }

    /// Release pending jobs, detach from the ring buffer and unlink the
    /// metadata region.
    pub fn shutdown(self) {
        if let Err(err) = self.processor.clean_pending_jobs() {
            warn!("Pending trace jobs not cleaned: {}", err);
        }
        self.processor.request_stop();
        self.job_allocator.close_ring_buffer();
        if let Some(path) = &self.metadata_path
            && let Err(err) = ShmRegion::remove(path)
        {
            warn!("Failed to unlink trace metadata region: {}", err);
        }
        info!("Trace runtime shut down");
    }
}

impl std::fmt::Debug for TraceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRuntime")
            .field("metadata_region", &self.metadata_region)
            .field("job_allocator", &self.job_allocator)
            .field("processor", &self.processor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta_info::{AraComMetaInfo, AraComProperties, MetaInfoVariant};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use trace_common::config::{LogLevel, MetadataConfig, RingBufferConfig, SharedConfig};
    use trace_common::types::{BindingType, app_id_from_str};
    use trace_shm::{ShmDataChunkList, TraceJobStatus};

    fn config(dir: &TempDir) -> TraceLibraryConfig {
        TraceLibraryConfig {
            shared: SharedConfig {
                log_level: LogLevel::Debug,
                service_name: "factory-test".to_string(),
            },
            ring_buffer: RingBufferConfig {
                path: dir.path().join("ring").display().to_string(),
                number_of_elements: 16,
                statistics_enabled: true,
                is_owner: true,
            },
            metadata: MetadataConfig {
                region_path: Some(dir.path().join("metadata").display().to_string()),
                region_size: 64 << 10,
                allocator_size: 32 << 10,
                shm_object_handle: 3,
            },
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.metadata.allocator_size = config.metadata.region_size + 1;
        assert!(matches!(
            TraceRuntime::from_config(&config),
            Err(RuntimeError::Config(_))
        ));
    }

    #[test]
    fn test_non_owner_rejects_corrupted_ring() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.ring_buffer.is_owner = false;
        std::fs::write(dir.path().join("ring"), vec![0xAB; 4096]).unwrap();
        assert!(matches!(
            TraceRuntime::from_config(&config),
            Err(RuntimeError::Trace(ErrorCode::RingBufferInvalidMemoryResourceRecoverable))
        ));
    }

    #[test]
    fn test_runtime_is_wired() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        init_logging(&config);
        let runtime = TraceRuntime::from_config(&config).unwrap();

        assert_eq!(runtime.job_allocator().trace_meta_data_shm_object_handle(), 3);
        assert!(runtime.job_allocator().is_logger_time_available());
        assert!(runtime.registry().get(3).is_some());
        assert_eq!(runtime.metadata_region().size(), 64 << 10);
        assert!(dir.path().join("metadata").exists());
        assert!(dir.path().join("ring").exists());

        runtime.shutdown();
        assert!(!dir.path().join("metadata").exists());
        assert!(!dir.path().join("ring").exists());
    }

    #[test]
    fn test_job_round_trip_through_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = TraceRuntime::from_config(&config(&dir)).unwrap();
        let done = Arc::new(AtomicU32::new(u32::MAX));
        let seen = Arc::clone(&done);
        runtime
            .processor()
            .save_callback(
                1,
                Arc::new(move |context_id: u32| seen.store(context_id, Ordering::SeqCst)),
            )
            .unwrap();

        let meta = MetaInfoVariant::from(AraComMetaInfo::new(AraComProperties::default()));
        let mut chunks = ShmDataChunkList::new();
        runtime
            .job_allocator()
            .allocate_shm_job(1, &meta, BindingType::LoLa, &app_id_from_str("app"), &mut chunks, 42)
            .unwrap();
        let allocated = runtime.allocator().allocation_count();
        assert!(allocated > 0);

        let element = runtime.job_allocator().container().get_ready_element().unwrap();
        assert_eq!(element.ring_buffer_element.status(), TraceJobStatus::Ready);
        element.ring_buffer_element.release();

        runtime.processor().process_jobs().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 42);
        assert_eq!(runtime.allocator().allocation_count(), 0);
        runtime.shutdown();
    }
}
