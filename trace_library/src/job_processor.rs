//! Frees jobs the daemon has finished with and notifies their clients

use crate::job_container::{TraceJobContainer, TraceJobContainerElement, TraceJobType};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use trace_common::consts::MAX_NUMBER_OF_CLIENTS;
use trace_common::types::{SharedMemoryLocation, TraceClientId, TraceContextId};
use trace_common::{ErrorCode, TraceResult};
use trace_shm::TraceJobStatus;
use tracing::{debug, warn};

/// Frees the memory of a finished job.
pub type TraceJobDeallocator =
    Arc<dyn Fn(SharedMemoryLocation, TraceJobType) -> TraceResult<()> + Send + Sync>;

/// Told which shm job of its client is done, by context id.
pub type TraceDoneCallback = Arc<dyn Fn(TraceContextId) + Send + Sync>;

struct CallbackElement {
    client_id: TraceClientId,
    callback: TraceDoneCallback,
}

/// Drains the job container on the client side.
///
/// The daemon hands a slot back by clearing its context id and marking it
/// `Empty`; jobs are released in publish order, stopping at the first one
/// the daemon still holds.
pub struct TraceJobProcessor {
    container: Arc<TraceJobContainer>,
    deallocator: Option<TraceJobDeallocator>,
    callbacks: Mutex<heapless::Vec<CallbackElement, MAX_NUMBER_OF_CLIENTS>>,
    stop: Arc<AtomicBool>,
}

impl TraceJobProcessor {
    /// Processor draining `container`. Setting `stop` aborts any drain.
    pub fn new(
        container: Arc<TraceJobContainer>,
        deallocator: Option<TraceJobDeallocator>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            container,
            deallocator,
            callbacks: Mutex::new(heapless::Vec::new()),
            stop,
        }
    }

    /// Ask running drains to return.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Register the trace-done callback of `client_id`.
    pub fn save_callback(
        &self,
        client_id: TraceClientId,
        callback: TraceDoneCallback,
    ) -> TraceResult<()> {
        let mut callbacks = self.callbacks.lock();
        if callbacks.iter().any(|element| element.client_id == client_id) {
            return Err(ErrorCode::CallbackAlreadyRegisteredRecoverable);
        }
        callbacks
            .push(CallbackElement { client_id, callback })
            .map_err(|_| ErrorCode::NoFreeSlotToSaveTheCallbackRecoverable)
    }

    /// Release every job the daemon has finished, oldest first.
    pub fn process_jobs(&self) -> TraceResult<()> {
        let deallocator = self
            .deallocator
            .as_ref()
            .ok_or(ErrorCode::NoDeallocatorCallbackRegisteredFatal)?;

        let mut released = 0usize;
        while !self.stop_requested() {
            let Ok(element) = self.container.get_ready_element() else {
                break;
            };
            if !is_finished(&element) {
                break;
            }
            self.deallocate_element(deallocator)?;
            released += 1;
        }
        if released > 0 {
            debug!("Released {} finished trace jobs", released);
        }
        Ok(())
    }

    /// Release every published job, finished or not.
    pub fn clean_pending_jobs(&self) -> TraceResult<()> {
        let deallocator = self
            .deallocator
            .as_ref()
            .ok_or(ErrorCode::NoDeallocatorCallbackRegisteredFatal)?;

        let mut released = 0usize;
        while !self.stop_requested() && self.container.get_ready_element().is_ok() {
            if let Err(err) = self.deallocate_element(deallocator) {
                warn!("Failed to deallocate pending trace job: {}", err);
            }
            released += 1;
        }
        debug!("Cleaned {} pending trace jobs", released);
        Ok(())
    }

    fn deallocate_element(&self, deallocator: &TraceJobDeallocator) -> TraceResult<()> {
        let Some(element) = self.container.claim_ready_element() else {
            return Ok(());
        };
        let result = deallocator(element.chunk_list, element.job_type);
        if element.job_type == TraceJobType::ShmJob {
            self.call_client_callback(&element);
        }
        while !self.container.release_ready_element() {
            if self.stop_requested() {
                break;
            }
            std::hint::spin_loop();
        }
        result
    }

    fn call_client_callback(&self, element: &TraceJobContainerElement) {
        let id = element.original_trace_context_id;
        let callback = self
            .callbacks
            .lock()
            .iter()
            .find(|callback| callback.client_id == id.client_id)
            .map(|callback| Arc::clone(&callback.callback));
        if let Some(callback) = callback {
            callback(id.context_id);
        }
    }
}

fn is_finished(element: &TraceJobContainerElement) -> bool {
    let slot = &element.ring_buffer_element;
    slot.global_context_id() != element.original_trace_context_id
        || slot.status() == TraceJobStatus::Empty
}

impl std::fmt::Debug for TraceJobProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceJobProcessor")
            .field("has_deallocator", &self.deallocator.is_some())
            .field("callbacks", &self.callbacks.lock().len())
            .field("stop", &self.stop_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trace_common::types::GlobalTraceContextId;
    use trace_shm::{ShmRingBuffer, ShmRingBufferImpl};

    struct Fixture {
        ring: ShmRingBufferImpl,
        container: Arc<TraceJobContainer>,
        freed: Arc<Mutex<Vec<(SharedMemoryLocation, TraceJobType)>>>,
        processor: TraceJobProcessor,
    }

    fn fixture() -> Fixture {
        let mut ring = ShmRingBufferImpl::in_memory(8, false);
        ring.create_or_open(true).unwrap();
        let container = Arc::new(<TraceJobContainer>::new());
        let freed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&freed);
        let deallocator: TraceJobDeallocator = Arc::new(
            move |location: SharedMemoryLocation, job_type: TraceJobType| -> TraceResult<()> {
                sink.lock().push((location, job_type));
                Ok(())
            },
        );
        let processor = TraceJobProcessor::new(
            Arc::clone(&container),
            Some(deallocator),
            Arc::new(AtomicBool::new(false)),
        );
        Fixture {
            ring,
            container,
            freed,
            processor,
        }
    }

    fn publish(
        fixture: &Fixture,
        client: u8,
        context: u32,
        job_type: TraceJobType,
    ) -> trace_shm::ShmRingBufferElementRef {
        let slot = fixture.ring.get_empty_element().unwrap();
        let id = GlobalTraceContextId::new(client, context);
        slot.set_global_context_id(id);
        slot.set_status(TraceJobStatus::Ready);
        assert!(fixture.container.add(TraceJobContainerElement {
            ring_buffer_element: slot.clone(),
            original_trace_context_id: id,
            job_type,
            chunk_list: SharedMemoryLocation::new(0, u64::from(context)),
        }));
        slot
    }

    #[test]
    fn test_missing_deallocator() {
        let processor = TraceJobProcessor::new(
            Arc::new(<TraceJobContainer>::new()),
            None,
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(
            processor.process_jobs(),
            Err(ErrorCode::NoDeallocatorCallbackRegisteredFatal)
        );
        assert_eq!(
            processor.clean_pending_jobs(),
            Err(ErrorCode::NoDeallocatorCallbackRegisteredFatal)
        );
    }

    #[test]
    fn test_callback_registration() {
        let processor = fixture().processor;
        for client in 0..MAX_NUMBER_OF_CLIENTS as u8 {
            processor.save_callback(client, Arc::new(|_: TraceContextId| {})).unwrap();
        }
        assert_eq!(
            processor.save_callback(0, Arc::new(|_: TraceContextId| {})),
            Err(ErrorCode::CallbackAlreadyRegisteredRecoverable)
        );
        assert_eq!(
            processor.save_callback(200, Arc::new(|_: TraceContextId| {})),
            Err(ErrorCode::NoFreeSlotToSaveTheCallbackRecoverable)
        );
    }

    #[test]
    fn test_stops_at_job_in_flight() {
        let fixture = fixture();
        let done = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&done);
        fixture
            .processor
            .save_callback(3, Arc::new(move |context: TraceContextId| sink.lock().push(context)))
            .unwrap();

        let first = publish(&fixture, 3, 10, TraceJobType::ShmJob);
        let _second = publish(&fixture, 3, 11, TraceJobType::ShmJob);
        let third = publish(&fixture, 3, 12, TraceJobType::LocalJob);

        // Nothing finished yet.
        fixture.processor.process_jobs().unwrap();
        assert!(fixture.freed.lock().is_empty());

        // The daemon finishes the first and third job.
        first.release();
        third.release();
        fixture.processor.process_jobs().unwrap();
        assert_eq!(fixture.freed.lock().len(), 1);
        assert_eq!(*done.lock(), vec![10]);
        assert_eq!(fixture.container.get_empty_elements_count(), fixture.container.size() - 2);
    }

    #[test]
    fn test_local_jobs_do_not_notify() {
        let fixture = fixture();
        let done = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&done);
        fixture
            .processor
            .save_callback(1, Arc::new(move |context: TraceContextId| sink.lock().push(context)))
            .unwrap();

        publish(&fixture, 1, 0, TraceJobType::LocalJob).release();
        fixture.processor.process_jobs().unwrap();
        assert_eq!(fixture.freed.lock()[0].1, TraceJobType::LocalJob);
        assert!(done.lock().is_empty());
    }

    #[test]
    fn test_clean_pending_jobs_releases_everything() {
        let fixture = fixture();
        for context in 0..5 {
            publish(&fixture, 2, context, TraceJobType::ShmJob);
        }
        fixture.processor.clean_pending_jobs().unwrap();
        assert_eq!(fixture.freed.lock().len(), 5);
        assert_eq!(fixture.container.get_empty_elements_count(), fixture.container.size());
    }

    #[test]
    fn test_stop_aborts_drain() {
        let fixture = fixture();
        publish(&fixture, 2, 1, TraceJobType::ShmJob).release();
        fixture.processor.request_stop();
        fixture.processor.process_jobs().unwrap();
        assert!(fixture.freed.lock().is_empty());
    }

    #[test]
    fn test_deallocator_error_is_reported() {
        let mut ring = ShmRingBufferImpl::in_memory(2, false);
        ring.create_or_open(true).unwrap();
        let container = Arc::new(<TraceJobContainer>::new());
        let deallocator: TraceJobDeallocator =
            Arc::new(|_: SharedMemoryLocation, _: TraceJobType| -> TraceResult<()> {
                Err(ErrorCode::WrongHandleRecoverable)
            });
        let processor = TraceJobProcessor::new(
            Arc::clone(&container),
            Some(deallocator),
            Arc::new(AtomicBool::new(false)),
        );

        let slot = ring.get_empty_element().unwrap();
        assert!(container.add(TraceJobContainerElement {
            ring_buffer_element: slot.clone(),
            original_trace_context_id: GlobalTraceContextId::new(0, 4),
            job_type: TraceJobType::ShmJob,
            chunk_list: SharedMemoryLocation::default(),
        }));
        slot.release();
        assert_eq!(processor.process_jobs(), Err(ErrorCode::WrongHandleRecoverable));
        // The job is gone regardless.
        assert_eq!(container.get_empty_elements_count(), container.size());
    }
}
