//! Fixed-slot ring buffer shared between trace producers and the daemon
//!
//! The whole ring lives in one shared-memory object: a cache-line aligned
//! header carrying the packed state word, followed by `number_of_elements`
//! slots. Producers claim the slot at `end`, fill it and mark it ready; the
//! daemon consumes ready slots at `start`, processes them and releases them
//! back to `Empty`, which is what producers watch for completion.

mod element;
mod state;
mod statistics;

pub use element::{ShmRingBufferElement, TraceJobStatus};
pub use state::RingBufferState;
pub use statistics::{ConsumerStatistics, ProducerStatistics, RingBufferStatistics};

use crate::error::ShmError;
use crate::region::ShmRegion;
use statistics::SideCounters;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use trace_common::consts::{MAX_15_BITS, MAX_GET_ELEMENT_RETRIES, RING_BUFFER_SHARED_MEMORY_SIZE};
use trace_common::{ErrorCode, TraceResult};
use tracing::{debug, info, warn};

/// Marks an initialised ring buffer object ("TRCRING\0").
pub const RING_BUFFER_MAGIC: u64 = 0x5452_4352_494E_4700;

#[repr(C, align(64))]
#[derive(Debug)]
struct RingBufferHeader {
    magic: AtomicU64,
    state: AtomicU32,
    /// Processes attached to the object
    user_count: AtomicU32,
    number_of_elements: AtomicU32,
    statistics_enabled: AtomicU32,
    producer: SideCounters,
    consumer: SideCounters,
}

const HEADER_SIZE: usize = std::mem::size_of::<RingBufferHeader>();

static_assertions::const_assert_eq!(HEADER_SIZE % 64, 0);
static_assertions::const_assert_eq!(HEADER_SIZE % std::mem::align_of::<ShmRingBufferElement>(), 0);

impl RingBufferHeader {
    fn number_of_elements(&self) -> u16 {
        self.number_of_elements.load(Ordering::Acquire) as u16
    }

    fn statistics_enabled(&self) -> bool {
        self.statistics_enabled.load(Ordering::Relaxed) != 0
    }

    fn load_state(&self) -> (u32, RingBufferState) {
        let raw = self.state.load(Ordering::Acquire);
        (raw, RingBufferState::unpack(raw))
    }
}

/// Bytes needed for a ring of `number_of_elements` slots.
pub const fn required_size(number_of_elements: u16) -> usize {
    HEADER_SIZE + number_of_elements as usize * std::mem::size_of::<ShmRingBufferElement>()
}

/// A slot handed out by the ring buffer.
///
/// Keeps the mapping alive, so it stays valid after the ring is closed.
#[derive(Clone)]
pub struct ShmRingBufferElementRef {
    region: Arc<ShmRegion>,
    index: u16,
}

impl ShmRingBufferElementRef {
    /// Slot index inside the ring.
    pub fn index(&self) -> u16 {
        self.index
    }
}

impl Deref for ShmRingBufferElementRef {
    type Target = ShmRingBufferElement;

    fn deref(&self) -> &Self::Target {
        let offset =
            HEADER_SIZE + self.index as usize * std::mem::size_of::<ShmRingBufferElement>();
        // SAFETY: the index was bounds-checked against a header whose slots
        // were verified to fit the mapping, and the Arc keeps it mapped.
        unsafe { &*self.region.base_ptr().as_ptr().add(offset).cast::<ShmRingBufferElement>() }
    }
}

impl std::fmt::Debug for ShmRingBufferElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRingBufferElementRef")
            .field("index", &self.index)
            .field("element", &**self)
            .finish()
    }
}

/// Operations on the shared ring buffer.
pub trait ShmRingBuffer: Send + Sync {
    /// Attach to the ring, creating it when needed.
    ///
    /// An owner recreates a ring that still holds elements from a previous
    /// run; a non-owner creates one only if none exists.
    fn create_or_open(&mut self, is_owner: bool) -> TraceResult<()>;

    /// Claim the slot at `end` for a new job. The slot comes back `Allocated`.
    fn get_empty_element(&self) -> TraceResult<ShmRingBufferElementRef>;

    /// Consume the oldest ready slot. `Invalid` slots found on the way are freed.
    fn get_ready_element(&self) -> TraceResult<ShmRingBufferElementRef>;

    /// Number of occupied slots.
    fn use_count(&self) -> TraceResult<u16>;

    /// Whether no slot is occupied.
    fn is_buffer_empty(&self) -> TraceResult<bool>;

    /// Number of slots.
    fn size(&self) -> u16;

    /// Whether the ring is attached.
    fn is_initialized(&self) -> bool;

    /// Snapshot of the call counters.
    fn statistics(&self) -> TraceResult<RingBufferStatistics>;

    /// Zero the call counters.
    fn reset_statistics(&self);

    /// Detach, unlinking the object when this is the last user.
    fn close(&mut self);

    /// Drop one attached user and wipe the ring once only the caller is left.
    fn reset(&mut self);
}

/// [`ShmRingBuffer`] backed by a file under `/dev/shm` or an anonymous mapping.
#[derive(Debug)]
pub struct ShmRingBufferImpl {
    path: Option<PathBuf>,
    number_of_elements: u16,
    statistics_enabled: bool,
    region: Option<Arc<ShmRegion>>,
}

impl ShmRingBufferImpl {
    /// Ring stored in the shared-memory object at `path`.
    pub fn new(
        path: impl Into<PathBuf>,
        number_of_elements: u16,
        statistics_enabled: bool,
    ) -> Self {
        Self {
            path: Some(path.into()),
            number_of_elements,
            statistics_enabled,
            region: None,
        }
    }

    /// Ring visible only to this process.
    pub fn in_memory(number_of_elements: u16, statistics_enabled: bool) -> Self {
        Self {
            path: None,
            number_of_elements,
            statistics_enabled,
            region: None,
        }
    }

    /// Backing object path, `None` for in-memory rings.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Processes currently attached.
    pub fn attached_users(&self) -> u32 {
        self.header()
            .map_or(0, |header| header.user_count.load(Ordering::Acquire))
    }

    fn header(&self) -> Option<&RingBufferHeader> {
        self.region.as_deref().map(header_of)
    }

    fn attached(&self) -> TraceResult<(&Arc<ShmRegion>, &RingBufferHeader)> {
        let region = self
            .region
            .as_ref()
            .ok_or(ErrorCode::RingBufferNotInitializedRecoverable)?;
        Ok((region, header_of(region)))
    }

    fn element_ref(region: &Arc<ShmRegion>, index: u16) -> ShmRingBufferElementRef {
        ShmRingBufferElementRef {
            region: Arc::clone(region),
            index,
        }
    }

    fn create(&self) -> TraceResult<ShmRegion> {
        if self.number_of_elements == 0 {
            return Err(ErrorCode::InvalidArgumentFatal);
        }
        if self.number_of_elements > MAX_15_BITS {
            return Err(ErrorCode::RingBufferTooLargeRecoverable);
        }
        let size = required_size(self.number_of_elements).max(RING_BUFFER_SHARED_MEMORY_SIZE);
        let region = match &self.path {
            Some(path) => ShmRegion::create(path, size),
            None => ShmRegion::anonymous(size),
        }
        .map_err(ErrorCode::from)?;

        let header = header_of(&region);
        header.state.store(RingBufferState::INITIAL.pack(), Ordering::Relaxed);
        header.user_count.store(0, Ordering::Relaxed);
        header
            .number_of_elements
            .store(u32::from(self.number_of_elements), Ordering::Relaxed);
        header
            .statistics_enabled
            .store(u32::from(self.statistics_enabled), Ordering::Relaxed);
        header.producer.reset();
        header.consumer.reset();
        header.magic.store(RING_BUFFER_MAGIC, Ordering::Release);

        info!(
            "Created trace ring buffer {:?} with {} elements",
            self.path, self.number_of_elements
        );
        Ok(region)
    }

    fn open(path: &Path) -> Result<ShmRegion, ShmError> {
        let region = ShmRegion::open(path)?;
        validate(&region)?;
        Ok(region)
    }

    fn with_producer<T>(
        header: &RingBufferHeader,
        op: impl FnOnce(&RingBufferHeader, bool) -> TraceResult<T>,
    ) -> TraceResult<T> {
        let enabled = header.statistics_enabled();
        SideCounters::bump(&header.producer.call_count, enabled);
        let result = op(header, enabled);
        if result.is_err() {
            SideCounters::bump(&header.producer.call_failure_count, enabled);
        }
        result
    }

    fn with_consumer<T>(
        header: &RingBufferHeader,
        op: impl FnOnce(&RingBufferHeader, bool) -> TraceResult<T>,
    ) -> TraceResult<T> {
        let enabled = header.statistics_enabled();
        SideCounters::bump(&header.consumer.call_count, enabled);
        let result = op(header, enabled);
        if result.is_err() {
            SideCounters::bump(&header.consumer.call_failure_count, enabled);
        }
        result
    }
}

fn header_of(region: &ShmRegion) -> &RingBufferHeader {
    // SAFETY: every attached region is at least HEADER_SIZE bytes and
    // cache-line aligned; the header consists of atomics only.
    unsafe { &*region.base_ptr().as_ptr().cast::<RingBufferHeader>() }
}

fn element_of(region: &ShmRegion, index: u16) -> &ShmRingBufferElement {
    let offset = HEADER_SIZE + index as usize * std::mem::size_of::<ShmRingBufferElement>();
    // SAFETY: callers pass index < number_of_elements, which was validated
    // against the mapping size.
    unsafe { &*region.base_ptr().as_ptr().add(offset).cast::<ShmRingBufferElement>() }
}

fn validate(region: &ShmRegion) -> Result<(), ShmError> {
    let name = region
        .path()
        .map_or_else(|| "<anonymous>".to_string(), |p| p.display().to_string());
    if region.size() < HEADER_SIZE {
        return Err(ShmError::Corrupted {
            name,
            reason: "object smaller than ring buffer header",
        });
    }
    let header = header_of(region);
    if header.magic.load(Ordering::Acquire) != RING_BUFFER_MAGIC {
        return Err(ShmError::Corrupted {
            name,
            reason: "invalid magic",
        });
    }
    let n = header.number_of_elements.load(Ordering::Acquire);
    if n == 0 || n > u32::from(MAX_15_BITS) || required_size(n as u16) > region.size() {
        return Err(ShmError::Corrupted {
            name,
            reason: "element count does not fit the object",
        });
    }
    Ok(())
}

impl ShmRingBuffer for ShmRingBufferImpl {
    fn create_or_open(&mut self, is_owner: bool) -> TraceResult<()> {
        if self.region.is_some() {
            return Err(ErrorCode::RingBufferInitializedRecoverable);
        }

        let region = match self.path.clone() {
            None => self.create()?,
            Some(path) => match Self::open(&path) {
                Ok(region) => {
                    let (_, state) = header_of(&region).load_state();
                    if is_owner && !state.empty {
                        warn!(
                            "Trace ring buffer {} holds stale elements, recreating",
                            path.display()
                        );
                        drop(region);
                        ShmRegion::remove(&path).map_err(ErrorCode::from)?;
                        self.create()?
                    } else {
                        debug!("Opened trace ring buffer {}", path.display());
                        region
                    }
                }
                Err(ShmError::NotFound { .. }) => self.create()?,
                Err(err @ ShmError::Corrupted { .. }) if is_owner => {
                    warn!("{}, recreating", err);
                    ShmRegion::remove(&path).map_err(ErrorCode::from)?;
                    self.create()?
                }
                Err(err) => {
                    warn!("Failed to open trace ring buffer {}: {}", path.display(), err);
                    return Err(ErrorCode::RingBufferInvalidMemoryResourceRecoverable);
                }
            },
        };

        let header = header_of(&region);
        header.user_count.fetch_add(1, Ordering::AcqRel);
        self.number_of_elements = header.number_of_elements();
        self.statistics_enabled = header.statistics_enabled();
        self.region = Some(Arc::new(region));
        Ok(())
    }

    fn get_empty_element(&self) -> TraceResult<ShmRingBufferElementRef> {
        let (region, header) = self.attached()?;
        Self::with_producer(header, |header, stats| {
            let size = header.number_of_elements();
            for _ in 0..MAX_GET_ELEMENT_RETRIES {
                let (raw, state) = header.load_state();
                if !state.is_valid(size) {
                    return Err(ErrorCode::RingBufferInvalidStateRecoverable);
                }
                if state.is_full() {
                    SideCounters::bump(&header.producer.boundary_count, stats);
                    return Err(ErrorCode::RingBufferFullRecoverable);
                }
                let element = element_of(region, state.end);
                if element.status() != TraceJobStatus::Empty {
                    continue;
                }
                SideCounters::bump(&header.producer.cas_trials, stats);
                match header.state.compare_exchange(
                    raw,
                    state.produced(size).pack(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        element.set_status(TraceJobStatus::Allocated);
                        return Ok(Self::element_ref(region, state.end));
                    }
                    Err(_) => SideCounters::bump(&header.producer.cas_failures, stats),
                }
            }
            Err(ErrorCode::RingBufferNoEmptyElementRecoverable)
        })
    }

    fn get_ready_element(&self) -> TraceResult<ShmRingBufferElementRef> {
        let (region, header) = self.attached()?;
        Self::with_consumer(header, |header, stats| {
            let size = header.number_of_elements();
            for _ in 0..MAX_GET_ELEMENT_RETRIES {
                let (raw, state) = header.load_state();
                if !state.is_valid(size) {
                    return Err(ErrorCode::RingBufferInvalidStateRecoverable);
                }
                if state.empty {
                    SideCounters::bump(&header.consumer.boundary_count, stats);
                    return Err(ErrorCode::RingBufferEmptyRecoverable);
                }
                let element = element_of(region, state.start);
                let status = element.status();
                if !matches!(status, TraceJobStatus::Ready | TraceJobStatus::Invalid) {
                    continue;
                }
                SideCounters::bump(&header.consumer.cas_trials, stats);
                if header
                    .state
                    .compare_exchange(
                        raw,
                        state.consumed(size).pack(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    SideCounters::bump(&header.consumer.cas_failures, stats);
                    continue;
                }
                if status == TraceJobStatus::Ready {
                    return Ok(Self::element_ref(region, state.start));
                }
                debug!("Skipping invalid trace job at slot {}", state.start);
                element.release();
            }
            Err(ErrorCode::RingBufferNoReadyElementRecoverable)
        })
    }

    fn use_count(&self) -> TraceResult<u16> {
        let (_, header) = self.attached()?;
        let (_, state) = header.load_state();
        Ok(state.occupied(header.number_of_elements()))
    }

    fn is_buffer_empty(&self) -> TraceResult<bool> {
        let (_, header) = self.attached()?;
        Ok(header.load_state().1.empty)
    }

    fn size(&self) -> u16 {
        self.number_of_elements
    }

    fn is_initialized(&self) -> bool {
        self.region.is_some()
    }

    fn statistics(&self) -> TraceResult<RingBufferStatistics> {
        let (_, header) = self.attached()?;
        if !header.statistics_enabled() {
            return Err(ErrorCode::GenericErrorRecoverable);
        }
        Ok(RingBufferStatistics::snapshot(&header.producer, &header.consumer))
    }

    fn reset_statistics(&self) {
        if let Some(header) = self.header() {
            header.producer.reset();
            header.consumer.reset();
        }
    }

    fn close(&mut self) {
        let Some(region) = self.region.take() else {
            return;
        };
        let header = header_of(&region);
        if let (1, Some(path)) = (header.user_count.load(Ordering::Acquire), &self.path)
            && let Err(err) = ShmRegion::remove(path)
        {
            warn!("Failed to unlink trace ring buffer: {}", err);
        }
        header.user_count.fetch_sub(1, Ordering::AcqRel);
        debug!("Closed trace ring buffer {:?}", self.path);
    }

    fn reset(&mut self) {
        let Some(region) = self.region.as_ref() else {
            return;
        };
        let header = header_of(region);
        let remaining = header
            .user_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .map(|previous| previous - 1);
        // Wipe only while the caller is still the one attached user.
        if remaining != Ok(1) {
            return;
        }
        for index in 0..header.number_of_elements() {
            element_of(region, index).reset();
        }
        header.state.store(RingBufferState::INITIAL.pack(), Ordering::Release);
        header.producer.reset();
        header.consumer.reset();
        info!("Trace ring buffer {:?} reset", self.path);
    }
}
