//! Call counters kept in the ring buffer header

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one side of the ring, living in shared memory.
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct SideCounters {
    pub(crate) call_count: AtomicU64,
    pub(crate) call_failure_count: AtomicU64,
    pub(crate) cas_trials: AtomicU64,
    pub(crate) cas_failures: AtomicU64,
    /// Full (producer side) or empty (consumer side) hits
    pub(crate) boundary_count: AtomicU64,
}

impl SideCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64, enabled: bool) {
        if enabled {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.call_count,
            &self.call_failure_count,
            &self.cas_trials,
            &self.cas_failures,
            &self.boundary_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn load(&self) -> [u64; 5] {
        [
            self.call_count.load(Ordering::Relaxed),
            self.call_failure_count.load(Ordering::Relaxed),
            self.cas_trials.load(Ordering::Relaxed),
            self.cas_failures.load(Ordering::Relaxed),
            self.boundary_count.load(Ordering::Relaxed),
        ]
    }
}

/// Producer-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStatistics {
    /// `get_empty_element` calls
    pub call_count: u64,
    /// Calls that returned an error
    pub call_failure_count: u64,
    /// Compare-and-swap attempts on the state word
    pub cas_trials: u64,
    /// Failed compare-and-swap attempts
    pub cas_failures: u64,
    /// Calls that found the ring full
    pub buffer_full_count: u64,
}

/// Consumer-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatistics {
    /// `get_ready_element` calls
    pub call_count: u64,
    /// Calls that returned an error
    pub call_failure_count: u64,
    /// Compare-and-swap attempts on the state word
    pub cas_trials: u64,
    /// Failed compare-and-swap attempts
    pub cas_failures: u64,
    /// Calls that found the ring empty
    pub buffer_empty_count: u64,
}

/// Snapshot of both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingBufferStatistics {
    /// Producer side
    pub producer: ProducerStatistics,
    /// Consumer side
    pub consumer: ConsumerStatistics,
}

impl RingBufferStatistics {
    pub(crate) fn snapshot(producer: &SideCounters, consumer: &SideCounters) -> Self {
        let [call_count, call_failure_count, cas_trials, cas_failures, buffer_full_count] =
            producer.load();
        let producer = ProducerStatistics {
            call_count,
            call_failure_count,
            cas_trials,
            cas_failures,
            buffer_full_count,
        };
        let [call_count, call_failure_count, cas_trials, cas_failures, buffer_empty_count] =
            consumer.load();
        let consumer = ConsumerStatistics {
            call_count,
            call_failure_count,
            cas_trials,
            cas_failures,
            buffer_empty_count,
        };
        Self { producer, consumer }
    }
}
