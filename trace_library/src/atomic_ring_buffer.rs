//! In-process ring buffer with lock-free producers
//!
//! Producers claim the slot at `end` with a compare-and-swap on the packed
//! state word, fill it and flag it ready. Consumers peek, claim and release
//! the slot at `start`; the consumer side is serialized so a released slot
//! is never read while a producer refills it.

use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};
use trace_common::consts::{MAX_15_BITS, MAX_GET_ELEMENT_RETRIES};
use trace_common::{ErrorCode, TraceResult};
use trace_shm::ring_buffer::RingBufferState;

const SLOT_EMPTY: u8 = 0;
const SLOT_READY: u8 = 1;
const SLOT_CLAIMED: u8 = 2;

struct Slot<T> {
    data: UnsafeCell<Option<T>>,
    state: AtomicU8,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            data: UnsafeCell::new(None),
            state: AtomicU8::new(SLOT_EMPTY),
        }
    }
}

/// Fixed-capacity multi-producer ring buffer of `N` elements.
pub struct AtomicRingBuffer<T, const N: usize> {
    state: AtomicU32,
    empty_elements_count: AtomicUsize,
    consumer: Mutex<()>,
    slots: Box<[Slot<T>]>,
}

// SAFETY: slot data is written only by the producer that claimed the slot
// through the state CAS, and read or taken only under the consumer lock
// after the producer published it with a release store.
unsafe impl<T: Send, const N: usize> Send for AtomicRingBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for AtomicRingBuffer<T, N> {}

impl<T, const N: usize> AtomicRingBuffer<T, N> {
    const SIZE: u16 = {
        assert!(N > 0 && N <= MAX_15_BITS as usize, "ring size must fit 15 bits");
        N as u16
    };

    /// Empty ring.
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(RingBufferState::INITIAL.pack()),
            empty_elements_count: AtomicUsize::new(N),
            consumer: Mutex::new(()),
            slots: (0..Self::SIZE).map(|_| Slot::default()).collect(),
        }
    }

    /// Capacity.
    pub const fn size(&self) -> usize {
        N
    }

    /// Slots not holding an element.
    pub fn empty_elements_count(&self) -> usize {
        self.empty_elements_count.load(Ordering::Acquire)
    }

    fn load_state(&self) -> (u32, RingBufferState) {
        let raw = self.state.load(Ordering::Acquire);
        (raw, RingBufferState::unpack(raw))
    }

    /// Append `value`.
    ///
    /// Fails with `AtomicRingBufferFullRecoverable` when no slot is free and
    /// `AtomicRingBufferMaxRetriesRecoverable` under persistent contention.
    pub fn push(&self, value: T) -> TraceResult<()> {
        for _ in 0..MAX_GET_ELEMENT_RETRIES {
            let (raw, state) = self.load_state();
            if state.is_full() {
                return Err(ErrorCode::AtomicRingBufferFullRecoverable);
            }
            if self
                .state
                .compare_exchange(
                    raw,
                    state.produced(Self::SIZE).pack(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }
            self.empty_elements_count.fetch_sub(1, Ordering::Release);

            let slot = &self.slots[usize::from(state.end)];
            // SAFETY: the CAS above made this producer the only owner of the
            // slot; the consumer cleared it before moving `start` past it.
            unsafe { *slot.data.get() = Some(value) };
            slot.state.store(SLOT_READY, Ordering::Release);
            return Ok(());
        }
        Err(ErrorCode::AtomicRingBufferMaxRetriesRecoverable)
    }

    /// Copy of the oldest ready element, left in place.
    pub fn get_ready_element(&self) -> TraceResult<T>
    where
        T: Clone,
    {
        let _guard = self.consumer.lock();
        for _ in 0..MAX_GET_ELEMENT_RETRIES {
            let (_, state) = self.load_state();
            if state.empty {
                return Err(ErrorCode::AtomicRingBufferEmptyRecoverable);
            }
            let slot = &self.slots[usize::from(state.start)];
            if slot.state.load(Ordering::Acquire) == SLOT_READY {
                // SAFETY: ready slots are immutable until released, and
                // releasing needs the consumer lock we hold.
                if let Some(value) = unsafe { (*slot.data.get()).clone() } {
                    return Ok(value);
                }
            }
        }
        Err(ErrorCode::AtomicRingBufferMaxRetriesRecoverable)
    }

    /// Mark the oldest element as being processed.
    ///
    /// Returns a copy when this caller won the element, `None` if it is not
    /// ready or another consumer already claimed it.
    pub fn claim_ready_element(&self) -> Option<T>
    where
        T: Clone,
    {
        let _guard = self.consumer.lock();
        let (_, state) = self.load_state();
        if state.empty {
            return None;
        }
        let slot = &self.slots[usize::from(state.start)];
        slot.state
            .compare_exchange(SLOT_READY, SLOT_CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        // SAFETY: see `get_ready_element`.
        unsafe { (*slot.data.get()).clone() }
    }

    /// Drop the oldest ready or claimed element and free its slot.
    ///
    /// Returns `false` if the ring is empty or the oldest slot is still
    /// being written.
    pub fn release_ready_element(&self) -> bool {
        let _guard = self.consumer.lock();
        let (_, state) = self.load_state();
        if state.empty {
            return false;
        }
        let slot = &self.slots[usize::from(state.start)];
        if slot.state.load(Ordering::Acquire) == SLOT_EMPTY {
            return false;
        }
        // SAFETY: published slot, consumer lock held; producers cannot reach
        // it until `start` moves below.
        drop(unsafe { (*slot.data.get()).take() });
        slot.state.store(SLOT_EMPTY, Ordering::Release);

        // Producers only move `end`, so this settles after their CAS storms.
        let mut raw = self.state.load(Ordering::Acquire);
        loop {
            let next = RingBufferState::unpack(raw).consumed(Self::SIZE).pack();
            match self
                .state
                .compare_exchange_weak(raw, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => raw = actual,
            }
        }
        self.empty_elements_count.fetch_add(1, Ordering::AcqRel);
        true
    }
}

impl<T, const N: usize> Default for AtomicRingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> std::fmt::Debug for AtomicRingBuffer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicRingBuffer")
            .field("size", &N)
            .field("state", &RingBufferState::unpack(self.state.load(Ordering::Relaxed)))
            .field("empty_elements_count", &self.empty_elements_count())
            .finish()
    }
}
