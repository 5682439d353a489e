//! Packed `{empty, start, end}` word driving both ring buffers

use trace_common::consts::MAX_15_BITS;

const START_SHIFT: u32 = 0;
const END_SHIFT: u32 = 15;
const EMPTY_BIT: u32 = 1 << 31;
const INDEX_MASK: u32 = MAX_15_BITS as u32;

/// Ring state that fits a single atomic `u32`.
///
/// `start` is the next slot to consume, `end` the next slot to fill.
/// `start == end` is ambiguous, so the empty flag disambiguates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferState {
    /// No element is occupied
    pub empty: bool,
    /// Index of the oldest element
    pub start: u16,
    /// Index one past the newest element
    pub end: u16,
}

impl RingBufferState {
    /// Freshly initialised ring.
    pub const INITIAL: Self = Self {
        empty: true,
        start: 0,
        end: 0,
    };

    /// Construct a state; indices are truncated to 15 bits.
    pub const fn new(empty: bool, start: u16, end: u16) -> Self {
        Self {
            empty,
            start: start & MAX_15_BITS,
            end: end & MAX_15_BITS,
        }
    }

    /// Pack into the atomic representation.
    pub const fn pack(self) -> u32 {
        let empty = if self.empty { EMPTY_BIT } else { 0 };
        empty
            | (((self.start as u32) & INDEX_MASK) << START_SHIFT)
            | (((self.end as u32) & INDEX_MASK) << END_SHIFT)
    }

    /// Unpack from the atomic representation.
    pub const fn unpack(raw: u32) -> Self {
        Self {
            empty: raw & EMPTY_BIT != 0,
            start: ((raw >> START_SHIFT) & INDEX_MASK) as u16,
            end: ((raw >> END_SHIFT) & INDEX_MASK) as u16,
        }
    }

    /// Every slot is occupied.
    pub const fn is_full(self) -> bool {
        self.start == self.end && !self.empty
    }

    /// Indices fit a ring of `size` slots.
    pub const fn is_valid(self, size: u16) -> bool {
        self.start < size && self.end < size
    }

    /// Occupied slots in a ring of `size` slots.
    pub const fn occupied(self, size: u16) -> u16 {
        if self.empty {
            0
        } else if self.end > self.start {
            self.end - self.start
        } else {
            size - self.start + self.end
        }
    }

    /// State after filling the slot at `end`.
    pub const fn produced(self, size: u16) -> Self {
        Self::new(false, self.start, (self.end + 1) % size)
    }

    /// State after consuming the slot at `start`.
    pub const fn consumed(self, size: u16) -> Self {
        let start = (self.start + 1) % size;
        Self::new(start == self.end, start, self.end)
    }
}

impl Default for RingBufferState {
    fn default() -> Self {
        Self::INITIAL
    }
}
