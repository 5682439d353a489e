//! Timestamps written next to every trace job

use nix::time::{ClockId, clock_gettime};
use static_assertions::const_assert_eq;
use tracing::warn;

/// Point in time as seconds and nanoseconds of a monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PlpTimePoint {
    /// Whole seconds
    pub seconds: u32,
    /// Nanoseconds within the second
    pub nanoseconds: u32,
}

/// On-wire size of a serialized timestamp.
pub const PLP_TIMESTAMP_SIZE: usize = std::mem::size_of::<u64>();

const_assert_eq!(PLP_TIMESTAMP_SIZE, 8);

/// Serialize to the 8-byte wire form: seconds in the upper half,
/// nanoseconds in the lower half.
pub const fn serialize_to_plp(time_point: PlpTimePoint) -> u64 {
    ((time_point.seconds as u64) << 32) | time_point.nanoseconds as u64
}

/// Inverse of [`serialize_to_plp`].
pub const fn deserialize_from_plp(raw: u64) -> PlpTimePoint {
    PlpTimePoint {
        seconds: (raw >> 32) as u32,
        nanoseconds: raw as u32,
    }
}

/// Source of job timestamps.
pub trait LoggerTime: Send + Sync {
    /// Current time.
    fn now(&self) -> PlpTimePoint;
}

/// [`LoggerTime`] reading `CLOCK_MONOTONIC`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteadyClockLoggerTime;

impl SteadyClockLoggerTime {
    /// Probe the clock, returning `None` if it cannot be read.
    pub fn init() -> Option<Self> {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(_) => Some(Self),
            Err(err) => {
                warn!("Monotonic clock unavailable, timestamps will be zero: {}", err);
                None
            }
        }
    }
}

impl LoggerTime for SteadyClockLoggerTime {
    fn now(&self) -> PlpTimePoint {
        clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map(|ts| PlpTimePoint {
                seconds: ts.tv_sec() as u32,
                nanoseconds: ts.tv_nsec() as u32,
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plp_layout() {
        let time_point = PlpTimePoint {
            seconds: 0x0102_0304,
            nanoseconds: 999_999_999,
        };
        let raw = serialize_to_plp(time_point);
        assert_eq!(raw >> 32, 0x0102_0304);
        assert_eq!(raw & 0xFFFF_FFFF, 999_999_999);
        assert_eq!(deserialize_from_plp(raw), time_point);
    }

    #[test]
    fn test_steady_clock_is_monotonic() {
        let clock = SteadyClockLoggerTime::init().unwrap();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
        assert!(first.nanoseconds < 1_000_000_000);
    }
}
