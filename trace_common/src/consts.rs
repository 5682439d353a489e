//! Trace library constants.
//!
//! Single source of truth for capacities and sizes shared between the
//! producer library and the consumer daemon. Both sides of the shared
//! memory must be built with the same values.

/// Maximum number of chunks a single trace request can carry, including the
/// two chunks (timestamp and metadata) prepended by the job allocator.
pub const MAX_CHUNKS_PER_ONE_TRACE_REQUEST: usize = 10;

/// Default number of slots in the shared-memory ring buffer.
pub const NUMBER_OF_ELEMENTS: u16 = 500;

/// Capacity of the in-process trace job container.
///
/// Matches the ring buffer so that every reserved slot can be published.
pub const TRACE_JOB_CONTAINER_SIZE: usize = NUMBER_OF_ELEMENTS as usize;

/// Size of the shared-memory object holding the ring buffer.
pub const RING_BUFFER_SHARED_MEMORY_SIZE: usize = 102_400;

/// Default name of the ring buffer shared-memory object.
pub const RING_BUFFER_SHARED_MEMORY_NAME: &str = "trace_ring_buffer";

/// Ring buffer indices are stored in 15 bits of the packed state word.
pub const MAX_15_BITS: u16 = 0x7FFF;

/// Retries for a lock-free get/release before giving up.
pub const MAX_GET_ELEMENT_RETRIES: u32 = 10;

/// Alignment used for every allocation in trace metadata memory.
pub const MAX_ALIGN: usize = 16;

/// Cache line size, used to align region bases and hot atomics.
pub const CACHE_LINE_SIZE: usize = 64;

/// Length of the application identifier passed by clients.
///
/// Chosen after the maximum file name length on the target OS.
pub const APPLICATION_IDENTIFIER_LENGTH: usize = 255;

/// Length of the application identifier stored in IPC metadata records.
pub const IPC_META_INFO_APPLICATION_IDENTIFIER_LENGTH: usize = 8;

/// Maximum number of clients that can register a trace-done callback.
pub const MAX_NUMBER_OF_CLIENTS: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_matches_ring_buffer() {
        assert_eq!(TRACE_JOB_CONTAINER_SIZE, NUMBER_OF_ELEMENTS as usize);
    }

    #[test]
    fn test_ring_buffer_fits_15_bits() {
        assert!(NUMBER_OF_ELEMENTS <= MAX_15_BITS);
    }

    #[test]
    fn test_alignment_is_power_of_two() {
        assert!(MAX_ALIGN.is_power_of_two());
        assert!(CACHE_LINE_SIZE.is_power_of_two());
    }
}
