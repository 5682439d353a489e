//! Error codes returned by the trace library.
//!
//! Every code is suffixed with its class. `...Recoverable` codes leave the
//! system consistent and the caller may retry later; `...Fatal` codes
//! indicate broken configuration or corrupted shared state.

use thiserror::Error;

/// Error codes that trace library operations can return
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Invalid argument
    #[error("Invalid argument")]
    InvalidArgumentFatal,

    /// Not enough memory for allocation
    #[error("Not enough memory for allocation")]
    NotEnoughMemoryRecoverable,

    /// No meta info were provided
    #[error("No meta info were provided")]
    NoMetaInfoProvidedRecoverable,

    /// Trace job container has no free slot
    #[error("Not enough memory in trace job container")]
    NotEnoughMemoryInContainerRecoverable,

    /// Atomic ring buffer full
    #[error("Atomic ring buffer full")]
    AtomicRingBufferFullRecoverable,

    /// Atomic ring buffer empty
    #[error("Atomic ring buffer empty")]
    AtomicRingBufferEmptyRecoverable,

    /// Atomic ring buffer access failed max retry times
    #[error("Atomic ring buffer access failed max retry times")]
    AtomicRingBufferMaxRetriesRecoverable,

    /// Ring buffer full
    #[error("Ring buffer full")]
    RingBufferFullRecoverable,

    /// Ring buffer empty
    #[error("Ring buffer empty")]
    RingBufferEmptyRecoverable,

    /// No empty element could be acquired
    #[error("No empty element in the ring buffer could be acquired")]
    RingBufferNoEmptyElementRecoverable,

    /// No ready element could be acquired
    #[error("No ready element in the ring buffer could be acquired")]
    RingBufferNoReadyElementRecoverable,

    /// Ring buffer not initialized
    #[error("Ring buffer not initialized")]
    RingBufferNotInitializedRecoverable,

    /// Ring buffer already initialized
    #[error("Ring buffer already initialized")]
    RingBufferInitializedRecoverable,

    /// Ring buffer state word is out of range
    #[error("Invalid ring buffer state")]
    RingBufferInvalidStateRecoverable,

    /// Requested number of elements does not fit in 15 bits
    #[error("Ring buffer size too large")]
    RingBufferTooLargeRecoverable,

    /// Ring buffer memory could not be created or opened
    #[error("Invalid ring buffer memory resource")]
    RingBufferInvalidMemoryResourceRecoverable,

    /// Shared-memory object handle is not usable
    #[error("Invalid shared-memory object handle")]
    InvalidShmObjectHandleFatal,

    /// Shared-memory object is already registered
    #[error("Shared-memory object is already registered")]
    SharedMemoryObjectAlreadyRegisteredRecoverable,

    /// Callback already registered for the client id
    #[error("Callback already registered for the client id")]
    CallbackAlreadyRegisteredRecoverable,

    /// No free slot to save the callback
    #[error("No free slot to save the callback")]
    NoFreeSlotToSaveTheCallbackRecoverable,

    /// No deallocator registered with the job processor
    #[error("No deallocator callback registered")]
    NoDeallocatorCallbackRegisteredFatal,

    /// Handle of a deallocated job does not match the metadata memory
    #[error("Wrong handle of trace job")]
    WrongHandleRecoverable,

    /// No space left in trace metadata memory
    #[error("No space left for allocation in trace metadata memory")]
    NoSpaceLeftForAllocationRecoverable,

    /// Index out of bounds in a shared chunk vector
    #[error("Index out of bounds in shared chunk vector")]
    IndexOutOfBoundsInSharedListRecoverable,

    /// Job allocator could not be wired up
    #[error("TraceJobAllocator initialization failed")]
    TraceJobAllocatorInitializationFailedFatal,

    /// Generic error
    #[error("Generic error")]
    GenericErrorRecoverable,
}

impl ErrorCode {
    /// Check whether the caller may retry after this error.
    pub const fn is_recoverable(self) -> bool {
        !matches!(
            self,
            Self::InvalidArgumentFatal
                | Self::InvalidShmObjectHandleFatal
                | Self::NoDeallocatorCallbackRegisteredFatal
                | Self::TraceJobAllocatorInitializationFailedFatal
        )
    }
}

/// Result type for trace library operations
pub type TraceResult<T> = Result<T, ErrorCode>;
