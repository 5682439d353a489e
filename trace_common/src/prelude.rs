//! Common re-exports.
//!
//! ```rust
//! use trace_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, LogLevel, MetadataConfig, RingBufferConfig, SharedConfig,
    TraceLibraryConfig,
};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{ErrorCode, TraceResult};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{
    MAX_ALIGN, MAX_CHUNKS_PER_ONE_TRACE_REQUEST, NUMBER_OF_ELEMENTS, TRACE_JOB_CONTAINER_SIZE,
};

// ─── Types ──────────────────────────────────────────────────────────
pub use crate::types::{
    AppIdType, BindingType, GlobalTraceContextId, INVALID_SHM_OBJECT_HANDLE, IpcMetaInfoAppIdType,
    SharedMemoryChunk, SharedMemoryLocation, ShmObjectHandle, TraceClientId, TraceContextId,
    app_id_from_str,
};
