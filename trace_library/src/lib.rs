//! # Trace Library
//!
//! Client side of cross-process tracing. A trace call becomes a *job*: a
//! chunk list in trace metadata memory announced through a slot of the
//! ring buffer shared with the trace daemon. The daemon hands the slot
//! back when it is done, after which the client frees the job memory.
//!
//! ## Components
//!
//! - [`job_allocator::TraceJobAllocator`] - builds and publishes jobs
//! - [`job_container::TraceJobContainer`] - published jobs in publish order
//! - [`job_processor::TraceJobProcessor`] - frees finished jobs and notifies clients
//! - [`trace_format::AraComMetaInfoTraceFormat`] - the 35-byte metadata record
//! - [`logger_time`] - monotonic timestamps in PLP wire form
//! - [`factory::TraceRuntime`] - everything above, wired from configuration
//!
//! ## Job Lifecycle
//!
//! ```text
//! slot:  Empty ──reserve──► Allocated ──publish──► Ready ──daemon──► Empty
//!                               │
//!                               └──failure──► Invalid ──daemon skips──► Empty
//! ```

#![warn(clippy::all)]

pub mod atomic_ring_buffer;
pub mod factory;
pub mod job_allocator;
pub mod job_container;
pub mod job_processor;
pub mod logger_time;
pub mod meta_info;
pub mod trace_format;

pub use factory::{RuntimeError, TraceRuntime};
pub use job_allocator::TraceJobAllocator;
pub use job_container::{TraceJobContainer, TraceJobContainerElement, TraceJobType};
pub use job_processor::{TraceDoneCallback, TraceJobDeallocator, TraceJobProcessor};
pub use logger_time::{LoggerTime, PlpTimePoint, SteadyClockLoggerTime};
pub use meta_info::{AraComMetaInfo, AraComProperties, DltMetaInfo, MetaInfoVariant, TracePointType};
pub use trace_format::{ARA_COM_META_INFO_TRACE_FORMAT_SIZE, AraComMetaInfoTraceFormat};
pub use trace_shm::init_tracing;
