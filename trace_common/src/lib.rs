//! Trace Common Library
//!
//! Vocabulary shared by every crate of the cross-process trace library:
//! identifier types, offset-based shared-memory descriptors, error codes
//! and TOML configuration loading.
//!
//! # Module Structure
//!
//! - [`types`] - Client/context ids, shared-memory locations and chunks, binding types
//! - [`consts`] - Capacity limits and shared-memory sizing
//! - [`error`] - [`ErrorCode`] catalogue and [`TraceResult`]
//! - [`config`] - Configuration loading traits and the library configuration
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use trace_common::prelude::*;
//!
//! let location = SharedMemoryLocation::new(3, 128);
//! assert_eq!(location.shm_object_handle, 3);
//! ```

pub mod config;
pub mod consts;
pub mod error;
pub mod prelude;
pub mod types;

pub use error::{ErrorCode, TraceResult};
