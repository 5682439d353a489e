//! Platform-specific mapping helpers

pub mod linux;

pub use linux::{
    anonymous_mmap, attach_segment_mmap, create_segment_mmap, shm_path,
};
