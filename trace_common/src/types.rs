//! Identifier and descriptor types shared between producer and consumer.
//!
//! Everything that may end up inside shared memory is `#[repr(C)]` and free
//! of pointers: cross-process references are always a
//! `{shm_object_handle, offset}` pair that each process resolves against its
//! own mapping of the region.

use crate::consts::{APPLICATION_IDENTIFIER_LENGTH, IPC_META_INFO_APPLICATION_IDENTIFIER_LENGTH};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// Identifier of a registered trace client.
pub type TraceClientId = u8;

/// Identifier distinguishing the traced data of one client.
pub type TraceContextId = u32;

/// Handle of a shared-memory object, assigned when the region is registered.
pub type ShmObjectHandle = i32;

/// Handle value meaning "no shared-memory object".
pub const INVALID_SHM_OBJECT_HANDLE: ShmObjectHandle = -1;

/// Application identifier passed by trace clients, zero padded.
pub type AppIdType = [u8; APPLICATION_IDENTIFIER_LENGTH];

/// Application identifier as stored in IPC metadata records.
pub type IpcMetaInfoAppIdType = [u8; IPC_META_INFO_APPLICATION_IDENTIFIER_LENGTH];

/// Trace context id that is unique across all clients.
///
/// Ordered by client first, then by context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GlobalTraceContextId {
    /// Originating client
    pub client_id: TraceClientId,
    /// Context id within that client
    pub context_id: TraceContextId,
}

impl GlobalTraceContextId {
    /// Create a new global context id.
    pub const fn new(client_id: TraceClientId, context_id: TraceContextId) -> Self {
        Self {
            client_id,
            context_id,
        }
    }
}

/// Offset-based reference into a registered shared-memory object.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SharedMemoryLocation {
    /// Handle of the shared-memory object
    pub shm_object_handle: ShmObjectHandle,
    /// Byte offset from the start of the object
    pub offset: u64,
}

const_assert_eq!(core::mem::size_of::<SharedMemoryLocation>(), 16);

impl SharedMemoryLocation {
    /// Create a new location.
    pub const fn new(shm_object_handle: ShmObjectHandle, offset: u64) -> Self {
        Self {
            shm_object_handle,
            offset,
        }
    }
}

/// A contiguous piece of traced data living in shared memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SharedMemoryChunk {
    /// Where the chunk starts
    pub start: SharedMemoryLocation,
    /// Chunk length in bytes
    pub size: u64,
}

const_assert_eq!(core::mem::size_of::<SharedMemoryChunk>(), 24);

impl SharedMemoryChunk {
    /// Create a new chunk descriptor.
    pub const fn new(start: SharedMemoryLocation, size: u64) -> Self {
        Self { start, size }
    }
}

/// Communication binding that produced a trace point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BindingType {
    /// Zero-copy shared-memory binding
    #[default]
    LoLa = 0,
    /// Vector binding
    Vector = 1,
    /// Vector binding with zero-copy payloads
    VectorZeroCopy = 2,
    /// Unknown binding
    Undefined = 3,
}

impl BindingType {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::LoLa),
            1 => Some(Self::Vector),
            2 => Some(Self::VectorZeroCopy),
            3 => Some(Self::Undefined),
            _ => None,
        }
    }
}

/// Build a zero-padded application identifier from a string.
///
/// Input longer than the identifier is truncated.
pub fn app_id_from_str(name: &str) -> AppIdType {
    let mut app_id = [0u8; APPLICATION_IDENTIFIER_LENGTH];
    let len = name.len().min(APPLICATION_IDENTIFIER_LENGTH);
    app_id[..len].copy_from_slice(&name.as_bytes()[..len]);
    app_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_context_id_orders_by_client_first() {
        let a = GlobalTraceContextId::new(1, 100);
        let b = GlobalTraceContextId::new(2, 0);
        let c = GlobalTraceContextId::new(1, 101);
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn binding_type_from_raw() {
        for val in 0..=3u8 {
            let binding = BindingType::from_u8(val).unwrap();
            assert_eq!(binding as u8, val);
        }
        assert!(BindingType::from_u8(4).is_none());
    }

    #[test]
    fn app_id_is_zero_padded() {
        let app_id = app_id_from_str("AppId_1");
        assert_eq!(&app_id[..7], b"AppId_1");
        assert!(app_id[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn app_id_truncates_long_names() {
        let long = "x".repeat(APPLICATION_IDENTIFIER_LENGTH + 20);
        let app_id = app_id_from_str(&long);
        assert!(app_id.iter().all(|&b| b == b'x'));
    }
}
