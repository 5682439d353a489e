//! Fixed 35-byte metadata record read by the trace daemon
//!
//! ```text
//! offset  size  field
//!      0     1  ipc_flavor (binding type)
//!      1     1  trace_status
//!      2     8  app_identifier, zero padded
//!     10     1  trace_point_type
//!     11     4  service_id          (big endian)
//!     15     4  major_version       (big endian)
//!     19     4  minor_version       (big endian)
//!     23     4  instance_id         (big endian)
//!     27     4  element_id          (big endian)
//!     31     4  trace_point_data_id (big endian, 0 if absent)
//! ```

use crate::meta_info::{AraComMetaInfo, TracePointType};
use static_assertions::const_assert_eq;
use trace_common::consts::IPC_META_INFO_APPLICATION_IDENTIFIER_LENGTH;
use trace_common::types::{AppIdType, BindingType, IpcMetaInfoAppIdType};

const IPC_FLAVOR: usize = 0;
const TRACE_STATUS: usize = 1;
const APP_IDENTIFIER: usize = 2;
const TRACE_POINT_TYPE: usize = APP_IDENTIFIER + IPC_META_INFO_APPLICATION_IDENTIFIER_LENGTH;
const SERVICE_ID: usize = TRACE_POINT_TYPE + 1;
const MAJOR_VERSION: usize = SERVICE_ID + 4;
const MINOR_VERSION: usize = MAJOR_VERSION + 4;
const INSTANCE_ID: usize = MINOR_VERSION + 4;
const ELEMENT_ID: usize = INSTANCE_ID + 4;
const TRACE_POINT_DATA_ID: usize = ELEMENT_ID + 4;

/// Encoded size of [`AraComMetaInfoTraceFormat`].
pub const ARA_COM_META_INFO_TRACE_FORMAT_SIZE: usize = TRACE_POINT_DATA_ID + 4;

const_assert_eq!(ARA_COM_META_INFO_TRACE_FORMAT_SIZE, 35);

/// Decoded form of the metadata record; integers are in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AraComMetaInfoTraceFormat {
    /// Raw [`BindingType`]
    pub ipc_flavor: u8,
    /// Status bits
    pub trace_status: u8,
    /// Application identifier, compared as a whole array
    pub app_identifier: IpcMetaInfoAppIdType,
    /// Raw [`TracePointType`]
    pub trace_point_type: u8,
    /// Service interface id
    pub service_id: u32,
    /// Interface major version
    pub major_version: u32,
    /// Interface minor version
    pub minor_version: u32,
    /// Instance id
    pub instance_id: u32,
    /// Raw id of the traced event, field or method. Every element kind is
    /// encoded as its plain id; the kind itself is not part of the record.
    pub element_id: u32,
    /// Correlation id, 0 if absent
    pub trace_point_data_id: u32,
}

impl AraComMetaInfoTraceFormat {
    /// Build the record for a trace point. The application id is cut to
    /// the record's 8 bytes.
    pub fn new(
        meta_info: &AraComMetaInfo,
        binding_type: BindingType,
        app_instance_id: &AppIdType,
    ) -> Self {
        let mut app_identifier = [0u8; IPC_META_INFO_APPLICATION_IDENTIFIER_LENGTH];
        app_identifier
            .copy_from_slice(&app_instance_id[..IPC_META_INFO_APPLICATION_IDENTIFIER_LENGTH]);

        let properties = &meta_info.properties;
        let element = &properties.service_instance_element;
        Self {
            ipc_flavor: binding_type as u8,
            trace_status: meta_info.trace_status,
            app_identifier,
            trace_point_type: properties.trace_point_type as u8,
            service_id: element.service_id,
            major_version: element.major_version,
            minor_version: element.minor_version,
            instance_id: element.instance_id,
            element_id: element.element_id.raw(),
            trace_point_data_id: properties.trace_point_data_id.unwrap_or(0),
        }
    }

    /// Binding that produced the record, if known.
    pub const fn binding_type(&self) -> Option<BindingType> {
        BindingType::from_u8(self.ipc_flavor)
    }

    /// Trace point type, if known.
    pub const fn trace_point_type(&self) -> Option<TracePointType> {
        TracePointType::from_u8(self.trace_point_type)
    }

    /// Wire representation.
    pub fn encode(&self) -> [u8; ARA_COM_META_INFO_TRACE_FORMAT_SIZE] {
        let mut buf = [0u8; ARA_COM_META_INFO_TRACE_FORMAT_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Write the wire representation to the front of `buf`.
    ///
    /// Returns `false` without writing if `buf` is too short.
    pub fn write_to(&self, buf: &mut [u8]) -> bool {
        match buf.first_chunk_mut::<ARA_COM_META_INFO_TRACE_FORMAT_SIZE>() {
            Some(head) => {
                self.encode_into(head);
                true
            }
            None => false,
        }
    }

    fn encode_into(&self, buf: &mut [u8; ARA_COM_META_INFO_TRACE_FORMAT_SIZE]) {
        buf[IPC_FLAVOR] = self.ipc_flavor;
        buf[TRACE_STATUS] = self.trace_status;
        buf[APP_IDENTIFIER..TRACE_POINT_TYPE].copy_from_slice(&self.app_identifier);
        buf[TRACE_POINT_TYPE] = self.trace_point_type;
        for (offset, value) in [
            (SERVICE_ID, self.service_id),
            (MAJOR_VERSION, self.major_version),
            (MINOR_VERSION, self.minor_version),
            (INSTANCE_ID, self.instance_id),
            (ELEMENT_ID, self.element_id),
            (TRACE_POINT_DATA_ID, self.trace_point_data_id),
        ] {
            buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        }
    }

    /// Parse a record from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let buf = buf.first_chunk::<ARA_COM_META_INFO_TRACE_FORMAT_SIZE>()?;
        let read_u32 = |offset: usize| {
            u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
        };
        let mut app_identifier = [0u8; IPC_META_INFO_APPLICATION_IDENTIFIER_LENGTH];
        app_identifier.copy_from_slice(&buf[APP_IDENTIFIER..TRACE_POINT_TYPE]);
        Some(Self {
            ipc_flavor: buf[IPC_FLAVOR],
            trace_status: buf[TRACE_STATUS],
            app_identifier,
            trace_point_type: buf[TRACE_POINT_TYPE],
            service_id: read_u32(SERVICE_ID),
            major_version: read_u32(MAJOR_VERSION),
            minor_version: read_u32(MINOR_VERSION),
            instance_id: read_u32(INSTANCE_ID),
            element_id: read_u32(ELEMENT_ID),
            trace_point_data_id: read_u32(TRACE_POINT_DATA_ID),
        })
    }
}
