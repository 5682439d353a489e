//! Metadata describing where a trace point was hit

use trace_common::ErrorCode;

/// Kind of ara::com interaction a trace point records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TracePointType {
    /// Skeleton sends an event
    #[default]
    SkelEventSnd = 0,
    /// Skeleton sends an event (allocatee API)
    SkelEventSndA = 1,
    /// Skeleton updates a field
    SkelFieldUpd = 2,
    /// Skeleton updates a field (allocatee API)
    SkelFieldUpdA = 3,
    /// Skeleton receives a field setter call
    SkelFieldSetCall = 4,
    /// Skeleton answers a field setter call
    SkelFieldSetCallResult = 5,
    /// Skeleton receives a field getter call
    SkelFieldGetCall = 6,
    /// Skeleton answers a field getter call
    SkelFieldGetCallResult = 7,
    /// Skeleton receives a method call
    SkelMethodCall = 8,
    /// Skeleton answers a method call
    SkelMethodCallResult = 9,
    /// Proxy receives an event
    ProxyEventRecv = 10,
    /// Proxy receives a field update
    ProxyFieldRecv = 11,
    /// Proxy calls a method
    ProxyMethodCall = 12,
    /// Proxy receives a method result
    ProxyMethodCallResult = 13,
}

impl TracePointType {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::SkelEventSnd,
            1 => Self::SkelEventSndA,
            2 => Self::SkelFieldUpd,
            3 => Self::SkelFieldUpdA,
            4 => Self::SkelFieldSetCall,
            5 => Self::SkelFieldSetCallResult,
            6 => Self::SkelFieldGetCall,
            7 => Self::SkelFieldGetCallResult,
            8 => Self::SkelMethodCall,
            9 => Self::SkelMethodCallResult,
            10 => Self::ProxyEventRecv,
            11 => Self::ProxyFieldRecv,
            12 => Self::ProxyMethodCall,
            13 => Self::ProxyMethodCallResult,
            _ => return None,
        })
    }
}

/// Service element a trace point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementId {
    /// Event id
    Event(u32),
    /// Field id
    Field(u32),
    /// Method id
    Method(u32),
}

impl ElementId {
    /// Raw id, whatever kind of element it names.
    pub const fn raw(self) -> u32 {
        match self {
            Self::Event(id) | Self::Field(id) | Self::Method(id) => id,
        }
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::Event(0)
    }
}

/// Identity of the service instance element that was traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceInstanceElement {
    /// Service interface id
    pub service_id: u32,
    /// Interface major version
    pub major_version: u32,
    /// Interface minor version
    pub minor_version: u32,
    /// Instance id
    pub instance_id: u32,
    /// Event, field or method within the service
    pub element_id: ElementId,
}

/// Where in ara::com a trace point was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AraComProperties {
    /// Interaction kind
    pub trace_point_type: TracePointType,
    /// Traced element
    pub service_instance_element: ServiceInstanceElement,
    /// Optional id correlating data of the same trace point
    pub trace_point_data_id: Option<u32>,
}

/// Metadata of an ara::com trace point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AraComMetaInfo {
    /// Status bits reported by the communication layer
    pub trace_status: u8,
    /// Trace point identity
    pub properties: AraComProperties,
}

impl AraComMetaInfo {
    /// Metadata with a clear status.
    pub const fn new(properties: AraComProperties) -> Self {
        Self {
            trace_status: 0,
            properties,
        }
    }
}

/// Metadata of a DLT trace point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DltMetaInfo {
    /// Status bits reported by the logging layer
    pub trace_status: u8,
}

/// Metadata a client passes with a trace call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaInfoVariant {
    /// ara::com trace point
    AraCom(AraComMetaInfo),
    /// DLT trace point
    Dlt(DltMetaInfo),
}

impl MetaInfoVariant {
    /// The ara::com metadata; other kinds cannot be encoded into a job.
    pub fn ara_com(&self) -> Result<&AraComMetaInfo, ErrorCode> {
        match self {
            Self::AraCom(meta_info) => Ok(meta_info),
            Self::Dlt(_) => Err(ErrorCode::NoMetaInfoProvidedRecoverable),
        }
    }
}

impl From<AraComMetaInfo> for MetaInfoVariant {
    fn from(meta_info: AraComMetaInfo) -> Self {
        Self::AraCom(meta_info)
    }
}

impl From<DltMetaInfo> for MetaInfoVariant {
    fn from(meta_info: DltMetaInfo) -> Self {
        Self::Dlt(meta_info)
    }
}
