//! PTP/IP wire vocabulary and codec (ISO 15740 transport binding).
//!
//! Two layers: [`binary`] handles the 8-byte little-endian frame header and
//! PTP string encoding; [`messages`] maps frame payloads to typed packets.
//! [`object_info`] decodes the GetObjectInfo dataset and classifies it.

pub mod binary;
pub mod messages;
pub mod object_info;

/// TCP port a PTP/IP responder listens on.
pub const PTP_OVER_IP_PORT: u16 = 15740;

/// Packet type tags (frame header `type` field, 0x01..=0x0E).
pub mod packet_type {
    pub const INIT_COMMAND_REQUEST: u32 = 0x01;
    pub const INIT_COMMAND_ACK: u32 = 0x02;
    pub const INIT_EVENT_REQUEST: u32 = 0x03;
    pub const INIT_EVENT_ACK: u32 = 0x04;
    pub const INIT_FAIL: u32 = 0x05;
    pub const OPERATION_REQUEST: u32 = 0x06;
    pub const OPERATION_RESPONSE: u32 = 0x07;
    pub const EVENT: u32 = 0x08;
    pub const START_DATA: u32 = 0x09;
    pub const DATA: u32 = 0x0A;
    pub const CANCEL_TRANSACTION: u32 = 0x0B;
    pub const END_DATA: u32 = 0x0C;
    pub const PING: u32 = 0x0D;
    pub const PONG: u32 = 0x0E;
}

/// Operation codes this core issues (plus recognized standard ones).
pub mod op {
    pub const GET_DEVICE_INFO: u16 = 0x1001;
    pub const OPEN_SESSION: u16 = 0x1002;
    pub const CLOSE_SESSION: u16 = 0x1003;
    pub const GET_OBJECT_INFO: u16 = 0x1008;
    pub const GET_OBJECT: u16 = 0x1009;
    pub const GET_DEVICE_PROP_DESC: u16 = 0x1014;
    pub const GET_PARTIAL_OBJECT: u16 = 0x101B;

    // Canon vendor extension
    pub const CANON_SET_EVENT_MODE: u16 = 0x9115;
    pub const CANON_GET_EVENT: u16 = 0x9116;

    // Nikon vendor extension
    pub const NIKON_GET_EVENT: u16 = 0x90C7;
}

/// Response codes.
pub mod rsp {
    pub const OK: u16 = 0x2001;
    pub const GENERAL_ERROR: u16 = 0x2002;
    pub const SESSION_NOT_OPEN: u16 = 0x2003;
    pub const INVALID_TRANSACTION_ID: u16 = 0x2004;
    pub const OPERATION_NOT_SUPPORTED: u16 = 0x2005;
    pub const INVALID_OBJECT_HANDLE: u16 = 0x2009;
    pub const DEVICE_BUSY: u16 = 0x2019;
}

/// Event codes recognized across vendors.
pub mod event {
    /// Standard PTP ObjectAdded.
    pub const OBJECT_ADDED: u16 = 0x4002;

    // Canon event-record types (also seen as push event codes)
    pub const CANON_OBJECT_ADDED_EX: u16 = 0xC181;
    pub const CANON_REQUEST_OBJECT_TRANSFER: u16 = 0xC186;
    pub const CANON_OBJECT_ADDED_EX64: u16 = 0xC1A7;
    pub const CANON_REQUEST_OBJECT_TRANSFER64: u16 = 0xC1A9;

    /// Nikon ObjectAddedInSDRAM.
    pub const NIKON_OBJECT_ADDED_IN_SDRAM: u16 = 0xC101;

    /// Sony ObjectAdded.
    pub const SONY_OBJECT_ADDED: u16 = 0xC201;
}

/// Object format codes used for RAW/JPEG classification.
pub mod format {
    pub const CIFF: u16 = 0x3805;
    pub const EXIF_JPEG: u16 = 0x3801;
    pub const JFIF: u16 = 0x3808;
    pub const RAW: u16 = 0x3820;

    // Canon vendor formats (inside the 0xB100..=0xB1FF band)
    pub const CANON_CRW: u16 = 0xB101;
    pub const CANON_CR2: u16 = 0xB103;
    pub const CANON_CR3: u16 = 0xB108;

    /// Vendor RAW band.
    pub const VENDOR_RAW_FIRST: u16 = 0xB100;
    pub const VENDOR_RAW_LAST: u16 = 0xB1FF;
}

/// Device property codes.
pub mod prop {
    /// Sony: whether the in-memory capture at 0xFFFFC001 is safe to read.
    pub const SONY_OBJECT_IN_MEMORY: u16 = 0xD215;
}

/// Data-phase info values in OperationRequest.
///
/// `1` covers both no-data and data-in operations (everything this core
/// issues); `2` marks host-to-camera data and is unused here.
pub const DATA_PHASE_NONE_OR_IN: u32 = 1;
pub const DATA_PHASE_SEND: u32 = 2;

/// Sony's transient handle for a capture still in camera memory.
pub const SONY_IN_MEMORY_HANDLE: u32 = 0xFFFF_C001;

/// Base for synthetic logical handles assigned to in-memory captures.
pub const SYNTHETIC_HANDLE_BASE: u32 = 0xFE00_0000;
pub const SYNTHETIC_HANDLE_MASK: u32 = 0x00FF_FFFF;

/// `objectInMemory` values at or above this are safe to read.
pub const SONY_IN_MEMORY_READY: u16 = 0x8000;
