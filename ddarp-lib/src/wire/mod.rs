//! DDARP packet format: fixed 20-byte big-endian header followed by a
//! tightly packed TLV region. One malformed packet never poisons the next;
//! every decode error is recoverable at the packet boundary.

pub mod packet;
pub mod tlv;

pub use packet::{DecodedPacket, Packet, PacketHeader};
pub use tlv::{OwlMetrics, RoutingInfo, Tlv};

use thiserror::Error;

pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 20;

/// Inbound datagrams beyond this are rejected, not truncated.
pub const MAX_DATAGRAM: usize = 8192;

pub const FLAG_REQUEST: u8 = 0b0000_0001;
pub const FLAG_RESPONSE: u8 = 0b0000_0010;
pub const FLAG_ERROR: u8 = 0b0000_0100;
pub const FLAG_COMPRESSED: u8 = 0b0000_1000;
pub const FLAG_ENCRYPTED: u8 = 0b0001_0000;
pub const FLAGS_RESERVED_MASK: u8 = 0b1110_0000;

/// TLV types at or above this value are reserved for experiments.
pub const TLV_EXPERIMENTAL_MIN: u16 = 0xF000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),
    #[error("reserved flag bits set: {0:#04x}")]
    ReservedFlagSet(u8),
    #[error("truncated TLV at offset {0}")]
    TruncatedTlv(usize),
    #[error("TLV {0:#06x} value is not valid UTF-8")]
    BadUtf8(u16),
    #[error("TLV {0:#06x} value is not valid JSON")]
    BadJson(u16),
    #[error("packet of {0} bytes exceeds the datagram cap")]
    PacketTooLarge(usize),
    #[error("unknown TLV type {0:#06x}")]
    UnknownTlv(u16),
    #[error("TLV value of {0} bytes does not fit a u16 length")]
    OversizeTlv(usize),
}

impl WireError {
    /// Stable label used for the decode-error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            WireError::UnsupportedVersion(_) => "unsupported_version",
            WireError::MalformedHeader(_) => "malformed_header",
            WireError::ReservedFlagSet(_) => "reserved_flag_set",
            WireError::TruncatedTlv(_) => "truncated_tlv",
            WireError::BadUtf8(_) => "bad_utf8",
            WireError::BadJson(_) => "bad_json",
            WireError::PacketTooLarge(_) => "packet_too_large",
            WireError::UnknownTlv(_) => "unknown_tlv",
            WireError::OversizeTlv(_) => "oversize_tlv",
        }
    }
}
