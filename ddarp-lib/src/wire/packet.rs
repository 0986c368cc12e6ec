use bytes::{Buf, BufMut, BytesMut};

use super::tlv::Tlv;
use super::{
    WireError, FLAGS_RESERVED_MASK, HEADER_LEN, MAX_DATAGRAM, VERSION,
};

/// Fixed header, network byte order. `header_length` is always 20 in v1 and
/// `tlv_length` is derived from the TLV list on encode, so neither is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub flags: u8,
    pub tunnel_id: u32,
    pub sequence: u32,
    pub timestamp: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub tlvs: Vec<Tlv>,
}

/// Result of a decode: the packet plus how the parser got there.
#[derive(Debug)]
pub struct DecodedPacket {
    pub packet: Packet,
    /// Bytes consumed from the input (`header_length + tlv_length`).
    pub consumed: usize,
    /// Unknown TLVs skipped under the skip-unknown rule.
    pub skipped_unknown: u32,
}

impl Packet {
    pub fn new(header: PacketHeader, tlvs: Vec<Tlv>) -> Self {
        Self { header, tlvs }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut tlv_region = BytesMut::new();
        for tlv in &self.tlvs {
            tlv.encode(&mut tlv_region)?;
        }
        if tlv_region.len() > u32::MAX as usize {
            return Err(WireError::OversizeTlv(tlv_region.len()));
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + tlv_region.len());
        buf.put_u8(VERSION);
        buf.put_u8(self.header.flags);
        buf.put_u16(HEADER_LEN as u16);
        buf.put_u32(self.header.tunnel_id);
        buf.put_u32(self.header.sequence);
        buf.put_u32(self.header.timestamp);
        buf.put_u32(tlv_region.len() as u32);
        buf.extend_from_slice(&tlv_region);
        Ok(buf.to_vec())
    }

    /// Decode with the skip-unknown rule: unrecognized TLV types are skipped
    /// and counted, not rejected.
    pub fn decode(input: &[u8]) -> Result<DecodedPacket, WireError> {
        decode_inner(input, false)
    }

    /// Strict decode: an unknown TLV type is an error.
    pub fn decode_strict(input: &[u8]) -> Result<DecodedPacket, WireError> {
        decode_inner(input, true)
    }
}

/// Parse just the header and return `header_length + tlv_length`, without
/// touching the TLV region. Lets the receiver locate a trailing auth tag.
pub fn total_len(input: &[u8]) -> Result<usize, WireError> {
    if input.len() > MAX_DATAGRAM {
        return Err(WireError::PacketTooLarge(input.len()));
    }
    if input.len() < HEADER_LEN {
        return Err(WireError::MalformedHeader("short header"));
    }
    let mut buf = input;
    let version = buf.get_u8();
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let flags = buf.get_u8();
    if flags & FLAGS_RESERVED_MASK != 0 {
        return Err(WireError::ReservedFlagSet(flags));
    }
    let header_length = buf.get_u16();
    if header_length as usize != HEADER_LEN {
        return Err(WireError::MalformedHeader("bad header_length"));
    }
    buf.advance(12); // tunnel_id, sequence, timestamp
    let tlv_length = buf.get_u32() as usize;
    let total = HEADER_LEN + tlv_length;
    if total > MAX_DATAGRAM {
        return Err(WireError::PacketTooLarge(total));
    }
    if input.len() < total {
        return Err(WireError::MalformedHeader("tlv_length past end of input"));
    }
    Ok(total)
}

fn decode_inner(input: &[u8], strict: bool) -> Result<DecodedPacket, WireError> {
    let total = total_len(input)?;

    let mut buf = &input[..total];
    buf.advance(1); // version, validated by total_len
    let flags = buf.get_u8();
    buf.advance(2); // header_length
    let tunnel_id = buf.get_u32();
    let sequence = buf.get_u32();
    let timestamp = buf.get_u32();
    buf.advance(4); // tlv_length

    let mut tlvs = Vec::new();
    let mut skipped_unknown = 0u32;
    while buf.has_remaining() {
        let offset = total - buf.remaining();
        if buf.remaining() < 4 {
            return Err(WireError::TruncatedTlv(offset));
        }
        let type_code = buf.get_u16();
        let length = buf.get_u16() as usize;
        if length > buf.remaining() {
            return Err(WireError::TruncatedTlv(offset));
        }
        let value = &buf[..length];
        match Tlv::decode(type_code, value)? {
            Some(tlv) => tlvs.push(tlv),
            None if strict => return Err(WireError::UnknownTlv(type_code)),
            None => skipped_unknown += 1,
        }
        buf.advance(length);
    }

    Ok(DecodedPacket {
        packet: Packet {
            header: PacketHeader {
                flags,
                tunnel_id,
                sequence,
                timestamp,
            },
            tlvs,
        },
        consumed: total,
        skipped_unknown,
    })
}
