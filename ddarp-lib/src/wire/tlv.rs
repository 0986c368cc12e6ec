use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;

use super::WireError;

pub const TYPE_T3_TERNARY: u16 = 0x0001;
pub const TYPE_OWL_METRICS: u16 = 0x0002;
pub const TYPE_ROUTING_INFO: u16 = 0x0003;
pub const TYPE_NEIGHBOR_LIST: u16 = 0x0010;
pub const TYPE_TOPOLOGY_UPDATE: u16 = 0x0011;
pub const TYPE_KEEPALIVE: u16 = 0x0030;
pub const TYPE_ERROR_INFO: u16 = 0x0031;
pub const TYPE_CAPABILITIES: u16 = 0x0032;

/// Packed one-way-latency measurement: latency_ns u64, jitter_ns u64,
/// timestamp u32, all big-endian (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwlMetrics {
    pub latency_ns: u64,
    pub jitter_ns: u64,
    pub timestamp: u32,
}

/// Packed route description: two length-prefixed (u16) UTF-8 strings
/// followed by a u32 metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingInfo {
    pub dest: String,
    pub next_hop: String,
    pub metric: u32,
}

/// Closed sum over the registered TLV types. Unknown types never reach this
/// enum; the decoder skips them (or rejects them in strict mode).
#[derive(Debug, Clone, PartialEq)]
pub enum Tlv {
    Ternary(Value),
    OwlMetrics(OwlMetrics),
    RoutingInfo(RoutingInfo),
    NeighborList(Vec<String>),
    TopologyUpdate(Value),
    Keepalive,
    ErrorInfo(String),
    Capabilities(Value),
}

impl Tlv {
    pub fn type_code(&self) -> u16 {
        match self {
            Tlv::Ternary(_) => TYPE_T3_TERNARY,
            Tlv::OwlMetrics(_) => TYPE_OWL_METRICS,
            Tlv::RoutingInfo(_) => TYPE_ROUTING_INFO,
            Tlv::NeighborList(_) => TYPE_NEIGHBOR_LIST,
            Tlv::TopologyUpdate(_) => TYPE_TOPOLOGY_UPDATE,
            Tlv::Keepalive => TYPE_KEEPALIVE,
            Tlv::ErrorInfo(_) => TYPE_ERROR_INFO,
            Tlv::Capabilities(_) => TYPE_CAPABILITIES,
        }
    }

    /// Append `type | length | value` to `buf`.
    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let value = self.encode_value()?;
        if value.len() > u16::MAX as usize {
            return Err(WireError::OversizeTlv(value.len()));
        }
        buf.put_u16(self.type_code());
        buf.put_u16(value.len() as u16);
        buf.extend_from_slice(&value);
        Ok(())
    }

    fn encode_value(&self) -> Result<Vec<u8>, WireError> {
        let bytes = match self {
            Tlv::Ternary(v) | Tlv::TopologyUpdate(v) | Tlv::Capabilities(v) => {
                serde_json::to_vec(v).map_err(|_| WireError::BadJson(self.type_code()))?
            }
            Tlv::OwlMetrics(m) => {
                let mut out = BytesMut::with_capacity(20);
                out.put_u64(m.latency_ns);
                out.put_u64(m.jitter_ns);
                out.put_u32(m.timestamp);
                out.to_vec()
            }
            Tlv::RoutingInfo(r) => {
                let dest = r.dest.as_bytes();
                let next_hop = r.next_hop.as_bytes();
                if dest.len() > u16::MAX as usize || next_hop.len() > u16::MAX as usize {
                    return Err(WireError::OversizeTlv(dest.len().max(next_hop.len())));
                }
                let mut out = BytesMut::with_capacity(4 + dest.len() + next_hop.len() + 4);
                out.put_u16(dest.len() as u16);
                out.extend_from_slice(dest);
                out.put_u16(next_hop.len() as u16);
                out.extend_from_slice(next_hop);
                out.put_u32(r.metric);
                out.to_vec()
            }
            Tlv::NeighborList(ids) => serde_json::to_vec(ids)
                .map_err(|_| WireError::BadJson(self.type_code()))?,
            Tlv::Keepalive => Vec::new(),
            Tlv::ErrorInfo(msg) => msg.as_bytes().to_vec(),
        };
        Ok(bytes)
    }

    /// Decode one TLV value. `Ok(None)` means the type is not registered and
    /// the caller should apply the skip-unknown rule.
    pub(crate) fn decode(type_code: u16, value: &[u8]) -> Result<Option<Tlv>, WireError> {
        let tlv = match type_code {
            TYPE_T3_TERNARY => Tlv::Ternary(decode_json(type_code, value)?),
            TYPE_OWL_METRICS => {
                if value.len() != 20 {
                    return Err(WireError::TruncatedTlv(0));
                }
                let mut buf = value;
                Tlv::OwlMetrics(OwlMetrics {
                    latency_ns: buf.get_u64(),
                    jitter_ns: buf.get_u64(),
                    timestamp: buf.get_u32(),
                })
            }
            TYPE_ROUTING_INFO => Tlv::RoutingInfo(decode_routing_info(value)?),
            TYPE_NEIGHBOR_LIST => {
                let text = decode_utf8(type_code, value)?;
                let ids: Vec<String> = serde_json::from_str(text)
                    .map_err(|_| WireError::BadJson(type_code))?;
                Tlv::NeighborList(ids)
            }
            TYPE_TOPOLOGY_UPDATE => Tlv::TopologyUpdate(decode_json(type_code, value)?),
            TYPE_KEEPALIVE => Tlv::Keepalive,
            TYPE_ERROR_INFO => Tlv::ErrorInfo(decode_utf8(type_code, value)?.to_owned()),
            TYPE_CAPABILITIES => Tlv::Capabilities(decode_json(type_code, value)?),
            _ => return Ok(None),
        };
        Ok(Some(tlv))
    }
}

fn decode_utf8(type_code: u16, value: &[u8]) -> Result<&str, WireError> {
    std::str::from_utf8(value).map_err(|_| WireError::BadUtf8(type_code))
}

fn decode_json(type_code: u16, value: &[u8]) -> Result<Value, WireError> {
    let text = decode_utf8(type_code, value)?;
    serde_json::from_str(text).map_err(|_| WireError::BadJson(type_code))
}

fn decode_routing_info(value: &[u8]) -> Result<RoutingInfo, WireError> {
    let mut buf = value;
    let dest = read_prefixed_string(&mut buf)?;
    let next_hop = read_prefixed_string(&mut buf)?;
    if buf.remaining() != 4 {
        return Err(WireError::TruncatedTlv(0));
    }
    Ok(RoutingInfo {
        dest,
        next_hop,
        metric: buf.get_u32(),
    })
}

fn read_prefixed_string(buf: &mut &[u8]) -> Result<String, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::TruncatedTlv(0));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(WireError::TruncatedTlv(0));
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| WireError::BadUtf8(TYPE_ROUTING_INFO))?
        .to_owned();
    buf.advance(len);
    Ok(s)
}
