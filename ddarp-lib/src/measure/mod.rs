//! Measurement engine: authenticated 1 Hz probes per peer, sliding-window
//! statistics per ordered pair, and the liveness signal they feed.

pub mod auth;
pub mod prober;
pub mod receiver;
pub mod window;

pub use auth::TAG_LEN;
pub use prober::Prober;
pub use receiver::Receiver;
pub use window::{EdgeMetrics, ProbeSample, SampleWindow, WindowTable};

use serde::{Deserialize, Serialize};

use crate::types::wall_now_secs;
use crate::wire::{Packet, PacketHeader, Tlv, WireError, FLAG_REQUEST};

/// Contents of a probe datagram's single T3_TERNARY TLV. The wire-level
/// `sequence` header wraps at u32; this one does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbePayload {
    pub src: String,
    pub dst: String,
    pub seq: u64,
    pub send_ts_monotonic_ns: u64,
    pub send_ts_wall_ns: u64,
}

/// Encode a probe as `packet || hmac_tag`. The tag covers every packet byte.
pub fn encode_probe(payload: &ProbePayload, secret: &[u8]) -> Result<Vec<u8>, WireError> {
    let value = serde_json::to_value(payload).map_err(|_| WireError::BadJson(0x0001))?;
    let packet = Packet::new(
        PacketHeader {
            flags: FLAG_REQUEST,
            tunnel_id: 0,
            sequence: payload.seq as u32,
            timestamp: wall_now_secs(),
        },
        vec![Tlv::Ternary(value)],
    );
    let mut bytes = packet.encode()?;
    let tag = auth::compute_tag(secret, &bytes);
    bytes.extend_from_slice(&tag);
    Ok(bytes)
}

/// Extract a probe payload from a decoded packet, if that is what it is.
pub fn parse_probe(packet: &Packet) -> Option<ProbePayload> {
    match packet.tlvs.as_slice() {
        [Tlv::Ternary(value)] => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}
