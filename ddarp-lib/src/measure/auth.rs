use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Probe datagrams carry an HMAC-SHA256 tag over the encoded packet bytes.
pub const TAG_LEN: usize = 32;

pub fn compute_tag(secret: &[u8], packet_bytes: &[u8]) -> [u8; TAG_LEN] {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(packet_bytes);
    mac.finalize().into_bytes().into()
}

/// Constant-time verification.
pub fn verify_tag(secret: &[u8], packet_bytes: &[u8], tag: &[u8]) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(packet_bytes);
    mac.verify_slice(tag).is_ok()
}
