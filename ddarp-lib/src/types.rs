use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque node identity. Case-sensitive, unique per node; doubles as the
/// graph vertex key and the authenticated source of probes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    #[default]
    Regular,
    Border,
}

impl PeerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerKind::Regular => "regular",
            PeerKind::Border => "border",
        }
    }
}

/// Peer liveness ladder. The receive path only ever promotes to `Alive`;
/// demotions happen on the housekeeping sweep, so a peer cannot go
/// alive -> dead without passing through suspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Unknown,
    Alive,
    Suspect,
    Dead,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Unknown => "unknown",
            Liveness::Alive => "alive",
            Liveness::Suspect => "suspect",
            Liveness::Dead => "dead",
        }
    }

    pub(crate) fn from_u8(v: u8) -> Liveness {
        match v {
            1 => Liveness::Alive,
            2 => Liveness::Suspect,
            3 => Liveness::Dead,
            _ => Liveness::Unknown,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Liveness::Unknown => 0,
            Liveness::Alive => 1,
            Liveness::Suspect => 2,
            Liveness::Dead => 3,
        }
    }
}

/// Wall-clock now as nanoseconds since the Unix epoch.
pub fn wall_now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Wall-clock now as whole seconds since the Unix epoch (wire timestamps).
pub fn wall_now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
