#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod measure;
pub mod node;
pub mod peers;
pub mod routing;
pub mod sink;
pub mod telemetry;
pub mod topology;
pub mod types;
pub mod wire;

pub use config::{load_from_path, Config, PeerEntry, TimingConfig};
pub use error::{DdarpError, Result};
pub use node::Node;
pub use peers::{PeerRecord, PeerRegistry};
pub use routing::{RouteEntry, RoutingTable};
pub use sink::{PathDecision, RouteAdvertiser, TunnelManager};
pub use topology::{TopologySnapshot, TopologyStore};
pub use types::{Liveness, NodeId, PeerKind};
pub use wire::{Packet, PacketHeader, Tlv, WireError};
