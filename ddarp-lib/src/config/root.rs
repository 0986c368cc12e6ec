use std::net::SocketAddr;

use serde::Deserialize;

use crate::types::PeerKind;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// This node's identity in the mesh. Required; case-sensitive.
    pub node_id: String,
    /// Node role advertised to collaborators
    #[serde(default)]
    pub kind: PeerKind,
    /// Datagram socket for probes and control messages
    /// Example: "0.0.0.0:8080"
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Admin/metrics HTTP socket
    #[serde(default = "default_admin_listen")]
    pub admin_listen: SocketAddr,
    /// Probe cadence per peer
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Baseline routing recompute cadence; generation changes trigger
    /// earlier passes
    #[serde(default = "default_recompute_interval_ms")]
    pub recompute_interval_ms: u64,
    /// How often locally measured edges are gossiped to peers
    #[serde(default = "default_gossip_interval_ms")]
    pub gossip_interval_ms: u64,
    /// Freshness / expiry / hysteresis knobs
    #[serde(default)]
    pub timing: TimingConfig,
    /// Secret assumed for peers added over the admin API without one
    #[serde(default)]
    pub default_shared_secret: Option<String>,
    /// Peers seeded at startup; the admin API mutates the set afterwards
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PeerEntry {
    pub node_id: String,
    pub address: SocketAddr,
    pub shared_secret: String,
    #[serde(default)]
    pub kind: PeerKind,
}

/// The staleness/expiry ladder and the damping thresholds. Defaults are the
/// protocol constants; tests shrink them to millisecond scale.
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    /// No probe for this long: peer becomes suspect
    #[serde(default = "default_suspect_after_ms")]
    pub suspect_after_ms: u64,
    /// No probe for this long: peer becomes dead
    #[serde(default = "default_dead_after_ms")]
    pub dead_after_ms: u64,
    /// Edges older than this are excluded from path search
    #[serde(default = "default_edge_fresh_ms")]
    pub edge_fresh_ms: u64,
    /// Edges older than this are evicted from the store entirely
    #[serde(default = "default_edge_evict_ms")]
    pub edge_evict_ms: u64,
    /// Routes older than this are refreshed even when unchanged
    #[serde(default = "default_route_refresh_ms")]
    pub route_refresh_ms: u64,
    /// Routes older than this are removed regardless
    #[serde(default = "default_route_expire_ms")]
    pub route_expire_ms: u64,
    /// A fresh path must cost less than this fraction of the installed one
    /// to displace it
    #[serde(default = "default_improvement_ratio")]
    pub improvement_ratio: f64,
    /// Edges above this loss ratio are unusable for routing
    #[serde(default = "default_max_usable_loss")]
    pub max_usable_loss: f64,
    /// Tunnel recommendation thresholds on the direct next-hop edge
    #[serde(default = "default_tunnel_max_latency_ms")]
    pub tunnel_max_latency_ms: f64,
    #[serde(default = "default_tunnel_max_loss")]
    pub tunnel_max_loss: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            suspect_after_ms: default_suspect_after_ms(),
            dead_after_ms: default_dead_after_ms(),
            edge_fresh_ms: default_edge_fresh_ms(),
            edge_evict_ms: default_edge_evict_ms(),
            route_refresh_ms: default_route_refresh_ms(),
            route_expire_ms: default_route_expire_ms(),
            improvement_ratio: default_improvement_ratio(),
            max_usable_loss: default_max_usable_loss(),
            tunnel_max_latency_ms: default_tunnel_max_latency_ms(),
            tunnel_max_loss: default_tunnel_max_loss(),
        }
    }
}

impl Config {
    /// A configuration with every field at its default except the identity.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            kind: PeerKind::Regular,
            listen: default_listen(),
            admin_listen: default_admin_listen(),
            probe_interval_ms: default_probe_interval_ms(),
            recompute_interval_ms: default_recompute_interval_ms(),
            gossip_interval_ms: default_gossip_interval_ms(),
            timing: TimingConfig::default(),
            default_shared_secret: None,
            peers: Vec::new(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_admin_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

fn default_probe_interval_ms() -> u64 {
    1000
}

fn default_recompute_interval_ms() -> u64 {
    5000
}

fn default_gossip_interval_ms() -> u64 {
    5000
}

fn default_suspect_after_ms() -> u64 {
    10_000
}

fn default_dead_after_ms() -> u64 {
    30_000
}

fn default_edge_fresh_ms() -> u64 {
    30_000
}

fn default_edge_evict_ms() -> u64 {
    120_000
}

fn default_route_refresh_ms() -> u64 {
    30_000
}

fn default_route_expire_ms() -> u64 {
    120_000
}

fn default_improvement_ratio() -> f64 {
    0.80
}

fn default_max_usable_loss() -> f64 {
    0.5
}

fn default_tunnel_max_latency_ms() -> f64 {
    10.0
}

fn default_tunnel_max_loss() -> f64 {
    0.01
}
