//! Path-decision sink: diffs successive routing tables into route
//! advertisements and tunnel recommendations for the data-plane seam. Pure
//! computation; adapters own the sockets and the BGP session.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::TimingConfig;
use crate::measure::EdgeMetrics;
use crate::peers::PeerRecord;
use crate::routing::RoutingTable;
use crate::topology::TopologySnapshot;
use crate::types::NodeId;

/// One BGP community attribute `asn:value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Community {
    pub asn: u16,
    pub value: u16,
}

pub const COMMUNITY_ASN_LATENCY: u16 = 65000;
pub const COMMUNITY_ASN_JITTER: u16 = 65001;
pub const COMMUNITY_ASN_LOSS: u16 = 65002;

/// Encode the OWL triple as community values, `floor(v * 10)` saturated
/// into u16 range.
pub fn owl_communities(latency_ms: f64, jitter_ms: f64, loss_ratio: f64) -> [Community; 3] {
    [
        Community {
            asn: COMMUNITY_ASN_LATENCY,
            value: clamp_tenths(latency_ms),
        },
        Community {
            asn: COMMUNITY_ASN_JITTER,
            value: clamp_tenths(jitter_ms),
        },
        Community {
            asn: COMMUNITY_ASN_LOSS,
            value: clamp_tenths(loss_ratio * 100.0),
        },
    ]
}

fn clamp_tenths(v: f64) -> u16 {
    (v * 10.0).floor().clamp(0.0, f64::from(u16::MAX)) as u16
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathDecision {
    Advertise {
        destination: NodeId,
        next_hop: NodeId,
        latency_ms: f64,
        jitter_ms: f64,
        loss_ratio: f64,
    },
    Revoke {
        destination: NodeId,
    },
    RequestTunnel {
        peer: NodeId,
        endpoint: SocketAddr,
    },
    ReleaseTunnel {
        peer: NodeId,
    },
}

/// eBGP seam: implementations translate advertisements into route
/// announcements carrying the OWL triple in community attributes.
pub trait RouteAdvertiser: Send + Sync {
    /// Returns an opaque advertisement handle.
    fn advertise(
        &self,
        destination: &NodeId,
        next_hop: &NodeId,
        latency_ms: f64,
        jitter_ms: f64,
        loss_ratio: f64,
    ) -> u64;
    fn revoke(&self, destination: &NodeId);
}

/// VPN seam: implementations bring encrypted point-to-point tunnels up and
/// down on demand.
pub trait TunnelManager: Send + Sync {
    fn request_tunnel(&self, peer: &NodeId, endpoint: SocketAddr);
    fn release_tunnel(&self, peer: &NodeId);
}

/// Default seam implementation: logs what a BGP daemon would announce.
#[derive(Default)]
pub struct LoggingAdvertiser {
    next_handle: AtomicU64,
}

impl RouteAdvertiser for LoggingAdvertiser {
    fn advertise(
        &self,
        destination: &NodeId,
        next_hop: &NodeId,
        latency_ms: f64,
        jitter_ms: f64,
        loss_ratio: f64,
    ) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let [lat, jit, loss] = owl_communities(latency_ms, jitter_ms, loss_ratio);
        info!(
            %destination,
            %next_hop,
            communities = format!(
                "{}:{} {}:{} {}:{}",
                lat.asn, lat.value, jit.asn, jit.value, loss.asn, loss.value
            ),
            handle,
            "advertise route"
        );
        handle
    }

    fn revoke(&self, destination: &NodeId) {
        info!(%destination, "revoke route");
    }
}

#[derive(Default)]
pub struct LoggingTunnelManager;

impl TunnelManager for LoggingTunnelManager {
    fn request_tunnel(&self, peer: &NodeId, endpoint: SocketAddr) {
        info!(%peer, %endpoint, "request tunnel");
    }

    fn release_tunnel(&self, peer: &NodeId) {
        info!(%peer, "release tunnel");
    }
}

#[derive(Debug, Clone, Copy)]
struct Advertised {
    cost: f64,
}

/// Stateful differ over successive routing tables. Deltas for table
/// revision G are computed and dispatched before revision G+1 is examined;
/// the routing pass drives this synchronously.
pub struct DecisionSink {
    local: NodeId,
    timing: TimingConfig,
    advertiser: Arc<dyn RouteAdvertiser>,
    tunnels: Arc<dyn TunnelManager>,
    advertised: HashMap<NodeId, Advertised>,
    active_tunnels: HashSet<NodeId>,
}

impl DecisionSink {
    pub fn new(
        local: NodeId,
        timing: TimingConfig,
        advertiser: Arc<dyn RouteAdvertiser>,
        tunnels: Arc<dyn TunnelManager>,
    ) -> Self {
        Self {
            local,
            timing,
            advertiser,
            tunnels,
            advertised: HashMap::new(),
            active_tunnels: HashSet::new(),
        }
    }

    /// Diff the freshly installed table against what was last handed to the
    /// seam, dispatch the deltas, and return them.
    pub fn apply(
        &mut self,
        table: &RoutingTable,
        topology: &TopologySnapshot,
        peers: &HashMap<NodeId, Arc<PeerRecord>>,
    ) -> Vec<PathDecision> {
        let mut decisions = Vec::new();

        // Route advertisements: new destinations and cost movements. The
        // table install already damped sub-threshold changes, so any cost
        // difference that survived is worth announcing.
        for (destination, entry) in &table.entries {
            let needs_advertise = match self.advertised.get(destination) {
                None => true,
                Some(prior) => prior.cost != entry.total_cost,
            };
            if !needs_advertise {
                continue;
            }
            // The OWL triple of the first hop is the one this node owns.
            let (latency_ms, jitter_ms, loss_ratio) =
                match topology.edge(&self.local, &entry.next_hop) {
                    Some(m) => (m.latency_ms, m.jitter_ms, m.loss_ratio),
                    None => (entry.total_cost, 0.0, 0.0),
                };
            self.advertiser.advertise(
                destination,
                &entry.next_hop,
                latency_ms,
                jitter_ms,
                loss_ratio,
            );
            self.advertised.insert(
                destination.clone(),
                Advertised {
                    cost: entry.total_cost,
                },
            );
            decisions.push(PathDecision::Advertise {
                destination: destination.clone(),
                next_hop: entry.next_hop.clone(),
                latency_ms,
                jitter_ms,
                loss_ratio,
            });
        }

        // Revocations: previously advertised destinations that vanished.
        let gone: Vec<NodeId> = self
            .advertised
            .keys()
            .filter(|dest| !table.entries.contains_key(*dest))
            .cloned()
            .collect();
        for destination in gone {
            self.advertised.remove(&destination);
            self.advertiser.revoke(&destination);
            decisions.push(PathDecision::Revoke { destination });
        }

        // Tunnel recommendations over the next hops the table actually uses.
        let hops_in_use: HashSet<&NodeId> =
            table.entries.values().map(|e| &e.next_hop).collect();
        for hop in &hops_in_use {
            if self.active_tunnels.contains(*hop) {
                continue;
            }
            let Some(peer) = peers.get(*hop) else {
                continue;
            };
            let Some(metrics) = topology.edge(&self.local, hop) else {
                continue;
            };
            if tunnel_worthy(metrics, &self.timing) {
                self.tunnels.request_tunnel(hop, peer.address);
                self.active_tunnels.insert((*hop).clone());
                decisions.push(PathDecision::RequestTunnel {
                    peer: (*hop).clone(),
                    endpoint: peer.address,
                });
            }
        }

        // Teardown: tunnels whose peer no longer carries any route. The
        // table install's hysteresis already vouched for the alternative.
        let released: Vec<NodeId> = self
            .active_tunnels
            .iter()
            .filter(|peer| !hops_in_use.contains(*peer))
            .cloned()
            .collect();
        for peer in released {
            self.active_tunnels.remove(&peer);
            self.tunnels.release_tunnel(&peer);
            decisions.push(PathDecision::ReleaseTunnel { peer });
        }

        decisions
    }
}

fn tunnel_worthy(metrics: &EdgeMetrics, timing: &TimingConfig) -> bool {
    metrics.latency_ms < timing.tunnel_max_latency_ms
        && metrics.loss_ratio < timing.tunnel_max_loss
}
