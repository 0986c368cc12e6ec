use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::measure::auth::{verify_tag, TAG_LEN};
use crate::measure::window::{ProbeSample, WindowTable};
use crate::measure::parse_probe;
use crate::peers::PeerRegistry;
use crate::telemetry::Metrics;
use crate::topology::{GossipEdge, TopologyStore};
use crate::types::{wall_now_ns, NodeId};
use crate::wire::packet::total_len;
use crate::wire::{Packet, Tlv, MAX_DATAGRAM};

/// An idle socket wakes the loop this often so the shutdown check and the
/// idle log stay live even with no traffic.
const RECV_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound datagram receiver: authenticates probes, feeds sample windows,
/// and merges gossiped control messages. Wire and auth failures never leave
/// this task; they become counter increments.
pub struct Receiver {
    local: NodeId,
    socket: Arc<UdpSocket>,
    registry: Arc<PeerRegistry>,
    windows: Arc<WindowTable>,
    topology: Arc<TopologyStore>,
    metrics: Arc<Metrics>,
}

impl Receiver {
    pub fn new(
        local: NodeId,
        socket: Arc<UdpSocket>,
        registry: Arc<PeerRegistry>,
        windows: Arc<WindowTable>,
        topology: Arc<TopologyStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            local,
            socket,
            registry,
            windows,
            topology,
            metrics,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // One extra byte so an over-limit datagram is detectable rather than
        // silently truncated to the cap.
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = tokio::time::timeout(RECV_IDLE_TIMEOUT, self.socket.recv_from(&mut buf)) => {
                    match received {
                        Ok(Ok((len, from))) => self.handle_datagram(&buf[..len], from),
                        Ok(Err(err)) => {
                            warn!(%err, "probe socket receive error");
                        }
                        Err(_) => {
                            debug!("probe socket idle");
                        }
                    }
                }
            }
        }
        info!("receiver stopped");
    }

    pub(crate) fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        if data.len() > MAX_DATAGRAM {
            self.metrics.count_decode_error("packet_too_large");
            return;
        }
        let packet_len = match total_len(data) {
            Ok(len) => len,
            Err(err) => {
                debug!(%from, %err, "dropping malformed datagram");
                self.metrics.count_decode_error(err.kind());
                return;
            }
        };

        // Probe datagrams are exactly `packet || 32-byte tag`.
        if data.len() == packet_len + TAG_LEN {
            self.handle_probe(data, packet_len, from);
            return;
        }

        match Packet::decode(&data[..packet_len]) {
            Ok(decoded) => {
                if decoded.skipped_unknown > 0 {
                    self.metrics
                        .tlv_unknown_skipped
                        .inc_by(u64::from(decoded.skipped_unknown));
                }
                self.handle_control(decoded.packet, from);
            }
            Err(err) => {
                debug!(%from, %err, "dropping undecodable packet");
                self.metrics.count_decode_error(err.kind());
            }
        }
    }

    fn handle_probe(&self, data: &[u8], packet_len: usize, from: SocketAddr) {
        let decoded = match Packet::decode(&data[..packet_len]) {
            Ok(d) => d,
            Err(err) => {
                self.metrics.count_decode_error(err.kind());
                return;
            }
        };
        let Some(payload) = parse_probe(&decoded.packet) else {
            self.metrics.count_decode_error("malformed_probe");
            return;
        };
        let src = NodeId::from(payload.src.as_str());

        // HMAC first: nothing below runs for an unauthenticated datagram.
        let Some(peer) = self.registry.get(&src) else {
            debug!(%from, peer = %src, "probe from unknown peer");
            self.metrics
                .probe_auth_fail
                .with_label_values(&[src.as_str()])
                .inc();
            return;
        };
        if !verify_tag(peer.shared_secret(), &data[..packet_len], &data[packet_len..]) {
            debug!(peer = %src, "probe HMAC mismatch");
            self.metrics
                .probe_auth_fail
                .with_label_values(&[src.as_str()])
                .inc();
            return;
        }
        if payload.dst != self.local.as_str() {
            debug!(peer = %src, dst = %payload.dst, "misdirected probe");
            self.metrics.count_decode_error("misdirected_probe");
            return;
        }

        let now_ns = wall_now_ns();
        peer.touch(now_ns);
        self.metrics
            .probe_recv
            .with_label_values(&[src.as_str()])
            .inc();

        // One-way latency against the sender's wall clock; clock sync is
        // assumed, and skew surfaces through the min-latency observable.
        let latency_ms = (now_ns as i128 - payload.send_ts_wall_ns as i128) as f64 / 1e6;
        let sample = ProbeSample {
            seq: payload.seq,
            latency_ms,
            recv_wall_ns: now_ns,
        };
        if let Some(edge_metrics) = self.windows.record(&src, &self.local, sample) {
            self.metrics.observe_edge(&src, &self.local, &edge_metrics);
            self.topology
                .upsert_edge(src, self.local.clone(), edge_metrics);
        }
    }

    fn handle_control(&self, packet: Packet, from: SocketAddr) {
        for tlv in packet.tlvs {
            match tlv {
                Tlv::Keepalive => {
                    if let Some(peer) = self.registry.by_address(&from) {
                        peer.touch(wall_now_ns());
                    }
                }
                Tlv::TopologyUpdate(value) => self.merge_topology_update(value, from),
                Tlv::NeighborList(ids) => {
                    if self.registry.by_address(&from).is_some() {
                        for id in ids {
                            self.topology.upsert_node(NodeId::from(id));
                        }
                    }
                }
                other => {
                    debug!(%from, type_code = other.type_code(), "ignoring control TLV");
                }
            }
        }
    }

    /// Merge a peer's gossiped edge set. Only edges the sender measured
    /// itself (dst == sender) are trusted; everything else is dropped.
    fn merge_topology_update(&self, value: serde_json::Value, from: SocketAddr) {
        let Some(peer) = self.registry.by_address(&from) else {
            debug!(%from, "topology update from unregistered address");
            return;
        };
        let edges: Vec<GossipEdge> = match value.get("edges") {
            Some(edges) => match serde_json::from_value(edges.clone()) {
                Ok(edges) => edges,
                Err(err) => {
                    debug!(peer = %peer.node_id, %err, "bad topology update payload");
                    self.metrics.count_decode_error("bad_json");
                    return;
                }
            },
            None => {
                self.metrics.count_decode_error("bad_json");
                return;
            }
        };

        let now_ns = wall_now_ns();
        for edge in edges {
            if edge.dst != peer.node_id.as_str() {
                debug!(
                    peer = %peer.node_id,
                    src = %edge.src,
                    dst = %edge.dst,
                    "ignoring gossiped edge the sender does not own"
                );
                continue;
            }
            let src = NodeId::from(edge.src.as_str());
            let dst = NodeId::from(edge.dst.as_str());
            // Our own measurements of this pair are authoritative.
            if dst == self.local {
                continue;
            }
            let metrics = edge.to_metrics(now_ns);
            self.metrics.observe_edge(&src, &dst, &metrics);
            self.topology.upsert_edge(src, dst, metrics);
        }
    }
}
