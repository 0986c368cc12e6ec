use std::sync::Arc;

use prometheus::{
    GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

use crate::measure::EdgeMetrics;
use crate::types::NodeId;

/// All exported counters and gauges. The metric names are part of the
/// external contract; labels `src`/`dst` carry ordered-pair identity.
#[derive(Clone)]
pub struct Metrics {
    pub peer_count: IntGauge,
    pub topology_nodes: IntGauge,
    pub topology_edges: IntGauge,
    pub routing_table_size: IntGauge,
    pub node_health: IntGaugeVec,

    pub owl_latency_ms: GaugeVec,
    pub owl_jitter_ms: GaugeVec,
    pub owl_loss_percent: GaugeVec,
    pub owl_min_latency_ms: GaugeVec,

    pub probe_sent: IntCounterVec,
    pub probe_recv: IntCounterVec,
    pub probe_auth_fail: IntCounterVec,
    pub probe_send_fail: IntCounterVec,
    pub route_changes: IntCounter,
    pub decode_errors: IntCounterVec,
    pub tlv_unknown_skipped: IntCounter,
}

impl Metrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let peer_count = IntGauge::new("ddarp_peer_count", "Registered peers")?;
        let topology_nodes =
            IntGauge::new("ddarp_topology_nodes_total", "Known topology nodes")?;
        let topology_edges =
            IntGauge::new("ddarp_topology_edges_total", "Known topology edges")?;
        let routing_table_size =
            IntGauge::new("ddarp_routing_table_size", "Destinations in the routing table")?;
        let node_health = IntGaugeVec::new(
            Opts::new("ddarp_node_health", "1 when healthy, 0 when degraded"),
            &["node_id"],
        )?;

        let owl_latency_ms = GaugeVec::new(
            Opts::new("ddarp_owl_latency_ms", "Mean one-way latency per ordered pair"),
            &["src", "dst"],
        )?;
        let owl_jitter_ms = GaugeVec::new(
            Opts::new("ddarp_owl_jitter_ms", "One-way latency jitter per ordered pair"),
            &["src", "dst"],
        )?;
        let owl_loss_percent = GaugeVec::new(
            Opts::new(
                "ddarp_owl_packet_loss_percent",
                "Probe loss per ordered pair, percent",
            ),
            &["src", "dst"],
        )?;
        let owl_min_latency_ms = GaugeVec::new(
            Opts::new(
                "ddarp_owl_min_latency_ms",
                "Window minimum one-way latency; negative values indicate clock skew",
            ),
            &["src", "dst"],
        )?;

        let probe_sent = IntCounterVec::new(
            Opts::new("ddarp_probe_sent_total", "Probes sent per peer"),
            &["peer"],
        )?;
        let probe_recv = IntCounterVec::new(
            Opts::new("ddarp_probe_recv_total", "Authenticated probes received per peer"),
            &["peer"],
        )?;
        let probe_auth_fail = IntCounterVec::new(
            Opts::new(
                "ddarp_probe_auth_fail_total",
                "Probes dropped for HMAC mismatch or unknown peer",
            ),
            &["peer"],
        )?;
        let probe_send_fail = IntCounterVec::new(
            Opts::new(
                "ddarp_probe_send_fail_total",
                "Transient probe send failures, retried next tick",
            ),
            &["peer"],
        )?;
        let route_changes =
            IntCounter::new("ddarp_route_changes_total", "Materially changed routes")?;
        let decode_errors = IntCounterVec::new(
            Opts::new("ddarp_packet_decode_errors_total", "Packets rejected by the codec"),
            &["kind"],
        )?;
        let tlv_unknown_skipped = IntCounter::new(
            "ddarp_tlv_unknown_skipped_total",
            "Unknown TLVs skipped during decode",
        )?;

        registry.register(Box::new(peer_count.clone()))?;
        registry.register(Box::new(topology_nodes.clone()))?;
        registry.register(Box::new(topology_edges.clone()))?;
        registry.register(Box::new(routing_table_size.clone()))?;
        registry.register(Box::new(node_health.clone()))?;
        registry.register(Box::new(owl_latency_ms.clone()))?;
        registry.register(Box::new(owl_jitter_ms.clone()))?;
        registry.register(Box::new(owl_loss_percent.clone()))?;
        registry.register(Box::new(owl_min_latency_ms.clone()))?;
        registry.register(Box::new(probe_sent.clone()))?;
        registry.register(Box::new(probe_recv.clone()))?;
        registry.register(Box::new(probe_auth_fail.clone()))?;
        registry.register(Box::new(probe_send_fail.clone()))?;
        registry.register(Box::new(route_changes.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(tlv_unknown_skipped.clone()))?;

        Ok(Self {
            peer_count,
            topology_nodes,
            topology_edges,
            routing_table_size,
            node_health,
            owl_latency_ms,
            owl_jitter_ms,
            owl_loss_percent,
            owl_min_latency_ms,
            probe_sent,
            probe_recv,
            probe_auth_fail,
            probe_send_fail,
            route_changes,
            decode_errors,
            tlv_unknown_skipped,
        })
    }

    /// Publish one ordered pair's derived metrics.
    pub fn observe_edge(&self, src: &NodeId, dst: &NodeId, metrics: &EdgeMetrics) {
        let labels = [src.as_str(), dst.as_str()];
        self.owl_latency_ms
            .with_label_values(&labels)
            .set(metrics.latency_ms);
        self.owl_jitter_ms
            .with_label_values(&labels)
            .set(metrics.jitter_ms);
        self.owl_loss_percent
            .with_label_values(&labels)
            .set(metrics.loss_ratio * 100.0);
        self.owl_min_latency_ms
            .with_label_values(&labels)
            .set(metrics.min_latency_ms);
    }

    /// Drop the ordered pair's series (peer removal / edge eviction).
    pub fn forget_edge(&self, src: &NodeId, dst: &NodeId) {
        let labels = [src.as_str(), dst.as_str()];
        let _ = self.owl_latency_ms.remove_label_values(&labels);
        let _ = self.owl_jitter_ms.remove_label_values(&labels);
        let _ = self.owl_loss_percent.remove_label_values(&labels);
        let _ = self.owl_min_latency_ms.remove_label_values(&labels);
    }

    pub fn count_decode_error(&self, kind: &str) {
        self.decode_errors.with_label_values(&[kind]).inc();
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::new();
    let metrics = Arc::new(Metrics::new(&registry)?);
    Ok((metrics, registry))
}
