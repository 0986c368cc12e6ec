//! Directed weighted graph of the mesh. Locally measured edges arrive from
//! the receive task; remote edges arrive via TOPOLOGY_UPDATE gossip. A
//! single generation counter coordinates snapshots and recompute triggers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::config::TimingConfig;
use crate::measure::EdgeMetrics;
use crate::types::NodeId;

/// Path-computation weight: latency plus 10 ms of penalty per 1% loss.
/// Latency is clamped at zero so clock skew cannot produce negative weights.
pub fn edge_weight(metrics: &EdgeMetrics) -> f64 {
    metrics.latency_ms.max(0.0) + 10.0 * metrics.loss_ratio * 100.0
}

/// One edge as carried inside a TOPOLOGY_UPDATE TLV. Freshness travels as a
/// relative age so the receiver never depends on the sender's wall clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipEdge {
    pub src: String,
    pub dst: String,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_ratio: f64,
    pub min_latency_ms: f64,
    pub age_ms: u64,
}

impl GossipEdge {
    pub fn from_metrics(src: &NodeId, dst: &NodeId, m: &EdgeMetrics, now_ns: u64) -> Self {
        Self {
            src: src.as_str().to_owned(),
            dst: dst.as_str().to_owned(),
            latency_ms: m.latency_ms,
            jitter_ms: m.jitter_ms,
            loss_ratio: m.loss_ratio,
            min_latency_ms: m.min_latency_ms,
            age_ms: now_ns.saturating_sub(m.last_updated_ns) / 1_000_000,
        }
    }

    pub fn to_metrics(&self, now_ns: u64) -> EdgeMetrics {
        EdgeMetrics {
            latency_ms: self.latency_ms,
            jitter_ms: self.jitter_ms,
            loss_ratio: self.loss_ratio,
            min_latency_ms: self.min_latency_ms,
            last_updated_ns: now_ns.saturating_sub(self.age_ms * 1_000_000),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashSet<NodeId>,
    edges: HashMap<(NodeId, NodeId), EdgeMetrics>,
}

pub struct TopologyStore {
    local: NodeId,
    timing: TimingConfig,
    inner: RwLock<Inner>,
    generation: AtomicU64,
    changed: watch::Sender<u64>,
}

/// Consistent read-only view taken at the start of a routing pass or an
/// admin read. Later mutations affect the next snapshot, not this one.
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    pub generation: u64,
    pub nodes: Vec<NodeId>,
    pub edges: HashMap<(NodeId, NodeId), EdgeMetrics>,
}

impl TopologyStore {
    pub fn new(local: NodeId, timing: TimingConfig) -> Self {
        let (changed, _) = watch::channel(0);
        let store = Self {
            local: local.clone(),
            timing,
            inner: RwLock::new(Inner::default()),
            generation: AtomicU64::new(0),
            changed,
        };
        store
            .inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .nodes
            .insert(local);
        store
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Recompute trigger: fires on every structural mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    fn bump_generation(&self) {
        let gen = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.changed.send_replace(gen);
    }

    pub fn upsert_node(&self, id: NodeId) {
        let added = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.nodes.insert(id)
        };
        if added {
            self.bump_generation();
        }
    }

    /// Remove a node and every edge touching it (admin peer removal).
    pub fn remove_node(&self, id: &NodeId) {
        let changed = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let had_node = inner.nodes.remove(id);
            let before = inner.edges.len();
            inner.edges.retain(|(src, dst), _| src != id && dst != id);
            had_node || inner.edges.len() != before
        };
        if changed {
            self.bump_generation();
        }
    }

    /// Insert or refresh a directed edge. Endpoints become known nodes.
    pub fn upsert_edge(&self, src: NodeId, dst: NodeId, metrics: EdgeMetrics) {
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.nodes.insert(src.clone());
            inner.nodes.insert(dst.clone());
            inner.edges.insert((src, dst), metrics);
        }
        // Default recompute delta is "any change".
        self.bump_generation();
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        TopologySnapshot {
            generation: self.generation(),
            nodes: inner.nodes.iter().cloned().collect(),
            edges: inner.edges.clone(),
        }
    }

    /// Evict edges past the retention horizon, then drop nodes that have no
    /// edges left and are neither local nor in `keep` (registered peers).
    /// Returns the evicted edge keys so callers can retire their metric
    /// series.
    pub fn prune(&self, now_ns: u64, keep: &HashSet<NodeId>) -> Vec<(NodeId, NodeId)> {
        let evict_ns = self.timing.edge_evict_ms * 1_000_000;
        let (evicted, changed) = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let mut evicted = Vec::new();
            inner.edges.retain(|pair, m| {
                let fresh = now_ns.saturating_sub(m.last_updated_ns) < evict_ns;
                if !fresh {
                    evicted.push(pair.clone());
                }
                fresh
            });

            let mut referenced: HashSet<NodeId> = HashSet::new();
            for (src, dst) in inner.edges.keys() {
                referenced.insert(src.clone());
                referenced.insert(dst.clone());
            }
            let local = self.local.clone();
            let nodes_before = inner.nodes.len();
            inner
                .nodes
                .retain(|n| *n == local || keep.contains(n) || referenced.contains(n));
            let changed = !evicted.is_empty() || nodes_before != inner.nodes.len();
            (evicted, changed)
        };
        if changed {
            debug!("topology pruned");
            self.bump_generation();
        }
        evicted
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }
}

impl TopologySnapshot {
    /// Adjacency over the usable edge set: fresh within the horizon and not
    /// past the loss cutoff. Unusable edges stay visible in the snapshot for
    /// observability but never reach path search.
    pub fn usable_adjacency(
        &self,
        now_ns: u64,
        timing: &TimingConfig,
    ) -> HashMap<NodeId, Vec<(NodeId, f64)>> {
        let fresh_ns = timing.edge_fresh_ms * 1_000_000;
        let node_set: HashSet<&NodeId> = self.nodes.iter().collect();
        let mut adjacency: HashMap<NodeId, Vec<(NodeId, f64)>> = HashMap::new();
        for ((src, dst), metrics) in &self.edges {
            if !node_set.contains(src) || !node_set.contains(dst) {
                // An edge must never reference an absent node.
                debug_assert!(false, "edge {src}->{dst} references an absent node");
                error!(%src, %dst, "dropping edge referencing an absent node");
                continue;
            }
            if metrics.loss_ratio > timing.max_usable_loss {
                continue;
            }
            if now_ns.saturating_sub(metrics.last_updated_ns) >= fresh_ns {
                continue;
            }
            adjacency
                .entry(src.clone())
                .or_default()
                .push((dst.clone(), edge_weight(metrics)));
        }
        adjacency
    }

    pub fn knows_node(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| n == id)
    }

    /// Metrics of the directed edge (src, dst), if present.
    pub fn edge(&self, src: &NodeId, dst: &NodeId) -> Option<&EdgeMetrics> {
        self.edges.get(&(src.clone(), dst.clone()))
    }
}
