use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::types::NodeId;

/// Most recent samples retained per ordered pair.
pub const WINDOW_CAPACITY: usize = 100;

/// An edge exists only once its window holds this many samples.
pub const MIN_SAMPLES: usize = 3;

/// One received probe, reduced to what the statistics need.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSample {
    pub seq: u64,
    /// One-way latency; may be negative under clock skew.
    pub latency_ms: f64,
    pub recv_wall_ns: u64,
}

/// Metrics derived from a window for one ordered pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeMetrics {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_ratio: f64,
    /// Window minimum; negative values are the operator's clock-skew signal.
    pub min_latency_ms: f64,
    pub last_updated_ns: u64,
}

/// Insertion-ordered ring of the most recent `WINDOW_CAPACITY` samples for
/// one ordered pair. Out-of-order arrivals are accepted; loss is the gap
/// between the sequence span and the number of samples seen.
#[derive(Debug, Default)]
pub struct SampleWindow {
    samples: VecDeque<ProbeSample>,
}

impl SampleWindow {
    pub fn insert(&mut self, sample: ProbeSample) {
        if self.samples.len() == WINDOW_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Recompute the derived metrics. `None` while the window holds fewer
    /// than `MIN_SAMPLES` samples: the edge does not exist yet.
    pub fn metrics(&self) -> Option<EdgeMetrics> {
        if self.samples.len() < MIN_SAMPLES {
            return None;
        }
        let n = self.samples.len() as f64;
        let mut sum = 0.0;
        let mut min_latency = f64::INFINITY;
        let mut min_seq = u64::MAX;
        let mut max_seq = 0u64;
        let mut last_updated_ns = 0u64;
        for s in &self.samples {
            sum += s.latency_ms;
            min_latency = min_latency.min(s.latency_ms);
            min_seq = min_seq.min(s.seq);
            max_seq = max_seq.max(s.seq);
            last_updated_ns = last_updated_ns.max(s.recv_wall_ns);
        }
        let mean = sum / n;

        // Corrected sample standard deviation.
        let var: f64 = self
            .samples
            .iter()
            .map(|s| (s.latency_ms - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        let jitter = var.max(0.0).sqrt();

        let expected = (max_seq - min_seq + 1) as f64;
        let loss = (1.0 - n / expected).clamp(0.0, 1.0);

        Some(EdgeMetrics {
            latency_ms: mean,
            jitter_ms: jitter,
            loss_ratio: loss,
            min_latency_ms: min_latency,
            last_updated_ns,
        })
    }
}

/// All sample windows held by this node, keyed by ordered pair. One writer
/// (the receive task); the routing pass snapshots derived metrics under a
/// short lock.
#[derive(Debug, Default)]
pub struct WindowTable {
    inner: Mutex<HashMap<(NodeId, NodeId), SampleWindow>>,
}

impl WindowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sample and return the freshly derived metrics, if the edge
    /// exists yet.
    pub fn record(&self, src: &NodeId, dst: &NodeId, sample: ProbeSample) -> Option<EdgeMetrics> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let window = inner
            .entry((src.clone(), dst.clone()))
            .or_default();
        window.insert(sample);
        window.metrics()
    }

    /// Drop every window involving `node` (peer removal).
    pub fn remove_involving(&self, node: &NodeId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.retain(|(src, dst), _| src != node && dst != node);
    }

    /// Derived metrics for every pair that currently forms an edge.
    pub fn snapshot_metrics(&self) -> Vec<((NodeId, NodeId), EdgeMetrics)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .iter()
            .filter_map(|(pair, w)| w.metrics().map(|m| (pair.clone(), m)))
            .collect()
    }
}
