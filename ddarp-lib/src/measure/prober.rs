use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::measure::{encode_probe, ProbePayload};
use crate::peers::PeerRegistry;
use crate::telemetry::Metrics;
use crate::types::{wall_now_ns, Liveness, NodeId};

const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-peer probe emitter. Dead peers are skipped; they come back either
/// through admin action or by probing us first (receipt promotes them to
/// alive, and emission resumes on the next tick).
pub struct Prober {
    local: NodeId,
    socket: Arc<UdpSocket>,
    registry: Arc<PeerRegistry>,
    metrics: Arc<Metrics>,
    interval: Duration,
    monotonic_base: Instant,
    sequences: HashMap<NodeId, u64>,
}

impl Prober {
    pub fn new(
        local: NodeId,
        socket: Arc<UdpSocket>,
        registry: Arc<PeerRegistry>,
        metrics: Arc<Metrics>,
        interval_ms: u64,
    ) -> Self {
        Self {
            local,
            socket,
            registry,
            metrics,
            interval: Duration::from_millis(interval_ms),
            monotonic_base: Instant::now(),
            sequences: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("prober stopped");
    }

    async fn tick(&mut self) {
        let peers = self.registry.snapshot();
        for (node_id, peer) in peers.iter() {
            if peer.liveness() == Liveness::Dead {
                continue;
            }
            let seq = self
                .sequences
                .entry(node_id.clone())
                .and_modify(|s| *s += 1)
                .or_insert(1);
            let payload = ProbePayload {
                src: self.local.as_str().to_owned(),
                dst: node_id.as_str().to_owned(),
                seq: *seq,
                send_ts_monotonic_ns: self.monotonic_base.elapsed().as_nanos() as u64,
                send_ts_wall_ns: wall_now_ns(),
            };
            let datagram = match encode_probe(&payload, peer.shared_secret()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(peer = %node_id, %err, "probe encode failed");
                    continue;
                }
            };
            let send = tokio::time::timeout(
                SEND_TIMEOUT,
                self.socket.send_to(&datagram, peer.address),
            )
            .await;
            match send {
                Ok(Ok(_)) => {
                    self.metrics
                        .probe_sent
                        .with_label_values(&[node_id.as_str()])
                        .inc();
                }
                Ok(Err(err)) => {
                    // Transient: retried at the next tick.
                    warn!(peer = %node_id, %err, "probe send failed");
                    self.metrics
                        .probe_send_fail
                        .with_label_values(&[node_id.as_str()])
                        .inc();
                }
                Err(_) => {
                    warn!(peer = %node_id, "probe send timed out");
                    self.metrics
                        .probe_send_fail
                        .with_label_values(&[node_id.as_str()])
                        .inc();
                }
            }
        }
    }
}
