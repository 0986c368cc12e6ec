//! Composite node: owns every subsystem, wires them together, and drives
//! lifecycle. Subsystems communicate through shared handles and channels,
//! never through globals.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus::Registry;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{DdarpError, Result};
use crate::measure::{Prober, Receiver, WindowTable};
use crate::peers::PeerRegistry;
use crate::routing::{RoutingEngine, RoutingTableHandle};
use crate::sink::{
    DecisionSink, LoggingAdvertiser, LoggingTunnelManager, RouteAdvertiser, TunnelManager,
};
use crate::telemetry::{init_metrics, start_admin_server, AdminState, Metrics};
use crate::topology::{GossipEdge, TopologyStore};
use crate::types::{wall_now_ns, Liveness, NodeId};
use crate::wire::{Packet, PacketHeader, Tlv};

/// How long in-flight receives get to drain after the stop signal.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

pub struct Node {
    config: Arc<Config>,
    local: NodeId,
    registry: Arc<PeerRegistry>,
    windows: Arc<WindowTable>,
    topology: Arc<TopologyStore>,
    table: Arc<RoutingTableHandle>,
    metrics: Arc<Metrics>,
    prom: Registry,
    socket: Arc<UdpSocket>,
    admin_listener: TcpListener,
    advertiser: Arc<dyn RouteAdvertiser>,
    tunnels: Arc<dyn TunnelManager>,
    started: Instant,
    started_at_unix: u64,
}

impl Node {
    /// Bind sockets and assemble the subsystems. A bind failure here is
    /// fatal; nothing has been spawned yet.
    pub async fn bind(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let local = NodeId::from(config.node_id.as_str());

        let socket = UdpSocket::bind(config.listen).await?;
        let admin_listener = TcpListener::bind(config.admin_listen).await?;
        let (metrics, prom) =
            init_metrics().map_err(|e| DdarpError::Telemetry(e.to_string()))?;

        let registry = Arc::new(PeerRegistry::new());
        let topology = Arc::new(TopologyStore::new(local.clone(), config.timing.clone()));
        for peer in &config.peers {
            let id = NodeId::from(peer.node_id.as_str());
            registry.add_peer(
                id.clone(),
                peer.address,
                peer.shared_secret.clone().into_bytes(),
                peer.kind,
            );
            topology.upsert_node(id);
        }
        metrics.peer_count.set(registry.len() as i64);
        metrics
            .node_health
            .with_label_values(&[local.as_str()])
            .set(1);

        info!(
            node_id = %local,
            listen = %config.listen,
            admin = %config.admin_listen,
            peers = config.peers.len(),
            "node assembled"
        );

        Ok(Self {
            config,
            local,
            registry,
            windows: Arc::new(WindowTable::new()),
            topology,
            table: Arc::new(RoutingTableHandle::new()),
            metrics,
            prom,
            socket: Arc::new(socket),
            admin_listener,
            advertiser: Arc::new(LoggingAdvertiser::default()),
            tunnels: Arc::new(LoggingTunnelManager),
            started: Instant::now(),
            started_at_unix: wall_now_ns() / 1_000_000_000,
        })
    }

    /// Swap in real data-plane adapters before `run`.
    pub fn with_adapters(
        mut self,
        advertiser: Arc<dyn RouteAdvertiser>,
        tunnels: Arc<dyn TunnelManager>,
    ) -> Self {
        self.advertiser = advertiser;
        self.tunnels = tunnels;
        self
    }

    /// Bound probe socket address (useful when configured with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn admin_addr(&self) -> Result<SocketAddr> {
        Ok(self.admin_listener.local_addr()?)
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<()> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = tx.send(true);
        });
        self.run_with_shutdown(rx).await
    }

    /// Run until the provided shutdown watch flips to true.
    pub async fn run_with_shutdown(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let Node {
            config,
            local,
            registry,
            windows,
            topology,
            table,
            metrics,
            prom,
            socket,
            admin_listener,
            advertiser,
            tunnels,
            started,
            started_at_unix,
        } = self;

        let receiver = Receiver::new(
            local.clone(),
            socket.clone(),
            registry.clone(),
            windows.clone(),
            topology.clone(),
            metrics.clone(),
        );
        let recv_task = tokio::spawn(receiver.run(shutdown.clone()));

        let prober = Prober::new(
            local.clone(),
            socket.clone(),
            registry.clone(),
            metrics.clone(),
            config.probe_interval_ms,
        );
        let probe_task = tokio::spawn(prober.run(shutdown.clone()));

        let gossip_task = tokio::spawn(gossip_loop(
            local.clone(),
            socket.clone(),
            registry.clone(),
            windows.clone(),
            config.gossip_interval_ms,
            shutdown.clone(),
        ));

        let housekeeping_task = tokio::spawn(housekeeping_loop(
            local.clone(),
            registry.clone(),
            topology.clone(),
            table.clone(),
            metrics.clone(),
            config.clone(),
            shutdown.clone(),
        ));

        let sink = DecisionSink::new(local.clone(), config.timing.clone(), advertiser, tunnels);
        let engine = RoutingEngine::new(
            local.clone(),
            config.clone(),
            topology.clone(),
            registry.clone(),
            table.clone(),
            sink,
            metrics.clone(),
        );
        let engine_task = tokio::spawn(engine.run(shutdown.clone()));

        let admin_state = Arc::new(AdminState {
            config: config.clone(),
            local: local.clone(),
            kind: config.kind,
            started,
            started_at_unix,
            registry,
            windows,
            topology,
            table,
            metrics,
            prom,
        });
        let admin_task = tokio::spawn(start_admin_server(
            admin_listener,
            admin_state,
            shutdown.clone(),
        ));

        // Park until the stop signal.
        let mut stop = shutdown.clone();
        while !*stop.borrow() {
            if stop.changed().await.is_err() {
                break;
            }
        }

        // New work stops first: emitters, recompute, admin.
        for task in [
            probe_task,
            gossip_task,
            housekeeping_task,
            engine_task,
            admin_task,
        ] {
            let _ = task.await;
        }

        // Then the receiver drains with a bounded grace.
        let recv_abort = recv_task.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, recv_task).await.is_err() {
            warn!("receiver did not drain within grace; aborting");
            recv_abort.abort();
        }

        info!(node_id = %local, "node stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}

/// Share locally measured edges with every non-dead peer so each node can
/// run Dijkstra over the full mesh, not just its incoming edges.
async fn gossip_loop(
    local: NodeId,
    socket: Arc<UdpSocket>,
    registry: Arc<PeerRegistry>,
    windows: Arc<WindowTable>,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut sequence: u32 = 0;
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let now_ns = wall_now_ns();
                let measured = windows.snapshot_metrics();
                if measured.is_empty() {
                    continue;
                }
                let edges: Vec<GossipEdge> = measured
                    .iter()
                    .map(|((src, dst), m)| GossipEdge::from_metrics(src, dst, m, now_ns))
                    .collect();
                let edge_count = edges.len();
                sequence = sequence.wrapping_add(1);
                let packet = Packet::new(
                    PacketHeader {
                        flags: 0,
                        tunnel_id: 0,
                        sequence,
                        timestamp: (now_ns / 1_000_000_000) as u32,
                    },
                    vec![Tlv::TopologyUpdate(serde_json::json!({ "edges": edges }))],
                );
                let bytes = match packet.encode() {
                    Ok(b) => b,
                    Err(err) => {
                        debug!(%err, "gossip encode failed");
                        continue;
                    }
                };
                for peer in registry.snapshot().values() {
                    if peer.liveness() == Liveness::Dead {
                        continue;
                    }
                    if let Err(err) = socket.send_to(&bytes, peer.address).await {
                        debug!(peer = %peer.node_id, %err, "gossip send failed");
                    }
                }
                debug!(node = %local, edges = edge_count, "gossiped measured edges");
            }
        }
    }
}

/// 1 Hz housekeeping: liveness sweep, topology pruning, gauge refresh.
async fn housekeeping_loop(
    local: NodeId,
    registry: Arc<PeerRegistry>,
    topology: Arc<TopologyStore>,
    table: Arc<RoutingTableHandle>,
    metrics: Arc<Metrics>,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let now_ns = wall_now_ns();

                let transitions = registry.sweep_liveness(
                    now_ns,
                    config.timing.suspect_after_ms,
                    config.timing.dead_after_ms,
                );
                for (peer, from, to) in &transitions {
                    info!(%peer, from = from.as_str(), to = to.as_str(), "peer liveness changed");
                }

                let keep: HashSet<NodeId> = registry.snapshot().keys().cloned().collect();
                for (src, dst) in topology.prune(now_ns, &keep) {
                    metrics.forget_edge(&src, &dst);
                }

                let snapshot = topology.snapshot();
                metrics.peer_count.set(registry.len() as i64);
                metrics.topology_nodes.set(snapshot.nodes.len() as i64);
                metrics.topology_edges.set(snapshot.edges.len() as i64);

                let peers = registry.snapshot();
                let any_dead = peers.values().any(|p| p.liveness() == Liveness::Dead);
                let degraded = any_dead || (!peers.is_empty() && table.load().is_empty());
                metrics
                    .node_health
                    .with_label_values(&[local.as_str()])
                    .set(i64::from(!degraded));
            }
        }
    }
}
