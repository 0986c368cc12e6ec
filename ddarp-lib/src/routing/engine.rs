use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::peers::PeerRegistry;
use crate::routing::dijkstra::shortest_paths;
use crate::routing::table::{install, RoutingTableHandle};
use crate::sink::DecisionSink;
use crate::telemetry::Metrics;
use crate::topology::TopologyStore;
use crate::types::{wall_now_ns, NodeId};

/// Periodic Dijkstra driver. One pass is in flight at a time: passes run on
/// this task only, triggered by the recompute interval or by a topology
/// generation change, whichever comes first. The sink runs synchronously at
/// the end of each pass, so deltas for successive table revisions never
/// interleave.
pub struct RoutingEngine {
    local: NodeId,
    config: Arc<Config>,
    topology: Arc<TopologyStore>,
    registry: Arc<PeerRegistry>,
    table: Arc<RoutingTableHandle>,
    sink: DecisionSink,
    metrics: Arc<Metrics>,
}

impl RoutingEngine {
    pub fn new(
        local: NodeId,
        config: Arc<Config>,
        topology: Arc<TopologyStore>,
        registry: Arc<PeerRegistry>,
        table: Arc<RoutingTableHandle>,
        sink: DecisionSink,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            local,
            config,
            topology,
            registry,
            table,
            sink,
            metrics,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut generation_rx = self.topology.subscribe();
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.recompute_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.pass();
                }
                changed = generation_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.pass();
                }
            }
        }
        info!("routing engine stopped");
    }

    /// One full recompute-install-sink cycle over a consistent snapshot.
    pub fn pass(&mut self) {
        let started = Instant::now();
        let now_wall_ns = wall_now_ns();
        let snapshot = self.topology.snapshot();
        let adjacency = snapshot.usable_adjacency(now_wall_ns, self.topology.timing());
        let fresh = shortest_paths(&self.local, &adjacency);

        let previous = self.table.load();
        let (next, outcome) = install(
            &previous,
            fresh,
            snapshot.generation,
            started,
            now_wall_ns,
            self.topology.timing(),
        );

        self.metrics.routing_table_size.set(next.len() as i64);
        if outcome.changed > 0 {
            self.metrics.route_changes.inc_by(outcome.changed as u64);
            info!(
                revision = next.revision,
                generation = next.topology_generation,
                changed = outcome.changed,
                retained = outcome.retained,
                evicted = outcome.evicted,
                "routing table updated"
            );
        } else {
            debug!(
                revision = next.revision,
                retained = outcome.retained,
                refreshed = outcome.refreshed,
                "routing pass left the table stable"
            );
        }

        let next = Arc::new(next);
        self.table.store(next.clone());

        let peers = self.registry.snapshot();
        let decisions = self.sink.apply(&next, &snapshot, &peers);
        if !decisions.is_empty() {
            debug!(count = decisions.len(), "path decisions dispatched");
        }

        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(self.config.recompute_interval_ms) {
            warn!(?elapsed, "routing pass overran its interval");
        }
    }
}
