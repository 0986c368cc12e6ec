use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;

use crate::config::TimingConfig;
use crate::routing::dijkstra::ComputedPath;
use crate::types::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub destination: NodeId,
    pub next_hop: NodeId,
    /// Full path, local node first, destination last.
    pub path: Vec<NodeId>,
    pub total_cost: f64,
    pub computed_at: Instant,
    pub computed_at_wall_ns: u64,
}

/// The routing table is replaced wholesale at the end of each pass; readers
/// hold either the old or the new table, never a partial one.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub entries: HashMap<NodeId, RouteEntry>,
    /// Incremented once per installed pass.
    pub revision: u64,
    /// Topology generation the pass was computed from.
    pub topology_generation: u64,
}

impl RoutingTable {
    pub fn lookup(&self, destination: &NodeId) -> Option<&RouteEntry> {
        self.entries.get(destination)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What an install pass did, for logging and the route-change counter.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    /// New destinations or materially changed routes.
    pub changed: usize,
    /// Destinations kept on their previous route by hysteresis.
    pub retained: usize,
    /// Same route re-stamped because it passed the refresh age.
    pub refreshed: usize,
    /// Destinations that disappeared from the table.
    pub evicted: usize,
}

/// Fold a fresh Dijkstra result over the previous table under the damping
/// rules: an installed route survives unless it vanished, aged past the
/// refresh horizon, or is beaten by the configured improvement margin.
pub fn install(
    previous: &RoutingTable,
    fresh: HashMap<NodeId, ComputedPath>,
    topology_generation: u64,
    now: Instant,
    now_wall_ns: u64,
    timing: &TimingConfig,
) -> (RoutingTable, InstallOutcome) {
    let mut outcome = InstallOutcome::default();
    let mut entries = HashMap::with_capacity(fresh.len());

    for (destination, computed) in fresh {
        let entry = match previous.entries.get(&destination) {
            None => {
                outcome.changed += 1;
                new_entry(destination.clone(), computed, now, now_wall_ns)
            }
            Some(existing) => {
                let age_ms = now
                    .saturating_duration_since(existing.computed_at)
                    .as_millis() as u64;
                let expired = age_ms >= timing.route_expire_ms;
                let beats_hysteresis =
                    computed.cost < timing.improvement_ratio * existing.total_cost;
                let needs_refresh = age_ms >= timing.route_refresh_ms;

                if expired || beats_hysteresis {
                    outcome.changed += 1;
                    new_entry(destination.clone(), computed, now, now_wall_ns)
                } else if needs_refresh {
                    let materially_same = existing.path == computed.path;
                    if materially_same {
                        outcome.refreshed += 1;
                    } else {
                        outcome.changed += 1;
                    }
                    new_entry(destination.clone(), computed, now, now_wall_ns)
                } else {
                    outcome.retained += 1;
                    existing.clone()
                }
            }
        };
        entries.insert(destination, entry);
    }

    // Anything not present in the fresh result is evicted.
    for destination in previous.entries.keys() {
        if !entries.contains_key(destination) {
            outcome.evicted += 1;
        }
    }

    (
        RoutingTable {
            entries,
            revision: previous.revision + 1,
            topology_generation,
        },
        outcome,
    )
}

fn new_entry(
    destination: NodeId,
    computed: ComputedPath,
    now: Instant,
    now_wall_ns: u64,
) -> RouteEntry {
    RouteEntry {
        destination,
        next_hop: computed.next_hop,
        path: computed.path,
        total_cost: computed.cost,
        computed_at: now,
        computed_at_wall_ns: now_wall_ns,
    }
}

/// Atomically swapped handle to the current table.
#[derive(Default)]
pub struct RoutingTableHandle {
    current: ArcSwap<RoutingTable>,
}

impl RoutingTableHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<RoutingTable> {
        self.current.load_full()
    }

    pub fn store(&self, table: Arc<RoutingTable>) {
        self.current.store(table);
    }
}
