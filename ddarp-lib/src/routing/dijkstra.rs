use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::types::NodeId;

/// One destination's result from a single-source pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedPath {
    pub next_hop: NodeId,
    /// Full path, origin first, destination last.
    pub path: Vec<NodeId>,
    pub cost: f64,
}

/// Heap entry ordered so the cheapest cost pops first; on equal cost the
/// lexicographically smaller next hop wins, then the node id. This ordering,
/// mirrored in the relaxation rule, makes the result independent of map
/// iteration order: equal-metric alternatives cannot flap between passes.
#[derive(Debug, PartialEq)]
struct Candidate {
    cost: f64,
    next_hop: Option<NodeId>,
    node: NodeId,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.next_hop.cmp(&self.next_hop))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Best {
    cost: f64,
    next_hop: Option<NodeId>,
    prev: Option<NodeId>,
}

fn improves(cost: f64, next_hop: &Option<NodeId>, prev: &NodeId, best: &Best) -> bool {
    match cost.total_cmp(&best.cost) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => match next_hop.cmp(&best.next_hop) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => Some(prev) < best.prev.as_ref(),
        },
    }
}

/// Single-source shortest paths over `adjacency` with a binary-heap queue.
/// Returns every reachable destination except the origin itself.
pub fn shortest_paths(
    origin: &NodeId,
    adjacency: &HashMap<NodeId, Vec<(NodeId, f64)>>,
) -> HashMap<NodeId, ComputedPath> {
    let mut best: HashMap<NodeId, Best> = HashMap::new();
    let mut settled: HashSet<NodeId> = HashSet::new();
    let mut heap = BinaryHeap::new();

    best.insert(
        origin.clone(),
        Best {
            cost: 0.0,
            next_hop: None,
            prev: None,
        },
    );
    heap.push(Candidate {
        cost: 0.0,
        next_hop: None,
        node: origin.clone(),
    });

    while let Some(Candidate { cost, node, .. }) = heap.pop() {
        if settled.contains(&node) {
            continue;
        }
        settled.insert(node.clone());

        let Some(neighbors) = adjacency.get(&node) else {
            continue;
        };
        for (neighbor, weight) in neighbors {
            debug_assert!(*weight >= 0.0, "negative edge weight {weight}");
            if settled.contains(neighbor) {
                continue;
            }
            let candidate_cost = cost + weight;
            // The next hop propagates from the origin's first edge.
            let candidate_next_hop = if node == *origin {
                Some(neighbor.clone())
            } else {
                best.get(&node).and_then(|b| b.next_hop.clone())
            };
            let replace = match best.get(neighbor) {
                None => true,
                Some(existing) => improves(candidate_cost, &candidate_next_hop, &node, existing),
            };
            if replace {
                best.insert(
                    neighbor.clone(),
                    Best {
                        cost: candidate_cost,
                        next_hop: candidate_next_hop.clone(),
                        prev: Some(node.clone()),
                    },
                );
                heap.push(Candidate {
                    cost: candidate_cost,
                    next_hop: candidate_next_hop,
                    node: neighbor.clone(),
                });
            }
        }
    }

    let mut result = HashMap::new();
    for (node, entry) in &best {
        if node == origin {
            continue;
        }
        let Some(next_hop) = entry.next_hop.clone() else {
            continue;
        };
        // Walk the predecessor chain back to the origin.
        let mut path = vec![node.clone()];
        let mut cursor = entry.prev.clone();
        while let Some(prev) = cursor {
            path.push(prev.clone());
            if prev == *origin {
                break;
            }
            cursor = best.get(&prev).and_then(|b| b.prev.clone());
        }
        path.reverse();
        result.insert(
            node.clone(),
            ComputedPath {
                next_hop,
                path,
                cost: entry.cost,
            },
        );
    }
    result
}
