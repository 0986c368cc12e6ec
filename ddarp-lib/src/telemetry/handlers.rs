use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{DdarpError, Result};
use crate::measure::WindowTable;
use crate::peers::{AddOutcome, PeerRegistry};
use crate::routing::RoutingTableHandle;
use crate::telemetry::Metrics;
use crate::topology::TopologyStore;
use crate::types::{Liveness, NodeId, PeerKind};

type RespBody = BoxBody<Bytes, hyper::Error>;

/// Default probe port assumed when an admin add names a bare IP.
const DEFAULT_PROBE_PORT: u16 = 8080;

/// Everything the admin surface reads. All fields are snapshot-friendly:
/// handlers never block the probe or routing paths.
pub struct AdminState {
    pub config: Arc<Config>,
    pub local: NodeId,
    pub kind: PeerKind,
    pub started: Instant,
    pub started_at_unix: u64,
    pub registry: Arc<PeerRegistry>,
    pub windows: Arc<WindowTable>,
    pub topology: Arc<TopologyStore>,
    pub table: Arc<RoutingTableHandle>,
    pub metrics: Arc<Metrics>,
    pub prom: Registry,
}

pub async fn handle(state: Arc<AdminState>, req: Request<Incoming>) -> Result<Response<RespBody>> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    match (method.as_str(), path.as_str()) {
        ("GET", "/health") => health(&state),
        ("GET", "/node_info") => node_info(&state),
        ("GET", "/metrics/owl") => owl_matrix(&state),
        ("GET", "/topology") => topology_view(&state),
        ("GET", "/routing_table") => routing_table(&state),
        ("GET", "/metrics") => metrics_exposition(&state),
        ("GET", "/peers") => list_peers(&state),
        ("POST", "/peers") => add_peer(&state, req).await,
        ("GET", p) if p.strip_prefix("/path/").is_some_and(|d| !d.is_empty()) => {
            path_lookup(&state, &p["/path/".len()..])
        }
        ("DELETE", p) if p.strip_prefix("/peers/").is_some_and(|d| !d.is_empty()) => {
            remove_peer(&state, &p["/peers/".len()..])
        }
        (_, "/health" | "/node_info" | "/metrics/owl" | "/topology" | "/routing_table"
            | "/metrics" | "/peers") => {
            json_response(StatusCode::METHOD_NOT_ALLOWED, &json!({"error": "method not allowed"}))
        }
        _ => json_response(StatusCode::NOT_FOUND, &json!({"error": "not found"})),
    }
}

fn health(state: &AdminState) -> Result<Response<RespBody>> {
    let peers = state.registry.snapshot();
    let any_dead = peers.values().any(|p| p.liveness() == Liveness::Dead);
    let table_empty = state.table.load().is_empty();
    let degraded = any_dead || (!peers.is_empty() && table_empty);
    let body = json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "node_id": state.local,
        "peer_count": peers.len(),
        "uptime_s": state.started.elapsed().as_secs(),
    });
    json_response(StatusCode::OK, &body)
}

fn node_info(state: &AdminState) -> Result<Response<RespBody>> {
    let body = json!({
        "node_id": state.local,
        "kind": state.kind.as_str(),
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at_unix,
    });
    json_response(StatusCode::OK, &body)
}

fn owl_matrix(state: &AdminState) -> Result<Response<RespBody>> {
    let snapshot = state.topology.snapshot();
    let mut matrix = serde_json::Map::new();
    for ((src, dst), m) in &snapshot.edges {
        let row = matrix
            .entry(src.as_str().to_owned())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(row) = row {
            row.insert(
                dst.as_str().to_owned(),
                json!({
                    "latency_ms": m.latency_ms,
                    "jitter_ms": m.jitter_ms,
                    "loss_ratio": m.loss_ratio,
                    "last_updated": m.last_updated_ns as f64 / 1e9,
                }),
            );
        }
    }
    json_response(StatusCode::OK, &json!({ "metrics_matrix": matrix }))
}

fn topology_view(state: &AdminState) -> Result<Response<RespBody>> {
    let snapshot = state.topology.snapshot();
    let peers = state.registry.snapshot();

    let mut nodes: Vec<Value> = Vec::with_capacity(snapshot.nodes.len());
    let mut sorted_nodes = snapshot.nodes.clone();
    sorted_nodes.sort();
    for node in &sorted_nodes {
        let (liveness, last_heard) = if *node == state.local {
            (Liveness::Alive, None)
        } else {
            match peers.get(node) {
                Some(p) => (p.liveness(), p.last_heard_ns()),
                None => (Liveness::Unknown, None),
            }
        };
        nodes.push(json!({
            "node_id": node,
            "liveness": liveness.as_str(),
            "last_heard": last_heard.map(|ns| ns as f64 / 1e9),
        }));
    }

    let mut edges: Vec<Value> = snapshot
        .edges
        .iter()
        .map(|((src, dst), m)| {
            json!({
                "src": src,
                "dst": dst,
                "weight": crate::topology::edge_weight(m),
                "latency_ms": m.latency_ms,
                "jitter_ms": m.jitter_ms,
                "loss_ratio": m.loss_ratio,
                "last_updated": m.last_updated_ns as f64 / 1e9,
            })
        })
        .collect();
    edges.sort_by(|a, b| {
        (a["src"].as_str(), a["dst"].as_str()).cmp(&(b["src"].as_str(), b["dst"].as_str()))
    });

    let body = json!({
        "generation": snapshot.generation,
        "nodes": nodes,
        "edges": edges,
    });
    json_response(StatusCode::OK, &body)
}

fn routing_table(state: &AdminState) -> Result<Response<RespBody>> {
    let table = state.table.load();
    let mut entries: Vec<Value> = table
        .entries
        .values()
        .map(|e| {
            json!({
                "destination": e.destination,
                "next_hop": e.next_hop,
                "path": e.path,
                "cost": e.total_cost,
                "computed_ts": e.computed_at_wall_ns as f64 / 1e9,
            })
        })
        .collect();
    entries.sort_by(|a, b| a["destination"].as_str().cmp(&b["destination"].as_str()));
    json_response(StatusCode::OK, &json!({ "entries": entries }))
}

fn path_lookup(state: &AdminState, dest: &str) -> Result<Response<RespBody>> {
    let dest_id = NodeId::from(dest);
    if dest_id == state.local {
        return json_response(
            StatusCode::OK,
            &json!({"reachable": true, "path": [state.local], "cost": 0.0}),
        );
    }
    let table = state.table.load();
    if let Some(entry) = table.lookup(&dest_id) {
        return json_response(
            StatusCode::OK,
            &json!({
                "reachable": true,
                "path": entry.path,
                "cost": entry.total_cost,
            }),
        );
    }
    // Unreachable: distinguish a node the mesh has heard of from a name
    // nobody knows.
    let known = state.topology.snapshot().knows_node(&dest_id)
        || state.registry.get(&dest_id).is_some();
    let reason = if known { "no_route" } else { "unknown_destination" };
    json_response(StatusCode::OK, &json!({"reachable": false, "reason": reason}))
}

fn list_peers(state: &AdminState) -> Result<Response<RespBody>> {
    let peers = state.registry.snapshot();
    let mut list: Vec<Value> = peers
        .values()
        .map(|p| {
            json!({
                "peer_id": p.node_id,
                "address": p.address.to_string(),
                "kind": p.kind.as_str(),
                "liveness": p.liveness().as_str(),
                "last_heard": p.last_heard_ns().map(|ns| ns as f64 / 1e9),
            })
        })
        .collect();
    list.sort_by(|a, b| a["peer_id"].as_str().cmp(&b["peer_id"].as_str()));
    json_response(StatusCode::OK, &json!({ "peers": list }))
}

#[derive(Debug, Deserialize)]
struct AddPeerBody {
    peer_id: String,
    peer_ip: String,
    #[serde(default)]
    peer_type: Option<String>,
    #[serde(default)]
    shared_secret: Option<String>,
}

async fn add_peer(
    state: &Arc<AdminState>,
    req: Request<Incoming>,
) -> Result<Response<RespBody>> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| DdarpError::Http(format!("failed to read request body: {e}")))?
        .to_bytes();
    let body: AddPeerBody = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(err) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({"error": format!("invalid body: {err}")}),
            );
        }
    };

    if body.peer_id.is_empty() {
        return bad_field("peer_id");
    }
    if body.peer_id == state.local.as_str() {
        return json_response(
            StatusCode::BAD_REQUEST,
            &json!({"error": "peer_id names the local node"}),
        );
    }
    let address = match parse_peer_address(&body.peer_ip) {
        Some(addr) => addr,
        None => return bad_field("peer_ip"),
    };
    let kind = match body.peer_type.as_deref() {
        None | Some("regular") => PeerKind::Regular,
        Some("border") => PeerKind::Border,
        Some(_) => return bad_field("peer_type"),
    };
    let secret = match body
        .shared_secret
        .or_else(|| state.config.default_shared_secret.clone())
    {
        Some(s) if !s.is_empty() => s,
        _ => return bad_field("shared_secret"),
    };

    let peer_id = NodeId::from(body.peer_id.as_str());
    let outcome = state
        .registry
        .add_peer(peer_id.clone(), address, secret.into_bytes(), kind);
    state.topology.upsert_node(peer_id.clone());
    state.metrics.peer_count.set(state.registry.len() as i64);

    // A duplicate with a different address is still applied (idempotent
    // update) but answered 409 so the caller sees the conflict.
    let (status, updated) = match outcome {
        AddOutcome::Added | AddOutcome::Unchanged => (StatusCode::OK, false),
        AddOutcome::Updated => (StatusCode::CONFLICT, true),
    };
    json_response(status, &json!({"status": "ok", "peer_id": peer_id, "updated": updated}))
}

fn remove_peer(state: &AdminState, peer_id: &str) -> Result<Response<RespBody>> {
    let id = NodeId::from(peer_id);
    match state.registry.remove_peer(&id) {
        Ok(_) => {
            state.windows.remove_involving(&id);
            state.topology.remove_node(&id);
            state.metrics.forget_edge(&id, &state.local);
            state.metrics.forget_edge(&state.local, &id);
            state.metrics.peer_count.set(state.registry.len() as i64);
            json_response(StatusCode::OK, &json!({"status": "ok", "peer_id": id}))
        }
        Err(_) => json_response(StatusCode::NOT_FOUND, &json!({"error": "unknown peer"})),
    }
}

fn metrics_exposition(state: &AdminState) -> Result<Response<RespBody>> {
    let encoder = TextEncoder::new();
    let metric_families = state.prom.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| DdarpError::Http(format!("failed to encode metrics: {e}")))?;

    let body = Full::new(Bytes::from(buffer))
        .map_err(|never| match never {})
        .boxed();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(body)
        .map_err(|e| DdarpError::Http(format!("failed to build response: {e}")))
}

fn parse_peer_address(raw: &str) -> Option<SocketAddr> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr);
    }
    raw.parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, DEFAULT_PROBE_PORT))
}

fn bad_field(field: &str) -> Result<Response<RespBody>> {
    json_response(
        StatusCode::BAD_REQUEST,
        &json!({"error": format!("missing or invalid field: {field}")}),
    )
}

fn json_response(status: StatusCode, body: &Value) -> Result<Response<RespBody>> {
    let body_bytes = serde_json::to_vec(body)
        .map_err(|e| DdarpError::Http(format!("failed to serialize response: {e}")))?;
    let body = Full::new(Bytes::from(body_bytes))
        .map_err(|never| match never {})
        .boxed();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .map_err(|e| DdarpError::Http(format!("failed to build response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_address_accepts_socket_and_bare_ip() {
        assert_eq!(
            parse_peer_address("10.0.0.1:9000"),
            Some("10.0.0.1:9000".parse().unwrap())
        );
        assert_eq!(
            parse_peer_address("10.0.0.1"),
            Some("10.0.0.1:8080".parse().unwrap())
        );
        assert_eq!(parse_peer_address("not-an-ip"), None);
    }
}
