//! In-process end-to-end tests: real nodes over localhost UDP with
//! millisecond-scale timing, exercised through the admin HTTP surface.

use std::net::SocketAddr;
use std::time::Duration;

use ddarp_lib::config::{Config, PeerEntry};
use ddarp_lib::types::PeerKind;
use ddarp_lib::Node;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use tokio::sync::watch;

fn test_config(node_id: &str) -> Config {
    let mut cfg = Config::for_node(node_id);
    cfg.listen = "127.0.0.1:0".parse().unwrap();
    cfg.admin_listen = "127.0.0.1:0".parse().unwrap();
    cfg.probe_interval_ms = 50;
    cfg.recompute_interval_ms = 100;
    cfg.gossip_interval_ms = 100;
    cfg.timing.suspect_after_ms = 600;
    cfg.timing.dead_after_ms = 1800;
    cfg.timing.edge_fresh_ms = 2_000;
    cfg.timing.edge_evict_ms = 5_000;
    cfg
}

struct RunningNode {
    admin: SocketAddr,
    probe: SocketAddr,
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<ddarp_lib::Result<()>>,
}

async fn launch(cfg: Config) -> RunningNode {
    let node = Node::bind(cfg).await.unwrap();
    let admin = node.admin_addr().unwrap();
    let probe = node.local_addr().unwrap();
    let (stop, rx) = watch::channel(false);
    let task = tokio::spawn(node.run_with_shutdown(rx));
    RunningNode {
        admin,
        probe,
        stop,
        task,
    }
}

impl RunningNode {
    async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

type HttpClient = Client<hyper_util::client::legacy::connect::HttpConnector, Full<Bytes>>;

fn client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

async fn get_json(client: &HttpClient, addr: SocketAddr, path: &str) -> (StatusCode, Value) {
    let uri: hyper::Uri = format!("http://{addr}{path}").parse().unwrap();
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .unwrap();
    let resp = client.request(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

async fn get_text(client: &HttpClient, addr: SocketAddr, path: &str) -> String {
    let uri: hyper::Uri = format!("http://{addr}{path}").parse().unwrap();
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .unwrap();
    let resp = client.request(req).await.unwrap();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&body).into_owned()
}

async fn post_json(
    client: &HttpClient,
    addr: SocketAddr,
    path: &str,
    body: Value,
) -> (StatusCode, Value) {
    let uri: hyper::Uri = format!("http://{addr}{path}").parse().unwrap();
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap();
    let resp = client.request(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn delete(client: &HttpClient, addr: SocketAddr, path: &str) -> StatusCode {
    let uri: hyper::Uri = format!("http://{addr}{path}").parse().unwrap();
    let req = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .unwrap();
    client.request(req).await.unwrap().status()
}

/// Poll until the condition holds or the deadline expires.
macro_rules! wait_for {
    ($what:expr, $deadline:expr, $check:expr) => {{
        let start = tokio::time::Instant::now();
        loop {
            let ready = $check;
            if ready {
                break;
            }
            assert!(start.elapsed() < $deadline, "timed out waiting for {}", $what);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }};
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_nodes_measure_and_route_to_each_other() {
    let alpha = launch(test_config("alpha")).await;

    // beta learns alpha from its seed config; alpha learns beta over the
    // admin API below.
    let mut beta_cfg = test_config("beta");
    beta_cfg.peers.push(PeerEntry {
        node_id: "alpha".into(),
        address: alpha.probe,
        shared_secret: "wires".into(),
        kind: PeerKind::Regular,
    });
    let beta = launch(beta_cfg).await;

    let http = client();
    let (status, body) = post_json(
        &http,
        alpha.admin,
        "/peers",
        serde_json::json!({
            "peer_id": "beta",
            "peer_ip": beta.probe.to_string(),
            "peer_type": "regular",
            "shared_secret": "wires",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Probes flow both ways; gossip closes the loop so alpha learns its
    // outgoing edge and routes to beta.
    wait_for!("alpha to route to beta", Duration::from_secs(10), {
        let (_, path) = get_json(&http, alpha.admin, "/path/beta").await;
        path["reachable"] == Value::Bool(true)
    });

    let (_, path) = get_json(&http, alpha.admin, "/path/beta").await;
    assert_eq!(path["path"], serde_json::json!(["alpha", "beta"]));

    let (_, table) = get_json(&http, alpha.admin, "/routing_table").await;
    let entries = table["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["next_hop"], "beta");

    let (_, health) = get_json(&http, alpha.admin, "/health").await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["node_id"], "alpha");
    assert_eq!(health["peer_count"], 1);

    let (_, owl) = get_json(&http, alpha.admin, "/metrics/owl").await;
    assert!(owl["metrics_matrix"]["beta"]["alpha"]["latency_ms"].is_number());

    let (_, info) = get_json(&http, alpha.admin, "/node_info").await;
    assert_eq!(info["node_id"], "alpha");
    assert_eq!(info["kind"], "regular");

    let (_, topo) = get_json(&http, alpha.admin, "/topology").await;
    assert!(topo["generation"].as_u64().unwrap() > 0);
    assert!(!topo["edges"].as_array().unwrap().is_empty());

    let metrics = get_text(&http, alpha.admin, "/metrics").await;
    assert!(metrics.contains("ddarp_probe_recv_total{peer=\"beta\"}"));
    assert!(metrics.contains("ddarp_owl_latency_ms"));
    assert!(metrics.contains("ddarp_routing_table_size 1"));

    alpha.shutdown().await;
    beta.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mismatched_secrets_never_build_an_edge() {
    let alpha = launch(test_config("alpha")).await;

    let mut beta_cfg = test_config("beta");
    beta_cfg.peers.push(PeerEntry {
        node_id: "alpha".into(),
        address: alpha.probe,
        shared_secret: "beta-believes-this".into(),
        kind: PeerKind::Regular,
    });
    let beta = launch(beta_cfg).await;

    let http = client();
    let (status, _) = post_json(
        &http,
        alpha.admin,
        "/peers",
        serde_json::json!({
            "peer_id": "beta",
            "peer_ip": beta.probe.to_string(),
            "shared_secret": "alpha-believes-this",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Give both sides ample time to probe and fail authentication.
    wait_for!("auth failures to accumulate", Duration::from_secs(10), {
        get_text(&http, alpha.admin, "/metrics")
            .await
            .contains("ddarp_probe_auth_fail_total{peer=\"beta\"}")
    });

    let (_, path) = get_json(&http, alpha.admin, "/path/beta").await;
    assert_eq!(path["reachable"], Value::Bool(false));
    let (_, topo) = get_json(&http, alpha.admin, "/topology").await;
    assert!(topo["edges"].as_array().unwrap().is_empty());

    alpha.shutdown().await;
    beta.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peer_lifecycle_over_the_admin_api() {
    let alpha = launch(test_config("alpha")).await;
    let http = client();

    // Bad bodies name the offending field.
    let (status, err) = post_json(
        &http,
        alpha.admin,
        "/peers",
        serde_json::json!({"peer_id": "x", "peer_ip": "not-an-ip", "shared_secret": "s"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().contains("peer_ip"));

    let (status, _) = post_json(
        &http,
        alpha.admin,
        "/peers",
        serde_json::json!({"peer_id": "x", "peer_ip": "127.0.0.1:7001", "shared_secret": "s"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Same id, same address: idempotent 200.
    let (status, _) = post_json(
        &http,
        alpha.admin,
        "/peers",
        serde_json::json!({"peer_id": "x", "peer_ip": "127.0.0.1:7001", "shared_secret": "s"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Same id, different address: applied, but surfaced as a conflict.
    let (status, body) = post_json(
        &http,
        alpha.admin,
        "/peers",
        serde_json::json!({"peer_id": "x", "peer_ip": "127.0.0.1:7002", "shared_secret": "s"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["updated"], Value::Bool(true));

    let (_, peers) = get_json(&http, alpha.admin, "/peers").await;
    let list = peers["peers"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["address"], "127.0.0.1:7002");

    // Unknown destination vs registered-but-unrouted destination.
    let (_, unknown) = get_json(&http, alpha.admin, "/path/nobody").await;
    assert_eq!(unknown["reason"], "unknown_destination");
    let (_, no_route) = get_json(&http, alpha.admin, "/path/x").await;
    assert_eq!(no_route["reason"], "no_route");

    assert_eq!(delete(&http, alpha.admin, "/peers/x").await, StatusCode::OK);
    assert_eq!(
        delete(&http, alpha.admin, "/peers/x").await,
        StatusCode::NOT_FOUND
    );
    let (_, peers) = get_json(&http, alpha.admin, "/peers").await;
    assert!(peers["peers"].as_array().unwrap().is_empty());

    alpha.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn silent_peer_descends_the_liveness_ladder_and_ages_out() {
    let alpha = launch(test_config("alpha")).await;

    let mut beta_cfg = test_config("beta");
    beta_cfg.peers.push(PeerEntry {
        node_id: "alpha".into(),
        address: alpha.probe,
        shared_secret: "wires".into(),
        kind: PeerKind::Regular,
    });
    let beta = launch(beta_cfg).await;

    let http = client();
    let (status, _) = post_json(
        &http,
        alpha.admin,
        "/peers",
        serde_json::json!({
            "peer_id": "beta",
            "peer_ip": beta.probe.to_string(),
            "shared_secret": "wires",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    wait_for!("beta to become alive", Duration::from_secs(10), {
        let (_, peers) = get_json(&http, alpha.admin, "/peers").await;
        peers["peers"][0]["liveness"] == "alive"
    });

    // Beta goes silent.
    beta.shutdown().await;

    wait_for!("beta to be suspect", Duration::from_secs(10), {
        let (_, peers) = get_json(&http, alpha.admin, "/peers").await;
        let liveness = peers["peers"][0]["liveness"].as_str().unwrap().to_owned();
        liveness == "suspect" || liveness == "dead"
    });

    wait_for!("beta to be dead", Duration::from_secs(10), {
        let (_, peers) = get_json(&http, alpha.admin, "/peers").await;
        peers["peers"][0]["liveness"] == "dead"
    });

    // A dead peer degrades health but is never auto-removed.
    let (_, health) = get_json(&http, alpha.admin, "/health").await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["peer_count"], 1);

    // Its edges age out of the topology and the route disappears.
    wait_for!("beta's edges to age out", Duration::from_secs(15), {
        let (_, topo) = get_json(&http, alpha.admin, "/topology").await;
        let (_, path) = get_json(&http, alpha.admin, "/path/beta").await;
        topo["edges"].as_array().unwrap().is_empty()
            && path["reachable"] == Value::Bool(false)
            && path["reason"] == "no_route"
    });

    alpha.shutdown().await;
}
