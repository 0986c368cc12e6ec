use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{DdarpError, Result};

pub const ENV_NODE_ID: &str = "DDARP_NODE_ID";
pub const ENV_LISTEN_ADDR: &str = "DDARP_LISTEN_ADDR";
pub const ENV_ADMIN_ADDR: &str = "DDARP_ADMIN_ADDR";
pub const ENV_PROBE_INTERVAL_MS: &str = "DDARP_PROBE_INTERVAL_MS";
pub const ENV_RECOMPUTE_INTERVAL_MS: &str = "DDARP_RECOMPUTE_INTERVAL_MS";

/// Load a TOML file, apply environment overrides, validate.
pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| DdarpError::Config(format!("Failed to read config file: {e}")))?;
    let mut cfg: Config = toml::from_str(&txt)
        .map_err(|e| DdarpError::Config(format!("Failed to parse config: {e}")))?;

    apply_env(&mut cfg)?;
    validate_config(&cfg)?;

    Ok(cfg)
}

/// Build a configuration from the environment alone. `DDARP_NODE_ID` is the
/// only required input.
pub fn from_env() -> Result<Config> {
    let node_id = env::var(ENV_NODE_ID)
        .map_err(|_| DdarpError::Config(format!("{ENV_NODE_ID} is not set")))?;
    let mut cfg = Config::for_node(node_id);
    apply_env(&mut cfg)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn apply_env(cfg: &mut Config) -> Result<()> {
    if let Ok(id) = env::var(ENV_NODE_ID) {
        cfg.node_id = id;
    }
    if let Ok(addr) = env::var(ENV_LISTEN_ADDR) {
        cfg.listen = addr
            .parse()
            .map_err(|e| DdarpError::Config(format!("{ENV_LISTEN_ADDR}: {e}")))?;
    }
    if let Ok(addr) = env::var(ENV_ADMIN_ADDR) {
        cfg.admin_listen = addr
            .parse()
            .map_err(|e| DdarpError::Config(format!("{ENV_ADMIN_ADDR}: {e}")))?;
    }
    if let Ok(ms) = env::var(ENV_PROBE_INTERVAL_MS) {
        cfg.probe_interval_ms = ms
            .parse()
            .map_err(|e| DdarpError::Config(format!("{ENV_PROBE_INTERVAL_MS}: {e}")))?;
    }
    if let Ok(ms) = env::var(ENV_RECOMPUTE_INTERVAL_MS) {
        cfg.recompute_interval_ms = ms
            .parse()
            .map_err(|e| DdarpError::Config(format!("{ENV_RECOMPUTE_INTERVAL_MS}: {e}")))?;
    }
    Ok(())
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.node_id.is_empty() {
        return Err(DdarpError::Config("node_id must not be empty".into()));
    }
    if cfg.probe_interval_ms == 0 || cfg.recompute_interval_ms == 0 {
        return Err(DdarpError::Config(
            "probe and recompute intervals must be positive".into(),
        ));
    }
    if cfg.listen == cfg.admin_listen {
        return Err(DdarpError::Config(
            "listen and admin_listen must differ".into(),
        ));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for peer in &cfg.peers {
        if peer.node_id == cfg.node_id {
            return Err(DdarpError::Config(format!(
                "peer list contains the local node: {}",
                peer.node_id
            )));
        }
        if !seen.insert(peer.node_id.as_str()) {
            return Err(DdarpError::Config(format!(
                "duplicate peer in config: {}",
                peer.node_id
            )));
        }
        if peer.shared_secret.is_empty() {
            return Err(DdarpError::Config(format!(
                "peer {} has an empty shared_secret",
                peer.node_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config("node_id = \"tokyo\"\n");
        let cfg = load_from_path(f.path()).unwrap();
        assert_eq!(cfg.node_id, "tokyo");
        assert_eq!(cfg.probe_interval_ms, 1000);
        assert_eq!(cfg.recompute_interval_ms, 5000);
        assert_eq!(cfg.timing.route_expire_ms, 120_000);
        assert!(cfg.peers.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let f = write_config(
            r#"
node_id = "tokyo"
kind = "border"
listen = "127.0.0.1:9000"
admin_listen = "127.0.0.1:9001"
probe_interval_ms = 250

[timing]
suspect_after_ms = 500
dead_after_ms = 1500

[[peers]]
node_id = "osaka"
address = "127.0.0.1:9100"
shared_secret = "hunter2"

[[peers]]
node_id = "nagoya"
address = "127.0.0.1:9200"
shared_secret = "hunter3"
kind = "border"
"#,
        );
        let cfg = load_from_path(f.path()).unwrap();
        assert_eq!(cfg.peers.len(), 2);
        assert_eq!(cfg.timing.suspect_after_ms, 500);
        assert_eq!(cfg.timing.edge_fresh_ms, 30_000);
    }

    #[test]
    fn rejects_duplicate_and_self_peers() {
        let dup = write_config(
            r#"
node_id = "tokyo"
[[peers]]
node_id = "osaka"
address = "127.0.0.1:9100"
shared_secret = "x"
[[peers]]
node_id = "osaka"
address = "127.0.0.1:9200"
shared_secret = "y"
"#,
        );
        assert!(load_from_path(dup.path()).is_err());

        let this = write_config(
            r#"
node_id = "tokyo"
[[peers]]
node_id = "tokyo"
address = "127.0.0.1:9100"
shared_secret = "x"
"#,
        );
        assert!(load_from_path(this.path()).is_err());
    }

    #[test]
    fn rejects_colliding_listeners() {
        let f = write_config(
            "node_id = \"a\"\nlisten = \"127.0.0.1:9000\"\nadmin_listen = \"127.0.0.1:9000\"\n",
        );
        assert!(load_from_path(f.path()).is_err());
    }
}
