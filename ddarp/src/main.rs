#![forbid(unsafe_code)]

use clap::Parser;
use ddarp_lib::config::{from_env, load_from_path};
use ddarp_lib::telemetry::init_tracing;
use ddarp_lib::Node;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "DDARP distributed adaptive routing daemon")]
struct Cli {
    /// Path to configuration TOML file; environment variables override it.
    /// Without a file, configuration comes from DDARP_* variables alone.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_from_path(path),
        None => from_env(),
    };

    let config = match config {
        Ok(cfg) => {
            info!(
                node_id = %cfg.node_id,
                listen = %cfg.listen,
                peers = cfg.peers.len(),
                "configuration loaded"
            );
            cfg
        }
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    match Node::bind(config).await {
        Ok(node) => {
            if let Err(err) = node.run().await {
                error!(%err, "node exited with error");
                std::process::exit(1);
            }
        }
        Err(err) => {
            error!(%err, "failed to start node");
            std::process::exit(1);
        }
    }
}
