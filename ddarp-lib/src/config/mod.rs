pub mod loader;
pub mod root;

pub use loader::{from_env, load_from_path};
pub use root::{Config, PeerEntry, TimingConfig};
