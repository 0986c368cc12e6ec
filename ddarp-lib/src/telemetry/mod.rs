pub mod handlers;
pub mod metrics;
pub mod server;
pub mod tracing;

pub use handlers::AdminState;
pub use metrics::{init_metrics, Metrics};
pub use server::start_admin_server;
pub use tracing::init_tracing;
