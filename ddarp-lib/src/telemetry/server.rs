use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::telemetry::handlers::{handle, AdminState};

/// Every admin request is bounded to this, body included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve the admin/metrics surface until shutdown. The listener is bound by
/// the caller so a bind failure is fatal at startup, not here.
pub async fn start_admin_server(
    listener: TcpListener,
    state: Arc<AdminState>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(?addr, "admin server started (introspection + metrics)");
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "admin server: accept error");
                        continue;
                    }
                };

                let state = state.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move {
                            let bounded =
                                tokio::time::timeout(REQUEST_TIMEOUT, handle(state, req)).await;
                            match bounded {
                                Ok(Ok(resp)) => Ok::<_, hyper::Error>(resp),
                                Ok(Err(err)) => {
                                    warn!(%err, "admin handler error");
                                    Ok(error_response(
                                        hyper::StatusCode::INTERNAL_SERVER_ERROR,
                                        "Internal Server Error",
                                    ))
                                }
                                Err(_) => Ok(error_response(
                                    hyper::StatusCode::GATEWAY_TIMEOUT,
                                    "Request Timed Out",
                                )),
                            }
                        }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "admin server: serve_connection error");
                    }
                });
            }
        }
    }

    info!("admin server stopped");
}

fn error_response(
    status: hyper::StatusCode,
    message: &'static str,
) -> hyper::Response<http_body_util::combinators::BoxBody<Bytes, hyper::Error>> {
    let body = Full::new(Bytes::from(message))
        .map_err(|never| match never {})
        .boxed();
    let mut resp = hyper::Response::new(body);
    *resp.status_mut() = status;
    resp
}
