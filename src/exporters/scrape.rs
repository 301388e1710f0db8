//! HTTP scrape endpoint: serves the static process counters plus the
//! current readings snapshot as Prometheus exposition text on every
//! request (no caching), per spec.md §4.7. Grounded in
//! `original_source/rctmon/monitoring.py`'s `MainHandler`/`setup_monitoring`,
//! re-expressed with `axum` the way the teacher serves its own HTTP
//! surfaces.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use crate::readings::Readings;

#[derive(Clone)]
struct ScrapeState {
    readings: Arc<RwLock<Readings>>,
}

async fn metrics(State(state): State<ScrapeState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&crate::monitoring::MONITORING.registry.gather(), &mut buf).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode process metrics".to_string());
    }
    let mut body = String::from_utf8(buf).unwrap_or_default();

    // Clone the snapshot and release the lock immediately rather than
    // rendering while holding it, so a scrape never blocks the connection
    // loop's next write for longer than a single struct clone.
    let snapshot = state.readings.read().expect("readings lock poisoned").clone();
    body.push_str(&crate::exporters::render_readings(&snapshot));
    (StatusCode::OK, body)
}

async fn root() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "see /metrics")
}

/// Spawns the scrape server on its own OS thread with a single-threaded
/// tokio runtime, matching the connection loop's cooperative single-thread
/// model elsewhere (spec.md §5: "scrape HTTP server on its own background
/// thread").
pub fn spawn(bind_address: &str, bind_port: u16, readings: Arc<RwLock<Readings>>) -> std::io::Result<std::thread::JoinHandle<()>> {
    let addr: SocketAddr = format!("{bind_address}:{bind_port}").parse().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid prometheus bind address: {e}"))
    })?;

    std::thread::Builder::new().name("rctmon-scrape".into()).spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("failed to build scrape runtime");
        rt.block_on(async move {
            let state = ScrapeState { readings };
            let app = Router::new().route("/metrics", get(metrics)).route("/", get(root)).with_state(state);
            info!(%addr, "scrape exporter listening");
            if let Err(e) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
                tracing::error!(error = %e, "scrape exporter exited");
            }
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_bind_address_is_rejected() {
        let readings = Arc::new(RwLock::new(Readings::new()));
        let result = spawn("not an address", 9831, readings);
        assert!(result.is_err());
    }
}
