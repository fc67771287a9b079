//! Prometheus text exposition on `GET /metrics`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use minion_broker::BrokerMetrics;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// A bound metrics endpoint.
pub struct MetricsServer {
    listener: TcpListener,
}

impl MetricsServer {
    /// Binds the listener. Port 0 picks a free port.
    pub async fn bind(address: impl Into<SocketAddr>) -> anyhow::Result<Self> {
        let address = address.into();
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("cannot bind metrics endpoint {address}"))?;
        Ok(Self { listener })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` is cancelled.
    pub fn spawn(self, metrics: Arc<BrokerMetrics>, shutdown: CancellationToken) -> JoinHandle<()> {
        let app = Router::new()
            .route("/metrics", get(render))
            .with_state(metrics);
        tokio::spawn(async move {
            if let Ok(address) = self.listener.local_addr() {
                info!(%address, "Metrics endpoint listening");
            }
            if let Err(e) = axum::serve(self.listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                warn!(error = %e, "Metrics endpoint failed");
            }
        })
    }
}

async fn render(State(metrics): State<Arc<BrokerMetrics>>) -> Response {
    match metrics.render() {
        Ok(text) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], text).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
