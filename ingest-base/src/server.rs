use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use derive_new::new;
use eyre::{Context, Result};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info};

use crate::CoreMetrics;

/// Serves the prometheus report on `/metrics`.
#[derive(new, Debug)]
pub struct Server {
    listen_port: u16,
    core_metrics: Arc<CoreMetrics>,
}

impl Server {
    /// Bind the listen port and serve in a background task. Returns the bound
    /// address together with the task.
    pub async fn run(self: Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(("0.0.0.0", self.listen_port))
            .await
            .with_context(|| format!("Failed to bind metrics port {}", self.listen_port))?;
        let addr = listener.local_addr()?;
        info!(%addr, "Serving metrics");
        Ok((addr, self.serve(listener)))
    }

    fn serve(self: Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        let core_metrics = self.core_metrics.clone();
        let app = Router::new().route(
            "/metrics",
            get(move || Self::gather_metrics(core_metrics.clone())),
        );

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server failed");
            }
        })
    }

    /// Gather available metrics into an encoded (plaintext, OpenMetrics format)
    /// report.
    async fn gather_metrics(core_metrics: Arc<CoreMetrics>) -> impl IntoResponse {
        tracing::debug!("Serving /metrics");
        match core_metrics.report() {
            Ok(report) => (StatusCode::OK, report),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to gather metrics".to_owned(),
            ),
        }
    }
}
