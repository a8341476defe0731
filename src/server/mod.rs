//! HTTP server exposing `/metrics` and `/healthz`.
//!
//! Every `/metrics` request drives one full scrape. The handler always
//! answers 200: a failed scrape shows up as missing or partial samples,
//! never as an HTTP error.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::collector::EcsCollector;

pub mod exposition;

/// Samples in flight between the scrape and the renderer.
const SAMPLE_BUFFER: usize = 1024;

pub struct Server {
    listen: SocketAddr,
    grace: Duration,
    collector: Arc<EcsCollector>,
}

impl Server {
    pub fn new(listen: SocketAddr, grace: Duration, collector: Arc<EcsCollector>) -> Self {
        Self { listen, grace, collector }
    }

    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let listener = TcpListener::bind(self.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.listen))?;
        self.serve(listener, shutdown).await
    }

    /// Serve until `shutdown` resolves, then give in-flight requests up to
    /// the grace period before aborting.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        let app = router(Arc::clone(&self.collector));

        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.await;
                })
                .await
        });
        info!("Starting server at {}", addr);

        tokio::select! {
            res = &mut server => {
                return res.context("server task failed")?.context("server error");
            }
            _ = shutdown => {}
        }

        info!("Shutting down server...");
        let _ = drain_tx.send(());
        match tokio::time::timeout(self.grace, &mut server).await {
            Ok(res) => res.context("server task failed")?.context("server error")?,
            Err(_) => {
                warn!(grace_secs = self.grace.as_secs(), "Server forced to shutdown");
                server.abort();
            }
        }
        info!("Server exited");
        Ok(())
    }
}

pub fn router(collector: Arc<EcsCollector>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .with_state(collector)
}

async fn metrics_handler(State(collector): State<Arc<EcsCollector>>) -> Response {
    let (tx, mut rx) = mpsc::channel(SAMPLE_BUFFER);
    let receive = async {
        let mut samples = Vec::new();
        while let Some(sample) = rx.recv().await {
            samples.push(sample);
        }
        samples
    };
    let ((), samples) = tokio::join!(collector.collect(tx), receive);

    match exposition::render(&collector.describe(), &samples) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, exposition::content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
