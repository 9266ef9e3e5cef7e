//! HTTP endpoint manager
//!
//! Serves liveness and readiness for the operator pod:
//! - `GET /alive` → always 200 while the process serves requests
//! - `GET /ready` → 200 once startup completed, 503 before

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Error;

/// How long `stop` waits for in-flight requests to drain
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared readiness flag
///
/// Written once by the manager after startup, read by the `/ready` handler.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// Create a flag that starts out not ready
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark startup as complete
    pub fn set_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether startup completed
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// HTTP endpoint collaborator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpManager: Send + Sync {
    /// Bind and start serving in the background
    async fn start(&self, readiness: Readiness) -> Result<(), Error>;

    /// Stop serving, giving in-flight requests a chance to drain
    async fn stop(&self) -> Result<(), Error>;
}

/// Build the router for the alive/ready endpoints
pub fn routes(readiness: Readiness) -> Router {
    Router::new()
        .route("/alive", get(|| async { "ok" }))
        .route("/ready", get(ready))
        .with_state(readiness)
}

async fn ready(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// axum-backed [`HttpManager`]
pub struct HttpServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HttpServer {
    /// Create a server that will listen on `addr` once started
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl HttpManager for HttpServer {
    async fn start(&self, readiness: Readiness) -> Result<(), Error> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Http(format!("failed binding {}: {e}", self.addr)))?;

        info!(addr = %self.addr, "HTTP manager listening");

        let app = routes(readiness);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "HTTP manager server error");
            }
        });

        *self.handle.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.shutdown.cancel();

        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            debug!("HTTP manager was never started, nothing to stop");
            return Ok(());
        };

        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => {
                info!("HTTP manager stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Http(format!("server task failed: {e}"))),
            Err(_) => Err(Error::Http(format!(
                "server did not drain within {STOP_TIMEOUT:?}"
            ))),
        }
    }
}
