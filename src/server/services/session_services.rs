use std::sync::Arc;

use axum::http::HeaderMap;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::server::api::RelayController;
use crate::server::error::{AppResult, Error};
use crate::server::services::upstream_services::{
    DynUpstreamService, FetchedData, UpstreamService,
};

/// how a session's stream is relayed. movie and series are direct file URLs
/// and get byte-relayed as-is, live streams go through playlist rewriting.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Movie,
    Series,
    Live,
}

/// everything a relay request handler needs, shared by all requests of one
/// session. the cancellation token is the session's kill switch.
pub struct SessionContext {
    pub kind: ContentKind,
    pub target_url: String,
    pub upstream: DynUpstreamService,
    pub cancel: CancellationToken,
}

struct ActiveSession {
    port: u16,
    base_url: String,
    cancel: CancellationToken,
    server_task: JoinHandle<()>,
}

impl ActiveSession {
    /// idempotent teardown: cancel in-flight relays, then kill the accept
    /// loop and wait it out so the port is actually free on return
    async fn shutdown(self) {
        self.cancel.cancel();
        self.server_task.abort();
        let _ = self.server_task.await;
        debug!("Relay session on port {} closed", self.port);
    }
}

/// owns the single live proxy instance. starting a session tears the
/// previous one down first, so repeated play actions never leak ports.
pub struct SessionManager {
    upstream: DynUpstreamService,
    current: Mutex<Option<ActiveSession>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Arc::new(UpstreamService::default()) as DynUpstreamService)
    }
}

impl SessionManager {
    pub fn new(upstream: DynUpstreamService) -> Self {
        Self {
            upstream,
            current: Mutex::new(None),
        }
    }

    /// binds a fresh listener on an ephemeral local port and returns the base
    /// URL the player should point at. holding the lock across teardown and
    /// bind keeps racing starts convergent on exactly one live listener.
    pub async fn start_session(&self, target_url: &str, kind: ContentKind) -> AppResult<String> {
        if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
            return Err(Error::BadRequest("Invalid URL format".to_string()));
        }

        let mut current = self.current.lock().await;

        if let Some(previous) = current.take() {
            info!("Closing existing relay session before starting a new one");
            previous.shutdown().await;
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(|e| {
            error!("Failed to bind relay listener: {}", e);
            Error::InternalServerErrorWithContext(format!("Failed to bind relay listener: {}", e))
        })?;

        let port = listener
            .local_addr()
            .map_err(|e| {
                Error::InternalServerErrorWithContext(format!("Failed to read local addr: {}", e))
            })?
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let cancel = CancellationToken::new();
        let ctx = Arc::new(SessionContext {
            kind,
            target_url: target_url.to_string(),
            upstream: self.upstream.clone(),
            cancel: cancel.clone(),
        });

        let app = RelayController::app(ctx);

        let shutdown = cancel.clone();
        let server_task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                error!("Relay server error: {}", e);
            }
        });

        info!(
            "Relay session started: {} -> {} ({:?})",
            base_url, target_url, kind
        );

        *current = Some(ActiveSession {
            port,
            base_url: base_url.clone(),
            cancel,
            server_task,
        });

        Ok(base_url)
    }

    /// closes the active listener if there is one. calling this with nothing
    /// running is a no-op, not an error.
    pub async fn stop_session(&self) {
        let mut current = self.current.lock().await;

        if let Some(session) = current.take() {
            info!("Stopping relay session at {}", session.base_url);
            session.shutdown().await;
        }
    }

    /// base URL of the live session, if any
    pub async fn base_url(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|s| s.base_url.clone())
    }

    /// metadata retrieval for the player UI, same header profile and redirect
    /// logic as the relay itself
    pub async fn fetch_data(
        &self,
        url: &str,
        extra_headers: Option<HeaderMap>,
    ) -> AppResult<FetchedData> {
        self.upstream.fetch_data(url, extra_headers).await
    }
}

impl Drop for SessionManager {
    // last safety net on shutdown: the runtime may already be winding down,
    // so no awaiting here, just cancel and abort
    fn drop(&mut self) {
        if let Ok(mut current) = self.current.try_lock() {
            if let Some(session) = current.take() {
                session.cancel.cancel();
                session.server_task.abort();
            }
        }
    }
}
