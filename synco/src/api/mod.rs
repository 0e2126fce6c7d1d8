//! Static HTTP server for session directories.
//!
//! Only used when no existing web server hosts the web directory. The
//! server never writes; it serves whatever the session has put on disk.

use crate::utils::errors::{Result, SyncoError};
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Serve `web_dir` as static files.
pub fn create_router(web_dir: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(web_dir))
        .layer(TraceLayer::new_for_http())
}

/// A running static server.
pub struct StaticServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl StaticServer {
    /// Bind `listen` and serve `web_dir` until `cancel` fires.
    pub async fn start(listen: &str, web_dir: &Path, cancel: CancellationToken) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .map_err(|e| SyncoError::Config(format!("cannot listen on {listen}: {e}")))?;
        let addr = listener.local_addr()?;
        let app = create_router(web_dir);
        info!("Serving {} on http://{}", web_dir.display(), addr);

        let handle = tokio::spawn(async move {
            let shutdown = cancel.cancelled_owned();
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!("Static server stopped with error: {}", e);
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server task after its token was cancelled.
    pub async fn stopped(self) {
        if let Err(e) = self.handle.await {
            warn!("Static server task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_serves_files_from_web_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("ts-abc")).unwrap();
        std::fs::write(dir.path().join("ts-abc/meta.json.enc"), b"sealed").unwrap();

        let app = create_router(dir.path());
        let response = app
            .clone()
            .oneshot(Request::get("/ts-abc/meta.json.enc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let missing = app
            .oneshot(Request::get("/ts-abc/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let server = StaticServer::start("127.0.0.1:0", dir.path(), cancel.clone())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
        cancel.cancel();
        server.stopped().await;
    }
}
