//! HTTP surface: upload receiver, artifact delivery and health.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | POST | `/convert-pdf/`, `/convert-pdf` | multipart `file` + `quality` → `{pdf_url, image_url, expires_at, pages}` |
//! | GET | `/download/:id` | any artifact, `Content-Disposition: attachment` |
//! | GET | `/image/:id` | image artifacts only, `inline` |
//! | GET | `/health` | `{status, version, artifacts, running}` |
//!
//! Every failure is a non-2xx status with a `{error, message}` JSON body
//! (see [`ErrorResponse`]).

pub mod error;
mod routes;

pub use error::ErrorResponse;
pub use routes::{ConvertResponse, HealthResponse};

use crate::error::ServiceError;
use crate::service::ConversionService;
use crate::store::spawn_sweeper;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Room for multipart boundaries and the quality field on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    service: ConversionService,
}

impl AppState {
    pub fn new(service: ConversionService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { service }),
        }
    }

    pub fn service(&self) -> &ConversionService {
        &self.inner.service
    }
}

/// Build the router with CORS, request tracing and the upload body limit.
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .service()
        .config()
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/convert-pdf/", post(routes::convert_pdf))
        .route("/convert-pdf", post(routes::convert_pdf))
        .route("/download/:id", get(routes::download))
        .route("/image/:id", get(routes::image))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `bind_addr` and serve until Ctrl+C or SIGTERM.
pub async fn serve(service: ConversionService) -> Result<(), ServiceError> {
    let addr = service.config().bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::Internal(format!("cannot bind {addr}: {e}")))?;
    info!("ezread v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);
    serve_with_shutdown(listener, service, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// The expiry sweeper runs for as long as the server does.
pub async fn serve_with_shutdown<S>(
    listener: TcpListener,
    service: ConversionService,
    shutdown: S,
) -> Result<(), ServiceError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let sweeper = spawn_sweeper(
        Arc::clone(service.store()),
        service.config().sweep_interval,
    );
    let app = router(AppState::new(service));

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper.abort();
    info!("Server shutdown complete");

    result.map_err(|e| ServiceError::Internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
