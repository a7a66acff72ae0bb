//! `qcat serve` -- HTTP JSON API over the access boundary.
//!
//! Endpoints:
//! - GET    /health
//! - POST   /api/v1/login
//! - GET    /api/v1/questionnaires                      - public list (search index)
//! - GET    /api/v1/questionnaires/counts
//! - GET    /api/v1/questionnaires/{identifier}         - detail, `?version=` / `?public=true`
//! - GET    /api/v1/my-data
//! - GET    /api/v1/pending/review
//! - GET    /api/v1/pending/publish
//! - POST   /api/v1/configurations/{code}/drafts
//! - GET    /api/v1/documents/{id}/steps/{category}     - render one step (takes the edit lock)
//! - POST   /api/v1/documents/{id}/steps/{category}     - commit one step
//! - DELETE /api/v1/documents/{id}/lock
//! - POST   /api/v1/documents/{id}/actions              - submit, review, publish, reject, delete
//! - POST   /api/v1/documents/{id}/fork
//! - POST   /api/v1/documents/{id}/members
//! - POST   /api/v1/blobs
//! - GET    /api/v1/links
//! - GET    /api/v1/users
//! - POST   /api/v1/admin/reindex/{code}
//! - POST   /api/v1/admin/configurations/{code}/{edition}/reload
//!
//! Sessions come from the directory's session cookie (or a bearer token).

mod handlers;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use qcat_search::{MemorySearchBackend, SearchBackend};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use self::handlers::*;
use self::state::AppState;
use crate::commands::{elasticsearch, open_boundary};
use crate::settings::Settings;

/// Maximum request body size: 20 MB (uploads included).
const MAX_BODY_SIZE: usize = 20 * 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

pub(crate) async fn start_server(
    settings: &Settings,
    port: u16,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if settings.in_memory_search() {
        serve_with(settings, Arc::new(MemorySearchBackend::new()), port, tls_cert, tls_key).await
    } else {
        serve_with(settings, Arc::new(elasticsearch(settings)), port, tls_cert, tls_key).await
    }
}

fn router<B: SearchBackend>(state: Arc<AppState<B>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health::<B>))
        .route("/api/v1/login", post(handle_login::<B>))
        .route("/api/v1/questionnaires", get(handle_list::<B>))
        .route("/api/v1/questionnaires/counts", get(handle_counts::<B>))
        .route("/api/v1/questionnaires/{identifier}", get(handle_detail::<B>))
        .route("/api/v1/my-data", get(handle_my_data::<B>))
        .route("/api/v1/pending/review", get(handle_pending_review::<B>))
        .route("/api/v1/pending/publish", get(handle_pending_publish::<B>))
        .route("/api/v1/configurations/{code}/drafts", post(handle_create_draft::<B>))
        .route(
            "/api/v1/documents/{id}/steps/{category}",
            get(handle_step_render::<B>).post(handle_step_commit::<B>),
        )
        .route("/api/v1/documents/{id}/lock", delete(handle_release_lock::<B>))
        .route("/api/v1/documents/{id}/actions", post(handle_review_action::<B>))
        .route("/api/v1/documents/{id}/fork", post(handle_fork::<B>))
        .route("/api/v1/documents/{id}/members", post(handle_membership::<B>))
        .route("/api/v1/blobs", post(handle_upload::<B>))
        .route("/api/v1/links", get(handle_link_search::<B>))
        .route("/api/v1/users", get(handle_user_search::<B>))
        .route("/api/v1/admin/reindex/{code}", post(handle_reindex::<B>))
        .route(
            "/api/v1/admin/configurations/{code}/{edition}/reload",
            post(handle_reload::<B>),
        )
        .fallback(handle_not_found)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

async fn serve_with<B: SearchBackend>(
    settings: &Settings,
    search: Arc<B>,
    port: u16,
    _tls_cert: Option<PathBuf>,
    _tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let qcat = open_boundary(settings, search).await?;
    let state = Arc::new(AppState {
        qcat,
        configurations_dir: settings.configurations_dir.clone(),
    });
    let app = router(state);
    let addr = format!("0.0.0.0:{}", port);

    // TLS support via axum-server + rustls (requires `tls` feature)
    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&_tls_cert, &_tls_key) {
        let config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        info!(%socket_addr, "qcat listening on https");
        axum_server::bind_rustls(socket_addr, config)
            .serve(app.into_make_service())
            .await?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "qcat listening on http");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
