//! Converge Sync admin HTTP API.
//!
//! Provides an Axum-based HTTP server with:
//! - An unauthenticated health endpoint
//! - Admin endpoints under `/api/v1/admin/smartsheet` for status, manual
//!   syncs, imports, exports, the failure ledger and run history
//! - Bearer-token admin authentication

pub mod api;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use converge_sync_core::config::WebConfig;
use converge_sync_core::coordinator::SyncCoordinator;

/// Mount point of the admin routes.
pub const ADMIN_PREFIX: &str = "/api/v1/admin/smartsheet";

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: Arc<SyncCoordinator>,
    /// Admin bearer token. `None` disables authentication.
    pub admin_token: Option<String>,
}

/// Build the full router for `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .merge(api::status::routes())
        .merge(api::sync::routes())
        .merge(api::import::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::require_admin,
        ));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .merge(api::status::health_routes())
        .nest(ADMIN_PREFIX, admin)
        // Middleware
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(coordinator: Arc<SyncCoordinator>, config: &WebConfig) -> Self {
        if config.admin_token.is_none() {
            warn!("no admin token configured, admin API is unauthenticated");
        }
        let state = Arc::new(AppState {
            coordinator,
            admin_token: config.admin_token.clone(),
        });
        Self { state }
    }

    /// Serve on `listen_addr` until `shutdown` resolves.
    pub async fn start<F>(self, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = build_router(self.state);

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
