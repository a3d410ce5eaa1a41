//! Live channel server
//!
//! One axum application serving the WebSocket live channel at `/ws` and
//! the HTTP API job executors submit through and readers query.

pub mod http;
pub mod protocol;
pub mod ws;

use crate::broadcast::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::lifecycle::AuditService;
use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuditService>,
    pub subscriber_capacity: usize,
}

impl AppState {
    pub fn new(service: Arc<AuditService>) -> Self {
        Self {
            service,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }
}

/// Build the complete HTTP application
pub fn build_app(state: AppState) -> Router {
    let ws_routes = Router::new()
        .route("/ws", get(ws::handle_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(ws_routes)
        .merge(http::api_router(state))
        .layer(build_cors())
        .layer(TraceLayer::new_for_http())
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(Any)
}

/// Bind, serve until Ctrl-C, then return
pub async fn serve(config: &AuditConfig, service: Arc<AuditService>) -> Result<()> {
    let state = AppState::new(service).with_subscriber_capacity(config.broadcast.subscriber_capacity);
    let app = build_app(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Audit server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .map_err(|e| AuditError::Transport(format!("HTTP server error: {}", e)))?;

    tracing::info!("Audit server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryEventStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_app_routes_health() {
        let service = Arc::new(AuditService::with_store(MemoryEventStore::new()));
        let app = build_app(AppState::new(service));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let service = Arc::new(AuditService::with_store(MemoryEventStore::new()));
        let app = build_app(AppState::new(service));
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_state_capacity() {
        let service = Arc::new(AuditService::with_store(MemoryEventStore::new()));
        let state = AppState::new(service).with_subscriber_capacity(8);
        assert_eq!(state.subscriber_capacity, 8);
    }
}
