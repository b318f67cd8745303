//! REST API exposure
//!
//! The REST exposure consumes a `ServerHost` and produces an axum `Router`:
//! unversioned health routes and custom routes answer directly, everything
//! else falls through to the governed, versioned API.

use super::super::host::ServerHost;
use crate::core::headers::X_PAGINATION;
use anyhow::Result;
use axum::http::HeaderName;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router from a host
    ///
    /// Returns a router with:
    /// - Health check routes
    /// - Custom routes
    /// - The governed API as fallback
    /// - HTTP tracing and permissive CORS exposing `X-Pagination`
    pub fn build_router(host: &ServerHost, custom_routes: Vec<Router>) -> Result<Router> {
        let mut app = Self::health_routes();
        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        let app = app
            .fallback_service(host.governed_router()?)
            .layer(Self::cors())
            .layer(TraceLayer::new_for_http());
        Ok(app)
    }

    fn cors() -> CorsLayer {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([HeaderName::from_static(X_PAGINATION)])
    }

    /// Build health check routes
    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    /// Health check endpoint handler
    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "company-api"
        }))
    }
}
