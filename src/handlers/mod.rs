//! HTTP request handlers for the exposition server

use crate::cluster::RouteLister;
use crate::collector::Collector;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod health;
pub mod metrics;

/// Application state shared across all handlers
///
/// Both fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    collector: Arc<Collector>,
    routes: Arc<dyn RouteLister>,
}

impl AppState {
    pub fn new(collector: Collector, routes: Arc<dyn RouteLister>) -> Self {
        Self {
            collector: Arc::new(collector),
            routes,
        }
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn routes(&self) -> &dyn RouteLister {
        self.routes.as_ref()
    }
}

/// Build the exposition router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics::handler))
        .route("/health", get(health::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
