//! axum surface: router, shared state and handlers.

mod handlers;
mod page;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::model::ImageModel;
use crate::pipeline::Pipeline;
use crate::store::{HistoryStore, SessionStore, SqliteStore};

pub struct AppState {
    pub pipeline: Pipeline,
    pub sessions: Arc<dyn SessionStore>,
    pub history: Arc<dyn HistoryStore>,
    pub cookie_secure: bool,
}

impl AppState {
    /// Wire every port to one SQLite store.
    pub fn new(store: SqliteStore, model: Arc<dyn ImageModel>, config: &ServerConfig) -> Self {
        let store = Arc::new(store);
        Self {
            pipeline: Pipeline::new(store.clone(), store.clone(), model, config.anon_limit),
            sessions: store.clone(),
            history: store,
            cookie_secure: config.cookie_secure,
        }
    }
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(page::index))
        .route("/health", get(handlers::health))
        .route(
            "/api/restore",
            post(handlers::create_restore).get(handlers::list_restorations),
        )
        .route(
            "/api/edit",
            post(handlers::create_edit).get(handlers::list_edits),
        )
        .route("/api/stats", get(handlers::usage_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}
