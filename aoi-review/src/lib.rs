//! aoi-review library - query, aggregation and export service
//!
//! Read-only views over the consolidated defect store, a quality issue
//! ledger, and a serialized in-process ingestion trigger.

use std::sync::Arc;

use aoi_ingest::{IngestSettings, Ingestor};
use axum::Router;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

pub mod aggregate;
pub mod api;
pub mod cache;
pub mod error;
pub mod export;
pub mod issues;
pub mod pagination;
pub mod query;

use cache::AggregateCache;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub cache: Arc<AggregateCache>,
    pub ingestor: Arc<Ingestor>,
    /// Held for the duration of an ingestion run
    pub ingest_lock: Arc<Mutex<()>>,
    /// Default N for top-N summaries
    pub top_n: usize,
}

impl AppState {
    pub fn new(db: SqlitePool, ingest_settings: IngestSettings, top_n: usize) -> Self {
        Self {
            ingestor: Arc::new(Ingestor::new(db.clone(), ingest_settings)),
            db,
            cache: Arc::new(AggregateCache::new()),
            ingest_lock: Arc::new(Mutex::new(())),
            top_n,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let api = Router::new()
        .route("/api/defects", get(api::list_defects))
        .route("/api/defects/:serial/:ref_id", get(api::get_defect))
        .route("/api/summary/outcomes", get(api::outcome_summary))
        .route("/api/summary/top-refs", get(api::top_refs))
        .route("/api/summary/top-components", get(api::top_components))
        .route("/api/summary/pivot", get(api::pivot_summary))
        .route("/api/export/defects", get(api::export_defects))
        .route("/api/export/pivot", get(api::export_pivot))
        .route("/api/issues", get(api::list_issues).post(api::create_issue))
        .route("/api/issues/:id", get(api::get_issue).patch(api::update_issue))
        .route("/api/issues/:id/changelog", get(api::issue_changelog))
        .route("/api/ingest", post(api::trigger_ingest));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
