//! REST API server for mediaprobe.
//!
//! Provides HTTP endpoints for:
//! - Media analysis of a remote URL or an uploaded file
//! - Thumbnail generation and side-by-side frame comparison
//! - Health and service info

pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{AnalysisAdapter, EngineFactory};
use crate::config::Config;
use crate::fetch::{BoundedFetcher, HttpTransport};
use crate::thumbnails::{FrameExtractor, ThumbnailPipeline};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, Method},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Per-request limits derived from configuration.
#[derive(Debug, Clone)]
pub struct RequestLimits {
    pub byte_ceiling: usize,
    pub fetch_timeout: Duration,
    pub max_body_bytes: usize,
    pub default_count: usize,
    pub max_count: usize,
}

impl RequestLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            byte_ceiling: config.fetch.byte_ceiling,
            fetch_timeout: config.fetch.timeout(),
            max_body_bytes: config.server.max_body_bytes,
            default_count: config.thumbnails.default_count,
            max_count: config.thumbnails.max_count,
        }
    }
}

/// Shared handler state. Everything in here is immutable per process.
#[derive(Clone)]
pub struct AppState {
    pub limits: RequestLimits,
    pub fetcher: BoundedFetcher,
    pub analyzer: AnalysisAdapter,
    pub thumbnails: ThumbnailPipeline,
}

impl AppState {
    pub fn new(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        engines: Arc<dyn EngineFactory>,
        frames: Arc<dyn FrameExtractor>,
    ) -> Self {
        Self {
            limits: RequestLimits::from_config(config),
            fetcher: BoundedFetcher::new(transport),
            analyzer: AnalysisAdapter::new(engines),
            thumbnails: ThumbnailPipeline::new(
                frames,
                config.thumbnails.concurrency,
                config.thumbnails.compare_concurrency,
            ),
        }
    }
}

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);
    let body_limit = state.limits.max_body_bytes;

    Router::new()
        // Root endpoint
        .route("/", get(status))
        .merge(routes::analyze::router())
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub struct ApiServer {
    address: String,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: &Config, state: AppState) -> Self {
        Self {
            address: config.bind_address(),
            state,
        }
    }

    pub async fn start(self) -> Result<()> {
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind {}", self.address))?;

        info!("API server listening on http://{}", self.address);
        info!("Endpoints:");
        info!("  GET     /         - Service info");
        info!("  GET     /analyze  - Health check");
        info!("  POST    /analyze  - Analyze a URL or upload, generate or compare thumbnails");
        info!("  OPTIONS /analyze  - CORS preflight");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "mediaprobe",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}
