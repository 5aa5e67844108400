//! Router configuration for tissue-recon.
//!
//! # Route Structure
//!
//! ```text
//! /health                              - Health check
//! /legend                              - Tissue colour legend
//! /analysis/{series_id}                - Start (POST) / result (GET)
//! /analysis/{series_id}/stream         - Progress events (SSE)
//! /analysis/{series_id}/status         - Job snapshot
//! /models/{series_id}                  - Start model generation (POST)
//! /models/{series_id}/status           - Model status
//! /models/{series_id}/download         - Encoded model
//! /series                              - Clear every series (DELETE)
//! /series/{series_id}                  - Clear one series (DELETE)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tissue_recon::{create_router, Pipeline, PipelineConfig, RawVolumeSource, RouterConfig};
//!
//! let pipeline = Pipeline::new(RawVolumeSource::new("/data/volumes"), PipelineConfig::default());
//! let router = create_router(pipeline, RouterConfig::new());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    analysis_result_handler, analysis_status_handler, analysis_stream_handler,
    clear_all_handler, clear_series_handler, health_handler, legend_handler,
    model_download_handler, model_status_handler, start_analysis_handler, start_model_handler,
    AppState,
};
use crate::pipeline::Pipeline;
use crate::volume::VolumeSource;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Any CORS origin, tracing enabled.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Build the application router over a pipeline.
pub fn create_router<S>(pipeline: Pipeline<S>, config: RouterConfig) -> Router
where
    S: VolumeSource + 'static,
{
    let app_state = AppState::new(pipeline);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/legend", get(legend_handler::<S>))
        .route(
            "/analysis/{series_id}",
            post(start_analysis_handler::<S>).get(analysis_result_handler::<S>),
        )
        .route(
            "/analysis/{series_id}/stream",
            get(analysis_stream_handler::<S>),
        )
        .route(
            "/analysis/{series_id}/status",
            get(analysis_status_handler::<S>),
        )
        .route("/models/{series_id}", post(start_model_handler::<S>))
        .route("/models/{series_id}/status", get(model_status_handler::<S>))
        .route(
            "/models/{series_id}/download",
            get(model_download_handler::<S>),
        )
        .route("/series", delete(clear_all_handler::<S>))
        .route("/series/{series_id}", delete(clear_series_handler::<S>))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
