//! HTTP server layer for tissue-recon.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   /analysis/{series_id}   /models/{series_id}   /series         │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, SSE, errors)  │  │  (router, CORS, tracing)    │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 ▼
//!                              Pipeline
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    analysis_result_handler, analysis_status_handler, analysis_stream_handler,
    clear_all_handler, clear_series_handler, health_handler, legend_handler,
    model_download_handler, model_status_handler, start_analysis_handler, start_model_handler,
    ApiError, AppState, ClearResponse, DownloadQueryParams, ErrorResponse, HealthResponse,
    LegendResponse, ModelQueryParams, ModelStartResponse,
};
pub use routes::{create_router, RouterConfig};
