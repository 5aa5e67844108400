//! HTTP request handlers for the tissue-recon API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /analysis/{series_id}` - Start an analysis
//! - `GET /analysis/{series_id}/stream` - Start or join an analysis, stream progress (SSE)
//! - `GET /analysis/{series_id}/status` - Analysis job snapshot
//! - `GET /analysis/{series_id}` - Cached analysis result
//! - `POST /models/{series_id}` - Start model generation
//! - `GET /models/{series_id}/status` - Model status
//! - `GET /models/{series_id}/download` - Encoded model
//! - `DELETE /series/{series_id}` - Clear one series
//! - `DELETE /series` - Clear every series
//! - `GET /legend` - Tissue colour legend

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::classify::TissueLabel;
use crate::error::{ExportError, JobError, VolumeError};
use crate::job::{Job, ModelState, ModelStatus};
use crate::mesh::{LegendEntry, MeshFormat};
use crate::pipeline::Pipeline;
use crate::stats::AnalysisResult;
use crate::volume::VolumeSource;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
pub struct AppState<S> {
    pub pipeline: Pipeline<S>,
}

impl<S: VolumeSource + 'static> AppState<S> {
    pub fn new(pipeline: Pipeline<S>) -> Self {
        Self { pipeline }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for model generation.
#[derive(Debug, Default, Deserialize)]
pub struct ModelQueryParams {
    /// Comma-separated tissue names (default: visceral fat, subcutaneous fat, organ)
    #[serde(default)]
    pub include: Option<String>,
}

impl ModelQueryParams {
    /// Parsed tissue list; `None` when the parameter is absent or empty.
    pub fn tissues(&self) -> Result<Option<Vec<TissueLabel>>, ApiError> {
        let Some(raw) = self.include.as_deref() else {
            return Ok(None);
        };
        let tissues = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<TissueLabel>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok((!tissues.is_empty()).then_some(tissues))
    }
}

/// Query parameters for model downloads.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQueryParams {
    /// `mesh-binary` (default) or `mesh-text`
    #[serde(default)]
    pub format: Option<String>,
}

impl DownloadQueryParams {
    pub fn format(&self) -> Result<MeshFormat, ApiError> {
        match self.format.as_deref() {
            None => Ok(MeshFormat::Binary),
            Some(raw) => raw.parse().map_err(ApiError::BadRequest),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "analysis_required")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Acknowledgement of a model generation request.
#[derive(Debug, Serialize)]
pub struct ModelStartResponse {
    pub series_id: String,
    pub job_id: u64,
    pub status: ModelState,
    pub message: String,
}

/// Response of the clear endpoints.
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
}

/// Response of the legend endpoint.
#[derive(Debug, Serialize)]
pub struct LegendResponse {
    pub tissues: Vec<LegendEntry>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Errors surfaced by the handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Nothing cached or running for the series
    NotFound(String),

    /// Malformed query parameter
    BadRequest(String),

    Job(JobError),
    Export(ExportError),
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        ApiError::Job(err)
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        ApiError::Export(err)
    }
}

/// 4xx errors are logged at debug/warn, 5xx at error.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message.clone()),

            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "invalid_request", message.clone())
            }

            ApiError::Job(err @ JobError::PreconditionUnmet { .. }) => {
                (StatusCode::CONFLICT, "analysis_required", err.to_string())
            }

            ApiError::Job(err @ JobError::InputUnavailable(VolumeError::NotFound(_))) => {
                (StatusCode::NOT_FOUND, "not_found", err.to_string())
            }

            ApiError::Job(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "job_error",
                err.to_string(),
            ),

            ApiError::Export(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "export_error",
                format!("Failed to encode model: {}", err),
            ),
        };

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /analysis/{series_id}`
///
/// Starts an analysis (or joins the running one) and returns `202 Accepted`
/// with the job snapshot. The job is detached: stream clients that join and
/// then disconnect do not cancel it.
pub async fn start_analysis_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
    Path(series_id): Path<String>,
) -> (StatusCode, Json<Job>) {
    let job = state.pipeline.analysis().start(&series_id).await;
    job.detach();
    (StatusCode::ACCEPTED, Json(job.snapshot()))
}

/// `GET /analysis/{series_id}/stream`
///
/// Server-sent events, one per progress event, named after the event type
/// (`start`, `progress`, `complete`, `error`, `cancelled`). The stream ends
/// after the terminal event. Closing the connection cancels the analysis once
/// no other client is listening, unless the job was started through
/// `POST /analysis/{series_id}`.
pub async fn analysis_stream_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
    Path(series_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let job = state.pipeline.analysis().start(&series_id).await;
    info!(series_id = %series_id, job_id = job.id(), "Streaming analysis progress");

    let events = job.subscribe();
    let stream = stream::unfold(events, |mut events| async move {
        let event = events.next().await?;
        let sse = Event::default()
            .event(event.kind.as_str())
            .json_data(&event);
        Some((sse, events))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /analysis/{series_id}/status`
pub async fn analysis_status_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
    Path(series_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .pipeline
        .analysis()
        .status(&series_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No analysis for series {}", series_id)))
}

/// `GET /analysis/{series_id}`
pub async fn analysis_result_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
    Path(series_id): Path<String>,
) -> Result<Json<AnalysisResult>, ApiError> {
    state
        .pipeline
        .analysis()
        .result(&series_id)
        .await
        .map(|result| Json(result.as_ref().clone()))
        .ok_or_else(|| ApiError::NotFound(format!("No analysis result for series {}", series_id)))
}

/// `POST /models/{series_id}?include=visceral_fat,organ`
///
/// - `202 Accepted`: generation started or already running
/// - `400 Bad Request`: unknown tissue name
/// - `409 Conflict`: the series has no analysis yet
pub async fn start_model_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
    Path(series_id): Path<String>,
    Query(query): Query<ModelQueryParams>,
) -> Result<(StatusCode, Json<ModelStartResponse>), ApiError> {
    let include = query.tissues()?;
    let models = state.pipeline.models();
    let job = models.start(&series_id, include).await?;
    let status = models.status(&series_id).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(ModelStartResponse {
            series_id,
            job_id: job.id(),
            status: status.status,
            message: "Model generation started".to_string(),
        }),
    ))
}

/// `GET /models/{series_id}/status`
pub async fn model_status_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
    Path(series_id): Path<String>,
) -> Json<ModelStatus> {
    Json(state.pipeline.models().status(&series_id).await)
}

/// `GET /models/{series_id}/download?format=mesh-binary|mesh-text`
///
/// - `200 OK`: encoded model with `Content-Disposition: attachment`
/// - `400 Bad Request`: unknown format
/// - `404 Not Found`: no model cached for the series
pub async fn model_download_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
    Path(series_id): Path<String>,
    Query(query): Query<DownloadQueryParams>,
) -> Result<Response, ApiError> {
    let format = query.format()?;
    let bytes = state
        .pipeline
        .models()
        .download(&series_id, format)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No model for series {}", series_id)))?;

    let filename = format!(
        "{}_model.{}",
        urlencoding::encode(&series_id),
        format.extension()
    );
    let headers = [
        (header::CONTENT_TYPE, format.content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    Ok((StatusCode::OK, headers, bytes).into_response())
}

/// `DELETE /series/{series_id}`
pub async fn clear_series_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
    Path(series_id): Path<String>,
) -> Json<ClearResponse> {
    state.pipeline.clear_series(&series_id).await;
    Json(ClearResponse {
        message: "Series cleared".to_string(),
        series_id: Some(series_id),
    })
}

/// `DELETE /series`
pub async fn clear_all_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<ClearResponse> {
    state.pipeline.clear_all().await;
    Json(ClearResponse {
        message: "All series cleared".to_string(),
        series_id: None,
    })
}

/// `GET /legend`
pub async fn legend_handler<S: VolumeSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<LegendResponse> {
    Json(LegendResponse {
        tissues: state.pipeline.legend(),
    })
}

// =============================================================================
// Tests
// =============================================================================
