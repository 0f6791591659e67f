//! HTTP request handlers
//!
//! Handlers translate JSON bodies into service calls and service errors into
//! status codes. All validation lives in `kgx-tasks`.

use async_stream::stream;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use chrono::Utc;
use kgx_llm::{ModelConfig, ProviderFactory};
use kgx_tasks::{
    ExtractionService, FileSpec, MaterialId, ProgressEvent, ServiceStatus, Task, TaskError,
    TaskId, TaskPage, TaskRequest, TaskStatus,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::{debug, info};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Shared application state
pub struct AppState<F: ProviderFactory> {
    /// Task orchestration service
    pub service: Arc<ExtractionService<F>>,
    /// Page size when none is requested
    pub default_page_size: usize,
    /// Upper bound on requested page sizes
    pub max_page_size: usize,
}

impl<F: ProviderFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }
}

/// One entry of the `files` array: a bare location or an object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    /// Location only
    Location(String),
    /// Location with a correlation id
    Detailed {
        /// Correlation id echoed back in results
        #[serde(default)]
        material_id: Option<MaterialId>,
        /// Local path, upload name or URL
        url: String,
    },
}

impl From<FileEntry> for FileSpec {
    fn from(entry: FileEntry) -> Self {
        match entry {
            FileEntry::Location(location) => FileSpec::new(location),
            FileEntry::Detailed { material_id, url } => FileSpec {
                material_id,
                location: url,
            },
        }
    }
}

/// Task creation request
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Input files, processed in order
    pub files: Vec<FileEntry>,
    /// Extraction prompt
    pub prompt_text: String,
    /// Provider name
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model override
    #[serde(default)]
    pub model: Option<String>,
    /// API credential
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    ModelConfig::default().provider
}

impl From<CreateTaskRequest> for TaskRequest {
    fn from(request: CreateTaskRequest) -> Self {
        let model = ModelConfig {
            provider: request.provider,
            model: request.model,
            base_url: request.base_url,
            api_key: request.api_key,
        };
        TaskRequest::new(
            request.files.into_iter().map(FileSpec::from).collect(),
            request.prompt_text,
            model,
        )
    }
}

/// Task creation response
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    /// New task id
    pub task_id: String,
    /// Always `created`
    pub status: String,
    /// Human-readable note
    pub message: String,
}

/// Cancellation response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Cancelled task
    pub task_id: String,
    /// Human-readable note
    pub message: String,
}

/// Listing query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Status filter
    pub status: Option<String>,
    /// Page size
    pub limit: Option<usize>,
    /// Tasks to skip
    pub offset: Option<usize>,
}

/// Cleanup request body
#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    /// Retention window in days
    pub days: Option<u64>,
}

/// Cleanup response
#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    /// Removed tasks
    pub removed: usize,
    /// Retention window applied
    pub days: u64,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Overall health status
    pub status: String,
    /// Response time, RFC 3339
    pub timestamp: String,
    /// Service name
    pub service: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

/// Application error type
#[derive(Debug)]
pub enum ApiError {
    /// Service error
    Task(TaskError),
    /// Malformed request parameter
    BadRequest(String),
    /// Nothing at this location
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Task(e) => {
                let status = match &e {
                    TaskError::Validation(_) => StatusCode::BAD_REQUEST,
                    TaskError::NotFound(_) => StatusCode::NOT_FOUND,
                    TaskError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                    TaskError::System(_) | TaskError::Config(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        ApiError::Task(e)
    }
}

/// Unparseable ids cannot name a task
fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse::<TaskId>()
        .map_err(|_| ApiError::Task(TaskError::Validation(format!("Invalid task id: {}", raw))))
}

/// GET /health
async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        service: "kgx".to_string(),
    })
}

/// POST /api/v1/tasks
async fn create_task<F: ProviderFactory>(
    State(state): State<AppState<F>>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let file_count = request.files.len();
    let task_id = state.service.create_task(request.into())?;
    info!("Accepted task {} with {} files", task_id, file_count);

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            task_id: task_id.to_string(),
            status: "created".to_string(),
            message: format!("Task created with {} files", file_count),
        }),
    ))
}

/// GET /api/v1/tasks/{id}
async fn get_task<F: ProviderFactory>(
    State(state): State<AppState<F>>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task_id = parse_task_id(&task_id)
        .map_err(|_| ApiError::NotFound(format!("Task not found: {}", task_id)))?;
    Ok(Json(state.service.task(task_id)?))
}

/// DELETE /api/v1/tasks/{id}
async fn cancel_task<F: ProviderFactory>(
    State(state): State<AppState<F>>,
    Path(task_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let task_id = parse_task_id(&task_id)?;
    if state.service.cancel_task(task_id) {
        Ok(Json(CancelResponse {
            task_id: task_id.to_string(),
            message: "Task cancellation requested".to_string(),
        }))
    } else {
        Err(ApiError::BadRequest(
            "Task not found or already finished".to_string(),
        ))
    }
}

/// GET /api/v1/tasks
async fn list_tasks<F: ProviderFactory>(
    State(state): State<AppState<F>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TaskPage>, ApiError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let limit = query
        .limit
        .unwrap_or(state.default_page_size)
        .clamp(1, state.max_page_size);
    let offset = query.offset.unwrap_or(0);

    Ok(Json(state.service.list_tasks(status, limit, offset)))
}

/// GET /api/v1/tasks/{id}/stream
async fn stream_task<F: ProviderFactory>(
    State(state): State<AppState<F>>,
    Path(task_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = task_id
        .parse::<TaskId>()
        .ok()
        .map(|id| state.service.subscribe(id));

    let events = stream! {
        match subscription {
            Some(mut subscription) => {
                debug!("SSE stream opened for task {}", subscription.task_id());
                while let Some(event) = subscription.next().await {
                    yield Ok(Event::default().data(event.to_json().to_string()));
                }
                debug!("SSE stream closed for task {}", subscription.task_id());
            }
            None => {
                yield Ok(Event::default().data(ProgressEvent::NotFound.to_json().to_string()));
            }
        }
    };

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// GET /api/v1/service/status
async fn service_status<F: ProviderFactory>(
    State(state): State<AppState<F>>,
) -> Json<ServiceStatus> {
    Json(state.service.status())
}

/// POST /api/v1/service/cleanup
async fn cleanup<F: ProviderFactory>(
    State(state): State<AppState<F>>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let days = body
        .and_then(|Json(request)| request.days)
        .unwrap_or(state.service.config().retention_days);
    let window = days
        .checked_mul(SECS_PER_DAY)
        .map(Duration::from_secs)
        .ok_or_else(|| ApiError::BadRequest(format!("days out of range: {}", days)))?;

    let removed = state.service.cleanup(window).await?;
    Ok(Json(CleanupResponse { removed, days }))
}

/// Create the axum router with all routes
pub fn create_router<F: ProviderFactory>(state: AppState<F>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/tasks", post(create_task::<F>).get(list_tasks::<F>))
        .route(
            "/api/v1/tasks/:task_id",
            get(get_task::<F>).delete(cancel_task::<F>),
        )
        .route("/api/v1/tasks/:task_id/stream", get(stream_task::<F>))
        .route("/api/v1/service/status", get(service_status::<F>))
        .route("/api/v1/service/cleanup", post(cleanup::<F>))
        .with_state(state)
}
