use axum::{
    extract::{
        multipart::MultipartRejection, rejection::QueryRejection, DefaultBodyLimit, Multipart,
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use validator::Validate;

use crate::document::IngestReport;
use crate::error::PipelineError;
use crate::llm::Answer;
use crate::pipeline::RagPipeline;

const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<RagPipeline>,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub max_concurrent: usize,
    pub upload_limit_bytes: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            upload_limit_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnswerParams {
    #[validate(length(min = 1, max = 2000))]
    query: String,
    #[validate(range(min = 1, max = 20))]
    k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub message: String,
    pub extracted_text_chunks: usize,
    pub text_chunks: usize,
    pub tables: usize,
    pub markdown_chars: usize,
    pub documents_stored: usize,
}

impl From<IngestReport> for UploadResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            message: "File processed successfully".to_string(),
            extracted_text_chunks: report.fragments,
            text_chunks: report.fragments,
            tables: report.tables,
            markdown_chars: report.markdown_chars,
            documents_stored: report.documents_stored,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
    pub retryable: bool,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                error: message.into(),
                kind: "invalid_input".to_string(),
                retryable: false,
            },
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::RecognitionFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", err);
        } else {
            log::warn!("Request rejected: {}", err);
        }
        Self {
            status,
            body: ErrorBody {
                error: err.to_string(),
                kind: err.kind().to_string(),
                retryable: err.is_retryable(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Create and configure the API router
pub fn create_api(pipeline: Arc<RagPipeline>, settings: &ApiSettings) -> Router {
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/upload-image/", post(upload_image_handler))
        .route("/get-answer/", get(get_answer_handler))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(settings.upload_limit_bytes))
        .layer(GlobalConcurrencyLimitLayer::new(settings.max_concurrent.max(1)))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(router: Router, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("API server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn upload_image_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = upload
        .ok_or_else(|| ApiError::bad_request(format!("missing multipart field '{}'", UPLOAD_FIELD)))?;
    log::info!("Received upload {} ({} bytes)", filename, bytes.len());

    let report = state.pipeline.ingest_image(bytes.to_vec(), &filename).await?;
    Ok(Json(report.into()))
}

async fn get_answer_handler(
    State(state): State<AppState>,
    params: Result<Query<AnswerParams>, QueryRejection>,
) -> Result<Json<Answer>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    params
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let answer = state.pipeline.answer(&params.query, params.k).await?;
    Ok(Json(answer))
}

async fn health_check(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "index": state.pipeline.index_name(),
        "top_k": state.pipeline.top_k(),
    }))
    .into_response()
}
