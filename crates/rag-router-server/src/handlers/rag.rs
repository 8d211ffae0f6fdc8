use crate::handlers::validate_text;
use crate::models::{AnswerSource, ApiResponse, RagQueryRequest, RagQueryResponse};
use crate::services::RagService;
use crate::utils::error::ApiError;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub items: usize,
}

/// POST /api/rag/query
pub async fn query(
    State(rag_service): State<Arc<RagService>>,
    Json(request): Json<RagQueryRequest>,
) -> Result<Json<ApiResponse<RagQueryResponse>>, ApiError> {
    validate_text("question", &request.question)?;
    info!("RAG query: {}", request.question);

    let start = Instant::now();
    let answer = rag_service.query(&request.question).await;

    Ok(Json(ApiResponse::success(RagQueryResponse {
        answer,
        source: AnswerSource::Rag,
        response_time: start.elapsed().as_millis() as u64,
        status: "success".to_string(),
    })))
}

/// POST /api/rag/reload
pub async fn reload(State(rag_service): State<Arc<RagService>>) -> Json<ApiResponse<ReloadResponse>> {
    let items = rag_service.reload().await;
    Json(ApiResponse::success(ReloadResponse { items }))
}

/// GET /api/rag/health
pub async fn health(
    State(rag_service): State<Arc<RagService>>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    if rag_service.check_health().await {
        (
            StatusCode::OK,
            Json(ApiResponse::success("RAG service is running".to_string())),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(503, "RAG service is unavailable")),
        )
    }
}
