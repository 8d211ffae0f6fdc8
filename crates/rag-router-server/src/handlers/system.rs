use crate::handlers::validate_text;
use crate::models::ApiResponse;
use crate::services::{RoutingStrategy, ServicesHealth};
use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::runtime::RuntimeStatus;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

const QUICK_TEST_MESSAGE: &str = "你好";
const QUICK_TEST_ANSWER_CHARS: usize = 100;

const ENDPOINTS: &[(&str, &str)] = &[
    ("chat", "POST /api/chat/send - routed chat"),
    ("chatForUser", "POST /api/chat/send/{user_id} - routed chat for a user"),
    ("recommend", "GET /api/chat/strategy/recommend - recommended routing strategy"),
    ("rag", "POST /api/rag/query - retrieval engine only"),
    ("ragReload", "POST /api/rag/reload - reload the knowledge base"),
    ("dify", "POST /api/dify/chat - Dify only"),
    ("conversation", "GET|DELETE /api/dify/conversation/{user_id} - current Dify conversation"),
    ("health", "GET /api/system/health - backend health"),
    ("info", "GET /api/system/info - effective configuration"),
    ("status", "GET /api/system/status - runtime status"),
    ("test", "POST /api/system/test?message= - quick round trip through both backends"),
    ("docs", "GET /api/system/docs - this list"),
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub config: EffectiveConfig,
}

/// Non-secret view of the running configuration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    pub dify_base_url: String,
    pub dify_timeout_seconds: u64,
    pub ollama_base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub routing_enabled: bool,
    pub strategy: RoutingStrategy,
    pub fallback_enabled: bool,
    pub parallel_timeout_seconds: u64,
    pub knowledge_items: usize,
    pub cached_embeddings: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub overall: bool,
    pub services: ServicesHealth,
    pub recommended_strategy: RoutingStrategy,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub runtime: RuntimeStatus,
    pub active_conversations: usize,
    pub cached_embeddings: usize,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct QuickTestParams {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendCheck {
    pub available: bool,
    /// Milliseconds.
    pub response_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuickTestReport {
    pub dify: BackendCheck,
    pub rag: BackendCheck,
}

/// GET /api/system/info
pub async fn info(State(state): State<AppState>) -> Json<ApiResponse<SystemInfo>> {
    let settings = &state.settings;

    Json(ApiResponse::success(SystemInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        config: EffectiveConfig {
            dify_base_url: settings.dify.base_url.clone(),
            dify_timeout_seconds: settings.dify.timeout_seconds,
            ollama_base_url: settings.ollama.base_url.clone(),
            embedding_model: settings.ollama.embedding_model.clone(),
            chat_model: settings.ollama.chat_model.clone(),
            similarity_threshold: settings.search.similarity_threshold,
            max_results: settings.search.max_results,
            routing_enabled: settings.routing.enabled,
            strategy: state.smart_router.strategy(),
            fallback_enabled: settings.routing.fallback_enabled,
            parallel_timeout_seconds: settings.routing.timeout_seconds,
            knowledge_items: state.rag_service.knowledge_len(),
            cached_embeddings: state.rag_service.cached_embeddings(),
        },
    }))
}

/// GET /api/system/health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<SystemHealth>>) {
    let services = state.smart_router.check_services_health().await;
    let report = SystemHealth {
        overall: services.overall(),
        services,
        recommended_strategy: services.recommended_strategy(),
        timestamp: Utc::now(),
    };

    if report.overall {
        (StatusCode::OK, Json(ApiResponse::success(report)))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error_with_data(503, "system services unavailable", report)),
        )
    }
}

/// GET /api/system/status
pub async fn status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SystemStatus>>, ApiError> {
    let runtime = tokio::task::spawn_blocking(RuntimeStatus::capture)
        .await
        .map_err(|e| ApiError::InternalError(format!("runtime sampling failed: {}", e)))?;

    Ok(Json(ApiResponse::success(SystemStatus {
        runtime,
        active_conversations: state.dify_service.conversations().len(),
        cached_embeddings: state.rag_service.cached_embeddings(),
        timestamp: Utc::now().timestamp_millis(),
    })))
}

/// POST /api/system/test?message=
pub async fn quick_test(
    State(state): State<AppState>,
    Query(params): Query<QuickTestParams>,
) -> Result<Json<ApiResponse<QuickTestReport>>, ApiError> {
    let message = params
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| QUICK_TEST_MESSAGE.to_string());
    validate_text("message", &message)?;
    info!("Quick test with message: {}", message);

    let start = Instant::now();
    let dify_available = state.dify_service.check_health().await;
    let dify = BackendCheck {
        available: dify_available,
        response_time: start.elapsed().as_millis() as u64,
        answer: None,
    };

    let start = Instant::now();
    let answer = state.rag_service.query(&message).await;
    let rag = BackendCheck {
        available: true,
        response_time: start.elapsed().as_millis() as u64,
        answer: Some(preview(&answer, QUICK_TEST_ANSWER_CHARS)),
    };

    Ok(Json(ApiResponse::success(QuickTestReport { dify, rag })))
}

/// GET /api/system/docs
pub async fn docs() -> Json<ApiResponse<BTreeMap<&'static str, &'static str>>> {
    Json(ApiResponse::success(ENDPOINTS.iter().copied().collect()))
}

/// First `max_chars` characters of `text`, marked with `...` when cut.
fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
