use crate::handlers::validate_text;
use crate::models::{ApiResponse, ChatMessageRequest, ChatMessageResponse};
use crate::services::smart_router::{RoutingStrategy, DEFAULT_USER};
use crate::services::SmartRouter;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct StrategyRecommendation {
    pub strategy: RoutingStrategy,
    pub current: RoutingStrategy,
}

/// POST /api/chat/send
pub async fn send_message(
    State(router): State<Arc<SmartRouter>>,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ApiResponse<ChatMessageResponse>>, ApiError> {
    route(router, request, DEFAULT_USER).await
}

/// POST /api/chat/send/{user_id}
pub async fn send_message_for_user(
    State(router): State<Arc<SmartRouter>>,
    Path(user_id): Path<String>,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ApiResponse<ChatMessageResponse>>, ApiError> {
    route(router, request, &user_id).await
}

async fn route(
    router: Arc<SmartRouter>,
    request: ChatMessageRequest,
    user_id: &str,
) -> Result<Json<ApiResponse<ChatMessageResponse>>, ApiError> {
    validate_text("message", &request.message)?;
    info!(
        "Chat request from {}: {} chars",
        user_id,
        request.message.chars().count()
    );

    let response = router.route(&request, user_id).await;
    Ok(Json(ApiResponse::success(response)))
}

/// GET /api/chat/strategy/recommend
pub async fn recommend_strategy(
    State(router): State<Arc<SmartRouter>>,
) -> Json<ApiResponse<StrategyRecommendation>> {
    let strategy = router.recommend_strategy().await;
    Json(ApiResponse::success(StrategyRecommendation {
        strategy,
        current: router.strategy(),
    }))
}

/// GET /api/chat/health
pub async fn health(
    State(router): State<Arc<SmartRouter>>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let health = router.check_services_health().await;
    if health.overall() {
        (
            StatusCode::OK,
            Json(ApiResponse::success("services are running".to_string())),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(503, "no backend is available")),
        )
    }
}
