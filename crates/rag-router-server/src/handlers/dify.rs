use crate::config::Settings;
use crate::handlers::validate_text;
use crate::models::{ApiResponse, ChatMessageRequest, ChatMessageResponse};
use crate::services::DifyService;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationInfo {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// POST /api/dify/chat
pub async fn chat(
    State(dify_service): State<Arc<DifyService>>,
    State(settings): State<Arc<Settings>>,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ApiResponse<ChatMessageResponse>>, ApiError> {
    send(dify_service, request, &settings.dify.default_user).await
}

/// POST /api/dify/chat/{user_id}
pub async fn chat_for_user(
    State(dify_service): State<Arc<DifyService>>,
    Path(user_id): Path<String>,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ApiResponse<ChatMessageResponse>>, ApiError> {
    send(dify_service, request, &user_id).await
}

async fn send(
    dify_service: Arc<DifyService>,
    request: ChatMessageRequest,
    user_id: &str,
) -> Result<Json<ApiResponse<ChatMessageResponse>>, ApiError> {
    validate_text("message", &request.message)?;
    info!("Direct Dify call for user {}", user_id);

    match dify_service.send(&request, user_id).await {
        Ok(response) => Ok(Json(ApiResponse::success(response))),
        Err(e) => {
            error!("Dify call failed for user {}: {}", user_id, e);
            Err(ApiError::ServiceUnavailable(format!("Dify call failed: {}", e)))
        }
    }
}

/// GET /api/dify/conversation/{user_id}
pub async fn get_conversation(
    State(dify_service): State<Arc<DifyService>>,
    Path(user_id): Path<String>,
) -> Json<ApiResponse<ConversationInfo>> {
    let conversation_id = dify_service.current_conversation(&user_id);
    Json(ApiResponse::success(ConversationInfo {
        user_id,
        conversation_id,
    }))
}

/// DELETE /api/dify/conversation/{user_id}
pub async fn clear_conversation(
    State(dify_service): State<Arc<DifyService>>,
    Path(user_id): Path<String>,
) -> Json<ApiResponse<ConversationInfo>> {
    dify_service.clear_conversation(&user_id);
    Json(ApiResponse::success(ConversationInfo {
        user_id,
        conversation_id: None,
    }))
}

/// GET /api/dify/health
pub async fn health(
    State(dify_service): State<Arc<DifyService>>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    if dify_service.check_health().await {
        (
            StatusCode::OK,
            Json(ApiResponse::success("Dify service is running".to_string())),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(503, "Dify service is unavailable")),
        )
    }
}
