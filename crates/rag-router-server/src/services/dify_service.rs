use crate::config::DifyConfig;
use crate::models::{AnswerSource, ChatMessageRequest, ChatMessageResponse, ResponseMode};
use crate::services::provider::ConversationBackend;
use crate::utils::error::BackendError;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const HEALTH_CHECK_MESSAGE: &str = "健康检查";
const HEALTH_CHECK_USER: &str = "health-check-user";

/// Remembers the remote conversation each user is currently in.
#[derive(Default)]
pub struct ConversationRegistry {
    conversations: DashMap<String, String>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<String> {
        self.conversations.get(user_id).map(|c| c.value().clone())
    }

    pub fn set(&self, user_id: &str, conversation_id: impl Into<String>) {
        self.conversations
            .insert(user_id.to_string(), conversation_id.into());
    }

    pub fn clear(&self, user_id: &str) -> Option<String> {
        self.conversations.remove(user_id).map(|(_, c)| c)
    }

    /// Conversation to continue: the one named by the request (which becomes
    /// the user's current one) or the remembered one.
    pub fn resolve(&self, user_id: &str, requested: Option<&str>) -> Option<String> {
        match requested.filter(|c| !c.trim().is_empty()) {
            Some(conversation_id) => {
                self.set(user_id, conversation_id);
                Some(conversation_id.to_string())
            }
            None => self.get(user_id),
        }
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct ChatMessagesRequest<'a> {
    inputs: Map<String, Value>,
    query: &'a str,
    response_mode: ResponseMode,
    user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatMessagesResponse {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

/// Client for the hosted conversational service (Dify compatible API).
pub struct DifyService {
    client: Client,
    base_url: String,
    api_key: String,
    conversations: ConversationRegistry,
}

impl DifyService {
    pub fn new(config: &DifyConfig) -> Self {
        if config.api_key.is_empty() {
            warn!("Dify API key is not configured, remote calls will be rejected");
        }

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            conversations: ConversationRegistry::new(),
        }
    }

    pub fn conversations(&self) -> &ConversationRegistry {
        &self.conversations
    }

    pub async fn send(
        &self,
        request: &ChatMessageRequest,
        user_id: &str,
    ) -> Result<ChatMessageResponse, BackendError> {
        info!("Sending message to Dify for user {}", user_id);

        let conversation_id = self
            .conversations
            .resolve(user_id, request.conversation_id.as_deref());

        let user = request
            .user
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(user_id);

        let body = ChatMessagesRequest {
            inputs: Map::new(),
            query: &request.message,
            response_mode: ResponseMode::Blocking,
            user,
            conversation_id: conversation_id.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/chat-messages", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::from_status(response).await);
        }

        let parsed: ChatMessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        let returned_conversation = parsed
            .conversation_id
            .filter(|c| !c.trim().is_empty());
        if let Some(ref c) = returned_conversation {
            self.conversations.set(user_id, c.clone());
        }

        let answer = parsed.answer.unwrap_or_default();
        debug!("Dify answered with {} chars", answer.chars().count());

        Ok(ChatMessageResponse {
            conversation_id: returned_conversation.or(conversation_id),
            message_id: parsed.message_id,
            task_id: parsed.task_id,
            answer,
            response_mode: ResponseMode::Blocking,
            source: AnswerSource::RemoteService,
        })
    }

    pub fn clear_conversation(&self, user_id: &str) {
        self.conversations.clear(user_id);
        info!("Cleared Dify conversation for user {}", user_id);
    }

    pub fn current_conversation(&self, user_id: &str) -> Option<String> {
        self.conversations.get(user_id)
    }

    pub async fn check_health(&self) -> bool {
        let request = ChatMessageRequest::new(HEALTH_CHECK_MESSAGE);
        match self.send(&request, HEALTH_CHECK_USER).await {
            Ok(response) => !response.answer.trim().is_empty(),
            Err(e) => {
                warn!("Dify health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ConversationBackend for DifyService {
    async fn send_message(
        &self,
        request: &ChatMessageRequest,
        user_id: &str,
    ) -> Result<ChatMessageResponse, BackendError> {
        self.send(request, user_id).await
    }

    async fn check_health(&self) -> bool {
        DifyService::check_health(self).await
    }
}
