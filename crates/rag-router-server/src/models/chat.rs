use serde::{Deserialize, Serialize};

/// Longest message accepted at the edge, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

// ===== REQUEST MODELS =====

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl ChatMessageRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RagQueryRequest {
    #[serde(default)]
    pub question: String,
}

// ===== RESPONSE MODELS =====

/// Backend that produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerSource {
    #[serde(rename = "RAG")]
    Rag,
    /// The externally hosted conversational service.
    #[serde(rename = "Dify")]
    RemoteService,
    #[serde(rename = "Keyword")]
    Keyword,
    #[serde(rename = "System")]
    System,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rag => "RAG",
            Self::RemoteService => "Dify",
            Self::Keyword => "Keyword",
            Self::System => "System",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Blocking,
}

/// Answer of one chat request, whichever backend produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub answer: String,
    pub response_mode: ResponseMode,
    pub source: AnswerSource,
}

impl ChatMessageResponse {
    pub fn new(answer: impl Into<String>, source: AnswerSource) -> Self {
        Self {
            conversation_id: None,
            message_id: None,
            task_id: None,
            answer: answer.into(),
            response_mode: ResponseMode::Blocking,
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagQueryResponse {
    pub answer: String,
    pub source: AnswerSource,
    pub response_time: u64,
    pub status: String,
}
