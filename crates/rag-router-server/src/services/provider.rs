//! Traits at the backend seams.
//!
//! The retrieval engine talks to [`EmbeddingProvider`] and [`GenerationProvider`];
//! the smart router talks to [`RetrievalBackend`] and [`ConversationBackend`].
//! Production types live next door, tests plug in mocks or fakes.

use async_trait::async_trait;

use crate::models::{AnswerSource, ChatMessageRequest, ChatMessageResponse};
use crate::utils::error::BackendError;

/// Text embedding backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. An empty vector is reported as an error, never returned.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

/// Text generation backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;

    /// Cheap connectivity check against the backend.
    async fn probe(&self) -> Result<(), BackendError>;
}

/// Answer of the retrieval engine together with the step that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalAnswer {
    pub text: String,
    pub source: AnswerSource,
}

/// Local retrieval engine as seen by the router.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Never fails: degraded paths come back as apology texts.
    async fn answer(&self, question: &str) -> RetrievalAnswer;

    async fn check_health(&self) -> bool;
}

/// Remote conversational service as seen by the router.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn send_message(
        &self,
        request: &ChatMessageRequest,
        user_id: &str,
    ) -> Result<ChatMessageResponse, BackendError>;

    async fn check_health(&self) -> bool;
}
