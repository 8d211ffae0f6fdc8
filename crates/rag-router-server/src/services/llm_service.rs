use crate::config::OllamaConfig;
use crate::services::provider::GenerationProvider;
use crate::utils::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Blocking (non-streaming) generation client for an Ollama compatible server.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    base_url: String,
    model: String,
}

impl LlmService {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.chat_model.clone(),
        }
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_text(&self, prompt: &str) -> Result<String, BackendError> {
        debug!("Starting generation with {} chars of prompt", prompt.len());

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::from_status(response).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        match body.response {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(BackendError::EmptyAnswer),
        }
    }

    /// List installed models, which doubles as a connectivity check.
    pub async fn list_models(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::from_status(response).await);
        }

        debug!("Ollama reachable: {}", response.status());
        Ok(())
    }
}

#[async_trait]
impl GenerationProvider for LlmService {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        self.generate_text(prompt).await
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.list_models().await
    }
}
