use crate::config::OllamaConfig;
use crate::services::provider::EmbeddingProvider;
use crate::utils::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Embedding client for an Ollama compatible server.
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
        }
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(BackendError::from_status(response).await);
        }

        let json_value: Value = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        let embedding = parse_embedding(&json_value)?;

        if self.dimension > 0 && embedding.len() != self.dimension {
            return Err(BackendError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }
}

fn floats(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Accepts the response shapes of the common embedding servers:
/// `{"embedding": [...]}`, `{"embeddings": [[...]]}`,
/// `{"data": [{"embedding": [...]}]}`, `[{"embedding": [...]}]` and `[...]`.
fn parse_embedding(value: &Value) -> Result<Vec<f32>, BackendError> {
    let embedding = if let Some(arr) = value.get("embedding").and_then(Value::as_array) {
        floats(arr)
    } else if let Some(first) = value
        .get("embeddings")
        .and_then(Value::as_array)
        .and_then(|outer| outer.first())
        .and_then(Value::as_array)
    {
        floats(first)
    } else if let Some(first) = value
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .and_then(|d| d.get("embedding"))
        .and_then(Value::as_array)
    {
        floats(first)
    } else if let Some(arr) = value.as_array() {
        match arr.first() {
            None => return Err(BackendError::EmptyEmbedding),
            Some(first) => match first.get("embedding").and_then(Value::as_array) {
                Some(inner) => floats(inner),
                None => floats(arr),
            },
        }
    } else {
        return Err(BackendError::MalformedResponse(format!(
            "Unrecognized embedding response format: {}",
            value
        )));
    };

    if embedding.is_empty() {
        return Err(BackendError::EmptyEmbedding);
    }

    Ok(embedding)
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.embed_internal(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, dimension: usize) -> OllamaConfig {
        OllamaConfig {
            base_url: server.uri(),
            timeout_seconds: 5,
            embedding_dimension: dimension,
            ..OllamaConfig::default()
        }
    }

    #[test]
    fn test_parse_known_shapes() {
        let shapes = [
            json!({"embedding": [0.5, 1.0]}),
            json!({"embeddings": [[0.5, 1.0]]}),
            json!({"data": [{"embedding": [0.5, 1.0]}]}),
            json!([{"embedding": [0.5, 1.0]}]),
            json!([0.5, 1.0]),
        ];
        for shape in shapes {
            assert_eq!(parse_embedding(&shape).unwrap(), vec![0.5, 1.0], "{}", shape);
        }
    }

    #[test]
    fn test_parse_rejects_empty_and_unknown() {
        assert!(matches!(
            parse_embedding(&json!({"embedding": []})),
            Err(BackendError::EmptyEmbedding)
        ));
        assert!(matches!(
            parse_embedding(&json!([])),
            Err(BackendError::EmptyEmbedding)
        ));
        assert!(matches!(
            parse_embedding(&json!({"vector": [1.0]})),
            Err(BackendError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_embed_posts_model_and_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_json(json!({"model": "nomic-embed-text", "prompt": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [1.0, 2.0, 3.0]})))
            .expect(1)
            .mount(&server)
            .await;

        let service = EmbeddingService::new(&config_for(&server, 0));
        let embedding = service.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_embed_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let service = EmbeddingService::new(&config_for(&server, 0));
        match service.embed("hello").await {
            Err(BackendError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embed_checks_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [1.0, 2.0]})))
            .mount(&server)
            .await;

        let service = EmbeddingService::new(&config_for(&server, 4));
        assert!(matches!(
            service.embed("hello").await,
            Err(BackendError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }
}
