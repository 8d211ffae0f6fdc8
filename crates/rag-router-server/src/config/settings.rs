use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub ollama: OllamaConfig,
    pub search: SearchConfig,
    pub precompute: PrecomputeConfig,
    pub knowledge: KnowledgeConfig,
    pub dify: DifyConfig,
    pub routing: RoutingConfig,
    pub messages: MessagesConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Local Ollama backend used for both embeddings and answer generation.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub timeout_seconds: u64,
    /// Expected embedding length, 0 disables the check.
    pub embedding_dimension: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            chat_model: "qwen2:7b".to_string(),
            timeout_seconds: 120,
            embedding_dimension: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub similarity_threshold: f32,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_results: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PrecomputeConfig {
    /// Pause between two embedding calls of the precompute worker.
    pub delay_ms: u64,
}

impl Default for PrecomputeConfig {
    fn default() -> Self {
        Self { delay_ms: 1000 }
    }
}

impl PrecomputeConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub path: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: "knowledge/bot.md".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DifyConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub timeout_seconds: u64,
    pub default_user: String,
}

impl Default for DifyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/v1".to_string(),
            api_key: String::new(),
            timeout_seconds: 30,
            default_user: "rag-try-user".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RoutingConfig {
    pub enabled: bool,
    /// rag-first | dify-first | parallel
    pub strategy: String,
    pub fallback_enabled: bool,
    /// Window of the parallel race, applied to the race as a whole.
    pub timeout_seconds: u64,
    /// Abort the losing parallel call instead of leaving it to finish.
    pub cancel_abandoned: bool,
    /// An answer containing any of these is treated as a failed backend reply.
    pub degraded_markers: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: "rag-first".to_string(),
            fallback_enabled: true,
            timeout_seconds: 30,
            cancel_abandoned: false,
            degraded_markers: vec![
                "系统暂时繁忙".to_string(),
                "无法理解".to_string(),
                "system busy".to_string(),
                "could not understand".to_string(),
            ],
        }
    }
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// User facing texts returned when retrieval degrades.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MessagesConfig {
    pub could_not_understand: String,
    pub system_busy: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            could_not_understand:
                "抱歉，我无法理解您的问题。请尝试换个说法，或者联系人工客服获得帮助。".to_string(),
            system_busy: "系统暂时繁忙，请稍后再试。".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(environment())
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}

/// `APP__SECTION__KEY` overrides; list values are comma separated.
fn environment() -> Environment {
    Environment::with_prefix("APP")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("routing.degraded_markers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.search.similarity_threshold, 0.7);
        assert_eq!(settings.search.max_results, 5);
        assert_eq!(settings.routing.strategy, "rag-first");
        assert!(settings.routing.fallback_enabled);
        assert!(!settings.routing.cancel_abandoned);
        assert_eq!(settings.precompute.delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::builder()
            .add_source(File::from_str(
                "[routing]\nstrategy = \"parallel\"\ntimeout_seconds = 2\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();

        assert_eq!(settings.routing.strategy, "parallel");
        assert_eq!(settings.routing.timeout(), Duration::from_secs(2));
        assert!(settings.routing.enabled);
        assert_eq!(settings.ollama.embedding_model, "nomic-embed-text");
    }

    #[test]
    fn test_env_overrides_lists_and_scalars() {
        let mut vars = config::Map::new();
        vars.insert(
            "APP__ROUTING__DEGRADED_MARKERS".to_string(),
            "busy,offline".to_string(),
        );
        vars.insert("APP__ROUTING__TIMEOUT_SECONDS".to_string(), "3".to_string());
        vars.insert("APP__DIFY__API_KEY".to_string(), "app-1,2".to_string());

        let config = Config::builder()
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();

        assert_eq!(settings.routing.degraded_markers, vec!["busy", "offline"]);
        assert_eq!(settings.routing.timeout(), Duration::from_secs(3));
        assert_eq!(settings.dify.api_key, "app-1,2");
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut settings = Settings::default();
        settings.dify.api_key = "app-secret".to_string();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("app-secret"));
    }
}
