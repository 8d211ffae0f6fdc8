pub mod settings;

pub use settings::{
    DifyConfig, KnowledgeConfig, MessagesConfig, OllamaConfig, PrecomputeConfig, RoutingConfig,
    SearchConfig, ServerConfig, Settings,
};
