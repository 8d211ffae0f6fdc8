pub mod dify_service;
pub mod embedding_service;
pub mod embedding_store;
pub mod llm_service;
pub mod precompute;
pub mod provider;
pub mod rag_service;
pub mod smart_router;

pub use dify_service::{ConversationRegistry, DifyService};
pub use embedding_service::EmbeddingService;
pub use embedding_store::EmbeddingStore;
pub use llm_service::LlmService;
pub use precompute::{PrecomputeHandle, PrecomputeReport, PrecomputeWorker};
pub use rag_service::RagService;
pub use smart_router::{RoutingStrategy, ServicesHealth, SmartRouter};
