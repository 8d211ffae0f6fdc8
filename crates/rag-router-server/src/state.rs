use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Settings;
use crate::knowledge::MarkdownKnowledgeLoader;
use crate::services::{DifyService, EmbeddingService, LlmService, RagService, SmartRouter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub rag_service: Arc<RagService>,
    pub dify_service: Arc<DifyService>,
    pub smart_router: Arc<SmartRouter>,
}

impl AppState {
    /// Wire the production services from configuration.
    pub fn new(settings: Settings) -> Self {
        let rag_service = Arc::new(RagService::new(
            Arc::new(MarkdownKnowledgeLoader::new(&settings.knowledge.path)),
            Arc::new(EmbeddingService::new(&settings.ollama)),
            Arc::new(LlmService::new(&settings.ollama)),
            settings.search.clone(),
            settings.precompute.clone(),
            settings.messages.clone(),
        ));
        let dify_service = Arc::new(DifyService::new(&settings.dify));

        Self::from_services(settings, rag_service, dify_service)
    }

    pub fn from_services(
        settings: Settings,
        rag_service: Arc<RagService>,
        dify_service: Arc<DifyService>,
    ) -> Self {
        let smart_router = Arc::new(SmartRouter::new(
            rag_service.clone(),
            dify_service.clone(),
            settings.routing.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            rag_service,
            dify_service,
            smart_router,
        }
    }
}

impl FromRef<AppState> for Arc<Settings> {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}

impl FromRef<AppState> for Arc<RagService> {
    fn from_ref(state: &AppState) -> Self {
        state.rag_service.clone()
    }
}

impl FromRef<AppState> for Arc<DifyService> {
    fn from_ref(state: &AppState) -> Self {
        state.dify_service.clone()
    }
}

impl FromRef<AppState> for Arc<SmartRouter> {
    fn from_ref(state: &AppState) -> Self {
        state.smart_router.clone()
    }
}
