use crate::config::RoutingConfig;
use crate::models::{AnswerSource, ChatMessageRequest, ChatMessageResponse};
use crate::services::provider::{ConversationBackend, RetrievalBackend};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// User id used when a request names none.
pub const DEFAULT_USER: &str = "default-user";

pub const SYSTEM_FAILURE_MESSAGE: &str = "抱歉，所有服务都不可用。请稍后再试或联系人工客服。";

/// Policy deciding which backends answer a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoutingStrategy {
    #[serde(rename = "rag-first")]
    RagFirst,
    #[serde(rename = "dify-first")]
    RemoteFirst,
    #[serde(rename = "parallel")]
    Parallel,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RagFirst => "rag-first",
            Self::RemoteFirst => "dify-first",
            Self::Parallel => "parallel",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rag-first" => Some(Self::RagFirst),
            "dify-first" | "remote-first" => Some(Self::RemoteFirst),
            "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }

    /// Unknown names fall back to rag-first with a warning.
    pub fn parse_or_default(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            warn!("Unknown routing strategy '{}', using rag-first", name);
            Self::RagFirst
        })
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServicesHealth {
    #[serde(rename = "dify")]
    pub remote: bool,
    pub rag: bool,
}

impl ServicesHealth {
    pub fn overall(&self) -> bool {
        self.remote || self.rag
    }

    /// Race when both are up, otherwise lead with whichever is up.
    /// Neither up falls back to rag-first.
    pub fn recommended_strategy(&self) -> RoutingStrategy {
        match (self.remote, self.rag) {
            (true, true) => RoutingStrategy::Parallel,
            (false, true) => RoutingStrategy::RagFirst,
            (true, false) => RoutingStrategy::RemoteFirst,
            (false, false) => RoutingStrategy::RagFirst,
        }
    }
}

enum FirstFinished {
    Remote(Option<ChatMessageResponse>),
    Rag(Option<ChatMessageResponse>),
}

/// Chooses, chains or races the retrieval engine and the remote service.
pub struct SmartRouter {
    rag: Arc<dyn RetrievalBackend>,
    remote: Arc<dyn ConversationBackend>,
    config: RoutingConfig,
}

impl SmartRouter {
    pub fn new(
        rag: Arc<dyn RetrievalBackend>,
        remote: Arc<dyn ConversationBackend>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            rag,
            remote,
            config,
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        RoutingStrategy::parse_or_default(&self.config.strategy)
    }

    /// Answer one request. Never fails: exhausted backends produce a
    /// `System` response.
    pub async fn route(&self, request: &ChatMessageRequest, user_id: &str) -> ChatMessageResponse {
        let span = info_span!("route", request_id = %Uuid::new_v4(), user = %user_id);
        self.route_inner(request, user_id).instrument(span).await
    }

    async fn route_inner(&self, request: &ChatMessageRequest, user_id: &str) -> ChatMessageResponse {
        let start = Instant::now();

        if !self.config.enabled {
            debug!("Smart routing disabled, using RAG");
            return call_rag(self.rag.as_ref(), &request.message).await;
        }

        let strategy = self.strategy();
        info!("Routing with strategy {}: {}", strategy, request.message);

        let response = match strategy {
            RoutingStrategy::RagFirst => self.rag_first(request, user_id).await,
            RoutingStrategy::RemoteFirst => self.remote_first(request, user_id).await,
            RoutingStrategy::Parallel => self.parallel(request, user_id).await,
        };

        info!(
            "Strategy {} answered from {} in {:?}",
            strategy,
            response.source.as_str(),
            start.elapsed()
        );
        response
    }

    /// Non-empty answer containing none of the degraded markers.
    pub fn is_valid_response(&self, response: Option<&ChatMessageResponse>) -> bool {
        match response {
            Some(r) => {
                !r.answer.trim().is_empty()
                    && !self
                        .config
                        .degraded_markers
                        .iter()
                        .any(|marker| !marker.is_empty() && r.answer.contains(marker.as_str()))
            }
            None => false,
        }
    }

    async fn rag_first(&self, request: &ChatMessageRequest, user_id: &str) -> ChatMessageResponse {
        let rag = call_rag(self.rag.as_ref(), &request.message).await;
        if self.is_valid_response(Some(&rag)) {
            debug!("rag-first: RAG answer accepted");
            return rag;
        }

        if self.config.fallback_enabled {
            warn!("rag-first: RAG answer invalid, falling back to Dify");
            let remote = call_remote(self.remote.as_ref(), request, user_id).await;
            if let Some(response) = remote.filter(|r| self.is_valid_response(Some(r))) {
                return response;
            }
        }

        system_failure()
    }

    async fn remote_first(&self, request: &ChatMessageRequest, user_id: &str) -> ChatMessageResponse {
        let remote = call_remote(self.remote.as_ref(), request, user_id).await;
        if let Some(response) = remote.filter(|r| self.is_valid_response(Some(r))) {
            debug!("dify-first: Dify answer accepted");
            return response;
        }

        if self.config.fallback_enabled {
            warn!("dify-first: Dify answer invalid, falling back to RAG");
            let rag = call_rag(self.rag.as_ref(), &request.message).await;
            if self.is_valid_response(Some(&rag)) {
                return rag;
            }
        }

        system_failure()
    }

    /// Race both backends. The first completion, or the timeout, ends the
    /// wait; a task still running at that point is abandoned.
    async fn parallel(&self, request: &ChatMessageRequest, user_id: &str) -> ChatMessageResponse {
        let start = Instant::now();

        let mut remote_task: JoinHandle<Option<ChatMessageResponse>> = {
            let remote = self.remote.clone();
            let request = request.clone();
            let user_id = user_id.to_string();
            tokio::spawn(
                async move { call_remote(remote.as_ref(), &request, &user_id).await }
                    .in_current_span(),
            )
        };
        let mut rag_task: JoinHandle<Option<ChatMessageResponse>> = {
            let rag = self.rag.clone();
            let question = request.message.clone();
            tokio::spawn(async move { Some(call_rag(rag.as_ref(), &question).await) }.in_current_span())
        };

        let first = tokio::time::timeout(self.config.timeout(), async {
            tokio::select! {
                r = &mut remote_task => FirstFinished::Remote(joined("Dify", r)),
                r = &mut rag_task => FirstFinished::Rag(joined("RAG", r)),
            }
        })
        .await;

        let (remote, rag) = match first {
            Ok(FirstFinished::Remote(remote)) => {
                debug!("parallel: Dify finished first after {:?}", start.elapsed());
                (remote, self.collect_if_finished("RAG", rag_task).await)
            }
            Ok(FirstFinished::Rag(rag)) => {
                debug!("parallel: RAG finished first after {:?}", start.elapsed());
                (self.collect_if_finished("Dify", remote_task).await, rag)
            }
            Err(_) => {
                warn!(
                    "parallel: no backend answered within {:?}",
                    self.config.timeout()
                );
                self.abandon("Dify", remote_task);
                self.abandon("RAG", rag_task);
                (None, None)
            }
        };

        let remote_valid = self.is_valid_response(remote.as_ref());
        let rag_valid = self.is_valid_response(rag.as_ref());

        match (remote, rag) {
            (Some(remote), _) if remote_valid => {
                if rag_valid {
                    info!("parallel: both backends answered, preferring Dify");
                }
                remote
            }
            (_, Some(rag)) if rag_valid => rag,
            _ => system_failure(),
        }
    }

    async fn collect_if_finished(
        &self,
        name: &str,
        task: JoinHandle<Option<ChatMessageResponse>>,
    ) -> Option<ChatMessageResponse> {
        if task.is_finished() {
            joined(name, task.await)
        } else {
            self.abandon(name, task);
            None
        }
    }

    fn abandon(&self, name: &str, task: JoinHandle<Option<ChatMessageResponse>>) {
        if self.config.cancel_abandoned {
            debug!("parallel: aborting unfinished {} call", name);
            task.abort();
        } else {
            debug!("parallel: leaving unfinished {} call to complete on its own", name);
        }
    }

    /// Suggested strategy given current backend health.
    pub async fn recommend_strategy(&self) -> RoutingStrategy {
        self.check_services_health().await.recommended_strategy()
    }

    pub async fn check_services_health(&self) -> ServicesHealth {
        let (remote, rag) = tokio::join!(self.remote.check_health(), self.rag.check_health());
        info!("Services health - Dify: {}, RAG: {}", remote, rag);
        ServicesHealth { remote, rag }
    }
}

async fn call_rag(rag: &dyn RetrievalBackend, question: &str) -> ChatMessageResponse {
    let answer = rag.answer(question).await;
    ChatMessageResponse::new(answer.text, answer.source)
}

async fn call_remote(
    remote: &dyn ConversationBackend,
    request: &ChatMessageRequest,
    user_id: &str,
) -> Option<ChatMessageResponse> {
    match remote.send_message(request, user_id).await {
        Ok(response) => Some(response),
        Err(e) => {
            warn!("Dify call failed: {}", e);
            None
        }
    }
}

fn joined(
    name: &str,
    result: Result<Option<ChatMessageResponse>, JoinError>,
) -> Option<ChatMessageResponse> {
    result.unwrap_or_else(|e| {
        warn!("{} task failed: {}", name, e);
        None
    })
}

fn system_failure() -> ChatMessageResponse {
    ChatMessageResponse::new(SYSTEM_FAILURE_MESSAGE, AnswerSource::System)
}
