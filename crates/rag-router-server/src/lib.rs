pub mod config;
pub mod handlers;
pub mod knowledge;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;


use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let chat_routes = Router::new()
        .route("/send", post(handlers::chat::send_message))
        .route("/send/{user_id}", post(handlers::chat::send_message_for_user))
        .route("/strategy/recommend", get(handlers::chat::recommend_strategy))
        .route("/health", get(handlers::chat::health));

    let rag_routes = Router::new()
        .route("/query", post(handlers::rag::query))
        .route("/reload", post(handlers::rag::reload))
        .route("/health", get(handlers::rag::health));

    let dify_routes = Router::new()
        .route("/chat", post(handlers::dify::chat))
        .route("/chat/{user_id}", post(handlers::dify::chat_for_user))
        .route(
            "/conversation/{user_id}",
            get(handlers::dify::get_conversation).delete(handlers::dify::clear_conversation),
        )
        .route("/health", get(handlers::dify::health));

    let system_routes = Router::new()
        .route("/info", get(handlers::system::info))
        .route("/health", get(handlers::system::health))
        .route("/status", get(handlers::system::status))
        .route("/test", post(handlers::system::quick_test))
        .route("/docs", get(handlers::system::docs));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/chat", chat_routes)
        .nest("/api/rag", rag_routes)
        .nest("/api/dify", dify_routes)
        .nest("/api/system", system_routes)
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
}
