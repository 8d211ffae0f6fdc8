pub mod chat;
pub mod knowledge;
pub mod response;

pub use chat::{
    AnswerSource, ChatMessageRequest, ChatMessageResponse, RagQueryRequest, RagQueryResponse,
    ResponseMode, MAX_MESSAGE_LENGTH,
};
pub use knowledge::{KnowledgeItem, SimilarityMatch};
pub use response::ApiResponse;
