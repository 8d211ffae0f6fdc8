use serde::{Deserialize, Serialize};

/// One question/answer pair of the knowledge base. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub category: String,
}

impl KnowledgeItem {
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            answer: answer.into(),
            category: category.into(),
        }
    }

    /// Text sent to the embedding model for this item.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.question, self.answer)
    }
}

/// A knowledge item scored against one query.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityMatch {
    pub item: KnowledgeItem,
    pub similarity: f32,
}
