//! Knowledge base loading.
//!
//! The retrieval engine does not know where its items come from; it asks a
//! [`KnowledgeSource`] and takes whatever ordered list it gets back.

mod loader;

pub use loader::{default_knowledge, MarkdownKnowledgeLoader};

use crate::models::KnowledgeItem;

/// Provider of the ordered knowledge base.
///
/// `load` never fails: implementations fall back to a built-in set.
pub trait KnowledgeSource: Send + Sync {
    fn load(&self) -> Vec<KnowledgeItem>;
}

/// Fixed in-memory knowledge base.
pub struct StaticKnowledge(pub Vec<KnowledgeItem>);

impl KnowledgeSource for StaticKnowledge {
    fn load(&self) -> Vec<KnowledgeItem> {
        self.0.clone()
    }
}
