use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use super::KnowledgeSource;
use crate::models::KnowledgeItem;

static CATEGORY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^## (.+)$").expect("valid regex"));
static QUESTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^### Q: (.+)$").expect("valid regex"));
static ANSWER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*\*A:\*\* (.+)$").expect("valid regex"));

const DEFAULT_CATEGORY: &str = "通用";

/// Loads question/answer pairs from a Markdown file.
///
/// ```text
/// ## Category
/// ### Q: question text
/// **A:** first answer line
/// further answer lines
/// ```
pub struct MarkdownKnowledgeLoader {
    path: PathBuf,
}

impl MarkdownKnowledgeLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_file(&self) -> Result<String> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read knowledge file {:?}", self.path))?;
        debug!("Loaded knowledge file {:?} ({} bytes)", self.path, content.len());
        Ok(content)
    }
}

impl KnowledgeSource for MarkdownKnowledgeLoader {
    fn load(&self) -> Vec<KnowledgeItem> {
        match self.read_file() {
            Ok(content) => {
                let items = parse_markdown(&content);
                if items.is_empty() {
                    warn!(
                        "Knowledge file {:?} contains no Q/A pairs, using default knowledge",
                        self.path
                    );
                    return default_knowledge();
                }
                info!("Loaded {} Q/A pairs from {:?}", items.len(), self.path);
                items
            }
            Err(e) => {
                error!("Failed to load knowledge base, using default knowledge: {:#}", e);
                default_knowledge()
            }
        }
    }
}

/// Item under construction while scanning the file.
struct PendingItem {
    question: String,
    answer: String,
    category: String,
}

fn flush(pending: Option<PendingItem>, items: &mut Vec<KnowledgeItem>) {
    let Some(p) = pending else { return };
    let answer = p.answer.trim();
    if answer.is_empty() {
        return;
    }
    let id = format!("qa_{:03}", items.len() + 1);
    items.push(KnowledgeItem::new(id, p.question, answer, p.category));
}

/// Parse Markdown content into knowledge items, in file order.
pub(crate) fn parse_markdown(content: &str) -> Vec<KnowledgeItem> {
    let mut items = Vec::new();
    let mut category = DEFAULT_CATEGORY.to_string();
    let mut pending: Option<PendingItem> = None;

    for raw in content.lines() {
        let line = raw.trim();

        if let Some(caps) = CATEGORY_RE.captures(line) {
            category = caps[1].trim().to_string();
            continue;
        }

        if let Some(caps) = QUESTION_RE.captures(line) {
            flush(pending.take(), &mut items);
            pending = Some(PendingItem {
                question: caps[1].trim().to_string(),
                answer: String::new(),
                category: category.clone(),
            });
            continue;
        }

        let Some(current) = pending.as_mut() else {
            continue;
        };

        if let Some(caps) = ANSWER_RE.captures(line) {
            current.answer.push_str(&caps[1]);
            continue;
        }

        if !line.is_empty() && !line.starts_with('#') && !line.starts_with("**A:**") {
            if !current.answer.is_empty() {
                current.answer.push('\n');
            }
            current.answer.push_str(line);
        }
    }

    flush(pending, &mut items);
    items
}

/// Built-in knowledge base used when the real one cannot be read.
pub fn default_knowledge() -> Vec<KnowledgeItem> {
    vec![
        KnowledgeItem::new(
            "qa_001",
            "什么是RAG？",
            "RAG（Retrieval-Augmented Generation）是检索增强生成技术，结合了信息检索和文本生成能力。",
            "技术",
        ),
        KnowledgeItem::new(
            "qa_002",
            "如何使用这个系统？",
            "您可以通过发送消息与我对话，我会基于知识库为您提供准确的回答。",
            "使用指南",
        ),
        KnowledgeItem::new(
            "qa_003",
            "系统支持哪些功能？",
            "系统支持Dify API调用、本地RAG问答、智能路由等功能。",
            "功能介绍",
        ),
    ]
}
