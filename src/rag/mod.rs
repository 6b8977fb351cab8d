//! Retrieval-augmented answers over a knowledge base.
//!
//! `KnowledgeBase` is the retrieval seam. `InMemoryKnowledgeBase` is a lexical
//! stand-in: paragraph-aligned chunks ranked by how many query terms they
//! contain. `RagService` imports a document and answers questions by putting
//! the retrieved chunks in front of the question.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::dispatch::{AnswerStream, Dispatcher, Query, ToolSelection};
use crate::error::DispatchError;

pub const DEFAULT_CHUNK_CHARS: usize = 800;
pub const DEFAULT_TOP_K: usize = 4;

/// A piece of text stored in or retrieved from a knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    /// Where the text came from (file path, URL, ...).
    pub source: Option<String>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Store documents; returns the number of chunks added. Documents with a
    /// source replace whatever was imported earlier from that source.
    async fn import(&self, documents: Vec<Document>) -> Result<usize>;

    /// The `top_k` stored chunks most relevant to `query`, best first.
    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<Document>;
}

/// Split text into chunks of at most `max_chars` characters, keeping
/// paragraphs whole where possible.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, chunks: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        current.clear();
    };

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = paragraph.chars().count();
        if para_len > max_chars {
            flush(&mut current, &mut chunks);
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            para_len
        } else {
            current.chars().count() + 2 + para_len
        };
        if needed > max_chars {
            flush(&mut current, &mut chunks);
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    flush(&mut current, &mut chunks);
    chunks
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x3040..=0x30FF | 0xAC00..=0xD7AF)
}

/// Lowercased search terms: alphanumeric words, and single CJK characters.
pub fn terms(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                out.push(std::mem::take(&mut word));
            }
            out.push(c.to_string());
        } else if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
        } else if !word.is_empty() {
            out.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        out.push(word);
    }
    out
}

struct Chunk {
    document: Document,
    terms: HashSet<String>,
}

/// Knowledge base held in process memory.
pub struct InMemoryKnowledgeBase {
    chunk_chars: usize,
    chunks: RwLock<Vec<Chunk>>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::with_chunk_chars(DEFAULT_CHUNK_CHARS)
    }

    pub fn with_chunk_chars(chunk_chars: usize) -> Self {
        Self {
            chunk_chars,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

impl Default for InMemoryKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn import(&self, documents: Vec<Document>) -> Result<usize> {
        let replaced: HashSet<&str> = documents.iter().filter_map(|d| d.source.as_deref()).collect();

        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|chunk| {
            chunk
                .document
                .source
                .as_deref()
                .is_none_or(|source| !replaced.contains(source))
        });
        if chunks.len() < before {
            debug!("Dropped {} chunks of re-imported sources", before - chunks.len());
        }

        let mut count = 0;
        for document in &documents {
            for text in split_into_chunks(&document.text, self.chunk_chars) {
                let duplicate = chunks
                    .iter()
                    .any(|c| c.document.text == text && c.document.source == document.source);
                if duplicate {
                    continue;
                }
                chunks.push(Chunk {
                    terms: terms(&text).into_iter().collect(),
                    document: Document {
                        text,
                        source: document.source.clone(),
                    },
                });
                count += 1;
            }
        }
        Ok(count)
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<Document> {
        let mut query_terms = terms(query);
        query_terms.sort();
        query_terms.dedup();

        let chunks = self.chunks.read().await;
        let mut scored: Vec<(usize, usize)> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, query_terms.iter().filter(|t| chunk.terms.contains(*t)).count()))
            .filter(|(_, score)| *score > 0)
            .collect();
        // Stable sort keeps import order among equal scores.
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        scored
            .into_iter()
            .take(top_k)
            .map(|(i, _)| chunks[i].document.clone())
            .collect()
    }
}

/// Build the model prompt: retrieved context first, then the instructions
/// and the question.
pub fn augment_prompt(question: &str, context: &[Document]) -> String {
    let context = context
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Context information is below.\n\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\n\
         Given the context information and no prior knowledge, answer the query.\n\
         If the answer is not in the context, say that you don't know.\n\n\
         Query: {}\n\n\
         Answer:",
        context, question
    )
}

/// Answers questions grounded on a knowledge base.
pub struct RagService {
    knowledge_base: std::sync::Arc<dyn KnowledgeBase>,
    dispatcher: Dispatcher,
    document_path: Option<PathBuf>,
    top_k: usize,
}

impl RagService {
    pub fn new(knowledge_base: std::sync::Arc<dyn KnowledgeBase>, dispatcher: Dispatcher) -> Self {
        Self {
            knowledge_base,
            dispatcher,
            document_path: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Document loaded by `import_documents`.
    pub fn with_document_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.document_path = Some(path.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Read the configured document and add it to the knowledge base.
    pub async fn import_documents(&self) -> Result<usize> {
        let path = self
            .document_path
            .as_ref()
            .context("No knowledge document configured")?;
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read knowledge document {}", path.display()))?;

        let document = Document::new(text).with_source(path.display().to_string());
        let count = self.knowledge_base.import(vec![document]).await?;
        info!("Imported {} chunks from {}", count, path.display());
        Ok(count)
    }

    /// Stream an answer to `question` using retrieved context.
    pub async fn generate(&self, question: &str) -> Result<AnswerStream, DispatchError> {
        if question.trim().is_empty() {
            return Err(DispatchError::InvalidQuery("message must not be empty".to_string()));
        }
        let context = self.knowledge_base.retrieve(question, self.top_k).await;
        debug!("Retrieved {} chunks for question", context.len());

        let prompt = augment_prompt(question, &context);
        self.dispatcher
            .respond_stream(Query::new(prompt), ToolSelection::None)
            .await
    }
}
