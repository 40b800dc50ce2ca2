//! Domain types shared by the chunker, the stores and the retrieval pipeline.

use serde::{Deserialize, Serialize};

pub type ChunkId = String;

/// A source file as seen by ingestion.
///
/// - `hash`: blake3 hex digest of the raw file content; stable identity across
///   re-ingestion attempts and the whole-document dedup key
/// - `filename`: display name of the source file
/// - `category`: coarse tag (e.g. vehicle model) derived from the filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub hash: String,
    pub filename: String,
    pub category: String,
}

impl SourceDocument {
    pub fn from_bytes(filename: impl Into<String>, category: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            hash: blake3::hash(bytes).to_hex().to_string(),
            filename: filename.into(),
            category: category.into(),
        }
    }

    /// Short hash prefix used to namespace chunk ids.
    pub fn short_hash(&self) -> &str {
        let end = self.hash.char_indices().nth(8).map_or(self.hash.len(), |(i, _)| i);
        &self.hash[..end]
    }
}

/// One page of extracted text, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self { number, text: text.into() }
    }
}

/// Metadata a parent section carries and every child inherits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub document_hash: String,
    pub source_file: String,
    pub category: String,
    pub section_title: String,
    pub section_code: Option<String>,
    pub page_numbers: Vec<u32>,
}

/// A full logical section of a manual, bounded by detected headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentChunk {
    pub id: ChunkId,
    pub text: String,
    pub meta: ChunkMeta,
}

impl ParentChunk {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// A search-sized slice of a parent section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildChunk {
    pub id: ChunkId,
    pub parent_id: ChunkId,
    pub index: usize,
    pub text: String,
    pub meta: ChunkMeta,
}

/// Which kind of chunk an embedding lookup should be restricted to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkKind {
    Parent,
    Child,
}

/// Indicates which stage produced a candidate's score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Keyword,
    Embedding,
    Fused,
    Reranked,
}

/// A child chunk together with a signal-specific score; higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub chunk: ChildChunk,
    pub score: f32,
    pub signal: Signal,
}

impl RankedCandidate {
    pub fn new(chunk: ChildChunk, score: f32, signal: Signal) -> Self {
        Self { chunk, score, signal }
    }
}

/// The raw query plus the broad-intent flag used to widen retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub text: String,
    pub broad_intent: bool,
}

impl QueryContext {
    /// Uses the explicit hint when given, otherwise looks for any of `terms`
    /// as a whole word or phrase in the query.
    pub fn new(text: impl Into<String>, hint: Option<bool>, terms: &[String]) -> Self {
        let text = text.into();
        let broad_intent = hint.unwrap_or_else(|| mentions_any(&text, terms));
        Self { text, broad_intent }
    }
}

fn mentions_any(query: &str, terms: &[String]) -> bool {
    let words: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let padded = format!(" {} ", words.join(" "));
    terms.iter().any(|term| {
        let term = term.trim().to_lowercase();
        !term.is_empty() && padded.contains(&format!(" {} ", term))
    })
}
