//! Seams to the external collaborators: the embedding store and the
//! pairwise relevance model. Implementations live outside this workspace.

use crate::types::{ChildChunk, ChunkKind};

/// Nearest-neighbour search over embedded child chunks.
pub trait EmbeddingIndex: Send + Sync {
    fn index(&self, chunks: &[ChildChunk]) -> anyhow::Result<()>;
    /// Ranked best-first. Failures surface as `Err`; callers treat them as
    /// "signal unavailable".
    fn search(&self, query: &str, k: usize, kind: Option<ChunkKind>) -> anyhow::Result<Vec<ChildChunk>>;
    /// Drops every chunk whose `meta.document_hash` matches.
    fn remove_document(&self, _document_hash: &str) -> anyhow::Result<()> { Ok(()) }
    fn clear(&self) -> anyhow::Result<()> { Ok(()) }
}

/// Scores how well `text` answers `query`. Scores are only comparable within
/// one batch.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, text: &str) -> anyhow::Result<f32>;

    fn score_batch(&self, query: &str, texts: &[String]) -> anyhow::Result<Vec<f32>> {
        texts.iter().map(|t| self.score(query, t)).collect()
    }
}
