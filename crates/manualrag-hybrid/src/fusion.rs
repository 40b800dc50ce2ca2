//! Reciprocal rank fusion: score = Σ weight / (rrf_k + rank + 1)
//!
//! Only ranks matter, so keyword BM25 scores and embedding similarities never
//! have to be normalized against each other.

use std::collections::HashMap;

use manualrag_core::config::FusionConfig;
use manualrag_core::types::{RankedCandidate, Signal};

/// Merges the two ranked lists into at most `k` candidates, best first.
///
/// When one list is empty the other is returned as is (truncated to `k`).
/// Ties keep first-seen order, embedding list before keyword list.
pub fn fuse(
    keyword: Vec<RankedCandidate>,
    embedding: Vec<RankedCandidate>,
    k: usize,
    config: &FusionConfig,
) -> Vec<RankedCandidate> {
    if embedding.is_empty() {
        return truncated(keyword, k);
    }
    if keyword.is_empty() {
        return truncated(embedding, k);
    }

    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut fused: Vec<RankedCandidate> = Vec::with_capacity(keyword.len() + embedding.len());
    let lists = [(embedding, config.embedding_weight), (keyword, config.keyword_weight)];
    for (list, weight) in lists {
        for (rank, candidate) in list.into_iter().enumerate() {
            let contribution = weight / (config.rrf_k + rank as f32 + 1.0);
            match slots.get(&candidate.chunk.id) {
                Some(&slot) => fused[slot].score += contribution,
                None => {
                    slots.insert(candidate.chunk.id.clone(), fused.len());
                    fused.push(RankedCandidate::new(candidate.chunk, contribution, Signal::Fused));
                }
            }
        }
    }

    // stable: equal scores keep first-seen order
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(k);
    fused
}

fn truncated(mut list: Vec<RankedCandidate>, k: usize) -> Vec<RankedCandidate> {
    list.truncate(k);
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use manualrag_core::types::{ChildChunk, ChunkMeta};

    fn cand(id: &str, signal: Signal) -> RankedCandidate {
        let chunk = ChildChunk {
            id: id.to_string(),
            parent_id: "p".to_string(),
            index: 0,
            text: id.to_string(),
            meta: ChunkMeta {
                document_hash: "h".into(),
                source_file: "f.txt".into(),
                category: "c".into(),
                section_title: "t".into(),
                section_code: None,
                page_numbers: vec![],
            },
        };
        RankedCandidate::new(chunk, 1.0, signal)
    }

    #[test]
    fn shared_chunk_outranks_single_list_chunks() {
        let kw = vec![cand("a", Signal::Keyword), cand("shared", Signal::Keyword)];
        let emb = vec![cand("b", Signal::Embedding), cand("shared", Signal::Embedding)];
        let out = fuse(kw, emb, 10, &FusionConfig::default());
        assert_eq!(out[0].chunk.id, "shared");
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|c| c.signal == Signal::Fused));
    }

    #[test]
    fn equal_scores_keep_embedding_first() {
        let out = fuse(vec![cand("kw", Signal::Keyword)], vec![cand("emb", Signal::Embedding)], 10, &FusionConfig::default());
        let ids: Vec<&str> = out.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["emb", "kw"]);
    }
}
