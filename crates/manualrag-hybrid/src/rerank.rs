//! Cross-encoder style reranking through an external [`RelevanceScorer`].
//!
//! Reranking is an optimization, never a requirement: whenever the scorer is
//! missing or misbehaves the shortlist is passed through in its fused order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use manualrag_core::config::RerankConfig;
use manualrag_core::traits::RelevanceScorer;
use manualrag_core::types::{RankedCandidate, Signal};

use crate::timeout::run_with_timeout;

#[derive(Clone, Default)]
pub struct Reranker {
    scorer: Option<Arc<dyn RelevanceScorer>>,
    timeout: Option<Duration>,
    min_score: Option<f32>,
}

impl Reranker {
    pub fn new(scorer: Option<Arc<dyn RelevanceScorer>>, config: &RerankConfig, timeout: Option<Duration>) -> Self {
        Self { scorer, timeout, min_score: config.min_score }
    }

    /// No scorer: every call keeps the input order.
    pub fn passthrough() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.scorer.is_some()
    }

    pub fn rerank(&self, query: &str, mut candidates: Vec<RankedCandidate>, top_k: usize) -> Vec<RankedCandidate> {
        if candidates.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let Some(scorer) = self.scorer.clone() else {
            debug!("no relevance scorer configured, keeping fused order");
            candidates.truncate(top_k);
            return candidates;
        };

        let scores = match self.score(scorer, query, &candidates) {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, candidates = candidates.len(), "reranking failed, keeping fused order");
                candidates.truncate(top_k);
                return candidates;
            }
        };

        let mut reranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .zip(scores)
            .map(|(c, score)| RankedCandidate::new(c.chunk, score, Signal::Reranked))
            .collect();
        reranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        if let Some(min) = self.min_score {
            if reranked[0].score < min {
                debug!(best = reranked[0].score, min, "all passages below relevance threshold, keeping best");
                reranked.truncate(1);
            } else {
                reranked.retain(|c| c.score >= min);
            }
        }
        reranked.truncate(top_k);
        reranked
    }

    fn score(&self, scorer: Arc<dyn RelevanceScorer>, query: &str, candidates: &[RankedCandidate]) -> Result<Vec<f32>> {
        let texts: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let expected = texts.len();
        let query = query.to_string();
        let scores = run_with_timeout("rerank", self.timeout, move || scorer.score_batch(&query, &texts))?;
        if scores.len() != expected {
            return Err(anyhow!("scorer returned {} scores for {} passages", scores.len(), expected));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(anyhow!("scorer returned a non-finite score ({bad})"));
        }
        Ok(scores)
    }
}
