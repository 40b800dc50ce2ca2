//! RetrievalEngine: ingestion, querying and maintenance over one set of
//! stores.
//!
//! Query pipeline:
//! keyword + embedding search → RRF → dedup → rerank → parent expansion.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use manualrag_core::chunking::ChunkBuilder;
use manualrag_core::config::Settings;
use manualrag_core::docstore::DocumentStore;
use manualrag_core::error::Error;
use manualrag_core::traits::{EmbeddingIndex, RelevanceScorer};
use manualrag_core::types::{
    ChildChunk, ChunkKind, PageText, ParentChunk, QueryContext, RankedCandidate, Signal, SourceDocument,
};
use manualrag_text::KeywordIndex;

use crate::context::{AssembledContext, ContextAssembler};
use crate::dedup::deduplicate;
use crate::fusion::fuse;
use crate::rerank::Reranker;
use crate::timeout::run_with_timeout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_hash: String,
    pub filename: String,
    pub parents: usize,
    pub children: usize,
    /// The document was already stored and nothing was written.
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub parent_count: usize,
    pub child_count: usize,
    pub index_present: bool,
    pub total_parent_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub query: String,
    pub broad_intent: bool,
    /// Final passages in rank order.
    pub passages: Vec<RankedCandidate>,
    pub context: AssembledContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Found(RetrievedContext),
    NoResults,
}

pub struct RetrievalEngine {
    docstore: Arc<DocumentStore>,
    keyword: Arc<KeywordIndex>,
    embeddings: Option<Arc<dyn EmbeddingIndex>>,
    reranker: Reranker,
    assembler: ContextAssembler,
    chunker: ChunkBuilder,
    settings: Settings,
    ingest_lock: Mutex<()>,
}

impl RetrievalEngine {
    /// Opens the document store and keyword index under the configured data
    /// directory, resolved against `base`.
    pub fn open(base: &Path, settings: Settings) -> Result<Self> {
        let docstore = Arc::new(DocumentStore::open(settings.storage.docstore_path(base)));
        let keyword = Arc::new(KeywordIndex::open(settings.storage.keyword_index_dir(base)));
        Self::new(docstore, keyword, settings)
    }

    pub fn new(docstore: Arc<DocumentStore>, keyword: Arc<KeywordIndex>, settings: Settings) -> Result<Self> {
        settings.validate()?;
        let chunker = ChunkBuilder::new(settings.chunking.clone())?;
        let reranker = Reranker::new(None, &settings.rerank, settings.retrieval.signal_timeout());
        let assembler = ContextAssembler::new(Arc::clone(&docstore));
        Ok(Self {
            docstore,
            keyword,
            embeddings: None,
            reranker,
            assembler,
            chunker,
            settings,
            ingest_lock: Mutex::new(()),
        })
    }

    pub fn with_embeddings(mut self, index: Arc<dyn EmbeddingIndex>) -> Self {
        self.embeddings = Some(index);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.reranker = Reranker::new(Some(scorer), &self.settings.rerank, self.settings.retrieval.signal_timeout());
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn docstore(&self) -> &Arc<DocumentStore> {
        &self.docstore
    }

    pub fn keyword_index(&self) -> &Arc<KeywordIndex> {
        &self.keyword
    }

    /// Chunks page text with the configured builder, then ingests the result.
    pub fn ingest_pages(&self, document: &SourceDocument, pages: &[PageText]) -> Result<IngestReport> {
        let hierarchy = self.chunker.build(document, pages);
        self.ingest(document, hierarchy.parents, hierarchy.children)
    }

    /// Stores a document's parents and extends the keyword corpus with its
    /// children. A document whose hash is already stored is skipped.
    ///
    /// A failed ingest leaves no parents behind, so it can be retried.
    pub fn ingest(
        &self,
        document: &SourceDocument,
        parents: Vec<ParentChunk>,
        children: Vec<ChildChunk>,
    ) -> Result<IngestReport> {
        let _guard = self.lock_ingest();
        let mut report = IngestReport {
            document_hash: document.hash.clone(),
            filename: document.filename.clone(),
            parents: parents.len(),
            children: children.len(),
            skipped: false,
        };
        if self.docstore.contains_document(&document.hash) {
            info!(file = %document.filename, hash = %document.short_hash(), "document already ingested, skipping");
            report.skipped = true;
            report.parents = 0;
            report.children = 0;
            return Ok(report);
        }
        if parents.is_empty() && children.is_empty() {
            warn!(file = %document.filename, "no sections found, nothing to ingest");
            return Ok(report);
        }

        self.docstore.put_many(parents).context("store parent sections")?;

        let mut corpus = self.keyword.chunks();
        corpus.extend(children.iter().cloned());
        let indexed = match self.keyword.rebuild(corpus) {
            Ok(indexed) => indexed,
            Err(e) => {
                // a retry must not be skipped as already ingested
                if let Err(undo) = self.docstore.delete_by_document_hash(&document.hash) {
                    warn!(file = %document.filename, error = %undo, "could not roll back parent sections");
                }
                return Err(e.context("rebuild keyword index"));
            }
        };

        if let Some(embeddings) = &self.embeddings {
            if let Err(e) = embeddings.index(&children) {
                warn!(file = %document.filename, error = %e, "embedding index rejected new chunks");
            }
        }
        info!(
            file = %document.filename,
            category = %document.category,
            parents = report.parents,
            children = report.children,
            indexed,
            "document ingested"
        );
        Ok(report)
    }

    /// Removes a document's parents and its children from the keyword index.
    /// Returns the number of parent sections removed.
    pub fn remove_document(&self, document_hash: &str) -> Result<usize> {
        let _guard = self.lock_ingest();
        let corpus = self.keyword.chunks();
        let before = corpus.len();
        let remaining: Vec<ChildChunk> = corpus.into_iter().filter(|c| c.meta.document_hash != document_hash).collect();
        let removed_parents = self.docstore.delete_by_document_hash(document_hash).context("delete parent sections")?;
        if removed_parents == 0 && remaining.len() == before {
            return Err(Error::NotFound(format!("document {document_hash}")).into());
        }
        let removed_children = before - remaining.len();
        self.keyword.rebuild(remaining).context("rebuild keyword index")?;
        if let Some(embeddings) = &self.embeddings {
            if let Err(e) = embeddings.remove_document(document_hash) {
                warn!(hash = %document_hash, error = %e, "embedding index kept chunks of removed document");
            }
        }
        info!(hash = %document_hash, parents = removed_parents, children = removed_children, "document removed");
        Ok(removed_parents)
    }

    /// Retrieves up to `k` passages for `text` and expands them into context.
    ///
    /// `broad_intent_hint` overrides the visual-term heuristic that widens
    /// candidate retrieval.
    pub fn query(&self, text: &str, k: usize, broad_intent_hint: Option<bool>) -> Result<QueryOutcome> {
        let retrieval = &self.settings.retrieval;
        let query = QueryContext::new(text, broad_intent_hint, &retrieval.broad_intent_terms);
        if query.text.trim().is_empty() || k == 0 {
            return Ok(QueryOutcome::NoResults);
        }

        let fused_k = retrieval.candidate_k * 2;
        let width = if query.broad_intent { fused_k * retrieval.broad_intent_factor } else { fused_k };

        let keyword = self.keyword_candidates(&query.text, width);
        let embedding = self.embedding_candidates(&query.text, width);
        debug!(keyword = keyword.len(), embedding = embedding.len(), width, broad = query.broad_intent, "candidates gathered");

        let fused = fuse(keyword, embedding, fused_k, &self.settings.fusion);
        if fused.is_empty() {
            info!(query = %query.text, "no candidates found");
            return Ok(QueryOutcome::NoResults);
        }

        let mut shortlist = deduplicate(fused, &self.settings.dedup);
        shortlist.truncate(retrieval.candidate_k);
        let passages = self.reranker.rerank(&query.text, shortlist, k);
        if passages.is_empty() {
            return Ok(QueryOutcome::NoResults);
        }
        let context = self.assembler.assemble(&passages);
        info!(passages = passages.len(), sources = context.sources.len(), "query answered");

        Ok(QueryOutcome::Found(RetrievedContext {
            query: query.text,
            broad_intent: query.broad_intent,
            passages,
            context,
        }))
    }

    pub fn stats(&self) -> EngineStats {
        let store = self.docstore.stats();
        EngineStats {
            parent_count: store.parent_count,
            child_count: self.keyword.len(),
            index_present: self.keyword.is_present(),
            total_parent_chars: store.total_chars,
        }
    }

    /// Clears every store. All steps run even if one fails; the first error
    /// is returned.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.lock_ingest();
        let mut first_error: Option<anyhow::Error> = None;
        let mut record = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                warn!(step, error = %e, "reset step failed");
                first_error.get_or_insert(e.context(format!("reset {step}")));
            }
        };
        record("document store", self.docstore.clear().map_err(Into::into));
        record("keyword index", self.keyword.clear());
        if let Some(embeddings) = &self.embeddings {
            record("embedding index", embeddings.clear());
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("all stores cleared");
                Ok(())
            }
        }
    }

    fn keyword_candidates(&self, query: &str, width: usize) -> Vec<RankedCandidate> {
        match self.keyword.search(query, width) {
            Ok(hits) => hits.into_iter().map(|(chunk, score)| RankedCandidate::new(chunk, score, Signal::Keyword)).collect(),
            Err(e) => {
                warn!(error = %e, "keyword search failed, continuing without it");
                Vec::new()
            }
        }
    }

    /// Embedding hits carry a reciprocal-rank score; the index only reports order.
    fn embedding_candidates(&self, query: &str, width: usize) -> Vec<RankedCandidate> {
        let Some(index) = self.embeddings.clone() else {
            return Vec::new();
        };
        let query = query.to_string();
        let timeout = self.settings.retrieval.signal_timeout();
        match run_with_timeout("embedding", timeout, move || index.search(&query, width, Some(ChunkKind::Child))) {
            Ok(chunks) => chunks
                .into_iter()
                .enumerate()
                .map(|(rank, chunk)| RankedCandidate::new(chunk, 1.0 / (rank as f32 + 1.0), Signal::Embedding))
                .collect(),
            Err(e) => {
                warn!(error = %e, "embedding search unavailable, continuing with keyword results");
                Vec::new()
            }
        }
    }

    fn lock_ingest(&self) -> MutexGuard<'_, ()> {
        self.ingest_lock.lock().unwrap_or_else(|p| p.into_inner())
    }
}
