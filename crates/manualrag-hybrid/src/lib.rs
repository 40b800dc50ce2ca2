//! manualrag-hybrid
//!
//! The query pipeline over the stores in `manualrag-core` and the keyword
//! index in `manualrag-text`: keyword and embedding candidates are fused with
//! reciprocal rank fusion, de-duplicated, reranked by an external relevance
//! model and expanded to their parent sections. [`RetrievalEngine`] ties the
//! stages together with ingestion and maintenance.
pub mod context;
pub mod dedup;
pub mod engine;
pub mod fusion;
pub mod rerank;
pub mod timeout;

pub use context::{AssembledContext, ContextAssembler, SourceRef};
pub use engine::{EngineStats, IngestReport, QueryOutcome, RetrievalEngine, RetrievedContext};
pub use rerank::Reranker;
