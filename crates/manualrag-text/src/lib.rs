//! manualrag-text
//!
//! Keyword relevance over child passages, backed by tantivy's BM25. The
//! corpus is rebuilt in bulk into a fresh generation directory and swapped in
//! atomically; see `index` for the on-disk layout and `search` for querying a
//! published snapshot.
pub mod tantivy_utils;
pub mod index;
pub mod search;

pub use index::KeywordIndex;
pub use search::IndexSnapshot;
pub use tantivy_utils::tokenize;
