use std::collections::HashMap;

use anyhow::Result;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{Searcher, TantivyDocument, Term};

use manualrag_core::types::ChildChunk;

use crate::tantivy_utils::{tokenize, Fields};

/// One published generation of the keyword index.
///
/// Immutable once built: a rebuild publishes a new snapshot, and callers that
/// still hold this one keep searching the corpus it was built from.
pub struct IndexSnapshot {
	generation: u64,
	searcher: Searcher,
	fields: Fields,
	chunks: Vec<ChildChunk>,
	by_id: HashMap<String, usize>,
}

impl IndexSnapshot {
	pub(crate) fn new(generation: u64, searcher: Searcher, fields: Fields, chunks: Vec<ChildChunk>) -> Self {
		let by_id = chunks.iter().enumerate().map(|(i, c)| (c.id.clone(), i)).collect();
		Self { generation, searcher, fields, chunks, by_id }
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn chunks(&self) -> &[ChildChunk] {
		&self.chunks
	}

	pub fn len(&self) -> usize {
		self.chunks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.chunks.is_empty()
	}

	/// BM25 top-`k` over the child passages, best first. Only strictly
	/// positive scores are returned.
	pub fn search(&self, query_text: &str, k: usize) -> Result<Vec<(ChildChunk, f32)>> {
		if k == 0 {
			return Ok(Vec::new());
		}
		let tokens = tokenize(query_text);
		if tokens.is_empty() {
			return Ok(Vec::new());
		}
		let clauses: Vec<(Occur, Box<dyn Query>)> = tokens
			.iter()
			.map(|t| {
				let term = Term::from_field_text(self.fields.body, t);
				(Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)) as Box<dyn Query>)
			})
			.collect();
		let query = BooleanQuery::new(clauses);
		let top_docs = self.searcher.search(&query, &TopDocs::with_limit(k))?;
		let mut results = Vec::with_capacity(top_docs.len());
		for (score, doc_address) in top_docs {
			if score <= 0.0 {
				continue;
			}
			let doc: TantivyDocument = self.searcher.doc(doc_address)?;
			let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_str()) else { continue };
			if let Some(&pos) = self.by_id.get(id) {
				results.push((self.chunks[pos].clone(), score));
			}
		}
		Ok(results)
	}
}
