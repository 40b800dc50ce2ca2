use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{RemoveLongFilter, TextAnalyzer, WhitespaceTokenizer};
use tantivy::Index;

/// Analyzer name for the body field. Text reaches tantivy already tokenized
/// by [`tokenize`], so the analyzer only splits on whitespace.
pub const ANALYZER: &str = "manual_terms";

/// Splits text into lowercase index terms.
///
/// Any char other than alphanumerics, `_`, `-`, `.` and whitespace becomes a
/// space, so part numbers like `m8x1.25` or `b-12` stay whole.
pub fn tokenize(text: &str) -> Vec<String> {
	let cleaned: String = text
		.to_lowercase()
		.chars()
		.map(|c| if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '-' | '.') { c } else { ' ' })
		.collect();
	cleaned.split_whitespace().map(str::to_string).collect()
}

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	let _id_field = schema_builder.add_text_field("id", STRING | STORED);
	let body_indexing = TextFieldIndexing::default().set_tokenizer(ANALYZER).set_index_option(IndexRecordOption::WithFreqs);
	let body_options = TextOptions::default().set_indexing_options(body_indexing);
	let _body_field = schema_builder.add_text_field("body", body_options);
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let analyzer = TextAnalyzer::builder(WhitespaceTokenizer::default()).filter(RemoveLongFilter::limit(255)).build();
	index.tokenizers().register(ANALYZER, analyzer);
}

#[derive(Debug, Clone, Copy)]
pub struct Fields {
	pub id: Field,
	pub body: Field,
}

impl Fields {
	pub fn from_schema(schema: &Schema) -> tantivy::Result<Self> {
		Ok(Self { id: schema.get_field("id")?, body: schema.get_field("body")? })
	}
}
