//! Generation-swapped keyword index.
//!
//! Layout under the index root:
//!
//! ```text
//! CURRENT          name of the live generation, replaced atomically
//! gen-000007/      tantivy segment files + corpus.json
//! ```
//!
//! A rebuild writes a complete new generation, points `CURRENT` at it and
//! then swaps in a new [`IndexSnapshot`]. Readers load the published pointer
//! without locking and never wait on a rebuild.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info, warn};

use manualrag_core::docstore::write_atomically;
use manualrag_core::types::ChildChunk;

use crate::search::IndexSnapshot;
use crate::tantivy_utils::{build_schema, register_tokenizer, tokenize, Fields};

const CURRENT_FILE: &str = "CURRENT";
const CORPUS_FILE: &str = "corpus.json";
const GENERATION_PREFIX: &str = "gen-";

/// Per-passage record kept next to the tantivy files.
#[derive(Serialize, Deserialize)]
struct CorpusEntry {
	chunk: ChildChunk,
	tokens: Vec<String>,
}

pub struct KeywordIndex {
	root: PathBuf,
	current: ArcSwapOption<IndexSnapshot>,
	writer: Mutex<()>,
}

impl KeywordIndex {
	/// Opens the live generation under `root`. A missing `CURRENT` means no
	/// keyword signal yet; a broken generation is logged and treated the same.
	pub fn open(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		let current = match load_current(&root) {
			Ok(snapshot) => snapshot.map(Arc::new),
			Err(e) => {
				let reason = format!("{e:#}");
				warn!(root = %root.display(), error = %reason, "keyword index unreadable, keyword signal disabled");
				None
			}
		};
		info!(root = %root.display(), chunks = current.as_ref().map_or(0, |s| s.len()), "keyword index opened");
		Self { root, current: ArcSwapOption::new(current), writer: Mutex::new(()) }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// The currently published snapshot, if any.
	pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
		self.current.load_full()
	}

	pub fn is_present(&self) -> bool {
		self.snapshot().is_some()
	}

	pub fn len(&self) -> usize {
		self.snapshot().map_or(0, |s| s.len())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Passages of the live generation, in indexing order.
	pub fn chunks(&self) -> Vec<ChildChunk> {
		self.snapshot().map(|s| s.chunks().to_vec()).unwrap_or_default()
	}

	/// Empty when no generation is live.
	pub fn search(&self, query_text: &str, k: usize) -> Result<Vec<(ChildChunk, f32)>> {
		match self.snapshot() {
			Some(snapshot) => snapshot.search(query_text, k),
			None => Ok(Vec::new()),
		}
	}

	/// Replaces the whole corpus. An empty list clears the index.
	///
	/// Duplicate ids keep their first occurrence. Returns the number of
	/// passages in the new generation.
	pub fn rebuild(&self, chunks: Vec<ChildChunk>) -> Result<usize> {
		if chunks.is_empty() {
			self.clear()?;
			return Ok(0);
		}
		let _guard = self.lock_writer();

		let mut seen = HashSet::new();
		let total = chunks.len();
		let entries: Vec<CorpusEntry> = chunks
			.into_iter()
			.filter(|c| seen.insert(c.id.clone()))
			.map(|chunk| {
				let tokens = tokenize(&chunk.text);
				CorpusEntry { chunk, tokens }
			})
			.collect();
		if entries.len() < total {
			warn!(dropped = total - entries.len(), "duplicate chunk ids in keyword rebuild");
		}

		fs::create_dir_all(&self.root).with_context(|| format!("create keyword index root {}", self.root.display()))?;
		let generation = next_generation(&self.root)?;
		let name = generation_name(generation);
		let dir = self.root.join(&name);
		let snapshot = build_generation(&dir, generation, entries).with_context(|| format!("build keyword generation {}", dir.display()))?;
		write_atomically(&self.root.join(CURRENT_FILE), format!("{name}\n").as_bytes())?;

		let count = snapshot.len();
		self.current.store(Some(Arc::new(snapshot)));
		remove_generations(&self.root, Some(&name));
		info!(generation, chunks = count, "keyword index rebuilt");
		Ok(count)
	}

	/// Drops the live generation; searches return nothing afterwards.
	pub fn clear(&self) -> Result<()> {
		let _guard = self.lock_writer();
		match fs::remove_file(self.root.join(CURRENT_FILE)) {
			Ok(()) => {}
			Err(e) if e.kind() == ErrorKind::NotFound => {}
			Err(e) => return Err(e).with_context(|| format!("remove {}", self.root.join(CURRENT_FILE).display())),
		}
		self.current.store(None);
		remove_generations(&self.root, None);
		info!(root = %self.root.display(), "keyword index cleared");
		Ok(())
	}

	fn lock_writer(&self) -> MutexGuard<'_, ()> {
		self.writer.lock().unwrap_or_else(|p| p.into_inner())
	}
}

fn generation_name(generation: u64) -> String {
	format!("{GENERATION_PREFIX}{generation:06}")
}

fn parse_generation(name: &str) -> Option<u64> {
	name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

/// Generation directories present under `root`, in no particular order.
fn list_generations(root: &Path) -> Vec<(u64, PathBuf)> {
	let Ok(entries) = fs::read_dir(root) else { return Vec::new() };
	entries
		.filter_map(|e| e.ok())
		.filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
		.filter_map(|e| {
			let generation = parse_generation(&e.file_name().to_string_lossy())?;
			Some((generation, e.path()))
		})
		.collect()
}

fn next_generation(root: &Path) -> Result<u64> {
	let mut highest = list_generations(root).into_iter().map(|(g, _)| g).max().unwrap_or(0);
	if let Ok(name) = fs::read_to_string(root.join(CURRENT_FILE)) {
		if let Some(g) = parse_generation(name.trim()) {
			highest = highest.max(g);
		}
	}
	highest.checked_add(1).ok_or_else(|| anyhow!("keyword index generation counter exhausted"))
}

/// Best effort; a directory still mapped by an old reader may linger.
fn remove_generations(root: &Path, keep: Option<&str>) {
	for (generation, path) in list_generations(root) {
		if keep.is_some_and(|k| parse_generation(k) == Some(generation)) {
			continue;
		}
		match fs::remove_dir_all(&path) {
			Ok(()) => debug!(generation, "removed superseded keyword generation"),
			Err(e) => warn!(path = %path.display(), error = %e, "failed to remove keyword generation"),
		}
	}
}

fn load_current(root: &Path) -> Result<Option<IndexSnapshot>> {
	let current_path = root.join(CURRENT_FILE);
	let name = match fs::read_to_string(&current_path) {
		Ok(name) => name.trim().to_string(),
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e).with_context(|| format!("read {}", current_path.display())),
	};
	let generation = parse_generation(&name).ok_or_else(|| anyhow!("CURRENT names an invalid generation: {name:?}"))?;
	open_generation(&root.join(&name), generation).map(Some)
}

fn open_generation(dir: &Path, generation: u64) -> Result<IndexSnapshot> {
	let index = Index::open_in_dir(dir).with_context(|| format!("open tantivy index {}", dir.display()))?;
	register_tokenizer(&index);
	let fields = Fields::from_schema(&index.schema())?;

	let corpus_path = dir.join(CORPUS_FILE);
	let bytes = fs::read(&corpus_path).with_context(|| format!("read {}", corpus_path.display()))?;
	let entries: Vec<CorpusEntry> = serde_json::from_slice(&bytes).with_context(|| format!("parse {}", corpus_path.display()))?;

	let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
	let searcher = reader.searcher();
	if searcher.num_docs() != entries.len() as u64 {
		return Err(anyhow!(
			"generation {generation} holds {} documents but its corpus lists {}",
			searcher.num_docs(),
			entries.len()
		));
	}
	let chunks = entries.into_iter().map(|e| e.chunk).collect();
	Ok(IndexSnapshot::new(generation, searcher, fields, chunks))
}

fn build_generation(dir: &Path, generation: u64, entries: Vec<CorpusEntry>) -> Result<IndexSnapshot> {
	if dir.exists() {
		fs::remove_dir_all(dir)?;
	}
	fs::create_dir_all(dir)?;
	let schema = build_schema();
	let index = Index::create_in_dir(dir, schema.clone())?;
	register_tokenizer(&index);
	let fields = Fields::from_schema(&schema)?;

	let mut index_writer: IndexWriter = index.writer(50_000_000)?;
	for entry in &entries {
		index_writer.add_document(doc!(
			fields.id => entry.chunk.id.clone(),
			fields.body => entry.tokens.join(" "),
		))?;
	}
	index_writer.commit()?;
	index_writer.wait_merging_threads()?;
	write_atomically(&dir.join(CORPUS_FILE), &serde_json::to_vec(&entries)?)?;
	debug!(generation, docs = entries.len(), "keyword generation written");

	let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
	let searcher = reader.searcher();
	let chunks = entries.into_iter().map(|e| e.chunk).collect();
	Ok(IndexSnapshot::new(generation, searcher, fields, chunks))
}
