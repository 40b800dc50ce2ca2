mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::anyhow;
use manualrag_core::config::{ChunkingConfig, Settings};
use manualrag_core::docstore::DocumentStore;
use manualrag_core::traits::{EmbeddingIndex, RelevanceScorer};
use manualrag_core::types::{ChildChunk, ChunkKind, PageText, SourceDocument};
use manualrag_hybrid::{QueryOutcome, RetrievalEngine, RetrievedContext};
use manualrag_text::KeywordIndex;
use tempfile::TempDir;

const BRAKE_BODY: &str = "Check the brake fluid level every month. Replace the brake pads when the friction lining is worn below two millimetres and bleed the hydraulic circuit after any repair.";
const EXHAUST_BODY: &str = "Inspect the exhaust manifold gasket for leaks at every service. Replace the catalytic converter heat shield if it rattles and torque the downpipe clamp to specification.";

fn duster() -> (SourceDocument, Vec<PageText>) {
    let text = format!("Braking System\n{BRAKE_BODY}\nExhaust System\n{EXHAUST_BODY}");
    (SourceDocument::from_bytes("duster_manual.txt", "Dacia Duster", text.as_bytes()), vec![PageText::new(1, text)])
}

fn logan() -> (SourceDocument, Vec<PageText>) {
    let text = "Engine Cooling\n\
        The thermostat housing sits behind the water pump on the left side of the block.\n\
        Top up the coolant reservoir only with the engine cold and the cap released slowly.\n\
        Use the coolant grade printed on the reservoir label and never mix coolant colours.\n\
        Flush the coolant circuit every four years and bleed trapped air at the heater hose.\n\
        A coolant leak at the radiator seam usually means the radiator must be replaced."
        .to_string();
    (SourceDocument::from_bytes("logan_manual.txt", "Dacia Logan", text.as_bytes()), vec![PageText::new(7, text)])
}

fn engine(tmp: &TempDir) -> RetrievalEngine {
    RetrievalEngine::open(tmp.path(), Settings::default()).unwrap()
}

fn found(outcome: QueryOutcome) -> RetrievedContext {
    match outcome {
        QueryOutcome::Found(ctx) => ctx,
        QueryOutcome::NoResults => panic!("expected results"),
    }
}

/// Returns a fixed ranking for every query.
struct StaticEmbeddings {
    ranking: Mutex<Vec<ChildChunk>>,
}

impl EmbeddingIndex for StaticEmbeddings {
    fn index(&self, chunks: &[ChildChunk]) -> anyhow::Result<()> {
        self.ranking.lock().unwrap().extend_from_slice(chunks);
        Ok(())
    }

    fn search(&self, _query: &str, k: usize, kind: Option<ChunkKind>) -> anyhow::Result<Vec<ChildChunk>> {
        assert_eq!(kind, Some(ChunkKind::Child));
        Ok(self.ranking.lock().unwrap().iter().take(k).cloned().collect())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.ranking.lock().unwrap().clear();
        Ok(())
    }
}

struct FailingEmbeddings;

impl EmbeddingIndex for FailingEmbeddings {
    fn index(&self, _chunks: &[ChildChunk]) -> anyhow::Result<()> {
        Err(anyhow!("embedding service offline"))
    }

    fn search(&self, _query: &str, _k: usize, _kind: Option<ChunkKind>) -> anyhow::Result<Vec<ChildChunk>> {
        Err(anyhow!("embedding service offline"))
    }

    fn clear(&self) -> anyhow::Result<()> {
        Err(anyhow!("embedding service offline"))
    }
}

/// Scores by how often `term` occurs in the passage.
struct TermScorer {
    term: &'static str,
    calls: AtomicUsize,
}

impl RelevanceScorer for TermScorer {
    fn score(&self, _query: &str, text: &str) -> anyhow::Result<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.matches(self.term).count() as f32)
    }
}

#[test]
fn exhaust_query_returns_exhaust_section_only() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let (doc, pages) = duster();
    let report = engine.ingest_pages(&doc, &pages).unwrap();
    assert_eq!(report.parents, 2);
    assert!(!report.skipped);

    let ctx = found(engine.query("exhaust manifold gasket", 5, None).unwrap());
    assert!(ctx.context.text.contains("catalytic converter heat shield"));
    assert!(!ctx.context.text.contains("brake fluid"));
    assert!(ctx.context.text.starts_with("[Source 1: Exhaust System (Full Section)]\n"));
    assert_eq!(ctx.context.sources.len(), 1);
    let source = &ctx.context.sources[0];
    assert!(source.full_section);
    assert_eq!(source.source_file, "duster_manual.txt");
    assert_eq!(source.page_numbers, vec![1]);
    assert!(source.preview.chars().count() <= 200);
}

#[test]
fn reingesting_same_content_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let (doc, pages) = duster();
    engine.ingest_pages(&doc, &pages).unwrap();
    let before = engine.stats();

    let again = engine.ingest_pages(&doc, &pages).unwrap();
    assert!(again.skipped);
    assert_eq!(engine.stats(), before);
}

#[test]
fn empty_engine_and_unmatched_query_give_no_results() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    assert_eq!(engine.query("brake pads", 5, None).unwrap(), QueryOutcome::NoResults);

    let (doc, pages) = duster();
    engine.ingest_pages(&doc, &pages).unwrap();
    assert_eq!(engine.query("turbocharger wastegate", 5, None).unwrap(), QueryOutcome::NoResults);
    assert_eq!(engine.query("   ", 5, None).unwrap(), QueryOutcome::NoResults);
}

#[test]
fn failing_embeddings_match_keyword_only_results() {
    let keyword_only = TempDir::new().unwrap();
    let degraded = TempDir::new().unwrap();
    let plain = engine(&keyword_only);
    let with_failing = engine(&degraded).with_embeddings(Arc::new(FailingEmbeddings));

    for e in [&plain, &with_failing] {
        let (doc, pages) = duster();
        e.ingest_pages(&doc, &pages).unwrap();
        let (doc, pages) = logan();
        e.ingest_pages(&doc, &pages).unwrap();
    }

    for q in ["brake pads", "coolant reservoir", "exhaust"] {
        let a = found(plain.query(q, 3, None).unwrap());
        let b = found(with_failing.query(q, 3, None).unwrap());
        assert_eq!(a.passages, b.passages, "query {q}");
        assert_eq!(a.context, b.context);
    }
}

#[test]
fn embedding_signal_fills_keyword_gaps() {
    let tmp = TempDir::new().unwrap();
    let embeddings = Arc::new(StaticEmbeddings { ranking: Mutex::new(Vec::new()) });
    let engine = engine(&tmp).with_embeddings(embeddings.clone());
    let (doc, pages) = duster();
    engine.ingest_pages(&doc, &pages).unwrap();
    assert_eq!(embeddings.ranking.lock().unwrap().len(), 2);

    // no keyword overlap at all
    let ctx = found(engine.query("my car will not stop quickly", 1, None).unwrap());
    assert_eq!(ctx.context.sources[0].section_title, "Braking System");
}

#[test]
fn children_of_one_parent_expand_to_a_single_source() {
    let tmp = TempDir::new().unwrap();
    let settings = Settings {
        chunking: ChunkingConfig { child_max_chars: 120, child_overlap_chars: 20, ..ChunkingConfig::default() },
        ..Settings::default()
    };
    let engine = RetrievalEngine::open(tmp.path(), settings).unwrap();
    let (doc, pages) = logan();
    let report = engine.ingest_pages(&doc, &pages).unwrap();
    assert_eq!(report.parents, 1);
    assert!(report.children >= 4);

    let ctx = found(engine.query("coolant", 10, None).unwrap());
    assert!(ctx.passages.len() > 1, "several children matched");
    assert_eq!(ctx.context.sources.len(), 1);
    assert_eq!(ctx.context.text.matches("thermostat housing").count(), 1);
    assert_eq!(ctx.context.sources[0].page_numbers, vec![7]);
}

#[test]
fn scorer_drives_final_order() {
    let tmp = TempDir::new().unwrap();
    let scorer = Arc::new(TermScorer { term: "radiator", calls: AtomicUsize::new(0) });
    let settings = Settings {
        chunking: ChunkingConfig { child_max_chars: 120, child_overlap_chars: 0, ..ChunkingConfig::default() },
        ..Settings::default()
    };
    let engine = RetrievalEngine::open(tmp.path(), settings).unwrap().with_scorer(scorer.clone());
    let (doc, pages) = logan();
    engine.ingest_pages(&doc, &pages).unwrap();

    let ctx = found(engine.query("coolant", 1, None).unwrap());
    assert!(scorer.calls.load(Ordering::SeqCst) > 1);
    assert_eq!(ctx.passages.len(), 1);
    assert!(ctx.passages[0].chunk.text.contains("radiator"));
}

#[test]
fn visual_terms_mark_broad_intent() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let (doc, pages) = duster();
    engine.ingest_pages(&doc, &pages).unwrap();

    assert!(found(engine.query("show me the exhaust heat shield", 3, None).unwrap()).broad_intent);
    assert!(!found(engine.query("exhaust heat shield", 3, None).unwrap()).broad_intent);
    assert!(found(engine.query("exhaust heat shield", 3, Some(true)).unwrap()).broad_intent);
}

#[test]
fn stats_and_reset() {
    let tmp = TempDir::new().unwrap();
    let embeddings = Arc::new(StaticEmbeddings { ranking: Mutex::new(Vec::new()) });
    let engine = engine(&tmp).with_embeddings(embeddings.clone());
    let (doc, pages) = duster();
    engine.ingest_pages(&doc, &pages).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.parent_count, 2);
    assert_eq!(stats.child_count, 2);
    assert!(stats.index_present);
    assert_eq!(stats.total_parent_chars, BRAKE_BODY.chars().count() + EXHAUST_BODY.chars().count());

    engine.reset().unwrap();
    let stats = engine.stats();
    assert_eq!((stats.parent_count, stats.child_count, stats.index_present), (0, 0, false));
    assert!(embeddings.ranking.lock().unwrap().is_empty());
    assert_eq!(engine.query("brake", 3, None).unwrap(), QueryOutcome::NoResults);

    let reopened = RetrievalEngine::open(tmp.path(), Settings::default()).unwrap();
    assert_eq!(reopened.stats().parent_count, 0);
    assert!(!reopened.stats().index_present);
}

#[test]
fn reset_attempts_every_step() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp).with_embeddings(Arc::new(FailingEmbeddings));
    let (doc, pages) = duster();
    engine.ingest_pages(&doc, &pages).unwrap();

    assert!(engine.reset().is_err());
    let stats = engine.stats();
    assert_eq!(stats.parent_count, 0);
    assert!(!stats.index_present);
}

#[test]
fn remove_document_drops_only_its_content() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp);
    let (duster_doc, pages) = duster();
    engine.ingest_pages(&duster_doc, &pages).unwrap();
    let (logan_doc, pages) = logan();
    engine.ingest_pages(&logan_doc, &pages).unwrap();

    assert_eq!(engine.remove_document(&duster_doc.hash).unwrap(), 2);
    assert_eq!(engine.query("brake pads", 3, None).unwrap(), QueryOutcome::NoResults);
    assert!(matches!(engine.query("coolant", 3, None).unwrap(), QueryOutcome::Found(_)));
    assert!(engine.remove_document(&duster_doc.hash).is_err());

    // removed content can be ingested again
    assert!(!engine.ingest_pages(&duster_doc, &duster().1).unwrap().skipped);
}

#[test]
fn state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = engine(&tmp);
        let (doc, pages) = duster();
        engine.ingest_pages(&doc, &pages).unwrap();
    }
    let engine = engine(&tmp);
    let ctx = found(engine.query("brake pads", 3, None).unwrap());
    assert_eq!(ctx.context.sources[0].section_title, "Braking System");
    assert!(ctx.context.sources[0].full_section);
}

#[test]
fn concurrent_queries_share_one_engine() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(engine(&tmp));
    let (doc, pages) = duster();
    engine.ingest_pages(&doc, &pages).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let q = if i % 2 == 0 { "brake pads" } else { "exhaust gasket" };
                found(engine.query(q, 3, None).unwrap()).context.sources[0].section_title.clone()
            })
        })
        .collect();
    for (i, h) in handles.into_iter().enumerate() {
        let title = h.join().unwrap();
        let expected = if i % 2 == 0 { "Braking System" } else { "Exhaust System" };
        assert_eq!(title, expected);
    }
}

fn engine_at(docstore_path: PathBuf, keyword_root: PathBuf) -> RetrievalEngine {
    let docstore = Arc::new(DocumentStore::open(docstore_path));
    let keyword = Arc::new(KeywordIndex::open(keyword_root));
    RetrievalEngine::new(docstore, keyword, Settings::default()).unwrap()
}

#[test]
fn failed_store_write_can_be_retried() {
    let tmp = TempDir::new().unwrap();
    let blocked = tmp.path().join("store");
    fs::write(&blocked, "file in the way").unwrap();
    let engine = engine_at(blocked.join("docstore.json"), tmp.path().join("kw"));
    let (doc, pages) = duster();

    assert!(engine.ingest_pages(&doc, &pages).is_err());
    assert!(engine.docstore().is_empty());
    assert!(!engine.keyword_index().is_present());

    fs::remove_file(&blocked).unwrap();
    let report = engine.ingest_pages(&doc, &pages).unwrap();
    assert!(!report.skipped);
    assert_eq!(report.parents, 2);
    let ctx = found(engine.query("exhaust manifold gasket", 5, None).unwrap());
    assert!(ctx.context.sources[0].full_section);
}

#[test]
fn failed_keyword_rebuild_rolls_back_parents() {
    let tmp = TempDir::new().unwrap();
    let blocked = tmp.path().join("kw");
    fs::write(&blocked, "file in the way").unwrap();
    let engine = engine_at(tmp.path().join("docstore.json"), blocked.clone());
    let (doc, pages) = duster();

    assert!(engine.ingest_pages(&doc, &pages).is_err());
    assert!(!engine.docstore().contains_document(&doc.hash));
    assert!(DocumentStore::open(tmp.path().join("docstore.json")).is_empty());

    fs::remove_file(&blocked).unwrap();
    let report = engine.ingest_pages(&doc, &pages).unwrap();
    assert!(!report.skipped);
    assert_eq!(engine.stats().parent_count, 2);
    assert_eq!(found(engine.query("brake fluid", 5, None).unwrap()).context.sources[0].section_title, "Braking System");
}
