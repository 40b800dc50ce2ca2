//! Chunk hierarchy builder.
//!
//! A document's page-ordered text is cut into parent sections at detected
//! headers; each parent is then split into bounded, overlapping child
//! passages for indexing. Parents are kept whole for context expansion.

use std::collections::{BTreeSet, VecDeque};
use std::mem;

use regex::Regex;
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::{ChildChunk, ChunkMeta, PageText, ParentChunk, SourceDocument};

/// Optional numeric / alphanumeric section code, then a capitalized phrase.
const HEADER_PATTERN: &str = r"^((?:\d{1,2}|[A-Z]{1,2}\d{1,3})(?:\.\d{1,2})*\.?\s*)?([A-Z][a-zA-Z\s\-&]{3,})$";

/// Title of the section that collects text before the first header.
pub const DEFAULT_SECTION_TITLE: &str = "General";

/// Split boundaries from coarsest to finest; `""` splits between chars.
const SEPARATORS: [&str; 10] = ["\n## ", "\n### ", "\n#### ", "\n\n", "\n", ". ", "; ", ", ", " ", ""];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHierarchy {
    pub parents: Vec<ParentChunk>,
    pub children: Vec<ChildChunk>,
}

pub struct ChunkBuilder {
    config: ChunkingConfig,
    header: Regex,
    splitter: TextSplitter,
}

impl ChunkBuilder {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        let header = Regex::new(HEADER_PATTERN).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let splitter = TextSplitter::new(config.child_max_chars, config.child_overlap_chars)?;
        Ok(Self { config, header, splitter })
    }

    pub fn build(&self, document: &SourceDocument, pages: &[PageText]) -> ChunkHierarchy {
        let parents = self.build_parents(document, pages);
        let children = self.build_children(&parents);
        debug!(file = %document.filename, parents = parents.len(), children = children.len(), "built chunk hierarchy");
        ChunkHierarchy { parents, children }
    }

    pub fn build_parents(&self, document: &SourceDocument, pages: &[PageText]) -> Vec<ParentChunk> {
        let mut kept: Vec<Section> = Vec::new();
        for section in self.split_sections(pages) {
            if section.body_chars() < self.config.min_parent_chars {
                continue;
            }
            match kept.last_mut() {
                Some(prev) if prev.title == section.title => prev.absorb(section),
                _ => kept.push(section),
            }
        }

        kept.into_iter()
            .enumerate()
            .map(|(seq, section)| {
                let text = section.text();
                ParentChunk {
                    id: format!("{}_parent_{}", document.short_hash(), seq),
                    text,
                    meta: ChunkMeta {
                        document_hash: document.hash.clone(),
                        source_file: document.filename.clone(),
                        category: document.category.clone(),
                        section_title: section.title,
                        section_code: section.code,
                        page_numbers: section.pages.into_iter().collect(),
                    },
                }
            })
            .collect()
    }

    pub fn build_children(&self, parents: &[ParentChunk]) -> Vec<ChildChunk> {
        parents
            .iter()
            .flat_map(|parent| {
                self.splitter.split(&parent.text).into_iter().enumerate().map(move |(index, text)| ChildChunk {
                    id: format!("{}_child_{}", parent.id, index),
                    parent_id: parent.id.clone(),
                    index,
                    text,
                    meta: parent.meta.clone(),
                })
            })
            .collect()
    }

    /// Returns `(code, title)` when `line` looks like a section header.
    pub fn match_header(&self, line: &str) -> Option<(Option<String>, String)> {
        if line.chars().count() >= self.config.header_max_chars {
            return None;
        }
        let caps = self.header.captures(line)?;
        let code = caps.get(1).map(|m| m.as_str().trim().to_string()).filter(|c| !c.is_empty());
        let title = caps.get(2)?.as_str().trim().to_string();
        Some((code, title))
    }

    fn split_sections(&self, pages: &[PageText]) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut current = Section::new(DEFAULT_SECTION_TITLE.to_string(), None);
        for page in pages {
            for raw in page.text.lines() {
                let line = raw.trim_end();
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.chars().all(|c| c.is_ascii_digit()) {
                    continue;
                }
                if let Some((code, title)) = self.match_header(trimmed) {
                    // Repeated running header: keep filling the open section.
                    if title == current.title {
                        continue;
                    }
                    sections.push(mem::replace(&mut current, Section::new(title, code)));
                    current.pages.insert(page.number);
                    continue;
                }
                current.lines.push(line.to_string());
                current.pages.insert(page.number);
            }
        }
        sections.push(current);
        sections
    }
}

struct Section {
    title: String,
    code: Option<String>,
    lines: Vec<String>,
    pages: BTreeSet<u32>,
}

impl Section {
    fn new(title: String, code: Option<String>) -> Self {
        Self { title, code, lines: Vec::new(), pages: BTreeSet::new() }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn body_chars(&self) -> usize {
        self.text().trim().chars().count()
    }

    fn absorb(&mut self, other: Section) {
        self.lines.extend(other.lines);
        self.pages.extend(other.pages);
        if self.code.is_none() {
            self.code = other.code;
        }
    }
}

/// Recursive boundary-aware splitter with tail-to-head overlap.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    max_chars: usize,
    overlap_chars: usize,
}

impl TextSplitter {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if max_chars == 0 || overlap_chars >= max_chars {
            return Err(Error::InvalidConfig(format!(
                "splitter needs 0 <= overlap < max, got overlap={} max={}",
                overlap_chars, max_chars
            )));
        }
        Ok(Self { max_chars, overlap_chars })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);
        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.max_chars {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                let piece = piece.trim();
                if !piece.is_empty() {
                    chunks.push(piece.to_string());
                }
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }
        chunks
    }

    /// Greedily packs pieces up to `max_chars`; on each emit the trailing
    /// pieces totalling at most `overlap_chars` seed the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;
        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.max_chars && !window.is_empty() {
                if let Some(chunk) = join_trimmed(&window) {
                    out.push(chunk);
                }
                while total > self.overlap_chars || (total > 0 && total + len > self.max_chars) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }
        if let Some(chunk) = join_trimmed(&window) {
            out.push(chunk);
        }
        out
    }
}

fn pick_separator<'s>(text: &str, separators: &'s [&'s str]) -> (&'s str, &'s [&'s str]) {
    for (i, &sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return (sep, &[]);
        }
        if text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    (separators.last().copied().unwrap_or(""), &[])
}

/// Splits before every occurrence of `separator`, which stays at the start
/// of the following piece. Empty pieces are dropped.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
            start = idx;
        }
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn join_trimmed(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
