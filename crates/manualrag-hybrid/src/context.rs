//! Expands ranked child passages into the context handed to the answer
//! generator.
//!
//! Children are retrieved because they are small and precise; the answer is
//! grounded on the full parent section they belong to. Each stored parent is
//! included once, at the rank of its best child; children whose parent is
//! missing contribute their own text.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use manualrag_core::docstore::DocumentStore;
use manualrag_core::types::RankedCandidate;

const PREVIEW_CHARS: usize = 200;

/// One numbered part of the assembled context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub number: usize,
    pub chunk_id: String,
    pub parent_id: String,
    pub section_title: String,
    pub source_file: String,
    pub page_numbers: Vec<u32>,
    /// Whether the part is the whole parent section or only the child.
    pub full_section: bool,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

pub struct ContextAssembler {
    docstore: Arc<DocumentStore>,
}

impl ContextAssembler {
    pub fn new(docstore: Arc<DocumentStore>) -> Self {
        Self { docstore }
    }

    pub fn assemble(&self, ranked: &[RankedCandidate]) -> AssembledContext {
        let mut included: HashSet<&str> = HashSet::new();
        let mut parts: Vec<String> = Vec::new();
        let mut sources: Vec<SourceRef> = Vec::new();

        for candidate in ranked {
            let child = &candidate.chunk;
            if included.contains(child.parent_id.as_str()) {
                continue;
            }
            let number = parts.len() + 1;
            let title = &child.meta.section_title;
            let (label, body, full_section) = match self.docstore.get(&child.parent_id) {
                Some(parent) => {
                    included.insert(child.parent_id.as_str());
                    (format!("[Source {number}: {title} (Full Section)]"), parent.text.clone(), true)
                }
                None => {
                    debug!(parent_id = %child.parent_id, "parent missing from document store, using child text");
                    (format!("[Source {number}: {title}]"), child.text.clone(), false)
                }
            };
            sources.push(SourceRef {
                number,
                chunk_id: child.id.clone(),
                parent_id: child.parent_id.clone(),
                section_title: title.clone(),
                source_file: child.meta.source_file.clone(),
                page_numbers: child.meta.page_numbers.clone(),
                full_section,
                preview: body.chars().take(PREVIEW_CHARS).collect(),
            });
            parts.push(format!("{label}\n{body}"));
        }

        AssembledContext { text: parts.join("\n\n"), sources }
    }
}
