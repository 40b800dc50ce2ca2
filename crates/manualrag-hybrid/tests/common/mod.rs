#![allow(dead_code)]

use manualrag_core::types::{ChildChunk, ChunkMeta, RankedCandidate, Signal};

pub fn child(id: &str, parent_id: &str, text: &str) -> ChildChunk {
    ChildChunk {
        id: id.to_string(),
        parent_id: parent_id.to_string(),
        index: 0,
        text: text.to_string(),
        meta: ChunkMeta {
            document_hash: "hash".to_string(),
            source_file: "duster.txt".to_string(),
            category: "Dacia Duster".to_string(),
            section_title: format!("Section {parent_id}"),
            section_code: None,
            page_numbers: vec![1],
        },
    }
}

pub fn candidate(id: &str, text: &str, signal: Signal) -> RankedCandidate {
    RankedCandidate::new(child(id, &format!("{id}_parent"), text), 1.0, signal)
}

pub fn ids(candidates: &[RankedCandidate]) -> Vec<&str> {
    candidates.iter().map(|c| c.chunk.id.as_str()).collect()
}
