//! Removes exact and near-duplicate passages from a ranked list.
//!
//! Overlapping child windows and repeated boilerplate across manuals tend to
//! surface the same text several times; keeping them all would waste the
//! reranker's shortlist and the answer context.

use std::collections::HashSet;

use tracing::debug;

use manualrag_core::config::DedupConfig;
use manualrag_core::types::RankedCandidate;

struct Accepted {
    candidate: RankedCandidate,
    normalized: String,
    tokens: HashSet<String>,
}

impl Accepted {
    fn new(candidate: RankedCandidate, normalized: String) -> Self {
        let tokens = normalized.split_whitespace().map(str::to_string).collect();
        Self { candidate, normalized, tokens }
    }

    fn chars(&self) -> usize {
        self.normalized.chars().count()
    }
}

enum Verdict {
    Distinct,
    Duplicate,
    /// The newcomer strictly contains a short accepted text.
    Supersedes,
}

/// Order preserving; the first occurrence of a passage keeps its rank.
///
/// When either text is shorter than `short_text_chars`, containment decides:
/// a later passage that strictly contains an accepted one takes over its
/// slot, so the longer text survives at the better rank. Longer pairs are
/// compared by token overlap and the later passage is the one dropped.
pub fn deduplicate(candidates: Vec<RankedCandidate>, config: &DedupConfig) -> Vec<RankedCandidate> {
    let total = candidates.len();
    let mut seen: HashSet<String> = HashSet::new();
    let mut accepted: Vec<Accepted> = Vec::new();

    for candidate in candidates {
        let normalized = normalize(&candidate.chunk.text);
        if !seen.insert(normalized.clone()) {
            continue;
        }
        let incoming = Accepted::new(candidate, normalized);

        let mut superseded = Vec::new();
        let mut duplicate = false;
        for (slot, existing) in accepted.iter().enumerate() {
            match compare(&incoming, existing, config) {
                Verdict::Distinct => {}
                Verdict::Duplicate => {
                    duplicate = true;
                    break;
                }
                Verdict::Supersedes => superseded.push(slot),
            }
        }
        if duplicate {
            continue;
        }
        match superseded.split_first() {
            None => accepted.push(incoming),
            Some((&first, rest)) => {
                accepted[first] = incoming;
                for &slot in rest.iter().rev() {
                    accepted.remove(slot);
                }
            }
        }
    }

    if accepted.len() < total {
        debug!(removed = total - accepted.len(), kept = accepted.len(), "removed duplicate passages");
    }
    accepted.into_iter().map(|a| a.candidate).collect()
}

fn compare(incoming: &Accepted, existing: &Accepted, config: &DedupConfig) -> Verdict {
    let (new_len, old_len) = (incoming.chars(), existing.chars());
    if new_len < config.short_text_chars || old_len < config.short_text_chars {
        return if new_len > old_len && incoming.normalized.contains(&existing.normalized) {
            Verdict::Supersedes
        } else if existing.normalized.contains(&incoming.normalized) {
            Verdict::Duplicate
        } else {
            Verdict::Distinct
        };
    }
    if overlap_ratio(&incoming.tokens, &existing.tokens) >= config.similarity_threshold {
        Verdict::Duplicate
    } else {
        Verdict::Distinct
    }
}

/// `|A ∩ B| / min(|A|, |B|)`; zero when either side is empty.
fn overlap_ratio(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let shared = small.iter().filter(|t| large.contains(*t)).count();
    shared as f32 / smaller as f32
}

/// Trimmed, lowercased, whitespace collapsed.
fn normalize(text: &str) -> String {
    text.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}
