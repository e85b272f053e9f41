use std::fmt::Write;

use gridrag_core::count_tokens;
use gridrag_core::types::Candidate;

/// One admitted candidate as presented to the generator.
#[derive(Debug, Clone)]
pub struct ContextSource {
    pub label: String,
    pub candidate: Candidate,
}

#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<ContextSource>,
    /// Chunk tokens included, counted like the chunker counts them.
    pub tokens: usize,
    /// Lower-ranked candidates left out to respect the budget.
    pub dropped: usize,
}

impl AssembledContext {
    pub fn source(&self, label: &str) -> Option<&ContextSource> {
        self.sources.iter().find(|s| s.label == label)
    }
}

/// Lay out candidates in rank order under labels `S1`, `S2`, ...
///
/// Chunks are included whole. The first candidate is always included; after
/// that, assembly stops at the first chunk that would exceed `token_budget`,
/// so only the lowest-ranked candidates are ever dropped.
pub fn assemble(candidates: &[Candidate], token_budget: usize) -> AssembledContext {
    let mut ctx = AssembledContext::default();
    for (i, candidate) in candidates.iter().enumerate() {
        let chunk = &candidate.chunk.chunk;
        let tokens = count_tokens(&chunk.text);
        if i > 0 && ctx.tokens + tokens > token_budget {
            ctx.dropped = candidates.len() - i;
            break;
        }
        let label = format!("S{}", i + 1);
        let location = chunk.section_reference().unwrap_or_else(|| "-".to_string());
        let _ = writeln!(ctx.text, "[{label}] {} | {location} | {}", chunk.metadata.title, chunk.id);
        let _ = writeln!(ctx.text, "{}\n", chunk.text.trim());
        ctx.tokens += tokens;
        ctx.sources.push(ContextSource { label, candidate: candidate.clone() });
    }
    ctx
}
