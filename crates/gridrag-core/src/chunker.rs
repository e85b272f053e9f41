//! Paragraph-first, overlap-preserving chunking.
//!
//! A token is a maximal run of non-whitespace characters. Chunks are byte
//! slices of the source text: chunk `i + 1` starts `overlap` tokens before the
//! end of chunk `i`, and the last chunk runs to the end of the document, so
//! dropping each chunk's declared overlap and concatenating reproduces the
//! original text exactly.

use std::ops::Range;

use tracing::{debug, warn};

use crate::config::ChunkingSettings;
use crate::error::IngestError;
use crate::types::{Chunk, ChunkMetadata, Document, DocumentBody};

/// Token count under the same rule the chunker uses.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
struct Heading {
    start: usize,
    end: usize,
    label: String,
}

#[derive(Debug, Clone)]
struct Window {
    tokens: Range<usize>,
    /// First token not shared with the previous window.
    fresh_start: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    settings: ChunkingSettings,
}

impl Chunker {
    pub fn new(settings: ChunkingSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ChunkingSettings {
        &self.settings
    }

    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>, IngestError> {
        let document_id = document.document_id();
        let text = match &document.body {
            DocumentBody::Text(text) => text.as_str(),
            DocumentBody::Unextracted { reason } => {
                return Err(IngestError::UnsupportedFormat { document_id, reason: reason.clone() });
            }
        };

        let tokens = word_spans(text);
        if tokens.is_empty() {
            debug!(%document_id, "document has no tokens; nothing to chunk");
            return Ok(Vec::new());
        }

        let headings = find_headings(text);
        let units = self.units(text, &tokens, &headings, &document_id);
        let windows = self.windows(&units);
        let page_breaks: Vec<usize> = text.match_indices('\x0c').map(|(i, _)| i).collect();

        let count = windows.len();
        let mut chunks = Vec::with_capacity(count);
        let mut prev_end = 0usize;
        for (ordinal, window) in windows.iter().enumerate() {
            let byte_start = if ordinal == 0 { 0 } else { tokens[window.tokens.start].start };
            let byte_end = if ordinal + 1 == count { text.len() } else { tokens[window.tokens.end].start };
            let overlap_bytes = if ordinal == 0 { 0 } else { prev_end - byte_start };
            let fresh_byte = tokens[window.fresh_start].start;

            let section = {
                let idx = headings.partition_point(|h| h.start <= fresh_byte);
                (idx > 0).then(|| headings[idx - 1].label.clone())
            };
            let page = (!page_breaks.is_empty()).then(|| {
                let breaks = page_breaks.partition_point(|&p| p < fresh_byte);
                u32::try_from(breaks + 1).unwrap_or(u32::MAX)
            });

            chunks.push(Chunk {
                id: format!("{}:{}", document_id, ordinal),
                document_id: document_id.clone(),
                ordinal,
                text: text[byte_start..byte_end].to_string(),
                overlap_bytes,
                token_count: window.tokens.len(),
                metadata: ChunkMetadata {
                    source_id: document.source_id.clone(),
                    title: document.title.clone(),
                    authority: document.authority,
                    version: document.version,
                    ingested_at: document.ingested_at,
                    section,
                    page,
                    byte_start,
                    byte_end,
                },
            });
            prev_end = byte_end;
        }

        debug!(%document_id, tokens = tokens.len(), chunks = chunks.len(), "chunked document");
        Ok(chunks)
    }

    /// Splits the token stream into indivisible units: whole paragraphs when
    /// they fit the budget, otherwise their sentences.
    fn units(&self, text: &str, tokens: &[Token], headings: &[Heading], document_id: &str) -> Vec<Range<usize>> {
        let budget = self.settings.target_tokens;
        let mut units = Vec::new();
        for paragraph in paragraphs(text, tokens, headings) {
            if paragraph.len() <= budget {
                units.push(paragraph);
                continue;
            }
            let sentences = sentences(text, tokens, paragraph.clone());
            if sentences.len() == 1 {
                warn!(
                    %document_id,
                    tokens = paragraph.len(),
                    budget,
                    "paragraph exceeds chunk budget and has no sentence boundaries; emitting oversized chunk"
                );
            } else if let Some(longest) = sentences.iter().map(|s| s.len()).max().filter(|&n| n > budget) {
                warn!(%document_id, tokens = longest, budget, "sentence exceeds chunk budget; emitting oversized chunk");
            }
            units.extend(sentences);
        }
        units
    }

    fn windows(&self, units: &[Range<usize>]) -> Vec<Window> {
        let budget = self.settings.target_tokens;
        let mut windows = Vec::new();
        let mut start = 0usize;
        let mut fresh_start = 0usize;
        let mut u = 0usize;
        while u < units.len() {
            let mut end = units[u].end;
            u += 1;
            while u < units.len() && units[u].end - start <= budget {
                end = units[u].end;
                u += 1;
            }
            windows.push(Window { tokens: start..end, fresh_start });
            if u == units.len() {
                break;
            }
            let overlap = self.settings.overlap_tokens.min((end - start).saturating_sub(1));
            start = end - overlap;
            fresh_start = end;
        }
        windows
    }
}

fn word_spans(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(Token { start: s, end: i });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(Token { start: s, end: text.len() });
    }
    tokens
}

/// Markdown ATX headings, in document order.
fn find_headings(text: &str) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(label) = heading_label(trimmed) {
            let start = offset + (line.len() - trimmed.len());
            headings.push(Heading { start, end: offset + line.trim_end().len(), label });
        }
        offset += line.len();
    }
    headings
}

fn heading_label(line: &str) -> Option<String> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let label = rest.trim().trim_end_matches('#').trim();
    (!label.is_empty()).then(|| label.to_string())
}

fn on_heading(headings: &[Heading], byte: usize) -> bool {
    let idx = headings.partition_point(|h| h.start <= byte);
    idx > 0 && byte < headings[idx - 1].end
}

fn paragraphs(text: &str, tokens: &[Token], headings: &[Heading]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for j in 1..tokens.len() {
        let gap = &text[tokens[j - 1].end..tokens[j].start];
        let newlines = gap.matches('\n').count();
        let structural = newlines >= 1
            && (on_heading(headings, tokens[j].start) || on_heading(headings, tokens[j - 1].start));
        if newlines >= 2 || gap.contains('\x0c') || structural {
            out.push(start..j);
            start = j;
        }
    }
    out.push(start..tokens.len());
    out
}

fn sentences(text: &str, tokens: &[Token], paragraph: Range<usize>) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = paragraph.start;
    for j in paragraph.clone() {
        if j + 1 < paragraph.end && ends_sentence(&text[tokens[j].start..tokens[j].end]) {
            out.push(start..j + 1);
            start = j + 1;
        }
    }
    out.push(start..paragraph.end);
    out
}

fn ends_sentence(word: &str) -> bool {
    let word = word.trim_end_matches(['"', '\'', ')', ']', '\u{201d}', '\u{2019}']);
    word.ends_with(['.', '!', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_labels() {
        assert_eq!(heading_label("## Emergency Shutdown ##"), Some("Emergency Shutdown".to_string()));
        assert_eq!(heading_label("#hashtag"), None);
        assert_eq!(heading_label("####### too deep"), None);
    }

    #[test]
    fn sentence_terminators_ignore_trailing_quotes() {
        assert!(ends_sentence("done.\""));
        assert!(ends_sentence("(really?)"));
        assert!(!ends_sentence("13.8kV"));
    }

    #[test]
    fn word_spans_cover_non_whitespace() {
        let text = "  alpha\tbeta\n\ngamma ";
        let spans: Vec<&str> = word_spans(text).iter().map(|t| &text[t.start..t.end]).collect();
        assert_eq!(spans, vec!["alpha", "beta", "gamma"]);
    }
}
