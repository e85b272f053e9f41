//! Citation validation for generated answers.
//!
//! The generator cites context sources with markers such as `[S1]` or
//! `[S1, S3]`. Every sentence that makes a claim must carry at least one
//! marker, and every marker must name a source that was in the context.

use once_cell::sync::Lazy;
use regex::Regex;

use gridrag_core::types::Citation;

use crate::context::ContextSource;

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(S\d+(?:\s*[,;]\s*S\d+)*)\s*\]").expect("valid citation regex"));
static LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"S\d+").expect("valid label regex"));

/// Hedges that, together with a reference to the supplied material, mark a
/// sentence as a statement of missing information rather than a claim.
const HEDGES: &[&str] = &[
    "not specified",
    "not stated",
    "not mentioned",
    "not covered",
    "not provided",
    "not included",
    "not contain",
    "not say",
    "not address",
    "no information",
    "not enough information",
    "insufficient information",
    "cannot determine",
    "can't determine",
    "unable to determine",
    "cannot confirm",
    "unable to confirm",
    "do not know",
    "don't know",
];

/// What a hedge must be about: the context handed to the model.
const REFERENTS: &[&str] = &["context", "source", "document", "provided", "available information"];

/// A second clause after a hedge ("..., but torque to 45 Nm") can smuggle in a claim.
const CONTRAST: &[&str] = &[" but ", " however", " although ", ";"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationCheck {
    /// Valid citations in order of first appearance, one per source.
    pub citations: Vec<Citation>,
    /// Indices into the context sources, parallel to `citations`.
    pub cited_sources: Vec<usize>,
    pub uncited_claims: usize,
    /// Labels cited but absent from the context, in order of appearance.
    pub unknown_labels: Vec<String>,
    pub warnings: Vec<String>,
}

impl CitationCheck {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

struct Sentence {
    text: String,
    labels: Vec<String>,
}

fn labels_in(marker_body: &str) -> impl Iterator<Item = String> + '_ {
    LABEL.find_iter(marker_body).map(|m| m.as_str().to_string())
}

/// Split into sentences; a fragment holding only markers (as in
/// `"Open breaker 52A. [S1]"`) belongs to the sentence before it.
fn sentences(text: &str) -> Vec<Sentence> {
    let mut raw = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            raw.push(&text[start..end]);
            start = end;
        }
    }
    raw.push(&text[start..]);

    let mut out: Vec<Sentence> = Vec::new();
    for fragment in raw {
        let labels: Vec<String> = MARKER.captures_iter(fragment).flat_map(|c| labels_in(c.get(1).map_or("", |m| m.as_str())).collect::<Vec<_>>()).collect();
        let bare = MARKER.replace_all(fragment, "");
        let bare = bare.trim();
        if bare.chars().any(char::is_alphanumeric) {
            out.push(Sentence { text: bare.to_string(), labels });
        } else if let Some(prev) = out.last_mut() {
            prev.labels.extend(labels);
        } else if !labels.is_empty() {
            out.push(Sentence { text: String::new(), labels });
        }
    }
    out
}

/// The sentence only says the context lacks something. It must hedge, name the
/// context, and carry no figures or second clause of its own.
fn states_missing_information(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    HEDGES.iter().any(|h| lower.contains(h))
        && REFERENTS.iter().any(|r| lower.contains(r))
        && !CONTRAST.iter().any(|c| lower.contains(c))
        && !lower.chars().any(|c| c.is_ascii_digit())
}

fn is_claim(sentence: &str) -> bool {
    if !sentence.chars().any(char::is_alphanumeric) || sentence.trim_end().ends_with(':') {
        return false;
    }
    !states_missing_information(sentence)
}

fn excerpt(sentence: &str) -> String {
    const MAX: usize = 60;
    match sentence.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}...", &sentence[..i]),
        None => sentence.to_string(),
    }
}

pub fn validate(answer: &str, sources: &[ContextSource]) -> CitationCheck {
    let mut check = CitationCheck::default();
    for sentence in sentences(answer) {
        if sentence.labels.is_empty() {
            if is_claim(&sentence.text) {
                check.uncited_claims += 1;
                check.warnings.push(format!("uncited claim: \"{}\"", excerpt(&sentence.text)));
            }
            continue;
        }
        for label in sentence.labels {
            match sources.iter().position(|s| s.label == label) {
                Some(idx) => {
                    if !check.cited_sources.contains(&idx) {
                        let chunk = &sources[idx].candidate.chunk.chunk;
                        check.cited_sources.push(idx);
                        check.citations.push(Citation {
                            chunk_id: chunk.id.clone(),
                            document_title: chunk.metadata.title.clone(),
                            section_reference: chunk.section_reference(),
                        });
                    }
                }
                None => {
                    if !check.unknown_labels.contains(&label) {
                        check.warnings.push(format!("citation [{label}] does not match any provided source"));
                        check.unknown_labels.push(label);
                    }
                }
            }
        }
    }
    check
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_marker_attaches_to_previous_sentence() {
        let s = sentences("Open breaker 52A. [S1]\nVerify isolation [S2, S3].");
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].labels, vec!["S1"]);
        assert_eq!(s[1].labels, vec!["S2", "S3"]);
        assert_eq!(s[1].text, "Verify isolation .");
    }

    #[test]
    fn decimals_do_not_split_sentences() {
        let s = sentences("Set the relay to 1.25 pu [S1].");
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn uncertainty_and_lead_in_sentences_are_not_claims() {
        assert!(!is_claim("The torque value is not specified in the provided context."));
        assert!(!is_claim("Follow these steps:"));
        assert!(is_claim("The torque value is 45 Nm."));
    }

    #[test]
    fn hedge_words_alone_do_not_exempt_a_claim() {
        assert!(is_claim("Insufficient grounding is acceptable for the first ten minutes of the procedure."));
        assert!(is_claim("It is unclear why, but the relay resets after 30 seconds."));
        assert!(is_claim("The lug torque is not specified in the provided context, but use 45 Nm."));
        assert!(is_claim("The torque is not specified in the context for units 3 and 4."));
        assert!(!is_claim("The provided documents do not say which PPE category applies."));
    }
}
