//! Query risk classification from a tiered safety lexicon.

use gridrag_core::types::RiskLevel;

/// A term ending in `*` is a stem and matches any word it starts (`evacuat*`
/// covers `evacuate` and `evacuation`). Other terms match the whole word or a
/// regular inflection of it, so `trip` covers `tripped` but not `triplex`.
/// Multi-word terms match consecutive words.
const CRITICAL: &[&str] =
    &["emergenc*", "fire", "explosion", "explode", "explosive", "arc flash", "electrocut*", "fatal*", "evacuat*"];
const HIGH: &[&str] =
    &["shutdown", "shut down", "hazard*", "trip", "fault", "faulty", "overload", "outage", "leak", "leakage", "blackout"];
const MEDIUM: &[&str] = &["lockout", "tagout", "isolat*", "de energiz*", "grounding", "maintenance", "overheat*"];
const LOW: &[&str] = &["inspect*", "procedure", "test", "calibrat*", "check"];

fn words(query: &str) -> Vec<String> {
    query.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).map(str::to_lowercase).collect()
}

fn word_matches(word: &str, term: &str) -> bool {
    if let Some(stem) = term.strip_suffix('*') {
        return word.starts_with(stem);
    }
    let Some(rest) = word.strip_prefix(term) else { return false };
    let rest = match term.chars().last() {
        // doubled final consonant: trip -> tripped, tripping
        Some(c) if rest.starts_with(c) && rest.len() > 1 => &rest[c.len_utf8()..],
        _ => rest,
    };
    matches!(rest, "" | "s" | "es" | "ed" | "ing") || (term.ends_with('e') && rest == "d")
}

fn matches(words: &[String], term: &str) -> bool {
    let parts: Vec<&str> = term.split(' ').collect();
    let (last, head) = match parts.split_last() {
        Some(split) => split,
        None => return false,
    };
    words.windows(parts.len()).any(|w| {
        head.iter().zip(w).all(|(p, word)| word == p) && word_matches(&w[head.len()], last)
    })
}

pub fn classify(query: &str) -> RiskLevel {
    let words = words(query);
    let tiers = [(RiskLevel::Critical, CRITICAL), (RiskLevel::High, HIGH), (RiskLevel::Medium, MEDIUM), (RiskLevel::Low, LOW)];
    tiers
        .into_iter()
        .find(|(_, terms)| terms.iter().any(|t| matches(&words, t)))
        .map_or(RiskLevel::None, |(level, _)| level)
}
