//! Fuzzy name matching for `similar` filters and "did you mean" hints.
//!
//! Scores are 0..=100, case-insensitive, built on normalized Levenshtein
//! distance.

use strsim::normalized_levenshtein;

/// Lowest score that counts as a match.
pub const MIN_SIMILARITY: u8 = 60;

/// Lowest score worth offering as a suggestion after a miss.
pub const SUGGESTION_FLOOR: u8 = 40;

pub const MAX_SUGGESTIONS: usize = 5;

fn score(a: &str, b: &str) -> u8 {
    (normalized_levenshtein(a, b) * 100.0).round() as u8
}

/// Whole-string similarity.
pub fn ratio(a: &str, b: &str) -> u8 {
    score(&a.to_lowercase(), &b.to_lowercase())
}

/// Best similarity of the shorter string against any window of the longer
/// one with the same length, so "planning" scores 100 against "Q1 Planning".
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return if long.is_empty() { 100 } else { 0 };
    }

    let needle: String = short.iter().collect();
    long.windows(short.len())
        .map(|window| score(&needle, &window.iter().collect::<String>()))
        .max()
        .unwrap_or(0)
}

/// The candidate most like `value`, if any reaches `MIN_SIMILARITY`.
pub fn closest<'a>(value: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (ratio(value, c), *c))
        .filter(|(s, _)| *s >= MIN_SIMILARITY)
        .max_by_key(|(s, _)| *s)
        .map(|(_, c)| c)
}

/// Up to `MAX_SUGGESTIONS` names resembling `query`, best first. Ties keep
/// their input order.
pub fn suggestions(query: &str, names: &[String]) -> Vec<String> {
    let mut scored: Vec<(u8, &String)> = names
        .iter()
        .map(|name| (ratio(query, name).max(partial_ratio(query, name)), name))
        .filter(|(s, _)| *s >= SUGGESTION_FLOOR)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let mut out: Vec<String> = Vec::new();
    for (_, name) in scored {
        if !out.contains(name) {
            out.push(name.clone());
        }
        if out.len() == MAX_SUGGESTIONS {
            break;
        }
    }
    out
}
