//! Text signals shared by the scoring strategies.
//!
//! Every helper here is a pure function of its input; none of them allocates
//! state that outlives the call, and all collection ordering is deterministic.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\{\{[^}]*\}\}|\[(?:first[ _]?name|last[ _]?name|name|company|company[ _]?name|your[ _]?name|recipient|insert[^\]]*)\]|(?-i:<[A-Z][A-Z_]{2,}>)",
    )
    .expect("placeholder regex should be valid")
});

static SENTENCE_SPLIT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s+|\n+").expect("sentence split regex should be valid"));

static WORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z'-]*").expect("word regex should be valid"));

/// Phrases that push outbound messages toward spam folders.
pub const SPAM_PHRASES: &[&str] = &[
    "act now",
    "100% free",
    "risk-free",
    "guaranteed",
    "limited time offer",
    "click here",
    "buy now",
    "no obligation",
    "once in a lifetime",
    "make money fast",
    "winner",
    "urgent response needed",
];

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "because", "before", "being", "between", "could", "every",
    "first", "from", "have", "into", "just", "more", "most", "other", "over", "should", "some",
    "such", "than", "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "very", "were", "what", "when", "where", "which", "while", "will", "with",
    "would", "your",
];

/// Whitespace-delimited word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// 100 inside `[min, max]`, proportional below, decaying as `max / words` above.
pub fn length_score(words: usize, min: usize, max: usize) -> f64 {
    if words == 0 {
        return 0.0;
    }
    if words < min {
        return 100.0 * words as f64 / min.max(1) as f64;
    }
    if words > max {
        return 100.0 * max as f64 / words as f64;
    }
    100.0
}

/// Unfilled template placeholders like `{{first_name}}` or `[Company]`.
pub fn placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER_REGEX.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Spam phrases present in `text`, case-insensitively, in table order.
pub fn spam_hits(text: &str) -> Vec<&'static str> {
    let lowered = text.to_lowercase();
    SPAM_PHRASES.iter().copied().filter(|phrase| lowered.contains(phrase)).collect()
}

/// Fraction of `keywords` that appear in `text`. An empty keyword list covers fully.
pub fn keyword_coverage(text: &str, keywords: &[String]) -> f64 {
    let wanted: Vec<&String> = keywords.iter().filter(|k| !k.trim().is_empty()).collect();
    if wanted.is_empty() {
        return 1.0;
    }
    let lowered = text.to_lowercase();
    let hits = wanted.iter().filter(|k| lowered.contains(&k.trim().to_lowercase())).count();
    hits as f64 / wanted.len() as f64
}

/// Sentences split on terminal punctuation or line breaks, trimmed and non-empty.
pub fn sentences(text: &str) -> Vec<String> {
    SENTENCE_SPLIT_REGEX
        .split(text)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Share of sentences that are distinct. Repeated boilerplate drives this down.
pub fn distinct_sentence_ratio(text: &str) -> f64 {
    let all = sentences(text);
    if all.is_empty() {
        return 1.0;
    }
    let distinct: BTreeSet<&String> = all.iter().collect();
    distinct.len() as f64 / all.len() as f64
}

/// Paragraphs separated by blank lines.
pub fn paragraph_count(text: &str) -> usize {
    text.split("\n\n").filter(|p| !p.trim().is_empty()).count()
}

/// Lowercased content words: alphabetic, longer than four characters, not stopwords.
pub fn content_words(text: &str) -> Vec<String> {
    WORD_REGEX
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() > 4 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// The `n` most frequent content words, ties broken alphabetically.
pub fn top_terms(text: &str, n: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for word in content_words(text) {
        *counts.entry(word).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(word, _)| word).collect()
}

/// Parses the first JSON object embedded in `text`, tolerating code fences and prose.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(&text[start..=end]).ok()? {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_score_bounds() {
        assert_eq!(length_score(0, 10, 20), 0.0);
        assert!((length_score(5, 10, 20) - 50.0).abs() < 1e-9);
        assert_eq!(length_score(15, 10, 20), 100.0);
        assert!((length_score(40, 10, 20) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_placeholders_detected() {
        let found = placeholders("Hi {{first_name}}, how is [Company] doing? <SENDER_NAME>");
        assert_eq!(found.len(), 3);
        assert!(placeholders("Hi Dana, [see attached] for details").is_empty());
    }

    #[test]
    fn test_spam_hits_case_insensitive() {
        assert_eq!(spam_hits("CLICK HERE to Act Now"), vec!["act now", "click here"]);
    }

    #[test]
    fn test_keyword_coverage() {
        let keywords = vec!["pricing".to_string(), "demo".to_string(), " ".to_string()];
        assert!((keyword_coverage("Our Pricing page", &keywords) - 0.5).abs() < 1e-9);
        assert_eq!(keyword_coverage("anything", &[]), 1.0);
    }

    #[test]
    fn test_distinct_sentence_ratio() {
        assert_eq!(distinct_sentence_ratio("Buy it. Buy it. Buy it. Sell it."), 0.5);
        assert_eq!(distinct_sentence_ratio(""), 1.0);
    }

    #[test]
    fn test_top_terms_deterministic_ties() {
        let text = "pipeline revenue pipeline growth revenue churn";
        assert_eq!(top_terms(text, 3), vec!["pipeline", "revenue", "churn"]);
    }

    #[test]
    fn test_extract_json_object_from_fenced_output() {
        let text = "Here you go:\n```json\n{\"score\": 82, \"reasoning\": \"fit\"}\n```";
        let map = extract_json_object(text).unwrap();
        assert_eq!(map["score"], 82);
        assert!(extract_json_object("[1, 2]").is_none());
        assert!(extract_json_object("no json").is_none());
    }
}
