//! Deterministic text normalization for bug summaries and search queries.
//!
//! The pipeline mirrors the preprocessing the offline topic model was
//! trained with: lowercase, strip URL-like substrings, keep alphanumeric
//! runs, drop short tokens and stopwords. It is a pure function - the same
//! input always yields the same token sequence.

use regex::Regex;
use std::sync::OnceLock;

/// Minimum surviving token length (tokens shorter than this are dropped).
const MIN_TOKEN_LEN: usize = 3;

/// English stopwords matched against lowercased tokens.
///
/// A fixed embedded subset of the usual English list; the vocabulary used
/// in training excludes the same words, so anything missed here falls out
/// at the out-of-vocabulary filter anyway.
const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "and", "any", "are",
    "because", "been", "before", "being", "below", "between", "both", "but",
    "can", "cannot", "could", "did", "does", "doing", "down", "during", "each",
    "few", "for", "from", "further", "had", "has", "have", "having", "her",
    "here", "hers", "herself", "him", "himself", "his", "how", "into", "its",
    "itself", "just", "more", "most", "myself", "nor", "not", "now", "off",
    "once", "only", "other", "our", "ours", "ourselves", "out", "over", "own",
    "same", "she", "should", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "too", "under", "until", "very", "was", "were", "what",
    "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "you", "your", "yours", "yourself", "yourselves",
];

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"http\S+").expect("static regex"))
}

fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("static regex"))
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Normalize free text into an ordered token sequence.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let stripped = url_pattern().replace_all(&lowered, " ");

    token_pattern()
        .find_iter(&stripped)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !is_stopword(t))
        .map(|t| t.to_string())
        .collect()
}

/// Preprocess a free-text search query into match terms.
///
/// Same pipeline as `tokenize`; kept as a separate entry point so query
/// handling can diverge from model preprocessing without touching callers.
pub fn preprocess_query(query: &str) -> Vec<String> {
    tokenize(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopword_table_is_sorted() {
        // binary_search requires it
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(STOPWORDS, sorted.as_slice());
    }

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        let tokens = tokenize("Crash in GfxRenderer::paint when resizing");
        assert_eq!(tokens, vec!["crash", "gfxrenderer", "paint", "resizing"]);
    }

    #[test]
    fn test_tokenize_strips_urls() {
        let tokens = tokenize("see https://bugs.example.com/show?id=42 for details");
        assert!(!tokens.iter().any(|t| t.contains("example")));
        assert_eq!(tokens, vec!["see", "details"]);
    }

    #[test]
    fn test_tokenize_drops_short_tokens_and_stopwords() {
        let tokens = tokenize("it is a ui bug in the parser");
        // "ui" is below the length floor, "bug" survives
        assert_eq!(tokens, vec!["bug", "parser"]);
    }

    #[test]
    fn test_tokenize_is_idempotent() {
        let text = "Intermittent TIMEOUT in netwerk/test http://log.tld/x browser";
        let once = tokenize(text);
        let twice = tokenize(&once.join(" "));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_tokenize_empty_and_symbol_only() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("!!! ??? ~~").is_empty());
    }

    #[test]
    fn test_tokenize_keeps_numeric_runs() {
        let tokens = tokenize("error 1042 from driver v2");
        assert!(tokens.contains(&"1042".to_string()));
        assert!(tokens.contains(&"error".to_string()));
    }
}
