//! Lexical helpers shared by the reranker, compressor and validator.
//!
//! Everything here is deterministic and works on byte offsets that always sit
//! on UTF-8 char boundaries.

use std::collections::HashSet;
use std::sync::LazyLock;

static SENTENCE_END_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"[.!?]+["')\]]*(?:\s+|$)|\n"#).expect("sentence end regex is valid")
});

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "being", "but", "by", "can", "could", "did", "do", "does", "doing", "for", "from", "had",
    "has", "have", "having", "he", "her", "here", "him", "his", "how", "i", "if", "in", "into",
    "is", "it", "its", "itself", "me", "more", "most", "my", "no", "nor", "not", "of", "on",
    "or", "other", "our", "out", "over", "she", "should", "so", "some", "such", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "through", "to",
    "too", "under", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Lowercased alphanumeric tokens, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Light suffix stripping so "handles" and "handle" compare equal.
pub fn stem(word: &str) -> String {
    let len = word.chars().count();
    if !word.is_ascii() || len <= 3 {
        return word.to_string();
    }
    if let Some(base) = word.strip_suffix("ies") {
        if len > 4 {
            return format!("{}y", base);
        }
    }
    if let Some(base) = word.strip_suffix("ing") {
        if len > 5 {
            return base.to_string();
        }
    }
    if let Some(base) = word.strip_suffix("ed") {
        if len > 4 {
            return base.to_string();
        }
    }
    if let Some(base) = word.strip_suffix("es") {
        if len > 4 && (base.ends_with('s') || base.ends_with('x') || base.ends_with("ch") || base.ends_with("sh")) {
            return base.to_string();
        }
    }
    if word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// Stemmed non-stopword tokens in order, duplicates kept.
pub fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stopword(t))
        .map(|t| stem(&t))
        .collect()
}

/// Distinct content terms in first-seen order.
pub fn content_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content_tokens(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

pub fn term_set(text: &str) -> HashSet<String> {
    content_tokens(text).into_iter().collect()
}

/// Byte spans `[start, end)` of the sentences (or lines) in `text`, with
/// surrounding whitespace trimmed off. Empty sentences are skipped.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut begin = 0;

    for m in SENTENCE_END_RE.find_iter(text) {
        let end = m.start() + m.as_str().trim_end().len();
        push_trimmed(text, begin, end, &mut spans);
        begin = m.end();
    }
    push_trimmed(text, begin, text.len(), &mut spans);

    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let s = start + lead;
    spans.push((s, s + trimmed.len()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwords_sorted_for_binary_search() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn test_content_terms_drop_stopwords_and_stem() {
        assert_eq!(content_terms("What does module X do?"), vec!["module", "x"]);
        assert_eq!(stem("handles"), "handle");
        assert_eq!(stem("libraries"), "library");
        assert_eq!(stem("class"), "class");
        assert_eq!(stem("processing"), "process");
    }

    #[test]
    fn test_sentence_spans_slice_back_exactly() {
        let text = "  Module X handles authentication.  It runs on login!\nConfig: enabled\n\nLast one";
        let spans = sentence_spans(text);
        let parts: Vec<&str> = spans.iter().map(|&(s, e)| &text[s..e]).collect();
        assert_eq!(
            parts,
            vec![
                "Module X handles authentication.",
                "It runs on login!",
                "Config: enabled",
                "Last one"
            ]
        );
    }

    #[test]
    fn test_sentence_spans_keep_decimals_together() {
        let text = "Version 3.5 shipped. Done.";
        let spans = sentence_spans(text);
        assert_eq!(&text[spans[0].0..spans[0].1], "Version 3.5 shipped.");
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_sentence_spans_handle_multibyte() {
        let text = "Café opens at nine. Résumé attached.";
        for (s, e) in sentence_spans(text) {
            assert!(text.is_char_boundary(s) && text.is_char_boundary(e));
        }
    }
}
