//! Frequency-based keyword extraction

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[가-힣a-z]+").expect("word pattern is valid"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "is", "are",
        "was", "were", "be", "been", "it", "its", "this", "that", "with", "as", "by", "from",
        "we", "you", "he", "she", "they", "me", "my", "your", "our", "do", "did", "so", "if",
        "not", "no", "can", "will", "just", "have", "has", "had", "what", "how", "about",
        "은", "는", "이", "가", "을", "를", "의", "에", "와", "과", "도",
    ]
    .into_iter()
    .collect()
});

/// Most frequent non-stopword terms, ties in order of first appearance
pub fn extract_keywords(text: &str, top_n: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut counts: IndexMap<&str, usize> = IndexMap::new();

    for word in WORD.find_iter(&lowered).map(|m| m.as_str()) {
        if word.chars().count() < 2 || STOPWORDS.contains(word) {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // Stable sort keeps first-appearance order among equal counts
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(word, _)| word.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_ranking() {
        let text = "Rust rust borrow checker. The borrow checker and RUST lifetimes.";
        let keywords = extract_keywords(text, 3);
        assert_eq!(keywords, vec!["rust", "borrow", "checker"]);
    }

    #[test]
    fn test_stopwords_and_short_words_dropped() {
        let keywords = extract_keywords("a I the and of to deploy", 5);
        assert_eq!(keywords, vec!["deploy"]);
    }

    #[test]
    fn test_dense_script_words() {
        let keywords = extract_keywords("프로젝트 일정 프로젝트 회의", 2);
        assert_eq!(keywords, vec!["프로젝트", "일정"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(extract_keywords("", 5).is_empty());
        assert!(extract_keywords("123 456", 5).is_empty());
    }
}
