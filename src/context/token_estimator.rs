//! Token estimation for messages and raw text
//!
//! The heuristic estimator is the default: it needs no vocabulary, never
//! fails, and is tuned to over-count rather than under-count because its
//! output feeds hard limits. A tiktoken-backed estimator is available for
//! callers that want BPE counts.

use super::models::{Content, ContentPart, Message};
use crate::error::{ContextError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("code fence pattern is valid"));

/// Character-class weighted estimator
#[derive(Debug, Clone)]
pub struct HeuristicEstimator {
    /// Per Hangul / CJK / kana character
    pub dense_char_weight: f64,
    /// Per run of ASCII letters
    pub latin_word_weight: f64,
    /// Per ASCII digit
    pub digit_weight: f64,
    /// Per remaining character (punctuation, whitespace, other scripts)
    pub other_char_weight: f64,
    /// Extra charge per character inside fenced code
    pub code_char_weight: f64,
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self {
            dense_char_weight: 1.7,
            latin_word_weight: 1.3,
            digit_weight: 0.5,
            other_char_weight: 0.3,
            code_char_weight: 0.4,
        }
    }
}

fn is_dense_script(ch: char) -> bool {
    matches!(ch,
        '\u{AC00}'..='\u{D7A3}'   // Hangul syllables
        | '\u{3040}'..='\u{30FF}' // Hiragana + Katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
    )
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let mut total_chars = 0usize;
        let mut dense = 0usize;
        let mut latin_words = 0usize;
        let mut ascii_alnum = 0usize;
        let mut digits = 0usize;
        let mut in_word = false;

        for ch in text.chars() {
            total_chars += 1;
            if ch.is_ascii_alphabetic() {
                ascii_alnum += 1;
                if !in_word {
                    latin_words += 1;
                    in_word = true;
                }
                continue;
            }
            in_word = false;
            if ch.is_ascii_digit() {
                ascii_alnum += 1;
                digits += 1;
            } else if is_dense_script(ch) {
                dense += 1;
            }
        }

        let other = total_chars - dense - ascii_alnum;

        let mut tokens = 0.0;
        tokens += dense as f64 * self.dense_char_weight;
        tokens += latin_words as f64 * self.latin_word_weight;
        tokens += digits as f64 * self.digit_weight;
        tokens += other as f64 * self.other_char_weight;

        for block in CODE_FENCE.find_iter(text) {
            tokens += block.as_str().chars().count() as f64 * self.code_char_weight;
        }

        tokens.ceil() as usize
    }
}

/// Tiktoken-based token estimator using cl100k_base (GPT-4, GPT-3.5-turbo)
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| ContextError::Configuration(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Fixed costs layered on top of text estimates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountingConfig {
    #[serde(default = "default_message_overhead")]
    pub message_overhead: usize,
    #[serde(default = "default_name_overhead")]
    pub name_overhead: usize,
    #[serde(default = "default_list_overhead")]
    pub list_overhead: usize,
    /// Charge for an image whose dimensions are unknown
    #[serde(default = "default_image_placeholder")]
    pub image_placeholder_tokens: usize,
    #[serde(default = "default_vision_multiplier")]
    pub vision_multiplier: f64,
}

fn default_message_overhead() -> usize {
    4
}

fn default_name_overhead() -> usize {
    1
}

fn default_list_overhead() -> usize {
    3
}

fn default_image_placeholder() -> usize {
    1500
}

fn default_vision_multiplier() -> f64 {
    1.2
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            message_overhead: default_message_overhead(),
            name_overhead: default_name_overhead(),
            list_overhead: default_list_overhead(),
            image_placeholder_tokens: default_image_placeholder(),
            vision_multiplier: default_vision_multiplier(),
        }
    }
}

/// Token-equivalent cost of an image: one token per 750 pixels, scaled.
///
/// The estimator and the safeguard both go through this function so the two
/// can never disagree on image cost.
pub fn vision_tokens(width: u32, height: u32, multiplier: f64) -> usize {
    let pixels = width as u64 * height as u64;
    let base = pixels.div_ceil(750);
    (base as f64 * multiplier).ceil() as usize
}

/// Counts tokens for messages and message lists
#[derive(Clone)]
pub struct TokenCounter {
    estimator: Arc<dyn TokenEstimator>,
    config: CountingConfig,
}

impl TokenCounter {
    pub fn new(estimator: Arc<dyn TokenEstimator>, config: CountingConfig) -> Self {
        Self { estimator, config }
    }

    /// Heuristic estimator with default overheads
    pub fn heuristic() -> Self {
        Self::new(Arc::new(HeuristicEstimator::default()), CountingConfig::default())
    }

    pub fn estimate(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    pub fn estimator(&self) -> &Arc<dyn TokenEstimator> {
        &self.estimator
    }

    pub fn config(&self) -> &CountingConfig {
        &self.config
    }

    pub fn vision_tokens(&self, width: u32, height: u32) -> usize {
        vision_tokens(width, height, self.config.vision_multiplier)
    }

    /// Cost of a payload without per-message overhead
    pub fn content_tokens(&self, content: &Content) -> usize {
        match content {
            Content::Text { text } => self.estimate(text),
            Content::ToolOutput { output, .. } => self.estimate(output),
            Content::Parts { parts } => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => self.estimate(text),
                    ContentPart::Image {
                        width: Some(w),
                        height: Some(h),
                        ..
                    } => self.vision_tokens(*w, *h),
                    ContentPart::Image { .. } => self.config.image_placeholder_tokens,
                })
                .sum(),
        }
    }

    /// Full cost of one message, ignoring any cached count
    pub fn measure_message(&self, message: &Message) -> usize {
        let name = if message.name.is_some() {
            self.config.name_overhead
        } else {
            0
        };
        self.config.message_overhead + self.content_tokens(&message.content) + name
    }

    /// Full cost of one message, using the cached count when present
    pub fn count_message(&self, message: &Message) -> usize {
        message
            .token_count
            .unwrap_or_else(|| self.measure_message(message))
    }

    pub fn count_messages(&self, messages: &[Message]) -> usize {
        if messages.is_empty() {
            return 0;
        }
        messages.iter().map(|m| self.count_message(m)).sum::<usize>() + self.config.list_overhead
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::Role;

    #[test]
    fn test_heuristic_latin_words() {
        let estimator = HeuristicEstimator::default();
        // 3 words * 1.3 + 2 spaces * 0.3 = 4.5 -> 5
        assert_eq!(estimator.estimate("Hello world test"), 5);
    }

    #[test]
    fn test_heuristic_empty_is_zero() {
        let estimator = HeuristicEstimator::default();
        assert_eq!(estimator.estimate(""), 0);
    }

    #[test]
    fn test_heuristic_digits_and_dense_script() {
        let estimator = HeuristicEstimator::default();
        // 4 digits * 0.5 = 2
        assert_eq!(estimator.estimate("2024"), 2);
        // 2 Hangul syllables * 1.7 = 3.4 -> 4
        assert_eq!(estimator.estimate("안녕"), 4);
    }

    #[test]
    fn test_code_fence_adds_weight() {
        let estimator = HeuristicEstimator::default();
        let plain = "let x = 1;";
        let fenced = "```let x = 1;```";
        assert!(estimator.estimate(fenced) > estimator.estimate(plain) + 6);
    }

    #[test]
    fn test_heuristic_never_undercounts_long_text() {
        let estimator = HeuristicEstimator::default();
        let text = "token ".repeat(1000);
        assert!(estimator.estimate(&text) >= 1000);
    }

    #[test]
    fn test_tiktoken_estimator() {
        let estimator = TiktokenEstimator::new().unwrap();
        let text = "Hello, world! This is a test.";
        let tokens = estimator.estimate(text);
        assert!(tokens > 0);
        assert!(tokens < 20);
    }

    #[test]
    fn test_batch_estimation() {
        let estimator = HeuristicEstimator::default();
        let tokens = estimator.estimate_batch(&["Hello", "world", "test"]);
        assert_eq!(tokens, vec![2, 2, 2]);
    }

    #[test]
    fn test_vision_tokens_formula() {
        // 1000 * 750 px = 1000 base tokens, * 1.2 = 1200
        assert_eq!(vision_tokens(1000, 750, 1.2), 1200);
        // 1 px still costs a token
        assert_eq!(vision_tokens(1, 1, 1.2), 2);
    }

    #[test]
    fn test_count_message_with_image_parts() {
        let counter = TokenCounter::heuristic();
        let msg = Message::with_parts(
            Role::User,
            vec![ContentPart::image(1000, 750), ContentPart::image_unsized()],
        );
        assert_eq!(counter.count_message(&msg), 4 + 1200 + 1500);
    }

    #[test]
    fn test_count_message_name_overhead_and_cache() {
        let counter = TokenCounter::heuristic();
        let msg = Message::user("Hello world test").with_name("alice");
        assert_eq!(counter.count_message(&msg), 4 + 5 + 1);

        let mut cached = Message::user("Hello world test");
        cached.token_count = Some(42);
        assert_eq!(counter.count_message(&cached), 42);
        assert_eq!(counter.measure_message(&cached), 9);
    }

    #[test]
    fn test_count_messages_list_overhead() {
        let counter = TokenCounter::heuristic();
        let messages = vec![Message::user("Hello world test"), Message::assistant("Hello")];
        assert_eq!(counter.count_messages(&messages), 9 + 6 + 3);
        assert_eq!(counter.count_messages(&[]), 0);
    }
}
