//! Summarization of evicted messages
//!
//! Two strategies: a generator-backed summarizer that asks an external text
//! generation capability, and a deterministic rule-based summarizer that is
//! always available and used whenever the former is absent or fails.

use super::keywords::extract_keywords;
use super::models::Message;
use crate::error::{ContextError, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// External text generation capability
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system_prompt: &str, content: &str) -> anyhow::Result<String>;
}

/// Call a generator with a hard deadline.
///
/// Errors, timeouts and blank responses all come back as `Backend` so callers
/// have a single branch into their fallback path.
pub async fn generate_bounded(
    generator: &dyn TextGenerator,
    timeout: Duration,
    system_prompt: &str,
    content: &str,
) -> Result<String> {
    match tokio::time::timeout(timeout, generator.generate(system_prompt, content)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
        Ok(Ok(_)) => Err(ContextError::Backend("empty response".to_string())),
        Ok(Err(e)) => Err(ContextError::Backend(e.to_string())),
        Err(_) => Err(ContextError::Backend(format!(
            "generation timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Configuration for generator calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Length hint passed to the summary prompt
    #[serde(default = "default_summary_tokens")]
    pub max_summary_tokens: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_summary_tokens() -> usize {
    500
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_summary_tokens: default_summary_tokens(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a run of messages into a concise brief
    async fn summarize(&self, messages: &[Message]) -> Result<String>;
}

/// Render messages as `role: text` blocks for prompting
pub fn conversation_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Summarizer backed by a [`TextGenerator`]
pub struct GeneratorSummarizer {
    generator: Arc<dyn TextGenerator>,
    config: GenerationConfig,
}

impl GeneratorSummarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: GenerationConfig) -> Self {
        Self { generator, config }
    }

    fn system_prompt(&self) -> String {
        format!(
            "Summarize the following conversation concisely. \
            Keep only the main topics, decisions and important facts. \
            Keep the summary under {} tokens.",
            self.config.max_summary_tokens
        )
    }
}

#[async_trait]
impl Summarizer for GeneratorSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        if messages.is_empty() {
            return Ok(String::new());
        }

        debug!("Summarizing {} messages with generator", messages.len());
        let text = generate_bounded(
            self.generator.as_ref(),
            self.config.timeout(),
            &self.system_prompt(),
            &conversation_text(messages),
        )
        .await?;
        Ok(text.trim().to_string())
    }
}

const TOPICS_PREFIX: &str = "Key topics: ";

/// Text to mine for keywords. An earlier summary only contributes its topics
/// so its own boilerplate never becomes a topic.
fn keyword_source(message: &Message) -> String {
    let text = message.text();
    if !message.flags.compressed {
        return text;
    }
    text.lines()
        .filter_map(|line| line.strip_prefix(TOPICS_PREFIX))
        .map(|topics| topics.replace(", ", " "))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic summary: message count, top keywords, time range
#[derive(Debug, Clone)]
pub struct RuleBasedSummarizer {
    keyword_count: usize,
}

impl Default for RuleBasedSummarizer {
    fn default() -> Self {
        Self::new(5)
    }
}

impl RuleBasedSummarizer {
    pub fn new(keyword_count: usize) -> Self {
        Self { keyword_count }
    }

    pub fn summarize_now(&self, messages: &[Message]) -> String {
        if messages.is_empty() {
            return String::new();
        }

        let covered: usize = messages.iter().map(Message::covered_count).sum();
        let mut lines = vec![format!("[Compressed {} messages]", covered)];

        let all_text = messages.iter().map(keyword_source).collect::<Vec<_>>().join(" ");
        let keywords = extract_keywords(&all_text, self.keyword_count);
        if !keywords.is_empty() {
            lines.push(format!("{}{}", TOPICS_PREFIX, keywords.join(", ")));
        }

        let earliest = messages.iter().map(|m| m.timestamp).min();
        let latest = messages.iter().map(|m| m.timestamp).max();
        if let (Some(earliest), Some(latest)) = (earliest, latest) {
            lines.push(format!(
                "Period: {} to {}",
                earliest.to_rfc3339_opts(SecondsFormat::Secs, true),
                latest.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }

        lines.join("\n")
    }
}

#[async_trait]
impl Summarizer for RuleBasedSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        Ok(self.summarize_now(messages))
    }
}

/// Try the generator first, fall back to the rule-based summary.
///
/// Returns the summary and whether the fallback was taken.
pub async fn summarize_with_fallback(
    primary: Option<&dyn Summarizer>,
    fallback: &RuleBasedSummarizer,
    messages: &[Message],
) -> (String, bool) {
    if let Some(summarizer) = primary {
        match summarizer.summarize(messages).await {
            Ok(summary) if !summary.is_empty() => return (summary, false),
            Ok(_) => warn!("Summarizer returned nothing, using rule-based summary"),
            Err(e) => warn!("Summarization failed, using rule-based summary: {}", e),
        }
    }
    (fallback.summarize_now(messages), true)
}
