//! Orchestrated context compression
//!
//! Ties usage analysis, eviction planning, archiving and summarization
//! together. `compress_messages` never fails on well-formed input: archive
//! errors are logged and summarizer errors fall through to the rule-based
//! summary.

use super::archive::{ArchiveHandle, ArchiveMetadata, ArchiveStore};
use super::keywords::extract_keywords;
use super::models::{Message, Role};
use super::selector::{CompressionSelector, RoleWeights, SelectionPolicy};
use super::summarizer::{summarize_with_fallback, RuleBasedSummarizer, Summarizer};
use super::usage::{UsageAnalyzer, UsageSnapshot, UsageStatus};
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Weight given to system messages when they are not protected
const UNPROTECTED_SYSTEM_WEIGHT: f64 = 0.1;

/// Compressor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressorConfig {
    /// Usage fraction at which compression kicks in
    #[serde(default = "default_auto_threshold")]
    pub auto_compress_threshold: f64,
    /// Usage fraction to compress down to
    #[serde(default = "default_target_usage")]
    pub target_usage: f64,
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    #[serde(default = "default_true")]
    pub keep_system: bool,
    /// Keywords in rule-based summaries
    #[serde(default = "default_summary_keywords")]
    pub summary_keywords: usize,
    /// Archive evicted originals before dropping them
    #[serde(default = "default_true")]
    pub archive_evicted: bool,
    #[serde(default)]
    pub role_weights: RoleWeights,
}

fn default_auto_threshold() -> f64 {
    0.85
}

fn default_target_usage() -> f64 {
    0.60
}

fn default_keep_recent() -> usize {
    10
}

fn default_summary_keywords() -> usize {
    5
}

fn default_true() -> bool {
    true
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            auto_compress_threshold: default_auto_threshold(),
            target_usage: default_target_usage(),
            keep_recent: default_keep_recent(),
            keep_system: true,
            summary_keywords: default_summary_keywords(),
            archive_evicted: true,
            role_weights: RoleWeights::default(),
        }
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct CompressOptions {
    /// Compress even below the auto threshold
    pub force: bool,
    pub target_usage: Option<f64>,
    pub keep_recent: Option<usize>,
}

impl CompressOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }
}

/// Result of an auto-compress check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCompressCheck {
    pub should_compress: bool,
    pub usage: UsageSnapshot,
    pub reason: String,
}

/// Numbers describing one compression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_count: usize,
    pub kept_count: usize,
    pub evicted_count: usize,
    /// Tokens held by the evicted messages
    pub evicted_tokens: usize,
    /// Net saving after the summary message is added back
    pub saved_tokens: usize,
    pub saved_percent: f64,
    pub elapsed_ms: u64,
}

/// Outcome of [`ContextCompressor::compress_messages`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionResult {
    pub compressed: bool,
    pub reason: String,
    pub original_usage: UsageSnapshot,
    pub final_usage: UsageSnapshot,
    pub stats: Option<CompressionStats>,
    /// Summary message first, then kept messages in original order
    pub messages: Vec<Message>,
    pub summary: Option<String>,
    pub archive: Option<ArchiveHandle>,
    /// Whether the final total reached the target
    pub within_target: bool,
    /// Whether the rule-based summary was used
    pub used_fallback: bool,
}

/// Time span covered by a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDuration {
    pub duration_ms: i64,
    pub duration_minutes: i64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// End-of-session overview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_messages: usize,
    pub total_tokens: usize,
    pub duration: SessionDuration,
    pub created_at: DateTime<Utc>,
    pub keywords: Vec<String>,
    pub decisions: Vec<String>,
    pub todos: Vec<String>,
    pub topics: Vec<String>,
}

static DECISION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"결정했습니다?|결정.*했어요?",
        r"하기로 했습니다?|하기로.*했어요?",
        r"(?i)decided to|going to|agreed to",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("decision pattern is valid"))
    .collect()
});

static TODO_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)TODO:.*|해야.*할.*것|해야.*함|할.*예정",
        r"(?m)^\s*-\s+\[ \].*|\[ \].*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("todo pattern is valid"))
    .collect()
});

static SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").expect("sentence pattern is valid"));

const MAX_EXTRACT_CHARS: usize = 200;

/// Context compressor
pub struct ContextCompressor {
    analyzer: UsageAnalyzer,
    selector: CompressionSelector,
    config: CompressorConfig,
    summarizer: Option<Arc<dyn Summarizer>>,
    fallback: RuleBasedSummarizer,
    archive: Option<Arc<dyn ArchiveStore>>,
}

impl ContextCompressor {
    /// Compressor with rule-based summaries and no archive
    pub fn new(analyzer: UsageAnalyzer, config: CompressorConfig) -> Self {
        let selector = CompressionSelector::new(analyzer.counter().clone());
        let fallback = RuleBasedSummarizer::new(config.summary_keywords);
        Self {
            analyzer,
            selector,
            config,
            summarizer: None,
            fallback,
            archive: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &UsageAnalyzer {
        &self.analyzer
    }

    pub fn analyze(&self, messages: &[Message], model_id: &str) -> UsageSnapshot {
        self.analyzer.analyze(messages, model_id)
    }

    /// Check whether usage has reached the auto-compress threshold
    pub fn should_auto_compress(&self, messages: &[Message], model_id: &str) -> AutoCompressCheck {
        let usage = self.analyzer.analyze(messages, model_id);
        let reason = match usage.status {
            UsageStatus::Critical => "Critical threshold reached",
            UsageStatus::Warning => "Warning threshold reached",
            UsageStatus::Normal => "Normal usage",
        };
        AutoCompressCheck {
            should_compress: usage.usage_percent >= self.config.auto_compress_threshold * 100.0,
            usage,
            reason: reason.to_string(),
        }
    }

    fn policy(&self, options: &CompressOptions) -> SelectionPolicy {
        let mut role_weights = self.config.role_weights.clone();
        if !self.config.keep_system && role_weights.system < 0.0 {
            role_weights.system = UNPROTECTED_SYSTEM_WEIGHT;
        }
        SelectionPolicy {
            keep_recent: options.keep_recent.unwrap_or(self.config.keep_recent),
            role_weights,
        }
    }

    fn unchanged(
        messages: &[Message],
        usage: UsageSnapshot,
        reason: &str,
        within_target: bool,
    ) -> CompressionResult {
        CompressionResult {
            compressed: false,
            reason: reason.to_string(),
            final_usage: usage.clone(),
            original_usage: usage,
            stats: None,
            messages: messages.to_vec(),
            summary: None,
            archive: None,
            within_target,
            used_fallback: false,
        }
    }

    /// Compress `messages` toward the target usage.
    ///
    /// Below the auto threshold and without `force` the input comes back
    /// unchanged.
    pub async fn compress_messages(
        &self,
        messages: &[Message],
        model_id: &str,
        options: &CompressOptions,
    ) -> CompressionResult {
        let started = Instant::now();
        let usage = self.analyzer.analyze(messages, model_id);

        if !options.force && usage.usage_percent < self.config.auto_compress_threshold * 100.0 {
            debug!("Compression not needed at {}% usage", usage.usage_percent);
            return Self::unchanged(messages, usage, "Compression not needed", true);
        }

        let target_usage = options.target_usage.unwrap_or(self.config.target_usage);
        let target_tokens = (usage.max_tokens as f64 * target_usage).floor() as usize;
        let plan = self.selector.plan(messages, target_tokens, &self.policy(options));

        if plan.evicted_count() == 0 {
            let within = usage.used_tokens <= target_tokens;
            if !within {
                warn!(
                    "Nothing evictable for {}: {} tokens held by protected messages",
                    model_id, usage.used_tokens
                );
            }
            return Self::unchanged(messages, usage, "No evictable messages", within);
        }

        let (kept, evicted) = plan.apply(messages);

        let (summary, used_fallback) =
            summarize_with_fallback(self.summarizer.as_deref(), &self.fallback, &evicted).await;
        if used_fallback && self.summarizer.is_some() {
            METRICS.summarizer_fallbacks.inc();
        }

        let mut summary_message = Message::system(format!("[Context Summary]\n{}", summary));
        if let Some(earliest) = evicted.iter().map(|m| m.timestamp).min() {
            summary_message.timestamp = earliest;
        }
        summary_message.flags.compressed = true;
        summary_message.flags.original_count =
            Some(evicted.iter().map(Message::covered_count).sum());

        let mut compacted = Vec::with_capacity(kept.len() + 1);
        compacted.push(summary_message);
        compacted.extend(kept);

        let final_usage = self.analyzer.analyze(&compacted, model_id);
        if final_usage.used_tokens >= usage.used_tokens {
            warn!(
                "Compression for {} discarded: summary would hold {} tokens against {}",
                model_id, final_usage.used_tokens, usage.used_tokens
            );
            let within = usage.used_tokens <= target_tokens;
            return Self::unchanged(messages, usage, "Compression would not reduce usage", within);
        }

        let archive = if self.config.archive_evicted {
            self.archive_evicted(&evicted, model_id).await
        } else {
            None
        };

        let saved_tokens = usage.used_tokens - final_usage.used_tokens;
        let saved_percent =
            (saved_tokens as f64 / usage.used_tokens as f64 * 10_000.0).round() / 100.0;
        let within_target = final_usage.used_tokens <= target_tokens;

        if !within_target {
            warn!(
                "Compression for {} stopped at {} tokens, target was {}",
                model_id, final_usage.used_tokens, target_tokens
            );
        }

        let stats = CompressionStats {
            original_count: messages.len(),
            kept_count: compacted.len() - 1,
            evicted_count: evicted.len(),
            evicted_tokens: plan.tokens_to_save(),
            saved_tokens,
            saved_percent,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        METRICS.record_compression("auto", saved_tokens);
        info!(
            "Compressed {} of {} messages for {}: {}% -> {}%",
            stats.evicted_count,
            stats.original_count,
            model_id,
            usage.usage_percent,
            final_usage.usage_percent
        );

        CompressionResult {
            compressed: true,
            reason: "Compression successful".to_string(),
            original_usage: usage,
            final_usage,
            stats: Some(stats),
            messages: compacted,
            summary: Some(summary),
            archive,
            within_target,
            used_fallback,
        }
    }

    async fn archive_evicted(&self, evicted: &[Message], model_id: &str) -> Option<ArchiveHandle> {
        let store = self.archive.as_ref()?;
        let metadata = ArchiveMetadata::compressed_backup(evicted.len(), model_id);
        match store.save(evicted, &metadata).await {
            Ok(handle) => {
                debug!("Archived {} evicted messages as {}", evicted.len(), handle.id);
                Some(handle)
            }
            Err(e) => {
                METRICS.archive_failures.inc();
                warn!("Failed to archive evicted messages: {}", e);
                None
            }
        }
    }

    /// Load an archived slice back
    pub async fn restore_archived(&self, handle: &ArchiveHandle) -> Result<Vec<Message>> {
        let store = self
            .archive
            .as_ref()
            .ok_or_else(|| ContextError::Persistence("no archive store configured".to_string()))?;
        store
            .load(handle)
            .await
            .map_err(|e| ContextError::Persistence(e.to_string()))
    }

    /// Best-effort overview of a whole session
    pub fn generate_session_summary(&self, messages: &[Message]) -> SessionSummary {
        let all_text = messages.iter().map(|m| m.text()).collect::<Vec<_>>().join(" ");

        SessionSummary {
            total_messages: messages.len(),
            total_tokens: self.analyzer.counter().count_messages(messages),
            duration: session_duration(messages),
            created_at: Utc::now(),
            keywords: extract_keywords(&all_text, 10),
            decisions: extract_decisions(messages),
            todos: extract_todos(messages),
            topics: extract_topics(&all_text),
        }
    }
}

pub fn session_duration(messages: &[Message]) -> SessionDuration {
    if messages.len() < 2 {
        return SessionDuration::default();
    }
    let (Some(start), Some(end)) = (
        messages.iter().map(|m| m.timestamp).min(),
        messages.iter().map(|m| m.timestamp).max(),
    ) else {
        return SessionDuration::default();
    };
    let duration_ms = (end - start).num_milliseconds();
    SessionDuration {
        duration_ms,
        duration_minutes: (duration_ms as f64 / 60_000.0).round() as i64,
        start: Some(start),
        end: Some(end),
    }
}

fn push_unique(items: &mut Vec<String>, item: &str) {
    let item = item.trim();
    if !item.is_empty()
        && item.chars().count() < MAX_EXTRACT_CHARS
        && !items.iter().any(|i| i == item)
    {
        items.push(item.to_string());
    }
}

fn extract_decisions(messages: &[Message]) -> Vec<String> {
    let mut decisions = Vec::new();
    for message in messages.iter().filter(|m| m.role != Role::Tool) {
        let text = message.text();
        for sentence in SENTENCE_BREAK.split(&text) {
            if DECISION_PATTERNS.iter().any(|p| p.is_match(sentence)) {
                push_unique(&mut decisions, sentence);
            }
        }
    }
    decisions.truncate(5);
    decisions
}

fn extract_todos(messages: &[Message]) -> Vec<String> {
    let mut todos = Vec::new();
    for message in messages {
        let text = message.text();
        for pattern in TODO_PATTERNS.iter() {
            for found in pattern.find_iter(&text) {
                push_unique(&mut todos, found.as_str());
            }
        }
    }
    todos.truncate(10);
    todos
}

/// Group related keywords (one containing the other) into topics
fn extract_topics(all_text: &str) -> Vec<String> {
    let keywords = extract_keywords(all_text, 15);
    let mut used = vec![false; keywords.len()];
    let mut topics = Vec::new();

    for (i, keyword) in keywords.iter().enumerate() {
        if used[i] {
            continue;
        }
        let mut related = Vec::new();
        for (j, other) in keywords.iter().enumerate() {
            if !used[j] && (other.contains(keyword.as_str()) || keyword.contains(other.as_str())) {
                used[j] = true;
                related.push(other.as_str());
            }
        }
        topics.push(related.join(", "));
    }

    topics.truncate(5);
    topics
}
