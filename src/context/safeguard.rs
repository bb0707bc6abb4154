//! Real-time guard on message ingestion
//!
//! Every message passes through [`TokenSafeguard::add_message`] before it
//! joins the session ledger. Oversized messages are rejected, tool output is
//! cut down, and at the emergency threshold the ledger is compressed inline.
//! Everything here is synchronous so a turn never waits on a backend.

use super::models::{Content, Message};
use super::selector::{CompressionSelector, SelectionPolicy};
use super::summarizer::RuleBasedSummarizer;
use super::token_estimator::{vision_tokens, TokenCounter};
use crate::error::ValidationError;
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const TRUNCATION_MARKER: &str = "\n\n[... output truncated ...]";
const CHARS_PER_TOKEN: usize = 4;
const WARNING_LEVEL: f64 = 0.8;
const CAUTION_LEVEL: f64 = 0.6;

/// Safeguard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeguardConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Usage fraction that triggers emergency compression
    #[serde(default = "default_emergency_threshold")]
    pub emergency_threshold: f64,
    /// Largest single message as a fraction of `max_tokens`
    #[serde(default = "default_single_message_fraction")]
    pub single_message_limit_fraction: f64,
    /// Tool output above this many tokens is truncated
    #[serde(default = "default_tool_output_limit")]
    pub tool_output_limit: usize,
    /// Trailing non-system messages emergency compression never touches
    #[serde(default = "default_emergency_keep_recent")]
    pub emergency_keep_recent: usize,
    /// Emergency target as a fraction of the compressible tokens
    #[serde(default = "default_emergency_target_ratio")]
    pub emergency_target_ratio: f64,
    #[serde(default = "default_max_log_messages")]
    pub max_log_messages: usize,
    #[serde(default = "default_auto_compress")]
    pub auto_compress: bool,
}

fn default_max_tokens() -> usize {
    100_000
}

fn default_emergency_threshold() -> f64 {
    0.95
}

fn default_single_message_fraction() -> f64 {
    0.1
}

fn default_tool_output_limit() -> usize {
    500
}

fn default_emergency_keep_recent() -> usize {
    5
}

fn default_emergency_target_ratio() -> f64 {
    0.3
}

fn default_max_log_messages() -> usize {
    500
}

fn default_auto_compress() -> bool {
    true
}

impl Default for SafeguardConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            emergency_threshold: default_emergency_threshold(),
            single_message_limit_fraction: default_single_message_fraction(),
            tool_output_limit: default_tool_output_limit(),
            emergency_keep_recent: default_emergency_keep_recent(),
            emergency_target_ratio: default_emergency_target_ratio(),
            max_log_messages: default_max_log_messages(),
            auto_compress: default_auto_compress(),
        }
    }
}

impl SafeguardConfig {
    pub fn with_max_tokens(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Default::default()
        }
    }

    pub fn single_message_limit(&self) -> usize {
        (self.max_tokens as f64 * self.single_message_limit_fraction).floor() as usize
    }
}

/// Accepted message with soft warnings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageValidation {
    pub tokens: usize,
    pub warnings: Vec<String>,
}

/// Before/after numbers of an emergency compression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyReport {
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub saved_tokens: usize,
    pub saved_percent: f64,
    pub original_count: usize,
    pub message_count: usize,
}

/// Emergency compression outcome. Not being able to compress is a normal
/// result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EmergencyOutcome {
    Compressed(EmergencyReport),
    NothingToCompress { reason: String },
}

impl EmergencyOutcome {
    pub fn is_compressed(&self) -> bool {
        matches!(self, EmergencyOutcome::Compressed(_))
    }
}

/// Result of a successful `add_message`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOutcome {
    /// Tokens charged for the stored (possibly truncated) message
    pub tokens: usize,
    pub total_tokens: usize,
    pub percentage: f64,
    pub truncated: bool,
    pub warnings: Vec<String>,
    pub emergency: Option<EmergencyOutcome>,
}

/// Coarse ledger level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Caution,
    Warning,
    Critical,
}

/// Live ledger status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeguardStatus {
    pub current_tokens: usize,
    pub max_tokens: usize,
    pub percentage: f64,
    pub remaining: usize,
    pub level: SafetyLevel,
    pub message_count: usize,
    pub compression_count: usize,
    pub last_compression_time: Option<DateTime<Utc>>,
}

/// Mutable per-session ledger
#[derive(Debug, Clone, Default)]
struct SafeguardState {
    current_tokens: usize,
    log: Vec<Message>,
    compression_count: usize,
    last_compression_time: Option<DateTime<Utc>>,
}

/// Hard guard against runaway context growth. One instance per session.
#[derive(Debug)]
pub struct TokenSafeguard {
    config: SafeguardConfig,
    counter: TokenCounter,
    selector: CompressionSelector,
    summarizer: RuleBasedSummarizer,
    state: SafeguardState,
}

impl TokenSafeguard {
    pub fn new(config: SafeguardConfig, counter: TokenCounter) -> Self {
        Self {
            selector: CompressionSelector::new(counter.clone()),
            summarizer: RuleBasedSummarizer::default(),
            config,
            counter,
            state: SafeguardState::default(),
        }
    }

    pub fn config(&self) -> &SafeguardConfig {
        &self.config
    }

    /// Check a message against the hard size limit.
    ///
    /// Oversized tool output only produces a warning here; it is truncated on
    /// ingestion instead.
    pub fn validate_message(
        &self,
        message: &Message,
    ) -> std::result::Result<MessageValidation, ValidationError> {
        if message.content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }

        let tokens = self.counter.measure_message(message);
        let limit = self.config.single_message_limit();
        if tokens > limit {
            return Err(ValidationError::MessageTooLarge { tokens, limit });
        }

        let mut warnings = Vec::new();
        if message.is_tool_like() {
            let tool_tokens = self.counter.content_tokens(&message.content);
            if tool_tokens > self.config.tool_output_limit {
                warnings.push(format!(
                    "Tool output may be too large: {} tokens (recommended max: {})",
                    tool_tokens, self.config.tool_output_limit
                ));
            }
        }

        Ok(MessageValidation { tokens, warnings })
    }

    /// Validate, truncate and append a message.
    ///
    /// Only [`ValidationError`] is returned; emergency compression results are
    /// reported in the outcome.
    pub fn add_message(
        &mut self,
        message: Message,
    ) -> std::result::Result<AddOutcome, ValidationError> {
        let validation = match self.validate_message(&message) {
            Ok(validation) => validation,
            Err(e) => {
                METRICS.messages_rejected.inc();
                warn!("Rejected message: {}", e);
                return Err(e);
            }
        };
        for warning in &validation.warnings {
            warn!("{}", warning);
        }

        let mut stored = if message.is_tool_like() {
            self.truncate_tool_output(message)
        } else {
            message
        };
        let truncated = stored.flags.truncated;

        let tokens = self.counter.measure_message(&stored);
        stored.token_count = Some(tokens);
        self.state.current_tokens += tokens;
        self.state.log.push(stored);
        self.enforce_log_bound();

        let emergency = if self.config.auto_compress && self.should_emergency_compress() {
            warn!(
                "Emergency compression triggered at {:.1}% of {} tokens",
                self.percentage() * 100.0,
                self.config.max_tokens
            );
            Some(self.emergency_compress())
        } else {
            None
        };

        Ok(AddOutcome {
            tokens,
            total_tokens: self.state.current_tokens,
            percentage: self.percentage(),
            truncated,
            warnings: validation.warnings,
            emergency,
        })
    }

    /// Cut tool output that exceeds the tool limit, keeping about four
    /// characters per allowed token plus a visible marker.
    pub fn truncate_tool_output(&self, mut message: Message) -> Message {
        let output = match &mut message.content {
            Content::ToolOutput { output, .. } => output,
            Content::Text { text } => text,
            Content::Parts { .. } => return message,
        };

        if self.counter.estimate(output) <= self.config.tool_output_limit {
            return message;
        }

        let original_length = output.chars().count();
        let max_chars = self.config.tool_output_limit * CHARS_PER_TOKEN;
        let mut cut: String = output.chars().take(max_chars).collect();
        cut.push_str(TRUNCATION_MARKER);
        *output = cut;

        message.flags.truncated = true;
        message.flags.original_length = Some(original_length);
        METRICS.tool_outputs_truncated.inc();
        debug!("Truncated tool output from {} chars to {}", original_length, max_chars);
        message
    }

    /// Same formula the estimator uses for image parts
    pub fn calculate_vision_tokens(&self, width: u32, height: u32) -> usize {
        vision_tokens(width, height, self.counter.config().vision_multiplier)
    }

    fn percentage(&self) -> f64 {
        if self.config.max_tokens == 0 {
            return 1.0;
        }
        self.state.current_tokens as f64 / self.config.max_tokens as f64
    }

    fn should_emergency_compress(&self) -> bool {
        self.percentage() >= self.config.emergency_threshold
    }

    /// Drop the oldest unpinned entries once the log exceeds its bound
    fn enforce_log_bound(&mut self) {
        while self.state.log.len() > self.config.max_log_messages {
            let Some(position) = self.state.log.iter().position(|m| !m.is_pinned()) else {
                break;
            };
            let dropped = self.state.log.remove(position);
            self.state.current_tokens = self
                .state
                .current_tokens
                .saturating_sub(dropped.token_count.unwrap_or(0));
        }
    }

    /// Aggressive rule-based compression of everything except system
    /// instructions and the most recent messages.
    ///
    /// Earlier summaries are compressible like any other message, so
    /// repeated passes fold into one rolling summary. A pass that would not
    /// strictly shrink the ledger is discarded.
    pub fn emergency_compress(&mut self) -> EmergencyOutcome {
        let original_tokens = self.state.current_tokens;
        let original_count = self.state.log.len();

        let compressible: Vec<usize> = self
            .state
            .log
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_pinned())
            .map(|(i, _)| i)
            .collect();
        let middle_len = compressible.len().saturating_sub(self.config.emergency_keep_recent);
        let middle = &compressible[..middle_len];

        if middle.is_empty() {
            warn!("Cannot compress: all messages are recent or system messages");
            return EmergencyOutcome::NothingToCompress {
                reason: "No messages available for compression".to_string(),
            };
        }

        let candidates: Vec<Message> = middle.iter().map(|&i| self.state.log[i].clone()).collect();
        let middle_tokens: usize = candidates.iter().map(|m| self.counter.count_message(m)).sum();
        let target = (middle_tokens as f64 * self.config.emergency_target_ratio).floor() as usize;
        let policy = SelectionPolicy {
            keep_recent: 0,
            ..Default::default()
        };
        let plan = self.selector.plan(&candidates, target, &policy);
        let (_, evicted) = plan.apply(&candidates);

        if evicted.is_empty() {
            return EmergencyOutcome::NothingToCompress {
                reason: "No evictable messages".to_string(),
            };
        }

        let evicted_positions: Vec<usize> =
            plan.evict_indices().iter().map(|&i| middle[i]).collect();
        let summary = self.summary_message(&evicted);

        // Summary takes the slot of the first evicted message
        let first_evicted = evicted_positions[0];
        let mut rebuilt = Vec::with_capacity(self.state.log.len() - evicted.len() + 1);
        let mut summary = Some(summary);
        for (position, message) in self.state.log.iter().enumerate() {
            if position == first_evicted {
                if let Some(summary) = summary.take() {
                    rebuilt.push(summary);
                }
            }
            if !evicted_positions.contains(&position) {
                rebuilt.push(message.clone());
            }
        }

        let compressed_tokens: usize = rebuilt.iter().map(|m| self.counter.count_message(m)).sum();
        if compressed_tokens >= original_tokens {
            warn!(
                "Emergency compression discarded: summary would hold {} tokens against {}",
                compressed_tokens, original_tokens
            );
            return EmergencyOutcome::NothingToCompress {
                reason: "Summary would not shrink the ledger".to_string(),
            };
        }

        self.state.log = rebuilt;
        self.state.current_tokens = compressed_tokens;
        self.state.compression_count += 1;
        self.state.last_compression_time = Some(Utc::now());

        let saved_tokens = original_tokens - compressed_tokens;
        let saved_percent = (saved_tokens as f64 / original_tokens as f64 * 1000.0).round() / 10.0;
        METRICS.record_compression("emergency", saved_tokens);
        info!(
            "Emergency compression complete: {} -> {} messages, {} -> {} tokens (saved {}%)",
            original_count,
            self.state.log.len(),
            original_tokens,
            compressed_tokens,
            saved_percent
        );

        EmergencyOutcome::Compressed(EmergencyReport {
            original_tokens,
            compressed_tokens,
            saved_tokens,
            saved_percent,
            original_count,
            message_count: self.state.log.len(),
        })
    }

    fn summary_message(&self, evicted: &[Message]) -> Message {
        let mut summary = Message::system(format!(
            "[Context Summary]\n{}",
            self.summarizer.summarize_now(evicted)
        ));
        if let Some(earliest) = evicted.iter().map(|m| m.timestamp).min() {
            summary.timestamp = earliest;
        }
        summary.flags.compressed = true;
        summary.flags.original_count = Some(evicted.iter().map(Message::covered_count).sum());
        summary.token_count = Some(self.counter.measure_message(&summary));
        summary
    }

    pub fn get_status(&self) -> SafeguardStatus {
        let percentage = self.percentage();
        let level = if percentage >= self.config.emergency_threshold {
            SafetyLevel::Critical
        } else if percentage >= WARNING_LEVEL {
            SafetyLevel::Warning
        } else if percentage >= CAUTION_LEVEL {
            SafetyLevel::Caution
        } else {
            SafetyLevel::Safe
        };

        SafeguardStatus {
            current_tokens: self.state.current_tokens,
            max_tokens: self.config.max_tokens,
            percentage,
            remaining: self.config.max_tokens.saturating_sub(self.state.current_tokens),
            level,
            message_count: self.state.log.len(),
            compression_count: self.state.compression_count,
            last_compression_time: self.state.last_compression_time,
        }
    }

    /// Most recent `limit` messages, or all of them
    pub fn history(&self, limit: Option<usize>) -> Vec<Message> {
        let log = &self.state.log;
        match limit {
            Some(limit) => log[log.len().saturating_sub(limit)..].to_vec(),
            None => log.clone(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.log
    }

    pub fn reset(&mut self) {
        self.state = SafeguardState::default();
    }
}
