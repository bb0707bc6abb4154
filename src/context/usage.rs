//! Context window usage analysis

use super::model_limits::ModelLimitRegistry;
use super::models::Message;
use super::token_estimator::TokenCounter;
use serde::{Deserialize, Serialize};

/// Coarse usage level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Normal,
    Warning,
    Critical,
}

/// Point-in-time usage of a model's context window. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub used_tokens: usize,
    pub max_tokens: usize,
    /// Zero when the context is already over the limit
    pub remaining_tokens: usize,
    /// Percentage rounded to two decimals
    pub usage_percent: f64,
    pub status: UsageStatus,
    pub should_compress: bool,
}

impl UsageSnapshot {
    pub fn is_over_limit(&self) -> bool {
        self.used_tokens > self.max_tokens
    }
}

/// Thresholds as fractions of the context window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageThresholds {
    #[serde(default = "default_warning")]
    pub warning: f64,
    #[serde(default = "default_critical")]
    pub critical: f64,
}

fn default_warning() -> f64 {
    0.8
}

fn default_critical() -> f64 {
    0.9
}

impl Default for UsageThresholds {
    fn default() -> Self {
        Self {
            warning: default_warning(),
            critical: default_critical(),
        }
    }
}

/// Combines token counting and model limits into usage snapshots
#[derive(Debug, Clone)]
pub struct UsageAnalyzer {
    counter: TokenCounter,
    registry: ModelLimitRegistry,
    thresholds: UsageThresholds,
}

impl UsageAnalyzer {
    pub fn new(
        counter: TokenCounter,
        registry: ModelLimitRegistry,
        thresholds: UsageThresholds,
    ) -> Self {
        Self {
            counter,
            registry,
            thresholds,
        }
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    pub fn registry(&self) -> &ModelLimitRegistry {
        &self.registry
    }

    pub fn analyze(&self, messages: &[Message], model_id: &str) -> UsageSnapshot {
        let used = self.counter.count_messages(messages);
        let max = self.registry.get_limit(model_id);
        self.snapshot(used, max)
    }

    /// Snapshot for an already known token total
    pub fn snapshot(&self, used_tokens: usize, max_tokens: usize) -> UsageSnapshot {
        let ratio = if max_tokens == 0 {
            1.0
        } else {
            used_tokens as f64 / max_tokens as f64
        };

        let status = if ratio >= self.thresholds.critical {
            UsageStatus::Critical
        } else if ratio >= self.thresholds.warning {
            UsageStatus::Warning
        } else {
            UsageStatus::Normal
        };

        UsageSnapshot {
            used_tokens,
            max_tokens,
            remaining_tokens: max_tokens.saturating_sub(used_tokens),
            usage_percent: (ratio * 10_000.0).round() / 100.0,
            status,
            should_compress: status != UsageStatus::Normal,
        }
    }
}
