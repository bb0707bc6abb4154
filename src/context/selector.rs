//! Priority-based eviction planning
//!
//! Planning is a pure function of (messages, target, policy). Every message
//! gets a score; protected messages score -1 and are never evicted. The rest
//! are evicted highest score first until the kept total fits the target.

use super::models::{Message, Role};
use super::token_estimator::TokenCounter;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Score given to messages that must never be evicted
pub const PROTECTED_PRIORITY: f64 = -1.0;

const LONG_MESSAGE_TOKENS: usize = 1000;
const LONG_MESSAGE_BONUS: f64 = 0.2;
const AGE_WEIGHT_SCALE: f64 = 0.5;
/// Earlier compression summaries outrank every role, so they are folded
/// into the next summary before any live message goes
const SUMMARY_WEIGHT: f64 = 1.5;

/// Per-role base weights. A negative weight protects the role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleWeights {
    #[serde(default = "default_system_weight")]
    pub system: f64,
    #[serde(default = "default_user_weight")]
    pub user: f64,
    #[serde(default = "default_assistant_weight")]
    pub assistant: f64,
    #[serde(default = "default_tool_weight")]
    pub tool: f64,
}

fn default_system_weight() -> f64 {
    PROTECTED_PRIORITY
}

fn default_user_weight() -> f64 {
    0.3
}

fn default_assistant_weight() -> f64 {
    0.5
}

fn default_tool_weight() -> f64 {
    0.6
}

impl Default for RoleWeights {
    fn default() -> Self {
        Self {
            system: default_system_weight(),
            user: default_user_weight(),
            assistant: default_assistant_weight(),
            tool: default_tool_weight(),
        }
    }
}

impl RoleWeights {
    pub fn weight(&self, role: Role) -> f64 {
        match role {
            Role::System => self.system,
            Role::User => self.user,
            Role::Assistant => self.assistant,
            Role::Tool => self.tool,
        }
    }
}

/// Eviction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionPolicy {
    /// Trailing messages that are always kept
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    #[serde(default)]
    pub role_weights: RoleWeights,
}

fn default_keep_recent() -> usize {
    10
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            keep_recent: default_keep_recent(),
            role_weights: RoleWeights::default(),
        }
    }
}

/// What the plan does with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Protected,
    Keep,
    Evict,
}

/// Planning decision for one input message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMessage {
    /// Position in the input list
    pub index: usize,
    pub priority: f64,
    pub tokens: usize,
    pub disposition: Disposition,
}

/// Partition of the input into protected / kept / evicted, in input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionPlan {
    pub entries: Vec<PlannedMessage>,
    pub original_tokens: usize,
    pub target_tokens: usize,
    /// Total after removing evicted messages
    pub projected_tokens: usize,
}

impl CompressionPlan {
    fn indices(&self, filter: impl Fn(Disposition) -> bool) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|e| filter(e.disposition))
            .map(|e| e.index)
            .collect()
    }

    pub fn protected_indices(&self) -> Vec<usize> {
        self.indices(|d| d == Disposition::Protected)
    }

    /// Protected and kept messages, chronological
    pub fn keep_indices(&self) -> Vec<usize> {
        self.indices(|d| d != Disposition::Evict)
    }

    pub fn evict_indices(&self) -> Vec<usize> {
        self.indices(|d| d == Disposition::Evict)
    }

    pub fn evicted_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.disposition == Disposition::Evict)
            .count()
    }

    pub fn tokens_to_save(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.disposition == Disposition::Evict)
            .map(|e| e.tokens)
            .sum()
    }

    pub fn reaches_target(&self) -> bool {
        self.projected_tokens <= self.target_tokens
    }

    /// Split `messages` into (kept, evicted), both in original order.
    ///
    /// `messages` must be the list the plan was built from.
    pub fn apply(&self, messages: &[Message]) -> (Vec<Message>, Vec<Message>) {
        let mut kept = Vec::new();
        let mut evicted = Vec::new();
        for entry in &self.entries {
            let Some(message) = messages.get(entry.index) else {
                continue;
            };
            match entry.disposition {
                Disposition::Evict => evicted.push(message.clone()),
                Disposition::Protected | Disposition::Keep => kept.push(message.clone()),
            }
        }
        (kept, evicted)
    }
}

/// Eviction planner
#[derive(Debug, Clone)]
pub struct CompressionSelector {
    counter: TokenCounter,
}

impl CompressionSelector {
    pub fn new(counter: TokenCounter) -> Self {
        Self { counter }
    }

    /// Score every message. Higher means evict sooner.
    pub fn prioritize(
        &self,
        messages: &[Message],
        policy: &SelectionPolicy,
    ) -> Vec<PlannedMessage> {
        let total = messages.len();
        let recent_start = total.saturating_sub(policy.keep_recent);

        messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let tokens = self.counter.count_message(message);
                let role_weight = if message.flags.compressed {
                    SUMMARY_WEIGHT
                } else {
                    policy.role_weights.weight(message.role)
                };
                let protected = index >= recent_start || role_weight < 0.0;

                let priority = if protected {
                    PROTECTED_PRIORITY
                } else {
                    let age_weight = (index as f64 / total as f64) * AGE_WEIGHT_SCALE;
                    let length_bonus = if tokens > LONG_MESSAGE_TOKENS {
                        LONG_MESSAGE_BONUS
                    } else {
                        0.0
                    };
                    role_weight + age_weight + length_bonus
                };

                PlannedMessage {
                    index,
                    priority,
                    tokens,
                    disposition: if protected {
                        Disposition::Protected
                    } else {
                        Disposition::Keep
                    },
                }
            })
            .collect()
    }

    /// Build an eviction plan that brings the total to `target_tokens` or as
    /// close as the protected messages allow.
    pub fn plan(
        &self,
        messages: &[Message],
        target_tokens: usize,
        policy: &SelectionPolicy,
    ) -> CompressionPlan {
        let mut entries = self.prioritize(messages, policy);
        let original_tokens = self.counter.count_messages(messages);

        let mut candidates: Vec<usize> = entries
            .iter()
            .filter(|e| e.disposition == Disposition::Keep)
            .map(|e| e.index)
            .collect();
        // Highest priority first; ties evict the older message first
        candidates.sort_by(|a, b| {
            entries[*b]
                .priority
                .partial_cmp(&entries[*a].priority)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(b))
        });

        let mut current = original_tokens;
        for index in candidates {
            if current <= target_tokens {
                break;
            }
            let entry = &mut entries[index];
            entry.disposition = Disposition::Evict;
            current = current.saturating_sub(entry.tokens);
        }

        // Dropping every message also drops the list overhead
        if entries.iter().all(|e| e.disposition == Disposition::Evict) {
            current = 0;
        }

        CompressionPlan {
            entries,
            original_tokens,
            target_tokens,
            projected_tokens: current,
        }
    }
}
