//! Self-resetting tokenizer facade
//!
//! Tokenizer backends can grow internal caches without bound. The managed
//! tokenizer rebuilds its backend every few minutes or every N calls,
//! whichever comes first.

use super::token_estimator::TokenEstimator;
use crate::metrics::METRICS;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Builds a fresh estimator on every reset
pub type EstimatorFactory = Arc<dyn Fn() -> Arc<dyn TokenEstimator> + Send + Sync>;

/// When to reset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetPolicy {
    #[serde(default = "default_reset_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_reset_calls")]
    pub max_calls: usize,
}

fn default_reset_interval_secs() -> u64 {
    300
}

fn default_reset_calls() -> usize {
    25
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            interval_secs: default_reset_interval_secs(),
            max_calls: default_reset_calls(),
        }
    }
}

impl ResetPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Counters until the next reset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerStatus {
    pub call_count: usize,
    pub reset_count: usize,
    pub since_reset: Duration,
    pub calls_until_reset: usize,
    pub time_until_reset: Duration,
}

pub struct ManagedTokenizer {
    factory: EstimatorFactory,
    estimator: Arc<dyn TokenEstimator>,
    policy: ResetPolicy,
    call_count: usize,
    reset_count: usize,
    last_reset: Instant,
}

impl ManagedTokenizer {
    pub fn new(factory: EstimatorFactory, policy: ResetPolicy) -> Self {
        Self::starting_at(factory, policy, Instant::now())
    }

    /// Tokenizer whose reset clock starts at `now`
    pub fn starting_at(factory: EstimatorFactory, policy: ResetPolicy, now: Instant) -> Self {
        let estimator = factory();
        Self {
            factory,
            estimator,
            policy,
            call_count: 0,
            reset_count: 0,
            last_reset: now,
        }
    }

    /// Pure reset predicate
    pub fn should_reset(&self, now: Instant, call_count: usize) -> bool {
        now.saturating_duration_since(self.last_reset) >= self.policy.interval()
            || call_count >= self.policy.max_calls
    }

    pub fn encode(&mut self, text: &str) -> usize {
        self.encode_at(text, Instant::now())
    }

    /// Count tokens, resetting first if the policy says so
    pub fn encode_at(&mut self, text: &str, now: Instant) -> usize {
        if self.should_reset(now, self.call_count) {
            self.reset_at(now);
        }
        self.call_count += 1;
        self.estimator.estimate(text)
    }

    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    fn reset_at(&mut self, now: Instant) {
        self.estimator = (self.factory)();
        self.call_count = 0;
        self.reset_count += 1;
        self.last_reset = now;
        METRICS.tokenizer_resets.inc();
        debug!("Tokenizer reset to bound cache growth");
    }

    pub fn status(&self) -> TokenizerStatus {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> TokenizerStatus {
        let since_reset = now.saturating_duration_since(self.last_reset);
        TokenizerStatus {
            call_count: self.call_count,
            reset_count: self.reset_count,
            since_reset,
            calls_until_reset: self.policy.max_calls.saturating_sub(self.call_count),
            time_until_reset: self.policy.interval().saturating_sub(since_reset),
        }
    }
}

impl std::fmt::Debug for ManagedTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTokenizer")
            .field("policy", &self.policy)
            .field("call_count", &self.call_count)
            .field("reset_count", &self.reset_count)
            .finish_non_exhaustive()
    }
}
