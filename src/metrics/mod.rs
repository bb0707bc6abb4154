//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Histogram, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Compression metrics
    pub compressions: CounterVec,
    pub compression_tokens_saved: Histogram,
    pub summarizer_fallbacks: Counter,
    pub archive_failures: Counter,

    // Safeguard metrics
    pub messages_rejected: Counter,
    pub tool_outputs_truncated: Counter,

    // Digest metrics
    pub digest_runs: CounterVec,
    pub memories_saved: Counter,

    // Tokenizer metrics
    pub tokenizer_resets: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let compressions = register_counter_vec_with_registry!(
            Opts::new("context_compressions_total", "Total context compressions"),
            &["kind"],
            registry
        )?;

        let compression_tokens_saved = register_histogram_with_registry!(
            "context_compression_tokens_saved",
            "Tokens saved per compression",
            vec![10.0, 100.0, 1_000.0, 10_000.0, 100_000.0],
            registry
        )?;

        let summarizer_fallbacks = register_counter_with_registry!(
            Opts::new(
                "context_summarizer_fallbacks_total",
                "Summaries that fell back to the rule-based path"
            ),
            registry
        )?;

        let archive_failures = register_counter_with_registry!(
            Opts::new("context_archive_failures_total", "Failed archive writes"),
            registry
        )?;

        let messages_rejected = register_counter_with_registry!(
            Opts::new("safeguard_messages_rejected_total", "Messages rejected at ingestion"),
            registry
        )?;

        let tool_outputs_truncated = register_counter_with_registry!(
            Opts::new(
                "safeguard_tool_outputs_truncated_total",
                "Tool outputs truncated at ingestion"
            ),
            registry
        )?;

        let digest_runs = register_counter_vec_with_registry!(
            Opts::new("session_digest_runs_total", "Session digest runs"),
            &["outcome"],
            registry
        )?;

        let memories_saved = register_counter_with_registry!(
            Opts::new("session_digest_memories_saved_total", "Memories persisted by digests"),
            registry
        )?;

        let tokenizer_resets = register_counter_with_registry!(
            Opts::new("managed_tokenizer_resets_total", "Managed tokenizer resets"),
            registry
        )?;

        Ok(Self {
            registry,
            compressions,
            compression_tokens_saved,
            summarizer_fallbacks,
            archive_failures,
            messages_rejected,
            tool_outputs_truncated,
            digest_runs,
            memories_saved,
            tokenizer_resets,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished compression
    pub fn record_compression(&self, kind: &str, saved_tokens: usize) {
        self.compressions.with_label_values(&[kind]).inc();
        self.compression_tokens_saved.observe(saved_tokens as f64);
    }

    /// Record a digest run outcome ("completed", "skipped", "failed")
    pub fn record_digest_run(&self, outcome: &str) {
        self.digest_runs.with_label_values(&[outcome]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
