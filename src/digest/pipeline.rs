//! Background session digest pipeline
//!
//! Idle -> Running -> Idle. A trigger that arrives while a run is in
//! progress is skipped, not queued; the same condition re-qualifies on the
//! next check. The cursor only moves after the digest has been persisted,
//! so a failed range is retried on the next run.

use super::extract::{
    extract_structured, filter_memories, infer_category, memory_priority, rule_based_chunk,
    CHUNK_EXTRACTION_PROMPT, MERGE_PROMPT, ROLLING_MERGE_PROMPT,
};
use super::models::{
    ChunkResult, DigestCursor, DigestOutcome, ExtractedMemory, MessageRange, SessionDigest,
};
use super::store::{DigestLog, MemoryStore};
use crate::context::models::Message;
use crate::context::summarizer::{generate_bounded, GenerationConfig, TextGenerator};
use crate::context::token_estimator::TokenCounter;
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Digest pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Unprocessed messages that trigger a digest
    #[serde(default = "default_trigger_turns")]
    pub trigger_turns: usize,
    /// Unprocessed estimated tokens that trigger a digest
    #[serde(default = "default_trigger_tokens")]
    pub trigger_tokens: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Optional token cap per chunk; a chunk closes at whichever limit hits first
    #[serde(default)]
    pub chunk_max_tokens: Option<usize>,
    #[serde(default = "default_max_memories")]
    pub max_memories: usize,
    #[serde(default = "default_min_memory_chars")]
    pub min_memory_chars: usize,
    /// Length cap of the rule-based rolling summary
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    /// Per-message excerpt length in extraction prompts
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

fn default_trigger_turns() -> usize {
    20
}

fn default_trigger_tokens() -> usize {
    1000
}

fn default_chunk_size() -> usize {
    10
}

fn default_max_memories() -> usize {
    5
}

fn default_min_memory_chars() -> usize {
    10
}

fn default_summary_max_chars() -> usize {
    500
}

fn default_excerpt_chars() -> usize {
    300
}

fn default_session_id() -> String {
    "main-conversation".to_string()
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            trigger_turns: default_trigger_turns(),
            trigger_tokens: default_trigger_tokens(),
            chunk_size: default_chunk_size(),
            chunk_max_tokens: None,
            max_memories: default_max_memories(),
            min_memory_chars: default_min_memory_chars(),
            summary_max_chars: default_summary_max_chars(),
            excerpt_chars: default_excerpt_chars(),
            session_id: default_session_id(),
        }
    }
}

#[derive(Debug, Default)]
struct PipelineState {
    cursor: DigestCursor,
    latest: Option<SessionDigest>,
    previous_summary: String,
}

/// Clears the running flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Split messages into chunks of at most `max_messages`, also closing a
/// chunk before it would exceed `max_tokens`
pub fn split_into_chunks<'a>(
    messages: &'a [Message],
    counter: &TokenCounter,
    max_messages: usize,
    max_tokens: Option<usize>,
) -> Vec<&'a [Message]> {
    let max_messages = max_messages.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut tokens = 0;

    for (i, message) in messages.iter().enumerate() {
        let message_tokens = counter.count_message(message);
        let full = i - start >= max_messages;
        let over_budget = max_tokens.is_some_and(|cap| i > start && tokens + message_tokens > cap);
        if full || over_budget {
            chunks.push(&messages[start..i]);
            start = i;
            tokens = 0;
        }
        tokens += message_tokens;
    }
    if start < messages.len() {
        chunks.push(&messages[start..]);
    }
    chunks
}

/// Keep the last `max_chars` characters
fn keep_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max_chars)).collect()
}

/// Per-session digest pipeline
pub struct SessionDigestPipeline {
    config: DigestConfig,
    counter: TokenCounter,
    generation: GenerationConfig,
    generator: Option<Arc<dyn TextGenerator>>,
    memory_store: Option<Arc<dyn MemoryStore>>,
    log: Arc<dyn DigestLog>,
    running: AtomicBool,
    state: Mutex<PipelineState>,
}

impl SessionDigestPipeline {
    pub fn new(config: DigestConfig, counter: TokenCounter, log: Arc<dyn DigestLog>) -> Self {
        Self {
            config,
            counter,
            generation: GenerationConfig::default(),
            generator: None,
            memory_store: None,
            log,
            running: AtomicBool::new(false),
            state: Mutex::new(PipelineState::default()),
        }
    }

    pub fn with_generator(
        mut self,
        generator: Arc<dyn TextGenerator>,
        generation: GenerationConfig,
    ) -> Self {
        self.generator = Some(generator);
        self.generation = generation;
        self
    }

    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    pub fn config(&self) -> &DigestConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cursor(&self) -> DigestCursor {
        self.state().cursor.clone()
    }

    pub fn latest_digest(&self) -> Option<SessionDigest> {
        self.state().latest.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True when enough unprocessed turns or tokens have piled up
    pub fn should_digest(&self, messages: &[Message]) -> bool {
        if self.is_running() || messages.is_empty() {
            return false;
        }
        let start = self.state().cursor.last_processed_index.min(messages.len());
        let pending = &messages[start..];
        let tokens: usize = pending.iter().map(|m| self.counter.count_message(m)).sum();
        pending.len() >= self.config.trigger_turns || tokens >= self.config.trigger_tokens
    }

    /// Digest everything after the cursor.
    ///
    /// Never returns an error: concurrent runs are `Skipped`, and failures
    /// are `Failed` with the cursor left where it was.
    pub async fn run_digest(&self, messages: &[Message]) -> DigestOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Session digest already running, skipping");
            return self.finish(DigestOutcome::Skipped {
                reason: "digest already running".to_string(),
            });
        }
        let _guard = RunGuard(&self.running);

        let (from, previous_summary) = {
            let state = self.state();
            (state.cursor.last_processed_index, state.previous_summary.clone())
        };
        if from >= messages.len() {
            return self.finish(DigestOutcome::Skipped {
                reason: "no unprocessed messages".to_string(),
            });
        }

        let range = MessageRange {
            from,
            to: messages.len(),
        };
        match self.digest_range(&messages[from..], range, &previous_summary).await {
            Ok(digest) => {
                let mut state = self.state();
                state.cursor = DigestCursor {
                    last_processed_index: range.to,
                    last_digest_time: Some(digest.timestamp),
                };
                state.previous_summary = digest.summary.clone();
                state.latest = Some(digest.clone());
                drop(state);

                info!(
                    "Session digest done: {} messages, {} chunks, {} memories, {}ms",
                    range.len(),
                    digest.chunk_count,
                    digest.memories.len(),
                    digest.processing_ms
                );
                self.finish(DigestOutcome::Completed(digest))
            }
            Err(e) => {
                error!("Session digest failed for {}..{}: {}", range.from, range.to, e);
                self.finish(DigestOutcome::Failed { error: e.to_string() })
            }
        }
    }

    fn finish(&self, outcome: DigestOutcome) -> DigestOutcome {
        METRICS.record_digest_run(outcome.label());
        outcome
    }

    async fn digest_range(
        &self,
        pending: &[Message],
        range: MessageRange,
        previous_summary: &str,
    ) -> Result<SessionDigest> {
        let started = Instant::now();
        let chunks = split_into_chunks(
            pending,
            &self.counter,
            self.config.chunk_size,
            self.config.chunk_max_tokens,
        );
        debug!("Digesting {} messages in {} chunks", pending.len(), chunks.len());

        let mut results = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            results.push(self.process_chunk(chunk).await);
        }

        let summary = self.merge_summaries(&results, previous_summary).await;

        let candidates: Vec<String> = results
            .iter()
            .flat_map(|r| r.memories.iter().cloned())
            .collect();
        let provenance = format!("digest:{}:{}-{}", self.config.session_id, range.from, range.to);
        let memories = self.save_memories(&candidates, &provenance).await;

        let mut keywords: Vec<String> = Vec::new();
        for keyword in results.iter().flat_map(|r| r.keywords.iter()) {
            if !keywords.contains(keyword) {
                keywords.push(keyword.clone());
            }
        }
        let actions = results.iter().flat_map(|r| r.actions.iter().cloned()).collect();

        let digest = SessionDigest {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.config.session_id.clone(),
            timestamp: Utc::now(),
            message_range: range,
            summary,
            memories,
            keywords,
            actions,
            chunk_count: results.len(),
            processing_ms: started.elapsed().as_millis() as u64,
        };

        self.log
            .append(&digest)
            .await
            .map_err(|e| ContextError::Persistence(e.to_string()))?;

        Ok(digest)
    }

    fn chunk_prompt_text(&self, chunk: &[Message]) -> String {
        chunk
            .iter()
            .map(|m| {
                let text: String = m.text().chars().take(self.config.excerpt_chars).collect();
                format!("{}: {}", m.role.as_str(), text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn process_chunk(&self, chunk: &[Message]) -> ChunkResult {
        let Some(generator) = &self.generator else {
            return rule_based_chunk(chunk);
        };

        match generate_bounded(
            generator.as_ref(),
            self.generation.timeout(),
            CHUNK_EXTRACTION_PROMPT,
            &self.chunk_prompt_text(chunk),
        )
        .await
        {
            Ok(raw) => extract_structured(&raw).unwrap_or_else(|| {
                warn!("Could not parse chunk extraction, using rule-based summary");
                rule_based_chunk(chunk)
            }),
            Err(e) => {
                warn!("Chunk extraction failed, using rule-based summary: {}", e);
                rule_based_chunk(chunk)
            }
        }
    }

    async fn merge_summaries(&self, results: &[ChunkResult], previous: &str) -> String {
        if results.is_empty() {
            return previous.to_string();
        }

        if let Some(generator) = &self.generator {
            let chunk_summaries = results
                .iter()
                .enumerate()
                .map(|(i, r)| format!("[{}] {}", i + 1, r.summary))
                .collect::<Vec<_>>()
                .join("\n");
            let (system_prompt, content) = if previous.is_empty() {
                (MERGE_PROMPT, chunk_summaries)
            } else {
                (
                    ROLLING_MERGE_PROMPT,
                    format!(
                        "Previous session summary:\n{}\n\nNew summaries:\n{}",
                        previous, chunk_summaries
                    ),
                )
            };

            let timeout = self.generation.timeout();
            match generate_bounded(generator.as_ref(), timeout, system_prompt, &content).await {
                Ok(summary) => return summary.trim().to_string(),
                Err(e) => warn!("Summary merge failed, concatenating chunk summaries: {}", e),
            }
        }

        let fresh = results.iter().map(|r| r.summary.as_str()).collect::<Vec<_>>().join(" ");
        if previous.is_empty() {
            return fresh.chars().take(self.config.summary_max_chars).collect();
        }
        keep_tail(&format!("{} {}", previous, fresh), self.config.summary_max_chars)
    }

    async fn save_memories(&self, candidates: &[String], provenance: &str) -> Vec<ExtractedMemory> {
        let accepted = filter_memories(
            candidates,
            self.config.min_memory_chars,
            self.config.max_memories,
        );
        let mut saved = Vec::new();

        for text in accepted {
            let memory = ExtractedMemory::new(
                text.as_str(),
                infer_category(&text),
                memory_priority(&text),
                provenance,
            );

            if let Some(store) = &self.memory_store {
                match store.exists(&memory.text).await {
                    Ok(true) => {
                        debug!("Skipping duplicate memory: {}", memory.text);
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Memory lookup failed, skipping \"{}\": {}", memory.text, e);
                        continue;
                    }
                }
                if let Err(e) = store.create(&memory).await {
                    warn!("Failed to save memory \"{}\": {}", memory.text, e);
                    continue;
                }
            } else if saved.iter().any(|m: &ExtractedMemory| m.text == memory.text) {
                continue;
            }

            METRICS.memories_saved.inc();
            debug!(
                "Memory saved: [{}] priority={} \"{}\"",
                memory.category.as_str(),
                memory.priority,
                memory.text
            );
            saved.push(memory);
        }

        saved
    }

    /// Past digests, newest first, stopping before the one that would
    /// exceed `max_tokens` of summary text
    pub async fn get_recent_digests(
        &self,
        max_count: usize,
        max_tokens: usize,
    ) -> Vec<SessionDigest> {
        let digests = match self.log.recent(max_count).await {
            Ok(digests) => digests,
            Err(e) => {
                warn!("Failed to read digest log: {}", e);
                return Vec::new();
            }
        };

        let mut selected = Vec::new();
        let mut used = 0;
        for digest in digests.into_iter().take(max_count) {
            let tokens = self.counter.estimate(&digest.summary);
            if used + tokens > max_tokens {
                break;
            }
            used += tokens;
            selected.push(digest);
        }
        selected
    }

    /// Injectable block with the current session summary and recent past
    /// digests. Empty when there is nothing to say.
    pub async fn build_context_summary(&self, max_tokens: usize) -> String {
        const PAST_DIGESTS: usize = 3;
        const MIN_PAST_BUDGET: usize = 200;

        let latest = self.latest_digest();
        let current = latest.as_ref().map(|d| d.summary.clone()).unwrap_or_default();
        let remaining = max_tokens
            .saturating_sub(self.counter.estimate(&current))
            .max(MIN_PAST_BUDGET);

        let mut parts = Vec::new();
        if !current.is_empty() {
            parts.push(format!("[Current session] {}", current));
        }

        for digest in self.get_recent_digests(PAST_DIGESTS, remaining).await {
            if latest.as_ref().is_some_and(|l| l.id == digest.id) {
                continue;
            }
            parts.push(format!("[{}] {}", digest.timestamp.format("%Y-%m-%d"), digest.summary));
        }

        if parts.is_empty() {
            debug!("No digests available for context");
            return String::new();
        }

        format!(
            "<session_summaries>\nPrevious conversation summaries:\n{}\n</session_summaries>",
            parts.join("\n")
        )
    }

    /// Injectable block with the highest-priority stored memories
    pub async fn build_memory_context(&self, max_count: usize, max_tokens: usize) -> String {
        let Some(store) = &self.memory_store else {
            return String::new();
        };
        let memories = match store.list_active(max_count * 2).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!("Failed to load memories for context: {}", e);
                return String::new();
            }
        };

        let mut lines = Vec::new();
        let mut used = 0;
        for memory in memories {
            if lines.len() >= max_count {
                break;
            }
            let tokens = self.counter.estimate(&memory.text);
            if used + tokens > max_tokens {
                break;
            }
            used += tokens;
            lines.push(format!("- {}", memory.text));
        }

        if lines.is_empty() {
            return String::new();
        }
        format!(
            "<user_memories>\nKnown facts about the user:\n{}\n</user_memories>",
            lines.join("\n")
        )
    }
}

impl std::fmt::Debug for SessionDigestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDigestPipeline")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("cursor", &self.cursor())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::store::{InMemoryDigestLog, InMemoryMemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("user turn {}", i))
                } else {
                    Message::assistant(format!("assistant turn {}", i))
                }
            })
            .collect()
    }

    fn pipeline(log: Arc<InMemoryDigestLog>) -> SessionDigestPipeline {
        SessionDigestPipeline::new(DigestConfig::default(), TokenCounter::heuristic(), log)
    }

    /// Answers extraction prompts with JSON and merge prompts with plain text
    struct ScriptedGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, system_prompt: &str, _content: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if system_prompt == CHUNK_EXTRACTION_PROMPT {
                Ok(r#"{"summary":"Talked about coffee.","memories":["User always drinks espresso at 7am","today I am sleepy and cold"],"keywords":["coffee"],"actions":["buy beans"]}"#.to_string())
            } else {
                Ok("  The user discussed coffee habits.  ".to_string())
            }
        }
    }

    struct FlakyLog {
        failures_left: AtomicUsize,
        inner: InMemoryDigestLog,
    }

    #[async_trait]
    impl DigestLog for FlakyLog {
        async fn append(&self, digest: &SessionDigest) -> anyhow::Result<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("disk unavailable");
            }
            self.inner.append(digest).await
        }

        async fn recent(&self, max_items: usize) -> anyhow::Result<Vec<SessionDigest>> {
            self.inner.recent(max_items).await
        }
    }

    #[test]
    fn test_trigger_by_turns() {
        let pipeline = pipeline(Arc::new(InMemoryDigestLog::new()));
        assert!(!pipeline.should_digest(&conversation(19)));
        assert!(pipeline.should_digest(&conversation(20)));
        assert!(!pipeline.should_digest(&[]));
    }

    #[test]
    fn test_trigger_by_tokens() {
        let pipeline = pipeline(Arc::new(InMemoryDigestLog::new()));
        // 3 messages of 700 words each, far above 1000 tokens
        let messages: Vec<Message> = (0..3).map(|_| Message::user("word ".repeat(700))).collect();
        assert!(pipeline.should_digest(&messages));
    }

    #[test]
    fn test_split_into_chunks() {
        let counter = TokenCounter::heuristic();
        let messages = conversation(25);
        let sizes: Vec<usize> = split_into_chunks(&messages, &counter, 10, None)
            .iter()
            .map(|c| c.len())
            .collect();
        assert_eq!(sizes, vec![10, 10, 5]);

        // "user turn 0" is 8 tokens with overhead, so a 20-token cap fits two
        let capped: Vec<usize> = split_into_chunks(&messages[..4], &counter, 10, Some(20))
            .iter()
            .map(|c| c.len())
            .collect();
        assert_eq!(capped, vec![2, 2]);
    }

    #[test]
    fn test_keep_tail() {
        assert_eq!(keep_tail("abcdef", 3), "def");
        assert_eq!(keep_tail("ab", 3), "ab");
    }

    #[tokio::test]
    async fn test_rule_based_run_advances_cursor() {
        let log = Arc::new(InMemoryDigestLog::new());
        let pipeline = pipeline(log.clone());
        let messages = conversation(25);

        let outcome = pipeline.run_digest(&messages).await;
        let digest = outcome.digest().expect("digest completed");
        assert_eq!(digest.message_range, MessageRange { from: 0, to: 25 });
        assert_eq!(digest.chunk_count, 3);
        assert!(digest.memories.is_empty());
        assert!(digest.summary.starts_with("user turn 0 -> assistant turn 9"));

        assert_eq!(pipeline.cursor().last_processed_index, 25);
        assert_eq!(log.len().await, 1);
        assert!(!pipeline.should_digest(&messages));
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_nothing_pending_is_skipped() {
        let pipeline = pipeline(Arc::new(InMemoryDigestLog::new()));
        let messages = conversation(4);
        assert!(pipeline.run_digest(&messages).await.is_completed());
        assert!(pipeline.run_digest(&messages).await.is_skipped());
    }

    #[tokio::test]
    async fn test_generator_run_saves_filtered_memories() {
        let store = Arc::new(InMemoryMemoryStore::new());
        let generator = Arc::new(ScriptedGenerator {
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(Arc::new(InMemoryDigestLog::new()))
            .with_generator(generator.clone(), GenerationConfig::default())
            .with_memory_store(store.clone());

        let outcome = pipeline.run_digest(&conversation(20)).await;
        let digest = outcome.digest().unwrap();

        // Two chunks plus one merge call
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(digest.summary, "The user discussed coffee habits.");
        assert_eq!(digest.keywords, vec!["coffee"]);
        assert_eq!(digest.actions, vec!["buy beans", "buy beans"]);

        // Same memory from both chunks is stored once; the ephemeral one never
        assert_eq!(digest.memories.len(), 1);
        assert_eq!(digest.memories[0].priority, 9);
        assert_eq!(digest.memories[0].provenance, "digest:main-conversation:0-20");
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_cursor_and_retries() {
        let log = Arc::new(FlakyLog {
            failures_left: AtomicUsize::new(1),
            inner: InMemoryDigestLog::new(),
        });
        let pipeline =
            SessionDigestPipeline::new(DigestConfig::default(), TokenCounter::heuristic(), log);
        let messages = conversation(22);

        let first = pipeline.run_digest(&messages).await;
        assert!(matches!(first, DigestOutcome::Failed { .. }));
        assert_eq!(pipeline.cursor().last_processed_index, 0);
        assert!(pipeline.should_digest(&messages));

        let second = pipeline.run_digest(&messages).await;
        assert_eq!(second.digest().unwrap().message_range, MessageRange { from: 0, to: 22 });
        assert_eq!(pipeline.cursor().last_processed_index, 22);
    }

    #[tokio::test]
    async fn test_rolling_summary_fallback_keeps_newest_chars() {
        let config = DigestConfig {
            summary_max_chars: 40,
            ..Default::default()
        };
        let pipeline = SessionDigestPipeline::new(
            config,
            TokenCounter::heuristic(),
            Arc::new(InMemoryDigestLog::new()),
        );
        let mut messages = conversation(4);
        pipeline.run_digest(&messages).await;

        messages.push(Message::user("second batch question"));
        messages.push(Message::assistant("second batch answer"));
        let digest = pipeline.run_digest(&messages).await.digest().cloned().unwrap();

        assert_eq!(digest.summary, "nd batch question -> second batch answer");
    }

    #[tokio::test]
    async fn test_recent_digests_respect_token_budget() {
        let log = Arc::new(InMemoryDigestLog::new());
        let pipeline = pipeline(log.clone());
        let mut messages = conversation(2);
        for _ in 0..3 {
            pipeline.run_digest(&messages).await;
            messages.extend(conversation(2));
        }

        let all = pipeline.get_recent_digests(5, 10_000).await;
        assert_eq!(all.len(), 3);
        assert!(all[0].timestamp >= all[1].timestamp);

        let budget = TokenCounter::heuristic().estimate(&all[0].summary);
        let limited = pipeline.get_recent_digests(5, budget).await;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, all[0].id);

        assert!(pipeline.get_recent_digests(5, 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_context_summary_empty_and_populated() {
        let pipeline = pipeline(Arc::new(InMemoryDigestLog::new()));
        assert_eq!(pipeline.build_context_summary(600).await, "");

        pipeline.run_digest(&conversation(4)).await;
        let context = pipeline.build_context_summary(600).await;
        assert!(context.starts_with("<session_summaries>"));
        assert!(context.contains("[Current session] user turn 0 -> assistant turn 3"));
        // The latest digest is not repeated as a past entry
        assert_eq!(context.matches("assistant turn 3").count(), 1);
    }

    #[tokio::test]
    async fn test_memory_context() {
        let store = Arc::new(InMemoryMemoryStore::new());
        store
            .create(&ExtractedMemory::new(
                "User is vegetarian",
                crate::digest::models::MemoryCategory::General,
                7,
                "test",
            ))
            .await
            .unwrap();
        let pipeline = pipeline(Arc::new(InMemoryDigestLog::new())).with_memory_store(store);

        let context = pipeline.build_memory_context(5, 500).await;
        assert!(context.contains("- User is vegetarian"));
        assert_eq!(pipeline.build_memory_context(5, 0).await, "");
    }
}
