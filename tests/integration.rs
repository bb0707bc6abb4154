//! End-to-end scenarios across safeguard, compressor and digest pipeline

use async_trait::async_trait;
use context_budget::context::{CompressOptions, Content, EmergencyOutcome, UsageStatus};
use context_budget::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const VOCABULARY: [&str; 8] = [
    "deploy", "billing", "cluster", "review", "health", "checks", "latency", "rollback",
];

/// 28 words plus a two-digit number: 50 tokens with message overhead
fn fifty_token_message(i: usize) -> Message {
    let words: Vec<&str> = (0..28).map(|j| VOCABULARY[(i + j) % VOCABULARY.len()]).collect();
    let text = format!("{} 12", words.join(" "));
    if i % 2 == 0 {
        Message::user(text)
    } else {
        Message::assistant(text)
    }
}

/// 27 words plus a two-digit number: 49 tokens with message overhead
fn forty_nine_token_message() -> Message {
    let words: Vec<&str> = (0..27).map(|j| VOCABULARY[j % VOCABULARY.len()]).collect();
    Message::user(format!("{} 12", words.join(" ")))
}

fn session_with(settings: Settings) -> SessionContext {
    SessionContext::new(settings, Collaborators::default()).unwrap()
}

#[test]
fn test_small_conversation_on_large_model_is_normal() {
    let session = session_with(Settings::default());
    let messages: Vec<Message> = (0..20).map(fifty_token_message).collect();

    let usage = session.compressor().analyze(&messages, "claude-3-5-sonnet-20241022");
    assert_eq!(usage.max_tokens, 200_000);
    assert_eq!(usage.used_tokens, 20 * 50 + 3);
    assert!(usage.usage_percent > 0.4 && usage.usage_percent < 0.6);
    assert_eq!(usage.status, UsageStatus::Normal);
    assert!(!usage.should_compress);
}

#[test]
fn test_emergency_compression_near_full_budget() {
    let mut settings = Settings::default();
    settings.safeguard.max_tokens = 1_000;
    let mut session = session_with(settings);
    let safeguard = session.safeguard_mut();

    for i in 0..18 {
        let outcome = safeguard.add_message(fifty_token_message(i)).unwrap();
        assert!(outcome.emergency.is_none());
    }
    safeguard.add_message(forty_nine_token_message()).unwrap();
    assert_eq!(safeguard.get_status().current_tokens, 949);

    let outcome = safeguard.add_message(Message::user("hello there friend")).unwrap();
    assert_eq!(outcome.tokens, 9);
    match outcome.emergency {
        Some(EmergencyOutcome::Compressed(report)) => {
            assert_eq!(report.original_tokens, 958);
            assert!(report.compressed_tokens < 960);
            assert!(report.saved_tokens > 0);
        }
        other => panic!("expected emergency compression, got {:?}", other),
    }

    let status = safeguard.get_status();
    assert!(status.current_tokens < 960);
    assert_eq!(status.compression_count, 1);
    assert!(status.last_compression_time.is_some());

    // The five most recent messages survive untouched
    let history = safeguard.history(Some(1));
    assert_eq!(history[0].text(), "hello there friend");
}

#[test]
fn test_large_tool_output_is_truncated() {
    let mut session = session_with(Settings::default());
    let line = "line of tool output with status code 200 and latency 35 ms\n";
    let output = line.repeat(105);
    let original_length = output.chars().count();

    let outcome = session
        .safeguard_mut()
        .add_message(Message::tool_output("search", output))
        .unwrap();

    assert!(outcome.truncated);
    assert!(outcome.tokens < 700);

    let stored = &session.safeguard().messages()[0];
    assert!(stored.flags.truncated);
    assert_eq!(stored.flags.original_length, Some(original_length));
    match &stored.content {
        Content::ToolOutput { output, .. } => {
            assert!(output.ends_with("[... output truncated ...]"));
            assert!(output.chars().count() < 2_100);
        }
        other => panic!("expected tool output, got {:?}", other),
    }
}

#[test]
fn test_oversized_message_is_rejected() {
    let mut settings = Settings::default();
    settings.safeguard.max_tokens = 1_000;
    let mut session = session_with(settings);

    let huge = "word ".repeat(200);
    let err = session.safeguard_mut().add_message(Message::user(huge)).unwrap_err();
    assert!(matches!(err, ValidationError::MessageTooLarge { limit: 100, .. }));
    assert_eq!(session.safeguard().get_status().message_count, 0);
}

#[tokio::test]
async fn test_digest_after_twenty_five_messages() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.digest_dir = Some(dir.path().to_path_buf());
    let session = session_with(settings);
    let messages: Vec<Message> = (0..25).map(fifty_token_message).collect();

    assert!(session.digest().should_digest(&messages));
    let outcome = session.digest().run_digest(&messages).await;
    let digest = outcome.digest().expect("digest completed").clone();

    assert_eq!(digest.message_range.from, 0);
    assert_eq!(digest.message_range.to, 25);
    assert_eq!(session.digest().cursor().last_processed_index, 25);
    assert!(!session.digest().should_digest(&messages));

    let persisted = session.digest().get_recent_digests(5, 10_000).await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, digest.id);
    assert_eq!(persisted[0].message_range.to, 25);
}

#[tokio::test]
async fn test_rule_based_compression_without_backend() {
    let mut settings = Settings::default();
    settings.models.overrides.insert("tiny-model".to_string(), 1_000);
    let session = session_with(settings);

    let mut messages = vec![Message::system(
        "You are a careful assistant for the operations team.",
    )];
    messages.extend((0..18).map(fifty_token_message));

    let before = session.compressor().analyze(&messages, "tiny-model");
    assert_eq!(before.used_tokens, 922);

    let result = session
        .compressor()
        .compress_messages(&messages, "tiny-model", &CompressOptions::default())
        .await;

    assert!(result.compressed);
    assert!(result.used_fallback);
    let stats = result.stats.as_ref().unwrap();
    let summary = result.summary.as_ref().unwrap();

    let mut lines = summary.lines();
    let heading = format!("[Compressed {} messages]", stats.evicted_count);
    assert_eq!(lines.next(), Some(heading.as_str()));
    let topics = lines.next().unwrap().strip_prefix("Key topics: ").unwrap();
    assert!(topics.split(", ").count() <= 5);

    assert!(result.final_usage.used_tokens < before.used_tokens);
    assert!(result.final_usage.used_tokens <= 700);
    assert_eq!(result.messages[0].role, Role::System);
    assert!(result.messages[0].text().starts_with("[Context Summary]\n[Compressed"));
    assert_eq!(result.messages[1].text(), messages[0].text());
}

#[test]
fn test_compression_is_idempotent_below_threshold() {
    let session = session_with(Settings::default());
    let messages: Vec<Message> = (0..6).map(fifty_token_message).collect();

    let result = tokio_test::block_on(session.compressor().compress_messages(
        &messages,
        "gpt-4",
        &CompressOptions::default(),
    ));

    assert!(!result.compressed);
    assert_eq!(result.messages, messages);
    assert_eq!(result.original_usage, result.final_usage);
}

struct SlowGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for SlowGenerator {
    async fn generate(&self, _system_prompt: &str, _content: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(r#"{"summary": "Talked about the rollout.", "memories": [], "keywords": ["rollout"], "actions": []}"#.to_string())
    }
}

#[tokio::test]
async fn test_concurrent_digests_advance_cursor_once() {
    let generator = Arc::new(SlowGenerator {
        calls: AtomicUsize::new(0),
    });
    let collaborators = Collaborators {
        generator: Some(generator.clone()),
        ..Default::default()
    };
    let session = SessionContext::new(Settings::default(), collaborators).unwrap();
    let messages: Vec<Message> = (0..25).map(fifty_token_message).collect();

    let pipeline = session.digest();
    let (first, second) = tokio::join!(
        pipeline.run_digest(&messages),
        pipeline.run_digest(&messages)
    );

    let completed = [&first, &second].iter().filter(|o| o.is_completed()).count();
    let skipped = [&first, &second].iter().filter(|o| o.is_skipped()).count();
    assert_eq!(completed, 1);
    assert_eq!(skipped, 1);
    assert_eq!(pipeline.cursor().last_processed_index, 25);
    assert_eq!(pipeline.get_recent_digests(10, 100_000).await.len(), 1);
    assert!(generator.calls.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_long_session_keeps_one_rolling_summary() {
    let mut settings = Settings::default();
    settings.safeguard.max_tokens = 1_000;
    let mut session = session_with(settings);
    let safeguard = session.safeguard_mut();

    for i in 0..200 {
        let outcome = safeguard.add_message(fifty_token_message(i)).unwrap();
        assert!(outcome.total_tokens <= 1_000, "over budget after message {}", i);
        if let Some(EmergencyOutcome::Compressed(report)) = &outcome.emergency {
            assert!(report.compressed_tokens < report.original_tokens);
        }
        let summaries = safeguard.messages().iter().filter(|m| m.flags.compressed).count();
        assert!(summaries <= 1, "{} summaries after message {}", summaries, i);
    }

    let status = safeguard.get_status();
    assert!(status.compression_count > 1);
    assert!(status.current_tokens <= 1_000);
}
