//! Chunk extraction helpers
//!
//! Generator output is free text that is supposed to contain one JSON
//! object. Parsing is permissive and a miss is an ordinary `None`, which the
//! pipeline answers with the rule-based chunk summary.

use super::models::{ChunkResult, MemoryCategory};
use crate::context::models::{Message, Role};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Prompt for per-chunk structured extraction
pub const CHUNK_EXTRACTION_PROMPT: &str = "Analyze the conversation fragment and answer with JSON only, no other text:\n\
{\"summary\":\"2-3 sentences\",\"memories\":[\"0-5 lasting facts, preferences or goals about the user\"],\
\"keywords\":[\"3-10 search keywords\"],\"actions\":[\"0-5 things the user will do or decided, starting with a verb\"]}\n\
Rules:\n\
- memories hold confirmed, lasting facts only; skip passing moods and one-off events\n\
- store corrections and denials in their negative form\n\
- never store guesses";

/// Prompt for merging chunk summaries into the session summary
pub const MERGE_PROMPT: &str = "Merge the chunk summaries into one session summary of 3-5 sentences. \
Keep chronological and causal order and keep important decisions. Output the summary only.";

/// Prompt for folding new chunk summaries into the previous session summary
pub const ROLLING_MERGE_PROMPT: &str = "Combine the previous session summary with the newly added summaries \
into one summary of 3-5 sentences. Keep chronological order, drop repetition and keep important decisions. \
Output the summary only.";

const RULE_SUMMARY_CHARS: usize = 80;

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("json pattern is valid"));

static EPHEMERAL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(today|yesterday|tomorrow|tonight|right now|just now|this week|오늘|어제|내일|이번 주|지금|방금|이번에|아까)\s")
        .expect("ephemeral pattern is valid")
});

static HEDGING_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(a little|a bit|sometimes|somewhat|slightly|kind of|좀|약간|가끔|조금|살짝)\s")
        .expect("hedging pattern is valid")
});

static PERMANENT_WORDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(always|every day|usually|loves?|hates?|interested in)\b|항상|매일|늘|주로|좋아하|싫어하|관심")
        .expect("permanence pattern is valid")
});

static CATEGORY_TABLE: Lazy<Vec<(MemoryCategory, Regex)>> = Lazy::new(|| {
    [
        (
            MemoryCategory::Preference,
            r"(?i)\b(prefers?|likes?|loves?|hates?|dislikes?|favou?rite|enjoys?)\b|취향|좋아|싫어|선호|즐겨|관심",
        ),
        (
            MemoryCategory::Goal,
            r"(?i)\b(goals?|plans?|planning|wants? to|intends? to|aims? to)\b|목표|계획|하려고|할 예정|다짐|되고 싶",
        ),
        (
            MemoryCategory::Relationship,
            r"(?i)\b(family|friends?|colleagues?|partner|wife|husband|mother|father|mom|dad|sister|brother)\b|가족|친구|동료|연인|부모|형제|남편|아내|엄마|아빠",
        ),
        (
            MemoryCategory::Fact,
            r"(?i)\b(job|works?|company|school|major|studies|lives in)\b|직업|회사|학교|전공|근무|직장",
        ),
        (
            MemoryCategory::Habit,
            r"(?i)\b(habit|every day|always|often|routine|usually)\b|습관|매일|항상|자주|루틴",
        ),
    ]
    .into_iter()
    .map(|(category, pattern)| (category, Regex::new(pattern).expect("category pattern is valid")))
    .collect()
});

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Pull a [`ChunkResult`] out of generator output.
///
/// Takes the outermost `{...}` span, tolerates missing or mistyped fields,
/// and returns `None` when there is no parseable object or no summary.
pub fn extract_structured(raw: &str) -> Option<ChunkResult> {
    let candidate = JSON_OBJECT.find(raw)?;
    let value: Value = serde_json::from_str(candidate.as_str()).ok()?;
    let object = value.as_object()?;

    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if summary.is_empty() {
        return None;
    }

    Some(ChunkResult {
        summary,
        memories: string_list(object.get("memories")),
        keywords: string_list(object.get("keywords")),
        actions: string_list(object.get("actions")),
    })
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn first_line(message: &Message) -> Option<String> {
    let text = message.text();
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| clip(line, RULE_SUMMARY_CHARS))
}

fn last_line(message: &Message) -> Option<String> {
    let text = message.text();
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| clip(line, RULE_SUMMARY_CHARS))
}

/// Trivial chunk summary: the first user line and the last assistant line.
/// Never yields memories or actions.
pub fn rule_based_chunk(chunk: &[Message]) -> ChunkResult {
    let opening = chunk.iter().find(|m| m.role == Role::User).and_then(first_line);
    let closing = chunk.iter().rev().find(|m| m.role == Role::Assistant).and_then(last_line);

    let summary = match (opening, closing) {
        (Some(user), Some(assistant)) => format!("{} -> {}", user, assistant),
        (Some(user), None) => user,
        (None, Some(assistant)) => assistant,
        (None, None) => "(no content)".to_string(),
    };

    ChunkResult {
        summary,
        ..Default::default()
    }
}

/// Drop short, ephemeral and hedged candidates, then cap the count
pub fn filter_memories(candidates: &[String], min_chars: usize, max_count: usize) -> Vec<String> {
    candidates
        .iter()
        .map(|m| m.trim())
        .filter(|m| m.chars().count() >= min_chars)
        .filter(|m| !EPHEMERAL_PREFIX.is_match(m))
        .filter(|m| !HEDGING_PREFIX.is_match(m))
        .take(max_count)
        .map(str::to_string)
        .collect()
}

/// First matching category in table order, else `General`
pub fn infer_category(text: &str) -> MemoryCategory {
    CATEGORY_TABLE
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(category, _)| *category)
        .unwrap_or(MemoryCategory::General)
}

/// 9 for memories worded as lasting, 7 otherwise
pub fn memory_priority(text: &str) -> u8 {
    if PERMANENT_WORDING.is_match(text) {
        9
    } else {
        7
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_wrapped_output() {
        let raw = "Sure! Here you go:\n```json\n{\"summary\": \"Discussed the trip.\", \"memories\": [\"User lives in Busan\"], \"keywords\": [\"trip\", 3], \"actions\": []}\n```";
        let result = extract_structured(raw).unwrap();
        assert_eq!(result.summary, "Discussed the trip.");
        assert_eq!(result.memories, vec!["User lives in Busan"]);
        assert_eq!(result.keywords, vec!["trip"]);
        assert!(result.actions.is_empty());
    }

    #[test]
    fn test_extract_tolerates_missing_fields() {
        let result =
            extract_structured("{\"summary\": \"ok\", \"memories\": \"not a list\"}").unwrap();
        assert!(result.memories.is_empty());
    }

    #[test]
    fn test_extract_failures_are_none() {
        assert!(extract_structured("no json here").is_none());
        assert!(extract_structured("{not valid json}").is_none());
        assert!(extract_structured("{\"memories\": []}").is_none());
        assert!(extract_structured("[1, 2]").is_none());
    }

    #[test]
    fn test_rule_based_chunk_summary() {
        let chunk = vec![
            Message::user("Can we plan the launch?\nIt is next month."),
            Message::assistant("Yes, first draft a checklist."),
            Message::user("ok"),
            Message::assistant("Here it is.\nStart with the press kit."),
        ];
        let result = rule_based_chunk(&chunk);
        assert_eq!(result.summary, "Can we plan the launch? -> Start with the press kit.");
        assert!(result.memories.is_empty());
        assert!(result.actions.is_empty());
    }

    #[test]
    fn test_rule_based_chunk_without_assistant() {
        let result = rule_based_chunk(&[Message::user("just me talking")]);
        assert_eq!(result.summary, "just me talking");
        assert_eq!(rule_based_chunk(&[]).summary, "(no content)");
    }

    #[test]
    fn test_filter_memories() {
        let candidates: Vec<String> = [
            "short",
            "today I feel tired of everything",
            "sometimes likes jazz in the evening",
            "User is allergic to peanuts",
            "User works as a nurse at night",
            "User prefers trains over planes",
            "User has two cats named Miso and Tofu",
            "User studies Japanese on weekends",
            "User always runs before breakfast",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let accepted = filter_memories(&candidates, 10, 5);
        assert_eq!(accepted.len(), 5);
        assert_eq!(accepted[0], "User is allergic to peanuts");
        assert!(!accepted.iter().any(|m| m.starts_with("today")));
        assert!(!accepted.iter().any(|m| m.starts_with("sometimes")));
    }

    #[test]
    fn test_infer_category() {
        assert_eq!(infer_category("User prefers tea over coffee"), MemoryCategory::Preference);
        assert_eq!(infer_category("User plans to run a marathon"), MemoryCategory::Goal);
        assert_eq!(infer_category("User's sister is a doctor"), MemoryCategory::Relationship);
        assert_eq!(infer_category("User works at a bank"), MemoryCategory::Fact);
        assert_eq!(infer_category("User meditates every day"), MemoryCategory::Habit);
        assert_eq!(infer_category("User owns a red bicycle"), MemoryCategory::General);
        assert_eq!(infer_category("유저는 고양이를 좋아함"), MemoryCategory::Preference);
    }

    #[test]
    fn test_memory_priority() {
        assert_eq!(memory_priority("User always takes the stairs"), 9);
        assert_eq!(memory_priority("User loves hiking"), 9);
        assert_eq!(memory_priority("User owns a red bicycle"), 7);
    }
}
