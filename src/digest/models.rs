//! Data models for session digests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress marker over the session's message log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestCursor {
    /// Messages before this index have been digested
    pub last_processed_index: usize,
    pub last_digest_time: Option<DateTime<Utc>>,
}

/// Half-open range of message indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRange {
    pub from: usize,
    pub to: usize,
}

impl MessageRange {
    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What one chunk yields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub summary: String,
    #[serde(default)]
    pub memories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Memory category, inferred from wording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Preference,
    Goal,
    Relationship,
    Fact,
    Habit,
    General,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Preference => "preference",
            MemoryCategory::Goal => "goal",
            MemoryCategory::Relationship => "relationship",
            MemoryCategory::Fact => "fact",
            MemoryCategory::Habit => "habit",
            MemoryCategory::General => "general",
        }
    }
}

/// A durable fact about the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub id: String,
    pub text: String,
    pub category: MemoryCategory,
    /// 9 for permanent wording, 7 otherwise
    pub priority: u8,
    /// Where the memory came from, e.g. `digest:<session>:<from>-<to>`
    pub provenance: String,
    pub created_at: DateTime<Utc>,
}

impl ExtractedMemory {
    pub fn new(
        text: impl Into<String>,
        category: MemoryCategory,
        priority: u8,
        provenance: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            category,
            priority,
            provenance: provenance.into(),
            created_at: Utc::now(),
        }
    }
}

/// Persisted result of one digest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDigest {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message_range: MessageRange,
    /// Rolling summary of the whole session so far
    pub summary: String,
    /// Memories accepted by this run
    #[serde(default)]
    pub memories: Vec<ExtractedMemory>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    pub chunk_count: usize,
    pub processing_ms: u64,
}

/// Outcome of a digest run. Skips and failures are values, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum DigestOutcome {
    Completed(SessionDigest),
    /// Another run was in progress or nothing was pending
    Skipped { reason: String },
    /// The run failed; the cursor did not move
    Failed { error: String },
}

impl DigestOutcome {
    pub fn digest(&self) -> Option<&SessionDigest> {
        match self {
            DigestOutcome::Completed(digest) => Some(digest),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DigestOutcome::Completed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DigestOutcome::Skipped { .. })
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            DigestOutcome::Completed(_) => "completed",
            DigestOutcome::Skipped { .. } => "skipped",
            DigestOutcome::Failed { .. } => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len() {
        let range = MessageRange { from: 5, to: 30 };
        assert_eq!(range.len(), 25);
        assert!(MessageRange { from: 3, to: 3 }.is_empty());
    }

    #[test]
    fn test_digest_json_shape() {
        let digest = SessionDigest {
            id: "d1".to_string(),
            session_id: "main".to_string(),
            timestamp: Utc::now(),
            message_range: MessageRange { from: 0, to: 25 },
            summary: "Planned the release.".to_string(),
            memories: vec![ExtractedMemory::new(
                "User prefers dark roast coffee",
                MemoryCategory::Preference,
                7,
                "digest:main:0-25",
            )],
            keywords: vec!["release".to_string()],
            actions: vec![],
            chunk_count: 3,
            processing_ms: 12,
        };
        let json = serde_json::to_value(&digest).unwrap();
        assert_eq!(json["message_range"]["to"], 25);
        assert_eq!(json["memories"][0]["category"], "preference");
    }
}
