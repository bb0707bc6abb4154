//! Best-effort archive of evicted messages

use super::models::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Describes an archived slice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub kind: String,
    pub archived_at: DateTime<Utc>,
    pub message_count: usize,
    pub model_id: String,
}

impl ArchiveMetadata {
    pub fn compressed_backup(message_count: usize, model_id: &str) -> Self {
        Self {
            kind: "compressed_backup".to_string(),
            archived_at: Utc::now(),
            message_count,
            model_id: model_id.to_string(),
        }
    }
}

/// Reference to an archived slice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHandle {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Storage for evicted originals
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn save(
        &self,
        messages: &[Message],
        metadata: &ArchiveMetadata,
    ) -> anyhow::Result<ArchiveHandle>;

    async fn load(&self, handle: &ArchiveHandle) -> anyhow::Result<Vec<Message>>;
}

/// Process-local archive
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    entries: Mutex<HashMap<String, (ArchiveMetadata, Vec<Message>)>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchive {
    async fn save(
        &self,
        messages: &[Message],
        metadata: &ArchiveMetadata,
    ) -> anyhow::Result<ArchiveHandle> {
        let id = format!("compressed_{}", uuid::Uuid::new_v4());
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("archive lock poisoned"))?;
        entries.insert(id.clone(), (metadata.clone(), messages.to_vec()));
        Ok(ArchiveHandle { id, location: None })
    }

    async fn load(&self, handle: &ArchiveHandle) -> anyhow::Result<Vec<Message>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("archive lock poisoned"))?;
        entries
            .get(&handle.id)
            .map(|(_, messages)| messages.clone())
            .ok_or_else(|| anyhow::anyhow!("archive {} not found", handle.id))
    }
}
