//! Persistence seams for the digest pipeline
//!
//! The memory store and digest log are implemented by the host. File and
//! in-memory implementations are provided for embedding and tests.

use super::models::{ExtractedMemory, SessionDigest};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Store of durable user memories
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// True if an active memory with exactly this text exists
    async fn exists(&self, text: &str) -> anyhow::Result<bool>;

    async fn create(&self, memory: &ExtractedMemory) -> anyhow::Result<()>;

    /// Active memories, highest priority first
    async fn list_active(&self, limit: usize) -> anyhow::Result<Vec<ExtractedMemory>>;
}

/// Append-only log of digests
#[async_trait]
pub trait DigestLog: Send + Sync {
    async fn append(&self, digest: &SessionDigest) -> anyhow::Result<()>;

    /// Up to `max_items` digests, newest first
    async fn recent(&self, max_items: usize) -> anyhow::Result<Vec<SessionDigest>>;
}

/// Process-local memory store
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    memories: RwLock<Vec<ExtractedMemory>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ExtractedMemory> {
        self.memories.read().await.clone()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn exists(&self, text: &str) -> anyhow::Result<bool> {
        Ok(self.memories.read().await.iter().any(|m| m.text == text))
    }

    async fn create(&self, memory: &ExtractedMemory) -> anyhow::Result<()> {
        self.memories.write().await.push(memory.clone());
        Ok(())
    }

    async fn list_active(&self, limit: usize) -> anyhow::Result<Vec<ExtractedMemory>> {
        let mut memories = self.memories.read().await.clone();
        memories.sort_by(|a, b| b.priority.cmp(&a.priority));
        memories.truncate(limit);
        Ok(memories)
    }
}

/// Process-local digest log
#[derive(Debug, Default)]
pub struct InMemoryDigestLog {
    digests: RwLock<Vec<SessionDigest>>,
}

impl InMemoryDigestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.digests.read().await.len()
    }
}

#[async_trait]
impl DigestLog for InMemoryDigestLog {
    async fn append(&self, digest: &SessionDigest) -> anyhow::Result<()> {
        self.digests.write().await.push(digest.clone());
        Ok(())
    }

    async fn recent(&self, max_items: usize) -> anyhow::Result<Vec<SessionDigest>> {
        Ok(self
            .digests
            .read()
            .await
            .iter()
            .rev()
            .take(max_items)
            .cloned()
            .collect())
    }
}

/// JSON Lines log, one file per UTC day: `<dir>/YYYY-MM-DD.jsonl`
#[derive(Debug, Clone)]
pub struct FileDigestLog {
    dir: PathBuf,
    max_day_files: usize,
}

impl FileDigestLog {
    /// Reads back at most this many day-files
    pub const DEFAULT_MAX_DAY_FILES: usize = 7;

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_day_files: Self::DEFAULT_MAX_DAY_FILES,
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn day_file(&self, digest: &SessionDigest) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", digest.timestamp.format("%Y-%m-%d")))
    }

    /// Day-files, newest first
    async fn day_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        files.sort();
        files.reverse();
        files.truncate(self.max_day_files);
        Ok(files)
    }
}

#[async_trait]
impl DigestLog for FileDigestLog {
    async fn append(&self, digest: &SessionDigest) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.day_file(digest);

        let mut line = serde_json::to_string(digest)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("Appended digest {} to {}", digest.id, path.display());
        Ok(())
    }

    async fn recent(&self, max_items: usize) -> anyhow::Result<Vec<SessionDigest>> {
        let mut digests = Vec::new();

        for path in self.day_files().await? {
            if digests.len() >= max_items {
                break;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            for line in content.lines().rev().filter(|l| !l.trim().is_empty()) {
                if digests.len() >= max_items {
                    break;
                }
                match serde_json::from_str::<SessionDigest>(line) {
                    Ok(digest) => digests.push(digest),
                    Err(e) => warn!("Skipping unreadable digest line in {}: {}", path.display(), e),
                }
            }
        }

        Ok(digests)
    }
}
