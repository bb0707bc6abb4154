//! Session digests: periodic summaries and durable memory extraction
//!
//! Runs off the critical path. Unprocessed messages are chunked, each chunk
//! is summarized (generator first, rule-based fallback), chunk summaries are
//! merged into a rolling session summary, and filtered memory candidates are
//! saved to the host's memory store.

pub mod extract;
pub mod models;
pub mod pipeline;
pub mod store;

pub use extract::{
    extract_structured, filter_memories, infer_category, memory_priority, rule_based_chunk,
};
pub use models::{
    ChunkResult, DigestCursor, DigestOutcome, ExtractedMemory, MemoryCategory, MessageRange,
    SessionDigest,
};
pub use pipeline::{split_into_chunks, DigestConfig, SessionDigestPipeline};
pub use store::{DigestLog, FileDigestLog, InMemoryDigestLog, InMemoryMemoryStore, MemoryStore};
