//! Context budget management for conversational agents
//!
//! Keeps a conversation inside its model's context window: estimates token
//! cost, guards ingestion against oversized messages, compresses history
//! when usage crosses a threshold, and periodically digests the session into
//! a rolling summary plus durable user memories.

pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod metrics;
pub mod session;
pub mod telemetry;

pub use error::{ContextError, Result, ValidationError};

pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::context::{
        CompressOptions, CompressionResult, Content, ContentPart, ContextCompressor, Message, Role,
        SafetyLevel, TextGenerator, TokenSafeguard, UsageSnapshot, UsageStatus,
    };
    pub use crate::digest::{DigestOutcome, MemoryStore, SessionDigest, SessionDigestPipeline};
    pub use crate::error::{ContextError, Result, ValidationError};
    pub use crate::session::{Collaborators, SessionContext};
}
