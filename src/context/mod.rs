//! Context management with token budget enforcement
//!
//! Leaf-first: token estimation and model limits feed usage analysis, which
//! drives eviction planning and compression. The safeguard guards ingestion
//! in real time; the managed tokenizer bounds backend cache growth.

pub mod archive;
pub mod compressor;
pub mod keywords;
pub mod managed_tokenizer;
pub mod model_limits;
pub mod models;
pub mod safeguard;
pub mod selector;
pub mod summarizer;
pub mod token_estimator;
pub mod usage;

pub use archive::{ArchiveHandle, ArchiveMetadata, ArchiveStore, InMemoryArchive};
pub use compressor::{
    AutoCompressCheck, CompressOptions, CompressionResult, CompressionStats, CompressorConfig,
    ContextCompressor, SessionDuration, SessionSummary,
};
pub use keywords::extract_keywords;
pub use managed_tokenizer::{EstimatorFactory, ManagedTokenizer, ResetPolicy, TokenizerStatus};
pub use model_limits::{ModelLimitRegistry, DEFAULT_CONTEXT_LIMIT};
pub use models::{Content, ContentPart, Message, MessageFlags, Role};
pub use safeguard::{
    AddOutcome, EmergencyOutcome, EmergencyReport, MessageValidation, SafeguardConfig,
    SafeguardStatus, SafetyLevel, TokenSafeguard,
};
pub use selector::{
    CompressionPlan, CompressionSelector, Disposition, PlannedMessage, RoleWeights, SelectionPolicy,
    PROTECTED_PRIORITY,
};
pub use summarizer::{
    GenerationConfig, GeneratorSummarizer, RuleBasedSummarizer, Summarizer, TextGenerator,
};
pub use token_estimator::{
    vision_tokens, CountingConfig, HeuristicEstimator, TiktokenEstimator, TokenCounter,
    TokenEstimator,
};
pub use usage::{UsageAnalyzer, UsageSnapshot, UsageStatus, UsageThresholds};
