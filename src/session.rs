//! Per-session wiring
//!
//! Every component a conversation needs is built here from one [`Settings`]
//! value and the host's collaborators. Nothing is shared between sessions.

use crate::config::{EstimatorBackend, Settings};
use crate::context::archive::ArchiveStore;
use crate::context::compressor::{CompressOptions, CompressionResult, ContextCompressor};
use crate::context::managed_tokenizer::{EstimatorFactory, ManagedTokenizer};
use crate::context::models::Message;
use crate::context::safeguard::TokenSafeguard;
use crate::context::summarizer::{GeneratorSummarizer, TextGenerator};
use crate::context::token_estimator::{
    HeuristicEstimator, TiktokenEstimator, TokenCounter, TokenEstimator,
};
use crate::context::usage::UsageAnalyzer;
use crate::digest::models::DigestOutcome;
use crate::digest::pipeline::SessionDigestPipeline;
use crate::digest::store::{DigestLog, FileDigestLog, InMemoryDigestLog, MemoryStore};
use crate::error::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Host-provided capabilities; every one is optional
#[derive(Clone, Default)]
pub struct Collaborators {
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub archive: Option<Arc<dyn ArchiveStore>>,
    pub memory_store: Option<Arc<dyn MemoryStore>>,
    /// Overrides the log chosen from `storage.digest_dir`
    pub digest_log: Option<Arc<dyn DigestLog>>,
}

fn heuristic() -> Arc<dyn TokenEstimator> {
    Arc::new(HeuristicEstimator::default())
}

fn build_estimator(backend: EstimatorBackend) -> Arc<dyn TokenEstimator> {
    match backend {
        EstimatorBackend::Heuristic => heuristic(),
        EstimatorBackend::Tiktoken => match TiktokenEstimator::new() {
            Ok(estimator) => Arc::new(estimator),
            Err(e) => {
                warn!("tiktoken unavailable, using heuristic estimator: {}", e);
                heuristic()
            }
        },
    }
}

pub struct SessionContext {
    settings: Settings,
    safeguard: TokenSafeguard,
    compressor: ContextCompressor,
    digest: Arc<SessionDigestPipeline>,
    tokenizer: ManagedTokenizer,
}

impl SessionContext {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Result<Self> {
        settings.validate()?;

        let backend = settings.estimator.backend;
        let counter = TokenCounter::new(
            build_estimator(backend),
            settings.estimator.counting.clone(),
        );

        let safeguard = TokenSafeguard::new(settings.safeguard.clone(), counter.clone());

        let analyzer = UsageAnalyzer::new(
            counter.clone(),
            settings.models.registry(),
            settings.usage.clone(),
        );
        let mut compressor = ContextCompressor::new(analyzer, settings.compression.clone());
        if let Some(generator) = &collaborators.generator {
            compressor = compressor.with_summarizer(Arc::new(GeneratorSummarizer::new(
                generator.clone(),
                settings.generation.clone(),
            )));
        }
        if let Some(archive) = &collaborators.archive {
            compressor = compressor.with_archive(archive.clone());
        }

        let log: Arc<dyn DigestLog> =
            match (&collaborators.digest_log, &settings.storage.digest_dir) {
                (Some(log), _) => log.clone(),
                (None, Some(dir)) => Arc::new(FileDigestLog::new(dir.clone())),
                (None, None) => Arc::new(InMemoryDigestLog::new()),
            };
        let mut digest = SessionDigestPipeline::new(settings.digest.clone(), counter, log);
        if let Some(generator) = &collaborators.generator {
            digest = digest.with_generator(generator.clone(), settings.generation.clone());
        }
        if let Some(store) = &collaborators.memory_store {
            digest = digest.with_memory_store(store.clone());
        }

        let factory: EstimatorFactory = Arc::new(move || build_estimator(backend));
        let tokenizer = ManagedTokenizer::new(factory, settings.tokenizer.clone());

        info!(
            "Session {} ready: {:?} estimator, {} token budget, generator {}",
            settings.digest.session_id,
            backend,
            settings.safeguard.max_tokens,
            if collaborators.generator.is_some() { "attached" } else { "absent" }
        );

        Ok(Self {
            settings,
            safeguard,
            compressor,
            digest: Arc::new(digest),
            tokenizer,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn safeguard(&self) -> &TokenSafeguard {
        &self.safeguard
    }

    pub fn safeguard_mut(&mut self) -> &mut TokenSafeguard {
        &mut self.safeguard
    }

    pub fn compressor(&self) -> &ContextCompressor {
        &self.compressor
    }

    pub fn digest(&self) -> &Arc<SessionDigestPipeline> {
        &self.digest
    }

    pub fn tokenizer_mut(&mut self) -> &mut ManagedTokenizer {
        &mut self.tokenizer
    }

    /// Compress the safeguard's log toward the target usage for `model_id`
    pub async fn compress_history(
        &self,
        model_id: &str,
        options: &CompressOptions,
    ) -> CompressionResult {
        self.compressor
            .compress_messages(self.safeguard.messages(), model_id, options)
            .await
    }

    /// Run a digest over `messages` if one is due
    pub async fn digest_if_due(&self, messages: &[Message]) -> Option<DigestOutcome> {
        if !self.digest.should_digest(messages) {
            return None;
        }
        Some(self.digest.run_digest(messages).await)
    }

    /// Start a digest in the background if one is due.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_digest(&self, messages: Vec<Message>) -> Option<JoinHandle<DigestOutcome>> {
        if !self.digest.should_digest(&messages) {
            return None;
        }
        debug!("Spawning background digest over {} messages", messages.len());
        let pipeline = Arc::clone(&self.digest);
        Some(tokio::spawn(async move { pipeline.run_digest(&messages).await }))
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.settings.digest.session_id)
            .field("safeguard", &self.safeguard)
            .field("digest", &self.digest)
            .finish()
    }
}
