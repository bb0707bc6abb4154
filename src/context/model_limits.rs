//! Model id to context window lookup

use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Used when nothing matches. Kept high so a forgotten registration never
/// produces a false "over limit".
pub const DEFAULT_CONTEXT_LIMIT: usize = 100_000;

const BUILTIN_LIMITS: &[(&str, usize)] = &[
    // Anthropic
    ("claude-3-5-sonnet-20241022", 200_000),
    ("claude-3-5-haiku-20241022", 200_000),
    ("claude-3-opus-20240229", 200_000),
    ("claude-3-sonnet-20240229", 200_000),
    ("claude-3-haiku-20240307", 200_000),
    ("claude-sonnet-4-20250514", 200_000),
    ("claude-opus-4-20250514", 200_000),
    // OpenAI
    ("gpt-4", 8_192),
    ("gpt-4-32k", 32_768),
    ("gpt-4-turbo", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-3.5-turbo", 16_385),
    ("gpt-3.5-turbo-16k", 16_385),
    // Google
    ("gemini-pro", 32_768),
    ("gemini-1.5-pro", 1_000_000),
    ("gemini-1.5-flash", 1_000_000),
    ("gemini-2.0-flash", 1_000_000),
    ("gemini-2.5-flash", 1_000_000),
    ("gemini-2.5-pro", 1_000_000),
    // xAI
    ("grok-3", 131_072),
    ("grok-3-mini", 131_072),
];

/// Family fallbacks, checked in order against the lowercased id
const FAMILY_LIMITS: &[(&str, usize)] = &[
    ("claude", 200_000),
    ("gemini", 1_000_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3", 16_385),
    ("grok", 131_072),
    ("llama", 32_768),
    ("mistral", 32_768),
];

/// Context capacity registry
#[derive(Debug, Clone)]
pub struct ModelLimitRegistry {
    limits: IndexMap<String, usize>,
    default_limit: usize,
}

impl Default for ModelLimitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLimitRegistry {
    /// Registry seeded with the built-in table
    pub fn new() -> Self {
        let limits = BUILTIN_LIMITS
            .iter()
            .map(|(id, limit)| (id.to_string(), *limit))
            .collect();
        Self {
            limits,
            default_limit: DEFAULT_CONTEXT_LIMIT,
        }
    }

    /// Built-in table plus overrides (overrides win)
    pub fn with_overrides(overrides: &HashMap<String, usize>) -> Self {
        let mut registry = Self::new();
        for (id, limit) in overrides {
            registry.register(id.clone(), *limit);
        }
        registry
    }

    pub fn register(&mut self, model_id: impl Into<String>, limit: usize) {
        self.limits.insert(model_id.into(), limit);
    }

    pub fn set_default_limit(&mut self, limit: usize) {
        self.default_limit = limit;
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Resolve the context window for a model id.
    ///
    /// Exact match, then the longest registered id contained in `model_id`,
    /// then family heuristics, then the default.
    pub fn get_limit(&self, model_id: &str) -> usize {
        if model_id.is_empty() || model_id == "default" {
            return self.default_limit;
        }

        if let Some(limit) = self.limits.get(model_id) {
            return *limit;
        }

        let partial = self
            .limits
            .iter()
            .filter(|(key, _)| model_id.contains(key.as_str()))
            .max_by_key(|(key, _)| key.len());
        if let Some((key, limit)) = partial {
            debug!("Model {} matched registered id {}", model_id, key);
            return *limit;
        }

        let lower = model_id.to_lowercase();
        if let Some((family, limit)) = FAMILY_LIMITS
            .iter()
            .find(|(family, _)| lower.contains(family))
        {
            debug!("Model {} matched family {}", model_id, family);
            return *limit;
        }

        warn!("Unknown model \"{}\", using default limit {}", model_id, self.default_limit);
        self.default_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let registry = ModelLimitRegistry::new();
        assert_eq!(registry.get_limit("gpt-4"), 8_192);
        assert_eq!(registry.get_limit("gemini-2.5-pro"), 1_000_000);
    }

    #[test]
    fn test_partial_match_prefers_longest_key() {
        let registry = ModelLimitRegistry::new();
        assert_eq!(registry.get_limit("gpt-4o-mini-2024-07-18"), 128_000);
        assert_eq!(registry.get_limit("openai/gpt-4-32k-0613"), 32_768);
    }

    #[test]
    fn test_family_heuristics() {
        let registry = ModelLimitRegistry::new();
        assert_eq!(registry.get_limit("claude-haiku-4-5"), 200_000);
        assert_eq!(registry.get_limit("Llama-3.1-70B"), 32_768);
        assert_eq!(registry.get_limit("grok-beta"), 131_072);
    }

    #[test]
    fn test_unknown_model_gets_generous_default() {
        let registry = ModelLimitRegistry::new();
        assert_eq!(registry.get_limit("totally-new-model"), DEFAULT_CONTEXT_LIMIT);
        assert_eq!(registry.get_limit(""), DEFAULT_CONTEXT_LIMIT);
    }

    #[test]
    fn test_overrides_win() {
        let mut overrides = HashMap::new();
        overrides.insert("gpt-4".to_string(), 16_000);
        overrides.insert("local-qwen".to_string(), 32_000);
        let registry = ModelLimitRegistry::with_overrides(&overrides);
        assert_eq!(registry.get_limit("gpt-4"), 16_000);
        assert_eq!(registry.get_limit("local-qwen"), 32_000);
    }
}
