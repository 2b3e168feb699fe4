//! Provider capability seam.
//!
//! LLM adapters are external collaborators; this module defines the narrow
//! interface they implement and the name-keyed registry that selects one.
//! Capability is declared by implementing [`ProviderAdapter`], never by
//! probing an adapter for ad hoc methods.

use std::collections::HashMap;

use crate::config::ModelConfig;
use crate::error::{Result, TallyError};
use crate::storage::store::UsageRecord;
use crate::tracker::UsageTracker;

/// Environment variable that carries a provider's API key.
///
/// `deepseek` -> `DEEPSEEK_API_KEY`. Non-alphanumeric characters in the
/// provider name become underscores.
#[must_use]
pub fn api_key_env_var(provider: &str) -> String {
    let upper: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{upper}_API_KEY")
}

/// A completed LLM call as reported by an adapter.
///
/// Adapters only report calls that actually completed; a call that failed
/// mid-flight produces no usage event.
#[derive(Debug, Clone)]
pub struct CompletedCall {
    pub model_name: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub session_id: String,
}

/// Capabilities every provider adapter exposes to this layer.
pub trait ProviderAdapter: Send + Sync {
    /// The provider tag this adapter serves (e.g., "deepseek").
    fn provider(&self) -> &str;

    /// Report a completed call to the tracker, producing one usage record.
    ///
    /// # Errors
    /// Propagates pricing/storage errors from the tracker.
    fn report_usage(&self, tracker: &UsageTracker, call: &CompletedCall) -> Result<UsageRecord>;

    /// Check that the resolved configuration carries usable credentials.
    ///
    /// # Errors
    /// Returns `ConfigNotFound` when credentials are missing or malformed.
    fn validate_credentials(&self, config: &ModelConfig) -> Result<()>;
}

/// Default adapter for providers without bespoke behavior.
///
/// Reports usage straight through to the tracker and treats any non-empty
/// api_key as valid credentials.
pub struct GenericAdapter {
    provider: String,
}

impl GenericAdapter {
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl ProviderAdapter for GenericAdapter {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn report_usage(&self, tracker: &UsageTracker, call: &CompletedCall) -> Result<UsageRecord> {
        tracker.track_usage(
            &self.provider,
            &call.model_name,
            call.input_tokens,
            call.output_tokens,
            &call.session_id,
        )
    }

    fn validate_credentials(&self, config: &ModelConfig) -> Result<()> {
        if config.api_key.trim().is_empty() {
            return Err(TallyError::ConfigNotFound {
                provider: self.provider.clone(),
                model_name: config.model_name.clone(),
                reason: "empty api_key".to_string(),
            });
        }
        Ok(())
    }
}

/// Name-keyed adapter registry.
///
/// Selection is by provider tag; registering a duplicate tag replaces the
/// previous adapter.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Box<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its provider tag.
    pub fn register(&mut self, adapter: Box<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider().to_string(), adapter);
    }

    /// Look up the adapter for a provider tag.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<&dyn ProviderAdapter> {
        self.adapters.get(provider).map(AsRef::as_ref)
    }

    /// Registered provider tags, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_name_for_simple_provider() {
        assert_eq!(api_key_env_var("deepseek"), "DEEPSEEK_API_KEY");
        assert_eq!(api_key_env_var("openai"), "OPENAI_API_KEY");
    }

    #[test]
    fn env_var_name_sanitizes_punctuation() {
        assert_eq!(api_key_env_var("my-provider"), "MY_PROVIDER_API_KEY");
        assert_eq!(api_key_env_var("a.b"), "A_B_API_KEY");
    }

    #[test]
    fn registry_selects_by_tag() {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(GenericAdapter::new("deepseek")));
        registry.register(Box::new(GenericAdapter::new("openai")));

        assert!(registry.get("deepseek").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.providers(), vec!["deepseek", "openai"]);
    }

    #[test]
    fn registry_duplicate_tag_replaces() {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(GenericAdapter::new("deepseek")));
        registry.register(Box::new(GenericAdapter::new("deepseek")));
        assert_eq!(registry.providers().len(), 1);
    }

    #[test]
    fn generic_adapter_reports_usage_through_tracker() {
        use crate::config::ConfigManager;
        use crate::tracker::UsageTracker;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigManager::load(dir.path()).unwrap());
        let tracker =
            UsageTracker::open(config, &dir.path().join("usage.sqlite")).unwrap();

        let adapter = GenericAdapter::new("deepseek");
        let record = adapter
            .report_usage(
                &tracker,
                &CompletedCall {
                    model_name: "deepseek-chat".to_string(),
                    input_tokens: 100,
                    output_tokens: 200,
                    session_id: "s1".to_string(),
                },
            )
            .unwrap();

        assert_eq!(record.provider, "deepseek");
        assert!((record.cost.unwrap() - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn generic_adapter_rejects_empty_credentials() {
        let adapter = GenericAdapter::new("deepseek");
        let config = ModelConfig {
            provider: "deepseek".to_string(),
            model_name: "deepseek-chat".to_string(),
            api_key: String::new(),
            base_url: "https://api.deepseek.com".to_string(),
            max_tokens: 4000,
            temperature: 0.7,
            enabled: true,
        };

        let err = adapter.validate_credentials(&config).unwrap_err();
        assert!(matches!(err, TallyError::ConfigNotFound { .. }));

        let mut ok = config;
        ok.api_key = "sk-test".to_string();
        assert!(adapter.validate_credentials(&ok).is_ok());
    }
}
