//! Model configuration and price table management.
//!
//! ## Precedence
//!
//! Effective configuration for a (provider, model) pair is resolved with the
//! following precedence (highest first):
//! 1. Explicit runtime override passed by the caller
//! 2. Persisted model config (`models.json`)
//! 3. Environment-sourced default (`<PROVIDER>_API_KEY`)
//! 4. Built-in default
//!
//! The persisted sets are loaded once at construction and replaced atomically
//! on save; resolution never re-reads from disk mid-operation. `save_models`
//! and `save_pricing` write a temp file and rename it into place, so
//! concurrent readers observe either the old or the new complete set, never
//! a partial write.

pub mod settings;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};
use crate::provider::api_key_env_var;

pub use settings::Settings;

/// File name for the persisted model config collection.
pub const MODELS_FILE: &str = "models.json";
/// File name for the persisted price table.
pub const PRICING_FILE: &str = "pricing.json";

// =============================================================================
// Currency
// =============================================================================

/// ISO-4217 currency for price entries and usage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "CNY")]
    Cny,
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
}

impl Currency {
    /// ISO-4217 code for this currency.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Cny => "CNY",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }

    /// Parse an ISO-4217 code (case-insensitive).
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_uppercase().as_str() {
            "CNY" => Some(Self::Cny),
            "USD" => Some(Self::Usd),
            "EUR" => Some(Self::Eur),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// =============================================================================
// Model configuration
// =============================================================================

/// Configuration for a single (provider, model) pair.
///
/// Uniquely identified by `(provider, model_name)`; saving a duplicate key
/// overwrites the existing entry.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name (e.g., "deepseek").
    pub provider: String,
    /// Model identifier (e.g., "deepseek-chat").
    pub model_name: String,
    /// API key. Empty means "not configured"; resolution may fill it from
    /// the provider's environment variable.
    pub api_key: String,
    /// API base URL.
    pub base_url: String,
    /// Maximum tokens per completion. Must be > 0.
    pub max_tokens: u32,
    /// Sampling temperature in [0, 1].
    pub temperature: f64,
    /// Whether this model is enabled for use.
    pub enabled: bool,
}

impl ModelConfig {
    /// Composite key for this config.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.provider.clone(), self.model_name.clone())
    }

    /// Validate field constraints.
    ///
    /// # Errors
    /// Returns an error if `max_tokens` is zero or `temperature` is outside
    /// [0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(TallyError::Config(format!(
                "max_tokens must be greater than 0 for {}/{}",
                self.provider, self.model_name
            )));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(TallyError::Config(format!(
                "temperature must be in [0, 1] for {}/{}, got {}",
                self.provider, self.model_name, self.temperature
            )));
        }
        Ok(())
    }
}

// api_key is a secret; keep it out of Debug output.
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field(
                "api_key",
                &if self.api_key.is_empty() {
                    "<unset>"
                } else {
                    "<redacted>"
                },
            )
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Per-model unit pricing used to convert token counts to cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub provider: String,
    pub model_name: String,
    /// Cost per 1000 input tokens. Must be >= 0.
    pub input_price_per_1k: f64,
    /// Cost per 1000 output tokens. Must be >= 0.
    pub output_price_per_1k: f64,
    pub currency: Currency,
}

impl PriceEntry {
    /// Validate field constraints.
    ///
    /// # Errors
    /// Returns an error if either unit price is negative.
    pub fn validate(&self) -> Result<()> {
        if self.input_price_per_1k < 0.0 || self.output_price_per_1k < 0.0 {
            return Err(TallyError::Config(format!(
                "unit prices must be non-negative for {}/{}",
                self.provider, self.model_name
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicit runtime override passed by the caller.
    Override,
    /// Persisted model config.
    Persisted,
    /// Environment variable.
    Env,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Override => write!(f, "runtime override"),
            Self::Env => write!(f, "environment variable"),
            Self::Persisted => write!(f, "persisted config"),
            Self::Default => write!(f, "built-in default"),
        }
    }
}

/// A resolved model configuration plus the source that supplied it.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub config: ModelConfig,
    /// Source of the config body (everything except the api_key).
    pub config_source: ConfigSource,
    /// Source of the api_key specifically, which may differ (e.g., a
    /// persisted config with an empty key filled from the environment).
    pub api_key_source: ConfigSource,
}

/// Partial override for `resolve_with_override`.
///
/// Any field left `None` falls through to the next source in precedence.
#[derive(Debug, Clone, Default)]
pub struct ModelOverride {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl ModelOverride {
    const fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.base_url.is_none()
            && self.max_tokens.is_none()
            && self.temperature.is_none()
    }
}

// =============================================================================
// ConfigManager
// =============================================================================

/// Resolves effective configuration and pricing for (provider, model) pairs.
///
/// Construct once at process start and share behind an `Arc`; all state is
/// interior-mutable behind `RwLock`s. Resolution is read-mostly; saves take
/// the write lock and serialize with each other.
pub struct ConfigManager {
    dir: PathBuf,
    models: RwLock<HashMap<(String, String), ModelConfig>>,
    pricing: RwLock<HashMap<(String, String), PriceEntry>>,
}

impl ConfigManager {
    /// Load persisted state from the given config directory.
    ///
    /// Missing files yield empty persisted sets (built-in defaults still
    /// apply); present-but-invalid files are an error.
    ///
    /// # Errors
    /// Returns an error if `models.json` or `pricing.json` exists but cannot
    /// be read or parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        let models = load_keyed(&dir.join(MODELS_FILE), ModelConfig::key)?;
        let pricing = load_keyed(&dir.join(PRICING_FILE), |p: &PriceEntry| {
            (p.provider.clone(), p.model_name.clone())
        })?;

        tracing::debug!(
            dir = %dir.display(),
            models = models.len(),
            prices = pricing.len(),
            "loaded config manager state"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            models: RwLock::new(models),
            pricing: RwLock::new(pricing),
        })
    }

    /// Resolve effective configuration for a (provider, model) pair.
    ///
    /// # Errors
    /// Returns `ConfigNotFound` when no source supplies a required field
    /// (api_key) and no config body exists for the pair.
    pub fn resolve(&self, provider: &str, model_name: &str) -> Result<ResolvedModel> {
        self.resolve_with_override(provider, model_name, &ModelOverride::default())
    }

    /// Resolve with an explicit runtime override (highest precedence).
    ///
    /// # Errors
    /// Returns `ConfigNotFound` when no source supplies a required field.
    ///
    /// # Panics
    /// Panics if the internal model lock is poisoned.
    pub fn resolve_with_override(
        &self,
        provider: &str,
        model_name: &str,
        overrides: &ModelOverride,
    ) -> Result<ResolvedModel> {
        let key = (provider.to_string(), model_name.to_string());

        let (mut config, config_source) = {
            let models = self.models.read().expect("model lock poisoned");
            if let Some(persisted) = models.get(&key) {
                (persisted.clone(), ConfigSource::Persisted)
            } else if let Some(default) = builtin_model_default(provider, model_name) {
                (default, ConfigSource::Default)
            } else if overrides.is_empty() {
                return Err(TallyError::ConfigNotFound {
                    provider: provider.to_string(),
                    model_name: model_name.to_string(),
                    reason: "no persisted config and no built-in default".to_string(),
                });
            } else {
                // An override alone can stand up a config if it is complete
                // enough; missing fields fall back to conservative defaults.
                (
                    ModelConfig {
                        provider: provider.to_string(),
                        model_name: model_name.to_string(),
                        api_key: String::new(),
                        base_url: String::new(),
                        max_tokens: 4000,
                        temperature: 0.7,
                        enabled: true,
                    },
                    ConfigSource::Override,
                )
            }
        };

        let mut api_key_source = if config.api_key.is_empty() {
            ConfigSource::Default
        } else {
            config_source
        };

        // Environment fills an api_key the lower sources left empty.
        if config.api_key.is_empty() {
            let var = api_key_env_var(provider);
            if let Ok(value) = std::env::var(&var) {
                if !value.trim().is_empty() {
                    config.api_key = value;
                    api_key_source = ConfigSource::Env;
                }
            }
        }

        // Overrides win over everything.
        if let Some(key) = &overrides.api_key {
            config.api_key = key.clone();
            api_key_source = ConfigSource::Override;
        }
        if let Some(url) = &overrides.base_url {
            config.base_url = url.clone();
        }
        if let Some(max_tokens) = overrides.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(temperature) = overrides.temperature {
            config.temperature = temperature;
        }

        if config.api_key.is_empty() {
            return Err(TallyError::ConfigNotFound {
                provider: provider.to_string(),
                model_name: model_name.to_string(),
                reason: format!("api_key not supplied by any source (set {})", api_key_env_var(provider)),
            });
        }

        config.validate()?;

        Ok(ResolvedModel {
            config,
            config_source,
            api_key_source,
        })
    }

    /// Resolve the price entry for a (provider, model) pair.
    ///
    /// Persisted pricing wins over the built-in table.
    ///
    /// # Errors
    /// Returns `PriceNotFound` when neither the persisted nor the built-in
    /// table has an entry.
    ///
    /// # Panics
    /// Panics if the internal pricing lock is poisoned.
    pub fn resolve_price(&self, provider: &str, model_name: &str) -> Result<PriceEntry> {
        let key = (provider.to_string(), model_name.to_string());
        let pricing = self.pricing.read().expect("pricing lock poisoned");
        if let Some(entry) = pricing.get(&key) {
            return Ok(entry.clone());
        }
        drop(pricing);

        builtin_price_default(provider, model_name).ok_or_else(|| TallyError::PriceNotFound {
            provider: provider.to_string(),
            model_name: model_name.to_string(),
        })
    }

    /// List the persisted model configs.
    ///
    /// # Panics
    /// Panics if the internal model lock is poisoned.
    #[must_use]
    pub fn load_models(&self) -> Vec<ModelConfig> {
        let models = self.models.read().expect("model lock poisoned");
        let mut list: Vec<_> = models.values().cloned().collect();
        list.sort_by(|a, b| a.key().cmp(&b.key()));
        list
    }

    /// List the persisted price entries.
    ///
    /// # Panics
    /// Panics if the internal pricing lock is poisoned.
    #[must_use]
    pub fn load_pricing(&self) -> Vec<PriceEntry> {
        let pricing = self.pricing.read().expect("pricing lock poisoned");
        let mut list: Vec<_> = pricing.values().cloned().collect();
        list.sort_by(|a, b| {
            (a.provider.clone(), a.model_name.clone()).cmp(&(b.provider.clone(), b.model_name.clone()))
        });
        list
    }

    /// Replace the persisted model config set, all-or-nothing.
    ///
    /// Duplicate (provider, model) keys in the input collapse to the last
    /// occurrence. The file is written to a temp path and renamed into
    /// place, then the in-memory set is swapped under the write lock, so a
    /// partial write is never visible.
    ///
    /// # Errors
    /// Returns an error if any entry fails validation or the write fails.
    ///
    /// # Panics
    /// Panics if the internal model lock is poisoned.
    pub fn save_models(&self, list: Vec<ModelConfig>) -> Result<()> {
        for config in &list {
            config.validate()?;
        }

        let mut keyed: HashMap<(String, String), ModelConfig> = HashMap::new();
        for config in list {
            keyed.insert(config.key(), config);
        }

        // Hold the write lock across the file replacement so concurrent
        // savers serialize and memory never disagrees with disk.
        let mut models = self.models.write().expect("model lock poisoned");
        let mut sorted: Vec<_> = keyed.values().cloned().collect();
        sorted.sort_by(|a, b| a.key().cmp(&b.key()));
        write_atomic(&self.dir.join(MODELS_FILE), &sorted)?;
        *models = keyed;

        tracing::info!(count = models.len(), "saved model config set");
        Ok(())
    }

    /// Replace the persisted price table, all-or-nothing.
    ///
    /// # Errors
    /// Returns an error if any entry fails validation or the write fails.
    ///
    /// # Panics
    /// Panics if the internal pricing lock is poisoned.
    pub fn save_pricing(&self, list: Vec<PriceEntry>) -> Result<()> {
        for entry in &list {
            entry.validate()?;
        }

        let mut keyed: HashMap<(String, String), PriceEntry> = HashMap::new();
        for entry in list {
            keyed.insert((entry.provider.clone(), entry.model_name.clone()), entry);
        }

        let mut pricing = self.pricing.write().expect("pricing lock poisoned");
        let mut sorted: Vec<_> = keyed.values().cloned().collect();
        sorted.sort_by(|a, b| {
            (a.provider.clone(), a.model_name.clone()).cmp(&(b.provider.clone(), b.model_name.clone()))
        });
        write_atomic(&self.dir.join(PRICING_FILE), &sorted)?;
        *pricing = keyed;

        tracing::info!(count = pricing.len(), "saved price table");
        Ok(())
    }

    /// Report, per provider, whether its API-key environment variable is set.
    ///
    /// Pure inspection; the output contains presence booleans only, never
    /// secret values. Covers built-in providers plus any provider with a
    /// persisted config.
    ///
    /// # Panics
    /// Panics if the internal model lock is poisoned.
    #[must_use]
    pub fn get_env_config_status(&self) -> BTreeMap<String, bool> {
        let mut providers: Vec<String> = BUILTIN_PROVIDERS.iter().map(ToString::to_string).collect();
        {
            let models = self.models.read().expect("model lock poisoned");
            providers.extend(models.keys().map(|(provider, _)| provider.clone()));
        }

        providers
            .into_iter()
            .map(|provider| {
                let present = std::env::var(api_key_env_var(&provider))
                    .map(|v| !v.trim().is_empty())
                    .unwrap_or(false);
                (provider, present)
            })
            .collect()
    }

    /// The config directory backing this manager.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// =============================================================================
// Built-in defaults
// =============================================================================

/// Providers with built-in defaults.
pub const BUILTIN_PROVIDERS: &[&str] = &["deepseek", "openai"];

fn builtin_model_default(provider: &str, model_name: &str) -> Option<ModelConfig> {
    let (base_url, known) = match provider {
        "deepseek" => (
            "https://api.deepseek.com",
            matches!(model_name, "deepseek-chat" | "deepseek-coder"),
        ),
        "openai" => (
            "https://api.openai.com/v1",
            matches!(model_name, "gpt-4o" | "gpt-4o-mini"),
        ),
        _ => return None,
    };
    if !known {
        return None;
    }

    Some(ModelConfig {
        provider: provider.to_string(),
        model_name: model_name.to_string(),
        api_key: String::new(),
        base_url: base_url.to_string(),
        max_tokens: 4000,
        temperature: 0.7,
        enabled: true,
    })
}

fn builtin_price_default(provider: &str, model_name: &str) -> Option<PriceEntry> {
    let (input, output, currency) = match (provider, model_name) {
        ("deepseek", "deepseek-chat" | "deepseek-coder") => (0.001, 0.002, Currency::Cny),
        ("openai", "gpt-4o") => (0.0025, 0.01, Currency::Usd),
        ("openai", "gpt-4o-mini") => (0.000_15, 0.0006, Currency::Usd),
        _ => return None,
    };

    Some(PriceEntry {
        provider: provider.to_string(),
        model_name: model_name.to_string(),
        input_price_per_1k: input,
        output_price_per_1k: output,
        currency,
    })
}

// =============================================================================
// Persistence helpers
// =============================================================================

fn load_keyed<T, F>(path: &Path, key: F) -> Result<HashMap<(String, String), T>>
where
    T: for<'de> Deserialize<'de>,
    F: Fn(&T) -> (String, String),
{
    if !path.exists() {
        tracing::debug!(path = %path.display(), "persisted file not found, starting empty");
        return Ok(HashMap::new());
    }

    let content = fs::read_to_string(path)?;
    let list: Vec<T> = serde_json::from_str(&content)?;
    Ok(list.into_iter().map(|item| (key(&item), item)).collect())
}

/// Write JSON to `path` via a temp file + rename, so readers never observe
/// a partial file.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| TallyError::StoreWriteFailure {
        operation: format!("write {}", tmp.display()),
        message: e.to_string(),
    })?;
    fs::rename(&tmp, path).map_err(|e| TallyError::StoreWriteFailure {
        operation: format!("rename into {}", path.display()),
        message: e.to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Helper to safely set an environment variable in tests.
    /// SAFETY: env-mutating tests take a process-wide lock.
    #[allow(unsafe_code)]
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) };
    }

    #[allow(unsafe_code)]
    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn make_config(provider: &str, model: &str, api_key: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model_name: model.to_string(),
            api_key: api_key.to_string(),
            base_url: "https://api.example.com".to_string(),
            max_tokens: 2000,
            temperature: 0.5,
            enabled: true,
        }
    }

    #[test]
    fn currency_codes_round_trip() {
        for currency in [Currency::Cny, Currency::Usd, Currency::Eur] {
            assert_eq!(Currency::from_code(currency.code()), Some(currency));
        }
        assert_eq!(Currency::from_code("usd"), Some(Currency::Usd));
        assert_eq!(Currency::from_code("GBP"), None);
    }

    #[test]
    fn model_config_debug_redacts_api_key() {
        let config = make_config("deepseek", "deepseek-chat", "sk-secret-value");
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("<redacted>"));

        let unset = make_config("deepseek", "deepseek-chat", "");
        assert!(format!("{unset:?}").contains("<unset>"));
    }

    #[test]
    fn model_config_validation() {
        let mut config = make_config("deepseek", "deepseek-chat", "k");
        assert!(config.validate().is_ok());

        config.max_tokens = 0;
        assert!(config.validate().is_err());

        config.max_tokens = 100;
        config.temperature = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_empty_dir_uses_builtins() {
        let _guard = ENV_LOCK.lock().unwrap();
        remove_env("DEEPSEEK_API_KEY");

        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        assert!(manager.load_models().is_empty());

        // Built-in default exists but has no api_key from any source.
        let err = manager.resolve("deepseek", "deepseek-chat").unwrap_err();
        assert!(matches!(err, TallyError::ConfigNotFound { .. }));
    }

    #[test]
    fn resolve_fills_api_key_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_env("DEEPSEEK_API_KEY", "sk-from-env");

        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        let resolved = manager.resolve("deepseek", "deepseek-chat").unwrap();
        assert_eq!(resolved.config.api_key, "sk-from-env");
        assert_eq!(resolved.config.base_url, "https://api.deepseek.com");
        assert_eq!(resolved.config_source, ConfigSource::Default);
        assert_eq!(resolved.api_key_source, ConfigSource::Env);

        remove_env("DEEPSEEK_API_KEY");
    }

    #[test]
    fn resolve_precedence_override_wins() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_env("DEEPSEEK_API_KEY", "sk-from-env");

        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();
        manager
            .save_models(vec![make_config("deepseek", "deepseek-chat", "sk-persisted")])
            .unwrap();

        let overrides = ModelOverride {
            api_key: Some("sk-override".to_string()),
            ..ModelOverride::default()
        };
        let resolved = manager
            .resolve_with_override("deepseek", "deepseek-chat", &overrides)
            .unwrap();

        assert_eq!(resolved.config.api_key, "sk-override");
        assert_eq!(resolved.api_key_source, ConfigSource::Override);
        assert_eq!(resolved.config_source, ConfigSource::Persisted);

        remove_env("DEEPSEEK_API_KEY");
    }

    #[test]
    fn resolve_prefers_persisted_over_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_env("DEEPSEEK_API_KEY", "sk-from-env");

        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();
        manager
            .save_models(vec![make_config("deepseek", "deepseek-chat", "sk-persisted")])
            .unwrap();

        let resolved = manager.resolve("deepseek", "deepseek-chat").unwrap();
        assert_eq!(resolved.config.api_key, "sk-persisted");
        assert_eq!(resolved.api_key_source, ConfigSource::Persisted);

        remove_env("DEEPSEEK_API_KEY");
    }

    #[test]
    fn resolve_unknown_pair_without_override_fails() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        let err = manager.resolve("nobody", "no-model").unwrap_err();
        assert!(matches!(err, TallyError::ConfigNotFound { .. }));
    }

    #[test]
    fn save_models_overwrites_duplicate_keys() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        manager
            .save_models(vec![
                make_config("deepseek", "deepseek-chat", "first"),
                make_config("deepseek", "deepseek-chat", "second"),
            ])
            .unwrap();

        let models = manager.load_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].api_key, "second");
    }

    #[test]
    fn save_models_replaces_whole_set() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        manager
            .save_models(vec![make_config("deepseek", "deepseek-chat", "a")])
            .unwrap();
        manager
            .save_models(vec![make_config("openai", "gpt-4o", "b")])
            .unwrap();

        let models = manager.load_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].provider, "openai");
    }

    #[test]
    fn save_models_persists_across_reload() {
        let dir = tempdir().unwrap();
        {
            let manager = ConfigManager::load(dir.path()).unwrap();
            manager
                .save_models(vec![make_config("deepseek", "deepseek-coder", "k")])
                .unwrap();
        }

        let reloaded = ConfigManager::load(dir.path()).unwrap();
        let models = reloaded.load_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_name, "deepseek-coder");
    }

    #[test]
    fn save_models_rejects_invalid_entry() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        let mut bad = make_config("deepseek", "deepseek-chat", "k");
        bad.max_tokens = 0;
        assert!(manager.save_models(vec![bad]).is_err());

        // Failed save must not leave anything behind.
        assert!(manager.load_models().is_empty());
        assert!(!dir.path().join(MODELS_FILE).exists());
    }

    #[test]
    fn resolve_price_builtin_deepseek() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        let price = manager.resolve_price("deepseek", "deepseek-chat").unwrap();
        assert!((price.input_price_per_1k - 0.001).abs() < f64::EPSILON);
        assert!((price.output_price_per_1k - 0.002).abs() < f64::EPSILON);
        assert_eq!(price.currency, Currency::Cny);
    }

    #[test]
    fn resolve_price_persisted_wins_over_builtin() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        manager
            .save_pricing(vec![PriceEntry {
                provider: "deepseek".to_string(),
                model_name: "deepseek-chat".to_string(),
                input_price_per_1k: 0.005,
                output_price_per_1k: 0.010,
                currency: Currency::Usd,
            }])
            .unwrap();

        let price = manager.resolve_price("deepseek", "deepseek-chat").unwrap();
        assert!((price.input_price_per_1k - 0.005).abs() < f64::EPSILON);
        assert_eq!(price.currency, Currency::Usd);
    }

    #[test]
    fn resolve_price_missing_entry() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        let err = manager.resolve_price("nobody", "no-model").unwrap_err();
        assert!(matches!(err, TallyError::PriceNotFound { .. }));
    }

    #[test]
    fn save_pricing_rejects_negative_price() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        let result = manager.save_pricing(vec![PriceEntry {
            provider: "deepseek".to_string(),
            model_name: "deepseek-chat".to_string(),
            input_price_per_1k: -0.001,
            output_price_per_1k: 0.002,
            currency: Currency::Cny,
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn env_config_status_reports_presence_only() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_env("DEEPSEEK_API_KEY", "sk-secret");
        remove_env("OPENAI_API_KEY");

        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();

        let status = manager.get_env_config_status();
        assert_eq!(status.get("deepseek"), Some(&true));
        assert_eq!(status.get("openai"), Some(&false));

        // Booleans only - no secret leaks through Debug formatting.
        let rendered = format!("{status:?}");
        assert!(!rendered.contains("sk-secret"));

        remove_env("DEEPSEEK_API_KEY");
    }

    #[test]
    fn env_config_status_includes_persisted_providers() {
        let _guard = ENV_LOCK.lock().unwrap();
        remove_env("CUSTOMCORP_API_KEY");

        let dir = tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();
        manager
            .save_models(vec![make_config("customcorp", "cc-1", "k")])
            .unwrap();

        let status = manager.get_env_config_status();
        assert_eq!(status.get("customcorp"), Some(&false));
    }

    #[test]
    fn load_invalid_models_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MODELS_FILE), "not json").unwrap();

        assert!(ConfigManager::load(dir.path()).is_err());
    }
}
