//! Test utilities for tally.
//!
//! Shared helpers, test data factories, and assertion macros for use
//! across unit and integration tests. Gated behind the `test-utils`
//! feature.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tally::test_utils::*;
//!
//! let entry = make_test_price_entry("deepseek", "deepseek-chat");
//! let dir = TestDir::new();
//! dir.create_file("models.json", "[]");
//! ```

use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::config::{Currency, ModelConfig, PriceEntry};
use crate::storage::store::{CostBasis, NewUsageRecord};

// =============================================================================
// Test Data Factories
// =============================================================================

/// Create a test `ModelConfig` with an api key set and sensible defaults.
#[must_use]
pub fn make_test_model_config(provider: &str, model_name: &str) -> ModelConfig {
    ModelConfig {
        provider: provider.to_string(),
        model_name: model_name.to_string(),
        api_key: "sk-test-key".to_string(),
        base_url: "https://api.example.com".to_string(),
        max_tokens: 4000,
        temperature: 0.7,
        enabled: true,
    }
}

/// Create a test `PriceEntry` with DeepSeek-style CNY pricing.
#[must_use]
pub fn make_test_price_entry(provider: &str, model_name: &str) -> PriceEntry {
    PriceEntry {
        provider: provider.to_string(),
        model_name: model_name.to_string(),
        input_price_per_1k: 0.001,
        output_price_per_1k: 0.002,
        currency: Currency::Cny,
    }
}

/// Create a test `PriceEntry` in an explicit currency.
#[must_use]
pub fn make_test_price_entry_in(
    provider: &str,
    model_name: &str,
    currency: Currency,
) -> PriceEntry {
    PriceEntry {
        currency,
        ..make_test_price_entry(provider, model_name)
    }
}

/// Create a priced test `NewUsageRecord` stamped with the current instant.
#[must_use]
pub fn make_test_usage_record(provider: &str, session_id: &str) -> NewUsageRecord {
    NewUsageRecord {
        provider: provider.to_string(),
        model_name: format!("{provider}-model"),
        input_tokens: 100,
        output_tokens: 200,
        cost: Some(0.0005),
        currency: Some(Currency::Cny),
        cost_basis: CostBasis::Priced,
        session_id: session_id.to_string(),
        recorded_at: Utc::now(),
    }
}

// =============================================================================
// Temp Directory Utilities
// =============================================================================

/// A temporary directory for tests with automatic cleanup.
///
/// Creates an isolated directory that is automatically deleted when
/// the `TestDir` is dropped. Uses the `tempfile` crate internally.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// Create a new isolated temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file in the temporary directory with the given content.
    ///
    /// Creates parent directories as needed.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }

        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
    }

    /// Create a subdirectory in the temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    pub fn create_dir(&self, name: &str) {
        let path = self.inner.path().join(name);
        fs::create_dir_all(&path).expect("Failed to create test directory");
    }

    /// Read a file from the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        let path = self.inner.path().join(name);
        fs::read_to_string(path)
    }

    /// Check if a file exists in the temporary directory.
    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.path().join(name).exists()
    }

    /// Get the full path to a file in the temporary directory.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert approximate floating point equality.
///
/// # Examples
///
/// ```rust,ignore
/// use tally::assert_float_eq;
///
/// assert_float_eq!(0.0005, 0.00050000001);
/// assert_float_eq!(0.1 + 0.2, 0.3, 0.001); // Custom epsilon
/// ```
#[macro_export]
macro_rules! assert_float_eq {
    ($left:expr, $right:expr) => {
        let left: f64 = $left;
        let right: f64 = $right;
        let epsilon: f64 = f64::EPSILON * 100.0;
        assert!(
            (left - right).abs() < epsilon,
            "Float equality assertion failed: {} != {} (epsilon: {})",
            left,
            right,
            epsilon
        );
    };
    ($left:expr, $right:expr, $epsilon:expr) => {
        let left: f64 = $left;
        let right: f64 = $right;
        let epsilon: f64 = $epsilon;
        assert!(
            (left - right).abs() < epsilon,
            "Float equality assertion failed: {} != {} (epsilon: {})",
            left,
            right,
            epsilon
        );
    };
}

/// Assert that a string is valid JSON.
#[macro_export]
macro_rules! assert_json_valid {
    ($json:expr) => {
        let json = $json;
        match serde_json::from_str::<serde_json::Value>(json) {
            Ok(_) => {}
            Err(e) => {
                panic!(
                    "Expected valid JSON, but parsing failed: {}\n\nJSON string:\n{}",
                    e, json
                );
            }
        }
    };
}

// =============================================================================
// Tests for Test Utilities
// =============================================================================
