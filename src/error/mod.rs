//! Error types for tally.
//!
//! Uses `thiserror` for structured error types.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into four main categories:
//! - **Configuration**: missing or invalid model configuration, settings
//!   parse failures, invalid retention values
//! - **Pricing**: no price table entry for a (provider, model) pair
//! - **Storage**: the persistence layer rejected a read or write
//! - **Aggregation**: a statistics query spans incompatible currencies
//!
//! Each error has a stable error code (e.g., `TALLY-C001`) for programmatic
//! handling. Configuration and pricing errors propagate synchronously to the
//! adapter layer, which decides whether to proceed with a degraded
//! (cost-unknown) record or abort; this crate does not make that policy
//! decision. Sweep failures are collected in the sweep report and never
//! surface as whole-operation errors.

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration issues (missing configs, invalid values, parse errors).
    Configuration,
    /// Price table issues (no entry for a model in active use).
    Pricing,
    /// Persistence issues (store rejected a read or write).
    Storage,
    /// Aggregation issues (mixed-currency summation).
    Aggregation,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration error",
            Self::Pricing => "Pricing error",
            Self::Storage => "Storage error",
            Self::Aggregation => "Aggregation error",
            Self::Internal => "Internal error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Main error type for tally operations.
#[derive(Error, Debug)]
pub enum TallyError {
    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// No resolvable configuration for the requested (provider, model) pair.
    ///
    /// Recoverable by the caller supplying an explicit override.
    #[error("no resolvable configuration for {provider}/{model_name}: {reason}")]
    ConfigNotFound {
        provider: String,
        model_name: String,
        reason: String,
    },

    /// Generic configuration error (invalid value, parse failure).
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // Pricing errors (Category: Pricing)
    // ==========================================================================
    /// No price table entry for the (provider, model) pair.
    ///
    /// The caller decides whether to record the usage as cost-unknown or to
    /// reject it; tally never defaults silently to zero cost.
    #[error("no price entry for {provider}/{model_name}")]
    PriceNotFound {
        provider: String,
        model_name: String,
    },

    // ==========================================================================
    // Storage errors (Category: Storage)
    // ==========================================================================
    /// The persistence layer rejected a write.
    ///
    /// The usage event is lost; the boundary logs it for manual
    /// reconciliation.
    #[error("store write failed: {operation}: {message}")]
    StoreWriteFailure {
        operation: String,
        message: String,
    },

    /// The persistence layer rejected a read.
    #[error("store read failed: {operation}: {message}")]
    StoreReadFailure {
        operation: String,
        message: String,
    },

    // ==========================================================================
    // Aggregation errors (Category: Aggregation)
    // ==========================================================================
    /// A statistics query spans multiple currencies.
    ///
    /// Callers must consume per-currency subtotals instead; currencies are
    /// never summed across.
    #[error("cannot sum across {count} currencies: {currencies}")]
    MixedCurrencyAggregation {
        count: usize,
        currencies: String,
    },

    // ==========================================================================
    // I/O errors (Category: Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ==========================================================================
    // Generic wrapper (Category: Internal)
    // ==========================================================================
    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TallyError {
    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigNotFound { .. } | Self::Config(_) => ErrorCategory::Configuration,
            Self::PriceNotFound { .. } => ErrorCategory::Pricing,
            Self::StoreWriteFailure { .. } | Self::StoreReadFailure { .. } => ErrorCategory::Storage,
            Self::MixedCurrencyAggregation { .. } => ErrorCategory::Aggregation,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `TALLY-{category}{number}` where category is:
    /// - C: Configuration
    /// - P: Pricing
    /// - S: Storage
    /// - A: Aggregation
    /// - X: Internal
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "TALLY-C001",
            Self::Config(_) => "TALLY-C002",
            Self::PriceNotFound { .. } => "TALLY-P001",
            Self::StoreWriteFailure { .. } => "TALLY-S001",
            Self::StoreReadFailure { .. } => "TALLY-S002",
            Self::MixedCurrencyAggregation { .. } => "TALLY-A001",
            Self::Io(_) => "TALLY-X001",
            Self::Json(_) => "TALLY-X002",
            Self::Other(_) => "TALLY-X099",
        }
    }

    /// Returns whether the caller can recover by supplying more information.
    ///
    /// `ConfigNotFound` is recoverable with an explicit override;
    /// `PriceNotFound` is recoverable by recording the usage as cost-unknown.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. } | Self::PriceNotFound { .. }
        )
    }

    /// Returns the provider name if this error is provider-specific.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ConfigNotFound { provider, .. } | Self::PriceNotFound { provider, .. } => {
                Some(provider)
            }
            _ => None,
        }
    }
}

/// Result type alias for tally operations.
pub type Result<T> = std::result::Result<T, TallyError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_category_description() {
        assert_eq!(
            ErrorCategory::Configuration.description(),
            "Configuration error"
        );
        assert_eq!(ErrorCategory::Pricing.description(), "Pricing error");
        assert_eq!(ErrorCategory::Storage.description(), "Storage error");
        assert_eq!(
            ErrorCategory::Aggregation.description(),
            "Aggregation error"
        );
        assert_eq!(ErrorCategory::Internal.description(), "Internal error");
    }

    #[test]
    fn configuration_errors_have_correct_category() {
        let err = TallyError::ConfigNotFound {
            provider: "deepseek".to_string(),
            model_name: "deepseek-chat".to_string(),
            reason: "missing api_key".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = TallyError::Config("bad value".to_string());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn pricing_errors_have_correct_category() {
        let err = TallyError::PriceNotFound {
            provider: "deepseek".to_string(),
            model_name: "deepseek-chat".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Pricing);
    }

    #[test]
    fn storage_errors_have_correct_category() {
        let err = TallyError::StoreWriteFailure {
            operation: "append".to_string(),
            message: "disk full".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Storage);
    }

    #[test]
    fn aggregation_errors_have_correct_category() {
        let err = TallyError::MixedCurrencyAggregation {
            count: 2,
            currencies: "CNY, USD".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Aggregation);
    }

    #[test]
    fn internal_errors_have_correct_category() {
        let err = TallyError::Json(serde_json::from_str::<()>("invalid").unwrap_err());
        assert_eq!(err.category(), ErrorCategory::Internal);

        let err = TallyError::Other(anyhow::anyhow!("unexpected"));
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn error_codes_follow_format() {
        let errors: Vec<TallyError> = vec![
            TallyError::ConfigNotFound {
                provider: "test".to_string(),
                model_name: "test".to_string(),
                reason: "test".to_string(),
            },
            TallyError::Config("test".to_string()),
            TallyError::PriceNotFound {
                provider: "test".to_string(),
                model_name: "test".to_string(),
            },
            TallyError::StoreWriteFailure {
                operation: "append".to_string(),
                message: "test".to_string(),
            },
            TallyError::MixedCurrencyAggregation {
                count: 2,
                currencies: "CNY, USD".to_string(),
            },
        ];

        for err in errors {
            let code = err.error_code();
            assert!(
                code.starts_with("TALLY-"),
                "Error code {code} should start with TALLY-"
            );
        }
    }

    #[test]
    fn error_codes_are_unique() {
        use std::collections::HashSet;

        let codes: Vec<&str> = vec![
            TallyError::ConfigNotFound {
                provider: String::new(),
                model_name: String::new(),
                reason: String::new(),
            }
            .error_code(),
            TallyError::Config(String::new()).error_code(),
            TallyError::PriceNotFound {
                provider: String::new(),
                model_name: String::new(),
            }
            .error_code(),
            TallyError::StoreWriteFailure {
                operation: String::new(),
                message: String::new(),
            }
            .error_code(),
            TallyError::StoreReadFailure {
                operation: String::new(),
                message: String::new(),
            }
            .error_code(),
            TallyError::MixedCurrencyAggregation {
                count: 0,
                currencies: String::new(),
            }
            .error_code(),
        ];

        let unique: HashSet<_> = codes.iter().collect();
        assert_eq!(codes.len(), unique.len(), "Error codes should be unique");
    }

    #[test]
    fn recoverable_errors() {
        assert!(
            TallyError::ConfigNotFound {
                provider: "deepseek".to_string(),
                model_name: "deepseek-chat".to_string(),
                reason: "missing api_key".to_string(),
            }
            .is_recoverable()
        );
        assert!(
            TallyError::PriceNotFound {
                provider: "deepseek".to_string(),
                model_name: "deepseek-chat".to_string(),
            }
            .is_recoverable()
        );

        assert!(!TallyError::Config("test".to_string()).is_recoverable());
        assert!(
            !TallyError::StoreWriteFailure {
                operation: "append".to_string(),
                message: "disk full".to_string(),
            }
            .is_recoverable()
        );
    }

    #[test]
    fn provider_extraction() {
        let err = TallyError::PriceNotFound {
            provider: "deepseek".to_string(),
            model_name: "deepseek-chat".to_string(),
        };
        assert_eq!(err.provider(), Some("deepseek"));

        let err = TallyError::Config("test".to_string());
        assert_eq!(err.provider(), None);
    }
}
