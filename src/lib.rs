//! tally - usage/cost tracking for LLM-backed trading agents.
//!
//! Sits between a trading-agent framework and its LLM provider adapters:
//! adapters report completed calls (token counts, provider, model, session),
//! tally prices them against a per-model price table, appends immutable usage
//! records to an append-only store, and answers aggregate cost queries.
//! Alongside the bookkeeping it resolves effective model configuration
//! (override > persisted > environment > built-in default) and manages the
//! artifact namespace for generated reports/logs/cache (path resolution and
//! retention sweeps).

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod cost;
pub mod error;
pub mod logging;
pub mod provider;
pub mod storage;
pub mod sweep;
pub mod tracker;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConfigManager, Currency, ModelConfig, PriceEntry, Settings};
pub use cost::{Cost, CostCalculator};
pub use error::{Result, TallyError};
pub use storage::paths::{ArtifactCategory, DataPaths, PathResolver};
pub use storage::store::{CostBasis, UsageRecord, UsageStore};
pub use sweep::{RetentionSweeper, SweepReport};
pub use tracker::{MissingPricePolicy, UsageStatistics, UsageTracker};
