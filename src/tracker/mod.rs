//! Usage tracking and aggregate statistics.
//!
//! [`UsageTracker`] is the orchestration point: adapters report completed
//! calls here, the tracker resolves a price through the [`ConfigManager`],
//! computes the cost once, and appends exactly one immutable record to the
//! store. Aggregate queries group costs per currency; incompatible
//! currencies are never summed together.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

use crate::config::{ConfigManager, Currency};
use crate::cost::CostCalculator;
use crate::error::{Result, TallyError};
use crate::storage::store::{CostBasis, NewUsageRecord, UsageRecord, UsageStore};

/// What to do when no price entry resolves for a tracked call.
///
/// The adapter layer owns this policy decision; the tracker only enforces
/// that an unpriced record is explicitly marked, never silently zero-cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingPricePolicy {
    /// Fail the call with `PriceNotFound`; nothing is recorded.
    #[default]
    Reject,
    /// Record the usage with an unknown cost basis.
    RecordUnknown,
}

/// Aggregated token counts and per-currency cost for one grouping key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageBreakdown {
    pub record_count: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost subtotal per currency. Unpriced records contribute tokens and
    /// counts but no cost.
    pub cost_by_currency: BTreeMap<Currency, f64>,
}

impl UsageBreakdown {
    fn add(&mut self, record: &UsageRecord) {
        self.record_count += 1;
        self.input_tokens += record.input_tokens;
        self.output_tokens += record.output_tokens;
        if let (Some(cost), Some(currency)) = (record.cost, record.currency) {
            *self.cost_by_currency.entry(currency).or_insert(0.0) += cost;
        }
    }
}

/// Aggregate usage statistics over a time window.
#[derive(Debug, Clone, Default)]
pub struct UsageStatistics {
    /// Records inside the window.
    pub record_count: usize,
    /// Records inside the window whose cost is unknown.
    pub unpriced_count: usize,
    /// Total cost per currency. Multiple entries mean the window spans
    /// currencies; consumers must present them separately.
    pub total_cost: BTreeMap<Currency, f64>,
    pub by_provider: BTreeMap<String, UsageBreakdown>,
    pub by_session: BTreeMap<String, UsageBreakdown>,
}

impl UsageStatistics {
    /// The single (cost, currency) total, when the window is homogeneous.
    ///
    /// # Errors
    /// Returns `MixedCurrencyAggregation` when more than one currency is
    /// present; callers must then fall back to [`Self::total_cost`].
    pub fn single_currency_total(&self) -> Result<(f64, Currency)> {
        match self.total_cost.len() {
            0 => Ok((0.0, Currency::Usd)),
            1 => {
                let (currency, amount) = self.total_cost.iter().next().expect("len checked");
                Ok((*amount, *currency))
            }
            count => Err(TallyError::MixedCurrencyAggregation {
                count,
                currencies: self
                    .total_cost
                    .keys()
                    .map(Currency::code)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

/// Orchestrates usage tracking between adapters, pricing, and the store.
///
/// Share behind an `Arc`. Appends from concurrent callers serialize through
/// a dedicated writer connection, so each call produces exactly one atomic
/// append; statistics queries run on a separate read-only connection (the
/// database is in WAL mode), so a table scan never blocks a writer for
/// longer than its own single append.
pub struct UsageTracker {
    config: Arc<ConfigManager>,
    writer: Mutex<UsageStore>,
    reader: Mutex<UsageStore>,
}

impl UsageTracker {
    /// Open a tracker over the usage database at `db_path`.
    ///
    /// Opens the writer connection first (creating the database and running
    /// migrations), then the read-only query connection.
    ///
    /// # Errors
    /// Returns an error if either connection cannot be opened.
    pub fn open(config: Arc<ConfigManager>, db_path: &Path) -> Result<Self> {
        let writer = UsageStore::open(db_path)?;
        let reader = UsageStore::open_read_only(db_path)?;
        Ok(Self {
            config,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    /// Record one completed call, pricing it with the entry resolved at
    /// this instant. Later price changes never alter the stored record.
    ///
    /// At-most-once per call: no implicit retry or dedup; the caller is
    /// responsible for not double-reporting the same LLM call.
    ///
    /// # Errors
    /// Returns `PriceNotFound` when no price resolves (nothing is recorded)
    /// and `StoreWriteFailure` when the append is rejected.
    pub fn track_usage(
        &self,
        provider: &str,
        model_name: &str,
        input_tokens: u64,
        output_tokens: u64,
        session_id: &str,
    ) -> Result<UsageRecord> {
        self.track_usage_with_policy(
            provider,
            model_name,
            input_tokens,
            output_tokens,
            session_id,
            MissingPricePolicy::Reject,
        )
    }

    /// Like [`Self::track_usage`], with an explicit missing-price policy.
    ///
    /// # Errors
    /// Under `Reject`, returns `PriceNotFound` when no price resolves.
    /// Under `RecordUnknown`, the record is appended with
    /// [`CostBasis::Unknown`] instead.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn track_usage_with_policy(
        &self,
        provider: &str,
        model_name: &str,
        input_tokens: u64,
        output_tokens: u64,
        session_id: &str,
        policy: MissingPricePolicy,
    ) -> Result<UsageRecord> {
        let (cost, currency, cost_basis) = match self.config.resolve_price(provider, model_name) {
            Ok(price) => {
                let cost = CostCalculator::compute(input_tokens, output_tokens, &price);
                (Some(cost.amount), Some(cost.currency), CostBasis::Priced)
            }
            Err(err @ TallyError::PriceNotFound { .. }) => match policy {
                MissingPricePolicy::Reject => return Err(err),
                MissingPricePolicy::RecordUnknown => {
                    tracing::warn!(provider, model_name, "no price entry, recording cost-unknown");
                    (None, None, CostBasis::Unknown)
                }
            },
            Err(err) => return Err(err),
        };

        let record = NewUsageRecord {
            provider: provider.to_string(),
            model_name: model_name.to_string(),
            input_tokens,
            output_tokens,
            cost,
            currency,
            cost_basis,
            session_id: session_id.to_string(),
            recorded_at: Utc::now(),
        };

        let store = self.writer.lock().expect("store lock poisoned");
        let stored = store.append(&record).inspect_err(|err| {
            // The event is lost; log it here for manual reconciliation.
            tracing::error!(
                provider,
                model_name,
                input_tokens,
                output_tokens,
                session_id,
                %err,
                "usage event dropped: store rejected append"
            );
        })?;

        tracing::debug!(
            provider,
            model_name,
            id = stored.id,
            cost = ?stored.cost,
            "usage recorded"
        );
        Ok(stored)
    }

    /// Aggregate statistics over records with `recorded_at >= now - days`.
    ///
    /// `days = 0` yields an empty window. Costs are grouped per currency;
    /// cross-currency totals are never produced here. The scan runs on the
    /// read-only connection and does not block concurrent appends.
    ///
    /// # Errors
    /// Returns `StoreReadFailure` if the query fails.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn get_usage_statistics(&self, days: i64) -> Result<UsageStatistics> {
        let cutoff = Utc::now() - Duration::days(days.max(0));
        let records = if days <= 0 {
            // Window of zero days contains nothing by definition.
            Vec::new()
        } else {
            let store = self.reader.lock().expect("store lock poisoned");
            store.records_since(cutoff)?
        };

        let mut stats = UsageStatistics::default();
        for record in &records {
            stats.record_count += 1;
            if record.cost_basis == CostBasis::Unknown {
                stats.unpriced_count += 1;
            }
            if let (Some(cost), Some(currency)) = (record.cost, record.currency) {
                *stats.total_cost.entry(currency).or_insert(0.0) += cost;
            }
            stats
                .by_provider
                .entry(record.provider.clone())
                .or_default()
                .add(record);
            stats
                .by_session
                .entry(record.session_id.clone())
                .or_default()
                .add(record);
        }

        Ok(stats)
    }

    /// Records for one session, oldest first.
    ///
    /// # Errors
    /// Returns `StoreReadFailure` if the query fails.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn session_records(&self, session_id: &str) -> Result<Vec<UsageRecord>> {
        let store = self.reader.lock().expect("store lock poisoned");
        store.records_for_session(session_id)
    }

    /// The configuration manager backing this tracker.
    #[must_use]
    pub fn config(&self) -> &ConfigManager {
        &self.config
    }
}
