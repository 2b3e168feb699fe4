//! Append-only usage record store.
//!
//! Records are written once at tracking time and never mutated afterwards;
//! the only deletion path is the bulk retention sweep. Each append is a
//! single `SQLite` INSERT, so a record is either fully visible or not at
//! all, and queries see a consistent snapshot of committed appends.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OpenFlags, Row, params};

use crate::config::Currency;
use crate::error::{Result, TallyError};
use crate::storage::schema::run_migrations;

/// Whether a record's cost was computed from a resolved price or is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostBasis {
    /// Cost computed from the price entry resolved at insertion time.
    Priced,
    /// No price resolved; cost is unknown, never assumed zero.
    Unknown,
}

impl CostBasis {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Priced => "priced",
            Self::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        if s == "unknown" { Self::Unknown } else { Self::Priced }
    }
}

/// An immutable usage event.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    /// Store-assigned opaque identifier.
    pub id: i64,
    pub provider: String,
    pub model_name: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Computed cost; `None` when the basis is [`CostBasis::Unknown`].
    pub cost: Option<f64>,
    /// Currency of `cost`; matches the price entry's currency at creation.
    pub currency: Option<Currency>,
    pub cost_basis: CostBasis,
    pub session_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// A usage event ready to be appended (everything but the store-assigned id).
#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub provider: String,
    pub model_name: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<f64>,
    pub currency: Option<Currency>,
    pub cost_basis: CostBasis,
    pub session_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Usage record database access layer.
pub struct UsageStore {
    conn: Connection,
}

impl UsageStore {
    /// Create or open a usage record database at the given path.
    ///
    /// The database is put in WAL mode so a separate read-only connection
    /// (see [`Self::open_read_only`]) can scan it while appends proceed.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or schema migrations fail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)
            .map_err(|e| TallyError::Other(anyhow::anyhow!("open usage db: {e}")))?;

        // journal_mode returns a row, so query it rather than execute it.
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| TallyError::Other(anyhow::anyhow!("enable WAL: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| TallyError::Other(anyhow::anyhow!("set busy timeout: {e}")))?;

        run_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    /// Open a read-only connection to an existing usage record database.
    ///
    /// Pair with a writer from [`Self::open`] on the same path: under WAL,
    /// scans on this connection run concurrently with appends on the writer.
    ///
    /// # Errors
    /// Returns an error if the database does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| TallyError::Other(anyhow::anyhow!("open usage db read-only: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| TallyError::Other(anyhow::anyhow!("set busy timeout: {e}")))?;

        Ok(Self { conn })
    }

    /// Open an in-memory usage record database (for testing).
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| TallyError::Other(anyhow::anyhow!("open in-memory db: {e}")))?;

        run_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    /// Append one usage record. At-most-once per call; no dedup.
    ///
    /// # Errors
    /// Returns `StoreWriteFailure` if the INSERT is rejected. The event is
    /// then lost and the caller logs it at the boundary for reconciliation.
    #[allow(clippy::cast_possible_wrap)]
    pub fn append(&self, record: &NewUsageRecord) -> Result<UsageRecord> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT INTO usage_records ( \
                    provider, model_name, input_tokens, output_tokens, \
                    cost, currency, cost_basis, session_id, recorded_at \
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(|e| TallyError::StoreWriteFailure {
                operation: "prepare append".to_string(),
                message: e.to_string(),
            })?;

        stmt.execute(params![
            record.provider,
            record.model_name,
            record.input_tokens as i64,
            record.output_tokens as i64,
            record.cost,
            record.currency.map(|c| c.code()),
            record.cost_basis.as_str(),
            record.session_id,
            record.recorded_at.to_rfc3339(),
        ])
        .map_err(|e| TallyError::StoreWriteFailure {
            operation: "append usage record".to_string(),
            message: e.to_string(),
        })?;

        Ok(UsageRecord {
            id: self.conn.last_insert_rowid(),
            provider: record.provider.clone(),
            model_name: record.model_name.clone(),
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            cost: record.cost,
            currency: record.currency,
            cost_basis: record.cost_basis,
            session_id: record.session_id.clone(),
            recorded_at: record.recorded_at,
        })
    }

    /// Records with `recorded_at >= cutoff`, oldest first.
    ///
    /// # Errors
    /// Returns `StoreReadFailure` if the query fails.
    pub fn records_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<UsageRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, provider, model_name, input_tokens, output_tokens, \
                        cost, currency, cost_basis, session_id, recorded_at \
                 FROM usage_records \
                 WHERE recorded_at >= ?1 \
                 ORDER BY recorded_at ASC, id ASC",
            )
            .map_err(|e| read_failure("prepare records_since", &e))?;

        let rows = stmt
            .query_map(params![cutoff.to_rfc3339()], map_row)
            .map_err(|e| read_failure("query records_since", &e))?;

        collect_rows(rows)
    }

    /// Records for one session, oldest first.
    ///
    /// # Errors
    /// Returns `StoreReadFailure` if the query fails.
    pub fn records_for_session(&self, session_id: &str) -> Result<Vec<UsageRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, provider, model_name, input_tokens, output_tokens, \
                        cost, currency, cost_basis, session_id, recorded_at \
                 FROM usage_records \
                 WHERE session_id = ?1 \
                 ORDER BY recorded_at ASC, id ASC",
            )
            .map_err(|e| read_failure("prepare records_for_session", &e))?;

        let rows = stmt
            .query_map(params![session_id], map_row)
            .map_err(|e| read_failure("query records_for_session", &e))?;

        collect_rows(rows)
    }

    /// Total number of stored records.
    ///
    /// # Errors
    /// Returns `StoreReadFailure` if the query fails.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM usage_records", [], |row| row.get(0))
            .map_err(|e| read_failure("count records", &e))?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Bulk-delete records older than the retention window.
    ///
    /// The only deletion path for usage records. Returns rows deleted.
    ///
    /// # Errors
    /// Returns an error if `retention_days` is non-positive or the DELETE
    /// fails.
    pub fn prune(&self, retention_days: i64) -> Result<usize> {
        if retention_days <= 0 {
            return Err(TallyError::Config(
                "retention days must be greater than 0".to_string(),
            ));
        }

        let cutoff = (Utc::now() - Duration::days(retention_days)).to_rfc3339();
        let deleted = self
            .conn
            .execute("DELETE FROM usage_records WHERE recorded_at < ?1", [cutoff])
            .map_err(|e| TallyError::StoreWriteFailure {
                operation: "prune usage records".to_string(),
                message: e.to_string(),
            })?;

        Ok(deleted)
    }
}

fn read_failure(operation: &str, e: &rusqlite::Error) -> TallyError {
    TallyError::StoreReadFailure {
        operation: operation.to_string(),
        message: e.to_string(),
    }
}

#[allow(clippy::cast_sign_loss)]
fn map_row(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
    let input_tokens: i64 = row.get(3)?;
    let output_tokens: i64 = row.get(4)?;
    let currency: Option<String> = row.get(6)?;
    let cost_basis: String = row.get(7)?;
    let recorded_at: String = row.get(9)?;

    Ok(UsageRecord {
        id: row.get(0)?,
        provider: row.get(1)?,
        model_name: row.get(2)?,
        input_tokens: input_tokens.max(0) as u64,
        output_tokens: output_tokens.max(0) as u64,
        cost: row.get(5)?,
        currency: currency.as_deref().and_then(Currency::from_code),
        cost_basis: CostBasis::from_str(&cost_basis),
        session_id: row.get(8)?,
        // A corrupt timestamp must surface as a read failure, not be
        // replaced with some other instant.
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    9,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
    })
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<UsageRecord>>,
) -> Result<Vec<UsageRecord>> {
    let mut records = Vec::new();
    for row in rows {
        records.push(row.map_err(|e| read_failure("map row", &e))?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(session: &str, recorded_at: DateTime<Utc>) -> NewUsageRecord {
        NewUsageRecord {
            provider: "deepseek".to_string(),
            model_name: "deepseek-chat".to_string(),
            input_tokens: 1000,
            output_tokens: 500,
            cost: Some(0.002),
            currency: Some(Currency::Cny),
            cost_basis: CostBasis::Priced,
            session_id: session.to_string(),
            recorded_at,
        }
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let store = UsageStore::open_in_memory().unwrap();
        let first = store.append(&make_record("s1", Utc::now())).unwrap();
        let second = store.append(&make_record("s1", Utc::now())).unwrap();
        assert!(second.id > first.id);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn records_since_filters_by_cutoff() {
        let store = UsageStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .append(&make_record("old", now - Duration::days(10)))
            .unwrap();
        store
            .append(&make_record("new", now - Duration::hours(1)))
            .unwrap();

        let recent = store.records_since(now - Duration::days(1)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].session_id, "new");

        let all = store.records_since(now - Duration::days(30)).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn records_since_now_is_empty() {
        let store = UsageStore::open_in_memory().unwrap();
        store
            .append(&make_record("s1", Utc::now() - Duration::seconds(5)))
            .unwrap();

        let records = store.records_since(Utc::now()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn records_for_session_isolates_sessions() {
        let store = UsageStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.append(&make_record("a", now)).unwrap();
        store.append(&make_record("b", now)).unwrap();
        store.append(&make_record("a", now)).unwrap();

        assert_eq!(store.records_for_session("a").unwrap().len(), 2);
        assert_eq!(store.records_for_session("b").unwrap().len(), 1);
        assert!(store.records_for_session("c").unwrap().is_empty());
    }

    #[test]
    fn unpriced_record_round_trips() {
        let store = UsageStore::open_in_memory().unwrap();
        let mut record = make_record("s1", Utc::now());
        record.cost = None;
        record.currency = None;
        record.cost_basis = CostBasis::Unknown;

        let stored = store.append(&record).unwrap();
        assert_eq!(stored.cost, None);
        assert_eq!(stored.cost_basis, CostBasis::Unknown);

        let fetched = store.records_for_session("s1").unwrap();
        assert_eq!(fetched[0].cost_basis, CostBasis::Unknown);
        assert_eq!(fetched[0].currency, None);
    }

    #[test]
    fn stored_records_survive_price_changes() {
        // Appending a record and later appending the same usage with a
        // different price must not alter the earlier record.
        let store = UsageStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.append(&make_record("s1", now)).unwrap();

        let mut repriced = make_record("s1", now);
        repriced.cost = Some(0.004);
        store.append(&repriced).unwrap();

        let records = store.records_for_session("s1").unwrap();
        assert!((records[0].cost.unwrap() - 0.002).abs() < f64::EPSILON);
        assert!((records[1].cost.unwrap() - 0.004).abs() < f64::EPSILON);
    }

    #[test]
    fn prune_deletes_only_old_records() {
        let store = UsageStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .append(&make_record("old", now - Duration::days(120)))
            .unwrap();
        store
            .append(&make_record("new", now - Duration::days(5)))
            .unwrap();

        let deleted = store.prune(90).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn prune_rejects_non_positive_retention() {
        let store = UsageStore::open_in_memory().unwrap();
        assert!(store.prune(0).is_err());
        assert!(store.prune(-1).is_err());
    }

    #[test]
    fn corrupt_recorded_at_is_a_read_failure() {
        let store = UsageStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO usage_records (provider, model_name, input_tokens, output_tokens, session_id, recorded_at) \
                 VALUES ('deepseek', 'deepseek-chat', 1, 1, 's1', 'not-a-timestamp')",
                [],
            )
            .unwrap();

        let err = store
            .records_since(Utc::now() - Duration::days(3650))
            .unwrap_err();
        assert!(matches!(err, TallyError::StoreReadFailure { .. }));

        let err = store.records_for_session("s1").unwrap_err();
        assert!(matches!(err, TallyError::StoreReadFailure { .. }));
    }

    #[test]
    fn read_only_connection_sees_writer_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.sqlite");
        let writer = UsageStore::open(&path).unwrap();
        let reader = UsageStore::open_read_only(&path).unwrap();

        writer.append(&make_record("s1", Utc::now())).unwrap();
        assert_eq!(reader.count().unwrap(), 1);

        writer.append(&make_record("s1", Utc::now())).unwrap();
        assert_eq!(reader.records_for_session("s1").unwrap().len(), 2);
    }

    #[test]
    fn read_only_connection_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.sqlite");
        let _writer = UsageStore::open(&path).unwrap();

        let reader = UsageStore::open_read_only(&path).unwrap();
        assert!(reader.append(&make_record("s1", Utc::now())).is_err());
    }

    #[test]
    fn open_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.sqlite");
        {
            let store = UsageStore::open(&path).unwrap();
            store.append(&make_record("s1", Utc::now())).unwrap();
        }

        let reopened = UsageStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
