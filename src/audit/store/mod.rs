//! Durable Store
//!
//! The append-only contract every ledger backend satisfies. Entries are
//! never updated or deleted through this interface.

pub mod file;
pub mod memory;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::audit::entry::AuditEntry;
use crate::error::{LedgerError, LedgerResult};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Lazy, finite sequence of stored entries. Call `read_range` again to
/// restart it.
pub type EntryIter<'a> = Box<dyn Iterator<Item = LedgerResult<AuditEntry>> + Send + 'a>;

/// Durable record of chain state, overwritten on every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainState {
    pub start_hash: String,
    pub last_hash: String,
    pub total_entries: u64,
    pub updated_at: DateTime<Utc>,
}

impl ChainState {
    /// State of a ledger with no entries yet.
    pub fn genesis(start_hash: String) -> Self {
        Self {
            last_hash: start_hash.clone(),
            start_hash,
            total_entries: 0,
            updated_at: Utc::now(),
        }
    }
}

/// A batch write that stopped part-way. The first `persisted` entries are
/// durable; the rest were not written.
#[derive(Error, Debug)]
#[error("batch write failed after {persisted} entries: {error}")]
pub struct BatchError {
    pub persisted: usize,
    pub error: LedgerError,
}

/// Predicates over stored entries; every provided field must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryFilter {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub event_type: Option<String>,
    pub action: Option<String>,
    pub outcome: Option<String>,
}

impl EntryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn time_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            start_date: start,
            end_date: end,
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(start) = &self.start_date {
            if entry.timestamp < *start {
                return false;
            }
        }
        if let Some(end) = &self.end_date {
            if entry.timestamp > *end {
                return false;
            }
        }

        field_matches(&self.user_id, &entry.user_id)
            && field_matches(&self.resource_type, &entry.resource_type)
            && field_matches(&self.resource_id, &entry.resource_id)
            && field_matches(&self.event_type, &entry.event_type)
            && field_matches(&self.action, &entry.action)
            && field_matches(&self.outcome, &entry.outcome)
    }

    /// Whether a calendar-day segment can hold matching entries.
    pub fn covers_day(&self, day: NaiveDate) -> bool {
        let after_start = self
            .start_date
            .map_or(true, |start| day >= start.date_naive());
        let before_end = self.end_date.map_or(true, |end| day <= end.date_naive());
        after_start && before_end
    }
}

/// Drop unparseable lines, logging where they are. Other read failures
/// pass through. Meant for `filter_map` over a [`read_range`] iterator.
///
/// [`read_range`]: AuditStore::read_range
pub fn skip_corrupt(item: LedgerResult<AuditEntry>) -> Option<LedgerResult<AuditEntry>> {
    match item {
        Err(LedgerError::CorruptEntry { location, reason }) => {
            warn!("Skipping corrupt entry at {}: {}", location, reason);
            None
        }
        other => Some(other),
    }
}

fn field_matches(expected: &Option<String>, actual: &str) -> bool {
    expected.as_deref().map_or(true, |value| value == actual)
}

pub trait AuditStore: Send + Sync + std::fmt::Debug {
    /// Durably append one entry.
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()>;

    /// Durably append entries in order, reporting how many made it on failure.
    fn append_batch(&self, entries: &[AuditEntry]) -> Result<(), BatchError>;

    /// Atomically replace the chain-state record.
    fn checkpoint(&self, state: &ChainState) -> LedgerResult<()>;

    /// Last checkpointed chain state, if any.
    fn load_checkpoint(&self) -> LedgerResult<Option<ChainState>>;

    /// Entries matching `filter`, in the order they were appended.
    fn read_range<'a>(&'a self, filter: &EntryFilter) -> LedgerResult<EntryIter<'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::AuditEvent;
    use chrono::{Duration, TimeZone};

    fn entry_at(user: &str, action: &str, timestamp: DateTime<Utc>) -> AuditEntry {
        let mut entry =
            AuditEntry::from_event(AuditEvent::new("data_change", "sample", "S-1", user, action), true);
        entry.timestamp = timestamp;
        entry
    }

    #[test]
    fn test_filter_ands_predicates() {
        let ts = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let filter = EntryFilter {
            user_id: Some("u1".to_string()),
            action: Some("create".to_string()),
            ..EntryFilter::default()
        };

        assert!(filter.matches(&entry_at("u1", "create", ts)));
        assert!(!filter.matches(&entry_at("u2", "create", ts)));
        assert!(!filter.matches(&entry_at("u1", "delete", ts)));
    }

    #[test]
    fn test_filter_time_bounds_are_inclusive() {
        let ts = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let filter = EntryFilter::time_range(Some(ts), Some(ts));
        assert!(filter.matches(&entry_at("u1", "read", ts)));
        assert!(!filter.matches(&entry_at("u1", "read", ts + Duration::seconds(1))));
        assert!(!filter.matches(&entry_at("u1", "read", ts - Duration::seconds(1))));
    }

    #[test]
    fn test_covers_day() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 23, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 5, 3, 1, 0, 0).unwrap();
        let filter = EntryFilter::time_range(Some(start), Some(end));

        let day = |d| NaiveDate::from_ymd_opt(2026, 5, d).unwrap();
        assert!(!filter.covers_day(NaiveDate::from_ymd_opt(2026, 4, 30).unwrap()));
        assert!(filter.covers_day(day(1)));
        assert!(filter.covers_day(day(3)));
        assert!(!filter.covers_day(day(4)));
        assert!(EntryFilter::all().covers_day(day(4)));
    }

    #[test]
    fn test_skip_corrupt_only_drops_unparseable_lines() {
        let ts = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let items = vec![
            Ok(entry_at("u1", "read", ts)),
            Err(LedgerError::CorruptEntry {
                location: "2026-05-01.jsonl:2".to_string(),
                reason: "expected value".to_string(),
            }),
            Err(LedgerError::PersistenceError("disk gone".to_string())),
        ];

        let kept: Vec<LedgerResult<AuditEntry>> =
            items.into_iter().filter_map(skip_corrupt).collect();
        assert_eq!(kept.len(), 2);
        assert!(kept[0].is_ok());
        assert!(matches!(kept[1], Err(LedgerError::PersistenceError(_))));
    }
}
