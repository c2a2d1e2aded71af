//! Compliance Reporter
//!
//! Periodic summaries combining entry counts from the query engine with an
//! integrity check of the same window.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::audit::entry::AuditEntry;
use crate::audit::query::{QueryEngine, SearchCriteria, SortOrder};
use crate::audit::validator::{IntegrityValidator, ViolationReport};
use crate::config::{LedgerConfig, ValidationMode, WriteMode};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl ReportPeriod {
    /// Window of this period ending at `end`.
    pub fn window(&self, end: DateTime<Utc>) -> ReportWindow {
        let start = match self {
            ReportPeriod::Daily => end - Duration::days(1),
            ReportPeriod::Weekly => end - Duration::days(7),
            ReportPeriod::Monthly => end
                .checked_sub_months(Months::new(1))
                .unwrap_or(end - Duration::days(30)),
            ReportPeriod::Yearly => end
                .checked_sub_months(Months::new(12))
                .unwrap_or(end - Duration::days(365)),
        };

        ReportWindow {
            period: *self,
            start,
            end,
        }
    }
}

impl FromStr for ReportPeriod {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(ReportPeriod::Daily),
            "weekly" => Ok(ReportPeriod::Weekly),
            "monthly" => Ok(ReportPeriod::Monthly),
            "yearly" => Ok(ReportPeriod::Yearly),
            other => Err(LedgerError::ValidationError(format!(
                "Unknown report period: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportWindow {
    pub period: ReportPeriod,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryCounts {
    pub total: usize,
    pub by_event_type: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
    pub by_outcome: BTreeMap<String, usize>,
    pub by_resource_type: BTreeMap<String, usize>,
    pub by_user: BTreeMap<String, usize>,
}

impl EntryCounts {
    pub fn tally<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> Self {
        let mut counts = Self::default();
        for entry in entries {
            counts.total += 1;
            *counts.by_event_type.entry(entry.event_type.clone()).or_insert(0) += 1;
            *counts.by_action.entry(entry.action.clone()).or_insert(0) += 1;
            *counts.by_outcome.entry(entry.outcome.clone()).or_insert(0) += 1;
            *counts
                .by_resource_type
                .entry(entry.resource_type.clone())
                .or_insert(0) += 1;
            *counts.by_user.entry(entry.user_id.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Ledger settings included in reports. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub ledger_id: String,
    pub write_mode: WriteMode,
    pub hash_algorithm: String,
    pub validation_mode: ValidationMode,
    pub encryption_active: bool,
    pub signing_enabled: bool,
    pub mask_pii: bool,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl ConfigSnapshot {
    pub fn new(config: &LedgerConfig, encryption_active: bool, signing_enabled: bool) -> Self {
        Self {
            ledger_id: config.ledger_id.clone(),
            write_mode: config.write_mode,
            hash_algorithm: config.hash_algorithm.clone(),
            validation_mode: config.validation_mode,
            encryption_active,
            signing_enabled,
            mask_pii: config.mask_pii,
            batch_size: config.batch_size,
            flush_interval_ms: config.flush_interval_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub window: ReportWindow,
    pub entry_counts: EntryCounts,
    pub integrity: ViolationReport,
    pub config: ConfigSnapshot,
}

pub struct ComplianceReporter {
    query: Arc<QueryEngine>,
    validator: Arc<IntegrityValidator>,
    config: ConfigSnapshot,
}

impl ComplianceReporter {
    pub fn new(
        query: Arc<QueryEngine>,
        validator: Arc<IntegrityValidator>,
        config: ConfigSnapshot,
    ) -> Self {
        Self {
            query,
            validator,
            config,
        }
    }

    pub fn report(&self, period: ReportPeriod) -> LedgerResult<ComplianceReport> {
        self.report_at(period, Utc::now())
    }

    /// Report for the period ending at `reference`.
    pub fn report_at(
        &self,
        period: ReportPeriod,
        reference: DateTime<Utc>,
    ) -> LedgerResult<ComplianceReport> {
        let window = period.window(reference);

        let criteria = SearchCriteria {
            order: SortOrder::Asc,
            ..SearchCriteria::new().between(Some(window.start), Some(window.end))
        };
        let found = self.query.search(&criteria)?;
        let entry_counts = EntryCounts::tally(&found.results);

        let integrity = self
            .validator
            .validate(Some(window.start), Some(window.end))?;

        Ok(ComplianceReport {
            generated_at: Utc::now(),
            window,
            entry_counts,
            integrity,
            config: self.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::AuditEvent;
    use chrono::TimeZone;

    #[test]
    fn test_windows() {
        let end = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();

        assert_eq!(ReportPeriod::Daily.window(end).start, end - Duration::days(1));
        assert_eq!(ReportPeriod::Weekly.window(end).start, end - Duration::days(7));
        assert_eq!(
            ReportPeriod::Monthly.window(end).start,
            Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap()
        );
        assert_eq!(
            ReportPeriod::Yearly.window(end).start,
            Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_period() {
        assert_eq!("weekly".parse::<ReportPeriod>().unwrap(), ReportPeriod::Weekly);
        assert!("hourly".parse::<ReportPeriod>().is_err());
    }

    #[test]
    fn test_tally() {
        let entries: Vec<AuditEntry> = [("u1", "create"), ("u2", "update"), ("u1", "delete")]
            .iter()
            .map(|(user, action)| {
                AuditEntry::from_event(
                    AuditEvent::new("data_change", "sample", "S-1", *user, *action),
                    true,
                )
            })
            .collect();

        let counts = EntryCounts::tally(&entries);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.by_user["u1"], 2);
        assert_eq!(counts.by_action["update"], 1);
        assert_eq!(counts.by_outcome["success"], 3);
        assert_eq!(counts.by_event_type["data_change"], 3);
    }

    #[test]
    fn test_snapshot_has_no_keys() {
        let config = LedgerConfig {
            encryption_key: Some("11".repeat(32)),
            ..LedgerConfig::default()
        };
        let snapshot = ConfigSnapshot::new(&config, true, false);
        let rendered = serde_json::to_string(&snapshot).unwrap();
        assert!(!rendered.contains(&"11".repeat(32)));
        assert!(rendered.contains("\"encryptionActive\":true"));
    }
}
