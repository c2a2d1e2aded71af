//! Integrity Validator
//!
//! Replays persisted entries in chain order, recomputes their hashes and
//! reports every discrepancy. Read-only: nothing is repaired or rewritten.
//!
//! Two replay modes are available (see [`ValidationMode`]):
//!
//! - `CarriedStoredHash` advances using each entry's *stored* chain hash.
//!   Any range can be checked on its own, but an entry rewritten to be
//!   self-consistent with a forged predecessor is only noticed at the
//!   following entry's linkage check.
//! - `FullRederivation` starts at the genesis hash and advances using the
//!   *recomputed* chain hash, so a single tamper is reported at the entry
//!   and at every link after it. Always reads from the start of the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::codec::FieldCodec;
use crate::audit::entry::AuditEntry;
use crate::audit::hasher::EntryHasher;
use crate::audit::store::{AuditStore, EntryFilter};
use crate::config::ValidationMode;
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    ContentHashMismatch,
    ChainHashMismatch,
    ChainLinkageBroken,
    /// The sensitive-field payload could not be decrypted, so the content
    /// hash cannot be recomputed.
    UndecryptablePayload,
    /// A stored line that does not parse as an entry.
    MalformedEntry,
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationType::ContentHashMismatch => "content_hash_mismatch",
            ViolationType::ChainHashMismatch => "chain_hash_mismatch",
            ViolationType::ChainLinkageBroken => "chain_linkage_broken",
            ViolationType::UndecryptablePayload => "undecryptable_payload",
            ViolationType::MalformedEntry => "malformed_entry",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub entry_id: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReport {
    pub is_valid: bool,
    pub entries_checked: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub mode: ValidationMode,
    pub violations: Vec<Violation>,
}

impl ViolationReport {
    /// Count violations per type.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for violation in &self.violations {
            *counts
                .entry(violation.violation_type.to_string())
                .or_insert(0) += 1;
        }
        counts
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.is_valid {
            format!("Audit ledger is valid ({} entries)", self.entries_checked)
        } else {
            format!(
                "Audit ledger is invalid ({} entries, {} violations)",
                self.entries_checked,
                self.violations.len()
            )
        }
    }
}

pub struct IntegrityValidator {
    store: Arc<dyn AuditStore>,
    codec: Arc<FieldCodec>,
    hasher: EntryHasher,
    mode: ValidationMode,
    start_hash: String,
}

impl IntegrityValidator {
    pub fn new(
        store: Arc<dyn AuditStore>,
        codec: Arc<FieldCodec>,
        hasher: EntryHasher,
        mode: ValidationMode,
        start_hash: String,
    ) -> Self {
        Self {
            store,
            codec,
            hasher,
            mode,
            start_hash,
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validate the entries whose timestamps fall inside `[start, end]`.
    /// `None` bounds are open.
    pub fn validate(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> LedgerResult<ViolationReport> {
        let read_from = match self.mode {
            ValidationMode::CarriedStoredHash => start,
            ValidationMode::FullRederivation => None,
        };

        let mut entries = Vec::new();
        let mut malformed = Vec::new();
        for item in self.store.read_range(&EntryFilter::time_range(read_from, end))? {
            match item {
                Ok(entry) => entries.push(entry),
                Err(LedgerError::CorruptEntry { location, reason }) => malformed.push(Violation {
                    violation_type: ViolationType::MalformedEntry,
                    entry_id: location,
                    expected: "parseable entry".to_string(),
                    actual: reason,
                }),
                Err(e) => return Err(e),
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let seed = match (self.mode, start, entries.first()) {
            (ValidationMode::CarriedStoredHash, Some(_), Some(first)) => first.previous_hash.clone(),
            _ => self.start_hash.clone(),
        };

        let (mut violations, entries_checked) = check_entries(
            &entries,
            &seed,
            self.mode,
            &self.hasher,
            &self.codec,
            start,
        );
        violations.extend(malformed);

        let report = ViolationReport {
            is_valid: violations.is_empty(),
            entries_checked,
            start,
            end,
            mode: self.mode,
            violations,
        };

        if report.is_valid {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }
}

/// Recompute the content hash, decrypting sensitive fields when needed.
/// A payload that cannot be decrypted hashes as empty details and the
/// decryption error is returned alongside.
fn recompute_content_hash(
    entry: &AuditEntry,
    hasher: &EntryHasher,
    codec: &FieldCodec,
) -> (String, Option<String>) {
    match &entry.encrypted_payload {
        None => (hasher.content_hash(&entry.content_fields()), None),
        Some(payload) => match codec.try_reveal(payload) {
            Ok(fields) => (hasher.content_hash(&entry.content_fields_with(&fields.details)), None),
            Err(e) => {
                warn!("Cannot decrypt entry {} for validation: {}", entry.id, e);
                let hash = hasher.content_hash(&entry.content_fields_with(&BTreeMap::new()));
                (hash, Some(e.to_string()))
            }
        },
    }
}

/// Core replay over entries already in chain order. Entries before
/// `report_from` advance the running hash but are not reported on.
pub fn check_entries(
    entries: &[AuditEntry],
    seed: &str,
    mode: ValidationMode,
    hasher: &EntryHasher,
    codec: &FieldCodec,
    report_from: Option<DateTime<Utc>>,
) -> (Vec<Violation>, usize) {
    let mut violations = Vec::new();
    let mut checked = 0;
    let mut running = seed.to_string();

    for entry in entries {
        let in_range = report_from.map_or(true, |from| entry.timestamp >= from);
        let (content_hash, decrypt_error) = recompute_content_hash(entry, hasher, codec);

        let chain_input = match mode {
            ValidationMode::CarriedStoredHash => &entry.content_hash,
            ValidationMode::FullRederivation => &content_hash,
        };
        let chain_hash = hasher.chain_hash(chain_input, &running);

        if in_range {
            checked += 1;

            if let Some(error) = decrypt_error {
                violations.push(Violation {
                    violation_type: ViolationType::UndecryptablePayload,
                    entry_id: entry.id.clone(),
                    expected: "decryptable payload".to_string(),
                    actual: error,
                });
            }

            if content_hash != entry.content_hash {
                violations.push(Violation {
                    violation_type: ViolationType::ContentHashMismatch,
                    entry_id: entry.id.clone(),
                    expected: content_hash.clone(),
                    actual: entry.content_hash.clone(),
                });
            }

            if chain_hash != entry.chain_hash {
                violations.push(Violation {
                    violation_type: ViolationType::ChainHashMismatch,
                    entry_id: entry.id.clone(),
                    expected: chain_hash.clone(),
                    actual: entry.chain_hash.clone(),
                });
            }

            if entry.previous_hash != running {
                violations.push(Violation {
                    violation_type: ViolationType::ChainLinkageBroken,
                    entry_id: entry.id.clone(),
                    expected: running.clone(),
                    actual: entry.previous_hash.clone(),
                });
            }
        }

        running = match mode {
            ValidationMode::CarriedStoredHash => entry.chain_hash.clone(),
            ValidationMode::FullRederivation => chain_hash,
        };
    }

    (violations, checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::AuditEvent;
    use crate::audit::store::FileStore;
    use crate::crypto::StaticKeyProvider;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::fs::OpenOptions;
    use std::io::Write;

    const GENESIS: &str = "sha256:genesis";

    fn chain(actions: &[&str]) -> Vec<AuditEntry> {
        let hasher = EntryHasher::default();
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap();
        let mut previous = GENESIS.to_string();
        let mut entries = Vec::new();

        for (i, action) in actions.iter().enumerate() {
            let event = AuditEvent::new("data_change", "sample", "S-1", "u1", *action)
                .with_detail("step", json!(i));
            let mut entry = AuditEntry::from_event(event, true);
            entry.timestamp = base + Duration::seconds(i as i64);
            entry.content_hash = hasher.content_hash(&entry.content_fields());
            entry.previous_hash = previous.clone();
            entry.chain_hash = hasher.chain_hash(&entry.content_hash, &previous);
            previous = entry.chain_hash.clone();
            entries.push(entry);
        }
        entries
    }

    fn check(entries: &[AuditEntry], mode: ValidationMode) -> Vec<Violation> {
        check_entries(
            entries,
            GENESIS,
            mode,
            &EntryHasher::default(),
            &FieldCodec::disabled(),
            None,
        )
        .0
    }

    #[test]
    fn test_clean_chain_has_no_violations() {
        let entries = chain(&["create", "update", "delete"]);
        assert!(check(&entries, ValidationMode::CarriedStoredHash).is_empty());
        assert!(check(&entries, ValidationMode::FullRederivation).is_empty());
    }

    #[test]
    fn test_content_tamper_reports_single_violation() {
        let mut entries = chain(&["create", "update", "delete"]);
        entries[1].action = "approve".to_string();

        let violations = check(&entries, ValidationMode::CarriedStoredHash);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, ViolationType::ContentHashMismatch);
        assert_eq!(violations[0].entry_id, entries[1].id);
    }

    #[test]
    fn test_full_rederivation_cascades() {
        let mut entries = chain(&["create", "update", "delete"]);
        entries[1].action = "approve".to_string();

        let violations = check(&entries, ValidationMode::FullRederivation);
        let types: Vec<ViolationType> = violations.iter().map(|v| v.violation_type).collect();
        assert_eq!(
            types,
            vec![
                ViolationType::ContentHashMismatch,
                ViolationType::ChainHashMismatch,
                ViolationType::ChainHashMismatch,
                ViolationType::ChainLinkageBroken,
            ]
        );
        assert_eq!(violations[3].entry_id, entries[2].id);
    }

    #[test]
    fn test_rewritten_chain_hash_caught_at_next_link() {
        let mut entries = chain(&["create", "update", "delete"]);
        entries[1].chain_hash = "sha256:forged".to_string();

        let violations = check(&entries, ValidationMode::CarriedStoredHash);
        let types: Vec<(ViolationType, &str)> = violations
            .iter()
            .map(|v| (v.violation_type, v.entry_id.as_str()))
            .collect();
        assert_eq!(
            types,
            vec![
                (ViolationType::ChainHashMismatch, entries[1].id.as_str()),
                (ViolationType::ChainHashMismatch, entries[2].id.as_str()),
                (ViolationType::ChainLinkageBroken, entries[2].id.as_str()),
            ]
        );
    }

    #[test]
    fn test_removed_entry_breaks_linkage() {
        let mut entries = chain(&["create", "update", "delete"]);
        entries.remove(1);

        let violations = check(&entries, ValidationMode::CarriedStoredHash);
        assert!(violations
            .iter()
            .any(|v| v.violation_type == ViolationType::ChainLinkageBroken));
    }

    #[test]
    fn test_report_from_skips_earlier_entries() {
        let mut entries = chain(&["create", "update", "delete"]);
        entries[0].action = "approve".to_string();

        let (violations, checked) = check_entries(
            &entries,
            GENESIS,
            ValidationMode::FullRederivation,
            &EntryHasher::default(),
            &FieldCodec::disabled(),
            Some(entries[2].timestamp),
        );
        assert_eq!(checked, 1);
        assert!(violations.iter().all(|v| v.entry_id == entries[2].id));
    }

    #[test]
    fn test_report_counts() {
        let report = ViolationReport {
            is_valid: false,
            entries_checked: 3,
            start: None,
            end: None,
            mode: ValidationMode::CarriedStoredHash,
            violations: vec![Violation {
                violation_type: ViolationType::ChainLinkageBroken,
                entry_id: "audit_1".to_string(),
                expected: "a".to_string(),
                actual: "b".to_string(),
            }],
        };
        assert_eq!(report.counts()["chain_linkage_broken"], 1);
        assert!(report.summary().contains("1 violations"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["violations"][0]["type"], "chain_linkage_broken");
        assert_eq!(json["isValid"], false);
    }

    #[test]
    fn test_undecryptable_payload_is_reported() {
        let codec = FieldCodec::new(&StaticKeyProvider::new(Some([7; 32]), None), true);
        let hasher = EntryHasher::default();

        // Details stripped and the payload swapped, hashes recomputed to match.
        let mut entries = chain(&["create", "update"]);
        let target = &mut entries[1];
        target.details.clear();
        target.encrypted_payload = Some("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string());
        target.content_hash = hasher.content_hash(&target.content_fields());
        target.chain_hash = hasher.chain_hash(&target.content_hash, &target.previous_hash);

        let (violations, checked) = check_entries(
            &entries,
            GENESIS,
            ValidationMode::CarriedStoredHash,
            &hasher,
            &codec,
            None,
        );
        assert_eq!(checked, 2);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, ViolationType::UndecryptablePayload);
        assert_eq!(violations[0].entry_id, entries[1].id);
    }

    #[test]
    fn test_malformed_line_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let entries = chain(&["create", "update"]);
        for entry in &entries {
            store.append(entry).unwrap();
        }

        let path = store.segment_path(&entries[0].timestamp);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\": \"audit_broken\"}\n").unwrap();

        let validator = IntegrityValidator::new(
            store,
            Arc::new(FieldCodec::disabled()),
            EntryHasher::default(),
            ValidationMode::CarriedStoredHash,
            GENESIS.to_string(),
        );
        let report = validator.validate(None, None).unwrap();

        assert!(!report.is_valid);
        assert_eq!(report.entries_checked, 2);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].violation_type, ViolationType::MalformedEntry);
        assert!(report.violations[0].entry_id.ends_with("2026-07-01.jsonl:3"));
    }
}
