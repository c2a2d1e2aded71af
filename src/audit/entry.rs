//! Audit Ledger Entry
//!
//! Defines the persisted, immutable record of an audit event together with
//! its content hash and chain linkage.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::audit::event::{AuditEvent, FieldChange};
use crate::audit::hasher::{ContentFields, EntryHasher};

const ID_SUFFIX_LEN: usize = 9;

/// Audit ledger entry with cryptographic hash chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub action: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_justification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_approval: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_signature: Option<String>,
    pub content_hash: String,
    pub previous_hash: String,
    pub chain_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_payload: Option<String>,
}

impl AuditEntry {
    /// Build an unlinked entry from a validated event.
    ///
    /// Hash fields are left empty; the timestamp is provisional until the
    /// sequencer stamps the entry.
    pub fn from_event(event: AuditEvent, mask_pii: bool) -> Self {
        let timestamp = Utc::now();
        let field_changes = if mask_pii {
            event.changes.iter().map(mask_change).collect()
        } else {
            event.changes
        };

        Self {
            id: generate_entry_id(&timestamp),
            timestamp,
            event_type: event.event_type,
            resource_type: event.resource_type,
            resource_id: event.resource_id,
            user_id: event.user_id,
            user_role: event.user_role,
            session_id: event.session_id,
            ip_address: event.ip_address,
            user_agent: event.user_agent,
            action: event.action,
            outcome: event.outcome,
            details: event.details,
            reason_for_change: event.reason_for_change,
            business_justification: event.business_justification,
            supervisor_approval: event.supervisor_approval,
            field_changes,
            user_signature: event.user_signature,
            content_hash: String::new(),
            previous_hash: String::new(),
            chain_hash: String::new(),
            encrypted_payload: None,
        }
    }

    /// Semantic fields of this entry, hashed with the given details.
    ///
    /// Encrypted entries keep their details in the ciphertext, so callers
    /// pass the revealed map instead of `self.details`.
    pub fn content_fields_with<'a>(
        &'a self,
        details: &'a BTreeMap<String, Value>,
    ) -> ContentFields<'a> {
        ContentFields {
            event_type: &self.event_type,
            resource_type: &self.resource_type,
            resource_id: &self.resource_id,
            user_id: &self.user_id,
            action: &self.action,
            timestamp: &self.timestamp,
            details,
        }
    }

    pub fn content_fields(&self) -> ContentFields<'_> {
        self.content_fields_with(&self.details)
    }

    /// Verify the stored content hash against the plaintext fields.
    pub fn verify_content_hash(&self, hasher: &EntryHasher) -> bool {
        self.content_hash == hasher.content_hash(&self.content_fields())
    }

    /// Verify the stored chain hash against the stored content and
    /// predecessor hashes.
    pub fn verify_chain_hash(&self, hasher: &EntryHasher) -> bool {
        self.chain_hash == hasher.chain_hash(&self.content_hash, &self.previous_hash)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted_payload.is_some()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{}: {} {} {}/{} ({})",
            self.id, self.user_id, self.action, self.resource_type, self.resource_id, self.outcome
        )
    }
}

/// Time-ordered id with a random suffix so concurrent writers never collide.
pub fn generate_entry_id(timestamp: &DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("audit_{}_{}", timestamp.timestamp_millis(), suffix)
}

// Literal patterns, compiled on first use.
static SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("invalid SSN pattern"));
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("invalid email pattern")
});
static CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12,15}\d\b").expect("invalid card pattern"));

/// Mask SSN, email and card-number substrings in a string.
pub fn mask_pii_str(input: &str) -> String {
    let masked = SSN.replace_all(input, "***-**-****");
    let masked = EMAIL.replace_all(&masked, "***@***.***");
    let masked = CARD.replace_all(&masked, "****-****-****-****");
    masked.into_owned()
}

/// Mask every string nested inside a JSON value.
pub fn mask_pii_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_pii_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(mask_pii_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), mask_pii_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn mask_change(change: &FieldChange) -> FieldChange {
    FieldChange {
        field: change.field.clone(),
        old_value: mask_pii_value(&change.old_value),
        new_value: mask_pii_value(&change.new_value),
    }
}
