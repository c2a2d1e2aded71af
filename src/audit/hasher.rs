//! Entry Hasher
//!
//! Canonical serialization of an entry's semantic fields plus the content,
//! chain and genesis digests derived from it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Digest used for every hash in a ledger epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(bytes).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(bytes).to_vec(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            other => Err(LedgerError::unsupported_algorithm(other)),
        }
    }
}

/// The semantic fields covered by an entry's content hash.
#[derive(Debug, Clone, Copy)]
pub struct ContentFields<'a> {
    pub event_type: &'a str,
    pub resource_type: &'a str,
    pub resource_id: &'a str,
    pub user_id: &'a str,
    pub action: &'a str,
    pub timestamp: &'a DateTime<Utc>,
    pub details: &'a BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHasher {
    algorithm: HashAlgorithm,
}

impl EntryHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Canonical JSON for the semantic fields.
    ///
    /// Keys are emitted in lexical order at every nesting level so the output
    /// never depends on map iteration order.
    pub fn canonical_string(fields: &ContentFields<'_>) -> String {
        let details: Map<String, Value> = fields
            .details
            .iter()
            .map(|(k, v)| (k.clone(), canonical_value(v)))
            .collect();

        let mut projection: BTreeMap<&str, Value> = BTreeMap::new();
        projection.insert("action", Value::from(fields.action));
        projection.insert("details", sorted_object(details));
        projection.insert("eventType", Value::from(fields.event_type));
        projection.insert("resourceId", Value::from(fields.resource_id));
        projection.insert("resourceType", Value::from(fields.resource_type));
        projection.insert(
            "timestamp",
            Value::from(fields.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        );
        projection.insert("userId", Value::from(fields.user_id));

        let mut out = String::from("{");
        for (i, (key, value)) in projection.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&Value::from(*key).to_string());
            out.push(':');
            out.push_str(&value.to_string());
        }
        out.push('}');
        out
    }

    pub fn content_hash(&self, fields: &ContentFields<'_>) -> String {
        self.hash_bytes(Self::canonical_string(fields).as_bytes())
    }

    /// `H(content_hash ‖ previous_hash)`
    pub fn chain_hash(&self, content_hash: &str, previous_hash: &str) -> String {
        let mut input = String::with_capacity(content_hash.len() + previous_hash.len());
        input.push_str(content_hash);
        input.push_str(previous_hash);
        self.hash_bytes(input.as_bytes())
    }

    /// Synthetic predecessor for the first entry of a ledger.
    pub fn genesis_hash(&self, ledger_id: &str, created_at: &DateTime<Utc>) -> String {
        let seed = format!(
            "genesis|{}|{}",
            ledger_id,
            created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        self.hash_bytes(seed.as_bytes())
    }

    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        format!("{}:{}", self.algorithm, hex::encode(self.algorithm.digest(bytes)))
    }
}

impl Default for EntryHasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::Sha256)
    }
}

fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => sorted_object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical_value(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

fn sorted_object(map: Map<String, Value>) -> Value {
    let mut entries: Vec<(String, Value)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Value::Object(entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn details() -> BTreeMap<String, Value> {
        let mut details = BTreeMap::new();
        details.insert("zeta".to_string(), json!({"b": 2, "a": 1}));
        details.insert("alpha".to_string(), json!([3, {"y": true, "x": null}]));
        details
    }

    fn fields<'a>(
        timestamp: &'a DateTime<Utc>,
        details: &'a BTreeMap<String, Value>,
    ) -> ContentFields<'a> {
        ContentFields {
            event_type: "data_access",
            resource_type: "sample",
            resource_id: "S-001",
            user_id: "u1",
            action: "read",
            timestamp,
            details,
        }
    }

    #[test]
    fn test_canonical_string_orders_keys() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let details = details();
        let canonical = EntryHasher::canonical_string(&fields(&ts, &details));

        assert!(canonical.starts_with("{\"action\":\"read\",\"details\":{\"alpha\""));
        assert!(canonical.contains("{\"a\":1,\"b\":2}"));
        assert!(canonical.contains("{\"x\":null,\"y\":true}"));
        assert!(canonical.ends_with("\"userId\":\"u1\"}"));
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let hasher = EntryHasher::default();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let details = details();

        let first = hasher.content_hash(&fields(&ts, &details));
        let second = hasher.content_hash(&fields(&ts, &details.clone()));
        assert_eq!(first, second);
        assert!(first.starts_with("sha256:"));
        assert_eq!(first.len(), 71);
    }

    #[test]
    fn test_content_hash_changes_with_action() {
        let hasher = EntryHasher::default();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let details = details();

        let original = hasher.content_hash(&fields(&ts, &details));
        let mut tampered = fields(&ts, &details);
        tampered.action = "delete";
        assert_ne!(original, hasher.content_hash(&tampered));
    }

    #[test]
    fn test_chain_hash_binds_predecessor() {
        let hasher = EntryHasher::default();
        let a = hasher.chain_hash("sha256:aa", "sha256:00");
        let b = hasher.chain_hash("sha256:aa", "sha256:01");
        assert_ne!(a, b);
        assert_eq!(a, hasher.hash_bytes(b"sha256:aasha256:00"));
    }

    #[test]
    fn test_sha512_prefix() {
        let hasher = EntryHasher::new(HashAlgorithm::Sha512);
        let hash = hasher.hash_bytes(b"ledger");
        assert!(hash.starts_with("sha512:"));
        assert_eq!(hash.len(), 7 + 128);
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("sha-512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert!("blake3".parse::<HashAlgorithm>().is_err());
    }
}
