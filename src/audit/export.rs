//! Chain Segment Export
//!
//! Packages a range of the chain as a portable, optionally signed artifact:
//! the chain hashes of the range, a Merkle root over them, and the boundary
//! hashes that tie the segment to its neighbours.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::codec::FieldCodec;
use crate::audit::entry::AuditEntry;
use crate::audit::hasher::EntryHasher;
use crate::audit::store::{AuditStore, EntryFilter};
use crate::crypto::SignatureManager;
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSegment {
    pub ledger_start_hash: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub first_previous_hash: String,
    pub last_chain_hash: String,
    pub entry_ids: Vec<String>,
    pub chain_hashes: Vec<String>,
    pub merkle_root: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl ChainSegment {
    /// Bytes covered by the signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}",
            self.ledger_start_hash,
            self.first_previous_hash,
            self.last_chain_hash,
            self.chain_hashes.len(),
            self.merkle_root
        )
        .into_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentVerification {
    pub merkle_root_valid: bool,
    pub boundaries_valid: bool,
    /// `None` when the segment is unsigned.
    pub signature_valid: Option<bool>,
}

impl SegmentVerification {
    pub fn is_valid(&self) -> bool {
        self.merkle_root_valid && self.boundaries_valid && self.signature_valid.unwrap_or(true)
    }
}

/// Merkle root over `leaves`; an odd node at any level is paired with itself.
pub fn merkle_root(hasher: &EntryHasher, leaves: &[String]) -> Option<String> {
    if leaves.is_empty() {
        return None;
    }

    let mut level: Vec<String> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                hasher.hash_bytes(format!("{}{}", left, right).as_bytes())
            })
            .collect();
    }

    level.pop()
}

pub struct SegmentExporter {
    store: Arc<dyn AuditStore>,
    codec: Arc<FieldCodec>,
    hasher: EntryHasher,
    start_hash: String,
}

impl SegmentExporter {
    pub fn new(
        store: Arc<dyn AuditStore>,
        codec: Arc<FieldCodec>,
        hasher: EntryHasher,
        start_hash: String,
    ) -> Self {
        Self {
            store,
            codec,
            hasher,
            start_hash,
        }
    }

    /// Export the entries in `[start, end]`. Fails on an unparseable
    /// stored line, since a segment that silently omits an entry would not
    /// chain.
    pub fn export(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> LedgerResult<ChainSegment> {
        let mut entries = self
            .store
            .read_range(&EntryFilter::time_range(start, end))?
            .collect::<LedgerResult<Vec<AuditEntry>>>()?;
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let (first, last) = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(LedgerError::ValidationError(
                    "Cannot export an empty chain segment".to_string(),
                ))
            }
        };

        let chain_hashes: Vec<String> = entries.iter().map(|e| e.chain_hash.clone()).collect();
        let merkle_root = merkle_root(&self.hasher, &chain_hashes).ok_or_else(|| {
            LedgerError::ValidationError("Cannot export an empty chain segment".to_string())
        })?;

        let mut segment = ChainSegment {
            ledger_start_hash: self.start_hash.clone(),
            start,
            end,
            first_previous_hash: first.previous_hash.clone(),
            last_chain_hash: last.chain_hash.clone(),
            entry_ids: entries.iter().map(|e| e.id.clone()).collect(),
            chain_hashes,
            merkle_root,
            exported_at: Utc::now(),
            signature: None,
            public_key: None,
        };

        segment.signature = self.codec.sign(&segment.signing_payload());
        if segment.signature.is_some() {
            segment.public_key = self.codec.public_key();
        } else {
            warn!("Exporting unsigned chain segment");
        }

        info!(
            "Exported chain segment of {} entries (root {})",
            segment.chain_hashes.len(),
            segment.merkle_root
        );
        Ok(segment)
    }

    pub fn verify(&self, segment: &ChainSegment) -> SegmentVerification {
        verify_segment(&self.hasher, segment)
    }
}

/// Check a segment's internal consistency and signature. Uses the key
/// embedded in the segment, so it needs no ledger and works for segments
/// exported elsewhere.
///
/// A segment exported without a start bound must begin at the ledger's
/// genesis; for bounded segments `first_previous_hash` is carried for
/// stitching against the preceding segment and is not checked here.
pub fn verify_segment(hasher: &EntryHasher, segment: &ChainSegment) -> SegmentVerification {
    let merkle_root_valid = merkle_root(hasher, &segment.chain_hashes)
        .map_or(false, |root| root == segment.merkle_root);

    let boundaries_valid = segment.chain_hashes.last() == Some(&segment.last_chain_hash)
        && segment.entry_ids.len() == segment.chain_hashes.len()
        && (segment.start.is_some() || segment.first_previous_hash == segment.ledger_start_hash);

    let signature_valid = match (&segment.signature, &segment.public_key) {
        (Some(signature), Some(public_key)) => {
            let payload = segment.signing_payload();
            match SignatureManager::new().verify_hex(&payload, signature, public_key) {
                Ok(valid) => Some(valid),
                Err(e) => {
                    debug!("Segment signature rejected: {}", e);
                    Some(false)
                }
            }
        }
        (Some(_), None) => Some(false),
        (None, _) => None,
    };

    debug!(
        "Segment verification: root={} boundaries={} signature={:?}",
        merkle_root_valid, boundaries_valid, signature_valid
    );

    SegmentVerification {
        merkle_root_valid,
        boundaries_valid,
        signature_valid,
    }
}
