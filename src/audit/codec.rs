//! Sensitive-Field Codec
//!
//! Moves `details` and `fieldChanges` out of an entry into an AES-256-GCM
//! ciphertext before it is persisted, and puts them back on read. Also
//! signs finalized artifacts with the ledger's secp256k1 key.
//!
//! Ciphertext layout is `base64(nonce || ciphertext)` with a 96-bit nonce.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::audit::entry::AuditEntry;
use crate::audit::event::FieldChange;
use crate::crypto::{KeyProvider, SignatureManager};
use crate::error::{LedgerError, LedgerResult};

/// AES-GCM nonce size (96 bits).
const NONCE_SIZE: usize = 12;

/// The fields removed from an entry when it is encrypted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitiveFields {
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    #[serde(default)]
    pub field_changes: Vec<FieldChange>,
}

pub struct FieldCodec {
    encryption_key: Option<[u8; 32]>,
    signing_key: Option<SecretKey>,
    signatures: SignatureManager,
}

impl FieldCodec {
    /// Build a codec from the key provider. Encryption is active only when
    /// it is enabled and a key is available.
    pub fn new(keys: &dyn KeyProvider, encryption_enabled: bool) -> Self {
        let encryption_key = if encryption_enabled {
            keys.encryption_key()
        } else {
            None
        };

        Self {
            encryption_key,
            signing_key: keys.signing_key(),
            signatures: SignatureManager::new(),
        }
    }

    /// Codec with no keys: passes entries through untouched.
    pub fn disabled() -> Self {
        Self {
            encryption_key: None,
            signing_key: None,
            signatures: SignatureManager::new(),
        }
    }

    pub fn encryption_active(&self) -> bool {
        self.encryption_key.is_some()
    }

    pub fn can_sign(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Encrypt and strip the sensitive fields of `entry`.
    ///
    /// Returns the removed plaintext so the caller can still hash it, or
    /// `None` when encryption is not active.
    pub fn protect(&self, entry: &mut AuditEntry) -> LedgerResult<Option<SensitiveFields>> {
        if self.encryption_key.is_none() {
            return Ok(None);
        }

        let fields = SensitiveFields {
            details: std::mem::take(&mut entry.details),
            field_changes: std::mem::take(&mut entry.field_changes),
        };

        let plaintext = serde_json::to_vec(&fields).map_err(|e| {
            LedgerError::EncryptionError(format!("Failed to serialize sensitive fields: {}", e))
        })?;

        match self.encrypt(&plaintext) {
            Ok(ciphertext) => {
                entry.encrypted_payload = Some(ciphertext);
                Ok(Some(fields))
            }
            Err(e) => {
                entry.details = fields.details;
                entry.field_changes = fields.field_changes;
                Err(e)
            }
        }
    }

    /// Decrypt a payload produced by [`FieldCodec::protect`].
    pub fn try_reveal(&self, payload: &str) -> LedgerResult<SensitiveFields> {
        let plaintext = self.decrypt(payload)?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            LedgerError::DecryptionError(format!("Decrypted payload is not valid JSON: {}", e))
        })
    }

    /// Decrypt a payload, degrading to empty fields on failure.
    pub fn reveal(&self, payload: &str) -> SensitiveFields {
        match self.try_reveal(payload) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Returning entry without sensitive fields: {}", e);
                SensitiveFields::default()
            }
        }
    }

    /// Restore the sensitive fields of a stored entry in place.
    pub fn reveal_entry(&self, entry: &mut AuditEntry) {
        if let Some(payload) = &entry.encrypted_payload {
            let fields = self.reveal(payload);
            entry.details = fields.details;
            entry.field_changes = fields.field_changes;
        }
    }

    /// Hex signature over `payload`, or `None` without a signing key.
    pub fn sign(&self, payload: &[u8]) -> Option<String> {
        let secret = self.signing_key.as_ref()?;
        match self.signatures.sign_hex(payload, secret) {
            Ok(signature) => Some(signature),
            Err(e) => {
                warn!("Failed to sign payload: {}", e);
                None
            }
        }
    }

    pub fn public_key(&self) -> Option<String> {
        self.signing_key
            .as_ref()
            .map(|secret| self.signatures.public_key_from_secret(secret).to_string())
    }

    fn encrypt(&self, plaintext: &[u8]) -> LedgerResult<String> {
        let key = self
            .encryption_key
            .ok_or_else(|| LedgerError::EncryptionError("No encryption key configured".to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| LedgerError::EncryptionError(format!("Invalid key: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| LedgerError::EncryptionError(format!("Encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, payload: &str) -> LedgerResult<Vec<u8>> {
        let key = self
            .encryption_key
            .ok_or_else(|| LedgerError::DecryptionError("No encryption key configured".to_string()))?;

        let encrypted = STANDARD
            .decode(payload)
            .map_err(|e| LedgerError::DecryptionError(format!("Invalid base64 payload: {}", e)))?;
        if encrypted.len() <= NONCE_SIZE {
            return Err(LedgerError::DecryptionError(
                "Payload shorter than nonce".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| LedgerError::DecryptionError(format!("Invalid key: {}", e)))?;
        let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);

        cipher
            .decrypt(nonce, &encrypted[NONCE_SIZE..])
            .map_err(|_| LedgerError::DecryptionError("Authentication failed".to_string()))
    }
}

impl std::fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCodec")
            .field("encryption_active", &self.encryption_active())
            .field("can_sign", &self.can_sign())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::AuditEvent;
    use crate::crypto::StaticKeyProvider;
    use serde_json::json;

    fn codec() -> FieldCodec {
        let signer = SignatureManager::new().generate_secret_key().unwrap();
        FieldCodec::new(&StaticKeyProvider::new(Some([9; 32]), Some(signer)), true)
    }

    fn entry() -> AuditEntry {
        let event = AuditEvent::new("data_change", "sample", "S-1", "u1", "update")
            .with_detail("nested", json!({"run": [1, 2, {"ok": true}], "label": "ä ö"}))
            .with_detail("count", json!(3))
            .with_change(FieldChange::new("status", json!("queued"), json!("done")));
        AuditEntry::from_event(event, true)
    }

    #[test]
    fn test_protect_then_reveal_round_trip() {
        let codec = codec();
        let mut entry = entry();
        let original_details = entry.details.clone();
        let original_changes = entry.field_changes.clone();

        let removed = codec.protect(&mut entry).unwrap().unwrap();
        assert!(entry.details.is_empty());
        assert!(entry.field_changes.is_empty());
        assert_eq!(removed.details, original_details);

        let revealed = codec.reveal(entry.encrypted_payload.as_deref().unwrap());
        assert_eq!(revealed.details, original_details);
        assert_eq!(revealed.field_changes, original_changes);
    }

    #[test]
    fn test_protect_is_noop_without_key() {
        let codec = FieldCodec::new(&StaticKeyProvider::none(), true);
        let mut entry = entry();
        assert!(codec.protect(&mut entry).unwrap().is_none());
        assert!(!entry.details.is_empty());
        assert!(entry.encrypted_payload.is_none());
    }

    #[test]
    fn test_reveal_with_wrong_key_is_empty() {
        let mut entry = entry();
        codec().protect(&mut entry).unwrap();

        let other = FieldCodec::new(&StaticKeyProvider::new(Some([1; 32]), None), true);
        let revealed = other.reveal(entry.encrypted_payload.as_deref().unwrap());
        assert_eq!(revealed, SensitiveFields::default());
        assert!(other
            .try_reveal(entry.encrypted_payload.as_deref().unwrap())
            .is_err());
    }

    #[test]
    fn test_reveal_garbage_is_empty() {
        let codec = codec();
        assert_eq!(codec.reveal("not base64!"), SensitiveFields::default());
        assert_eq!(codec.reveal("AAAA"), SensitiveFields::default());
    }

    #[test]
    fn test_sign_and_verify() {
        let codec = codec();
        let signature = codec.sign(b"merkle-root").unwrap();
        let public_key = codec.public_key().unwrap();

        let signatures = SignatureManager::new();
        assert!(signatures
            .verify_hex(b"merkle-root", &signature, &public_key)
            .unwrap());
        assert!(!signatures
            .verify_hex(b"other-root", &signature, &public_key)
            .unwrap());
    }

    #[test]
    fn test_sign_without_key_is_none() {
        let codec = FieldCodec::disabled();
        assert!(codec.sign(b"payload").is_none());
        assert!(codec.public_key().is_none());
    }
}
