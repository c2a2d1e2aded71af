use crate::error::{LedgerError, LedgerResult};
use rand::RngCore;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

/// ECDSA over secp256k1, signing the SHA-256 digest of the payload.
pub struct SignatureManager {
    secp: Secp256k1<secp256k1::All>,
}

impl SignatureManager {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    fn message_for(payload: &[u8]) -> LedgerResult<Message> {
        let digest = Sha256::digest(payload);
        Message::from_digest_slice(&digest)
            .map_err(|e| LedgerError::SignatureError(format!("Invalid message hash: {}", e)))
    }

    pub fn create_signature(
        &self,
        payload: &[u8],
        secret_key: &SecretKey,
    ) -> LedgerResult<Signature> {
        let message = Self::message_for(payload)?;
        Ok(self.secp.sign_ecdsa(&message, secret_key))
    }

    pub fn verify_signature(
        &self,
        payload: &[u8],
        signature: &Signature,
        public_key: &PublicKey,
    ) -> LedgerResult<bool> {
        let message = Self::message_for(payload)?;

        match self.secp.verify_ecdsa(&message, signature, public_key) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// Sign and render the compact signature as hex.
    pub fn sign_hex(&self, payload: &[u8], secret_key: &SecretKey) -> LedgerResult<String> {
        let signature = self.create_signature(payload, secret_key)?;
        Ok(hex::encode(signature.serialize_compact()))
    }

    /// Verify a hex compact signature against a hex compressed public key.
    pub fn verify_hex(
        &self,
        payload: &[u8],
        signature: &str,
        public_key: &str,
    ) -> LedgerResult<bool> {
        let signature_bytes = hex::decode(signature)
            .map_err(|e| LedgerError::SignatureError(format!("Invalid signature hex: {}", e)))?;
        let signature = Signature::from_compact(&signature_bytes).map_err(|e| {
            LedgerError::SignatureError(format!("Invalid signature format: {}", e))
        })?;

        let public_key = public_key.parse::<PublicKey>().map_err(|e| {
            LedgerError::SignatureError(format!("Invalid public key: {}", e))
        })?;

        self.verify_signature(payload, &signature, &public_key)
    }

    pub fn public_key_from_secret(&self, secret_key: &SecretKey) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, secret_key)
    }

    /// Generate a new secret key
    pub fn generate_secret_key(&self) -> LedgerResult<SecretKey> {
        let mut bytes = [0u8; 32];
        // Retry on the negligible chance the bytes fall outside the curve order.
        for _ in 0..8 {
            rand::thread_rng().fill_bytes(&mut bytes);
            if let Ok(key) = SecretKey::from_slice(&bytes) {
                return Ok(key);
            }
        }
        Err(LedgerError::SignatureError(
            "Failed to generate a valid secret key".to_string(),
        ))
    }
}

impl Default for SignatureManager {
    fn default() -> Self {
        Self::new()
    }
}
