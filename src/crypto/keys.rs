//! Key Provider
//!
//! Supplies the symmetric key used for sensitive-field encryption and the
//! secp256k1 key used to sign exported chain segments. Missing keys reduce
//! guarantees; they are never an error.

use secp256k1::SecretKey;
use tracing::warn;

use crate::config::{decode_key, LedgerConfig};
use crate::error::{LedgerError, LedgerResult};

pub trait KeyProvider: Send + Sync {
    fn encryption_key(&self) -> Option<[u8; 32]>;
    fn signing_key(&self) -> Option<SecretKey>;
}

/// Keys fixed at construction, typically decoded from [`LedgerConfig`].
#[derive(Clone, Default)]
pub struct StaticKeyProvider {
    encryption_key: Option<[u8; 32]>,
    signing_key: Option<SecretKey>,
}

impl StaticKeyProvider {
    pub fn new(encryption_key: Option<[u8; 32]>, signing_key: Option<SecretKey>) -> Self {
        Self {
            encryption_key,
            signing_key,
        }
    }

    /// No keys at all: plaintext storage, unsigned exports.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_config(config: &LedgerConfig) -> LedgerResult<Self> {
        let encryption_key = match &config.encryption_key {
            Some(key) => Some(decode_key(key, "encryption_key")?),
            None => None,
        };

        let signing_key = match &config.signing_key {
            Some(key) => {
                let bytes = decode_key(key, "signing_key")?;
                Some(SecretKey::from_slice(&bytes).map_err(|e| {
                    LedgerError::ConfigurationError(format!("Invalid signing_key: {}", e))
                })?)
            }
            None => None,
        };

        if config.encryption_enabled && encryption_key.is_none() {
            warn!("Encryption is enabled but no encryption_key is configured; entries will be stored in plaintext");
        }
        if signing_key.is_none() {
            warn!("No signing_key configured; exported chain segments will be unsigned");
        }

        Ok(Self::new(encryption_key, signing_key))
    }
}

impl KeyProvider for StaticKeyProvider {
    fn encryption_key(&self) -> Option<[u8; 32]> {
        self.encryption_key
    }

    fn signing_key(&self) -> Option<SecretKey> {
        self.signing_key
    }
}

impl std::fmt::Debug for StaticKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyProvider")
            .field("encryption_key", &self.encryption_key.map(|_| "<redacted>"))
            .field("signing_key", &self.signing_key.map(|_| "<redacted>"))
            .finish()
    }
}
