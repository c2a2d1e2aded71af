//! Ledger configuration
//!
//! Settings are layered: built-in defaults, then an optional config file
//! (format picked from its extension), then `AUDIT_LEDGER_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::audit::hasher::HashAlgorithm;
use crate::error::{LedgerError, LedgerResult};

const ENV_PREFIX: &str = "AUDIT_LEDGER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// `log` returns only after the entry and checkpoint are durable.
    Sync,
    /// `log` returns after linkage; a background loop persists in batches.
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Single pass that carries each entry's stored chain hash forward.
    CarriedStoredHash,
    /// Replays from genesis carrying recomputed chain hashes.
    FullRederivation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub ledger_id: String,
    pub storage_dir: PathBuf,
    pub write_mode: WriteMode,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub queue_capacity: usize,
    pub hash_algorithm: String,
    pub validation_mode: ValidationMode,
    pub encryption_enabled: bool,
    pub encryption_key: Option<String>,
    pub signing_key: Option<String>,
    pub mask_pii: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_id: uuid::Uuid::new_v4().to_string(),
            storage_dir: PathBuf::from("./audit-ledger"),
            write_mode: WriteMode::Sync,
            batch_size: 100,
            flush_interval_ms: 1000,
            queue_capacity: 10_000,
            hash_algorithm: "sha256".to_string(),
            validation_mode: ValidationMode::CarriedStoredHash,
            encryption_enabled: false,
            encryption_key: None,
            signing_key: None,
            mask_pii: true,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> LedgerResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!("Loading ledger configuration from: {:?}", path);
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: LedgerConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.ledger_id.trim().is_empty() {
            return Err(LedgerError::ConfigurationError(
                "ledger_id must not be empty".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(LedgerError::ConfigurationError(
                "batch_size must be at least 1".to_string(),
            ));
        }

        if self.queue_capacity < self.batch_size {
            return Err(LedgerError::ConfigurationError(format!(
                "queue_capacity ({}) must be at least batch_size ({})",
                self.queue_capacity, self.batch_size
            )));
        }

        if self.flush_interval_ms == 0 {
            return Err(LedgerError::ConfigurationError(
                "flush_interval_ms must be at least 1".to_string(),
            ));
        }

        self.hash_algorithm()?;

        if let Some(key) = &self.encryption_key {
            decode_key(key, "encryption_key")?;
        }
        if let Some(key) = &self.signing_key {
            decode_key(key, "signing_key")?;
        }

        Ok(())
    }

    pub fn hash_algorithm(&self) -> LedgerResult<HashAlgorithm> {
        self.hash_algorithm.parse()
    }

    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.flush_interval_ms)
    }
}

/// Decode a 32-byte hex key, as used for both encryption and signing keys.
pub(crate) fn decode_key(hex_key: &str, name: &str) -> LedgerResult<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| {
        LedgerError::ConfigurationError(format!("{} is not valid hex: {}", name, e))
    })?;

    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        LedgerError::ConfigurationError(format!(
            "{} must be 32 bytes, got {}",
            name,
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.write_mode, WriteMode::Sync);
        assert_eq!(config.hash_algorithm().unwrap(), HashAlgorithm::Sha256);
    }

    #[test]
    fn test_rejects_capacity_below_batch_size() {
        let config = LedgerConfig {
            batch_size: 50,
            queue_capacity: 10,
            ..LedgerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LedgerError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let config = LedgerConfig {
            hash_algorithm: "md5".to_string(),
            ..LedgerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LedgerError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_rejects_short_key() {
        let config = LedgerConfig {
            encryption_key: Some("abcd".to_string()),
            ..LedgerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "ledger_id = \"ledger-test\"").unwrap();
        writeln!(file, "write_mode = \"async\"").unwrap();
        writeln!(file, "batch_size = 5").unwrap();
        writeln!(file, "validation_mode = \"full_rederivation\"").unwrap();
        drop(file);

        let config = LedgerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.ledger_id, "ledger-test");
        assert_eq!(config.write_mode, WriteMode::Async);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.validation_mode, ValidationMode::FullRederivation);
        assert!(config.mask_pii);
    }
}
