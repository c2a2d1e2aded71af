use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceError(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::PersistenceError(format!("I/O error: {}", err))
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Signature error: {0}")]
    SignatureError(String),

    /// A stored line that does not parse as an entry.
    #[error("Corrupt entry at {location}: {reason}")]
    CorruptEntry { location: String, reason: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn missing_field(field: &str) -> Self {
        Self::ValidationError(format!("Missing required field: {}", field))
    }

    pub fn unsupported_algorithm(name: &str) -> Self {
        Self::ConfigurationError(format!(
            "Unsupported hash algorithm: {}. Must be sha256 or sha512",
            name
        ))
    }

    pub fn queue_full(capacity: usize) -> Self {
        Self::PersistenceError(format!(
            "Write queue is full ({} entries pending)",
            capacity
        ))
    }

    /// True for failures of the durable store.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::PersistenceError(_))
    }
}
