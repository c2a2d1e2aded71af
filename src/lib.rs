pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;

pub use audit::{
    AuditEntry, AuditEvent, AuditLedger, AuditStore, ChainSegment, ComplianceReport, FieldChange,
    FileStore, MemoryStore, ReportPeriod, SearchCriteria, SearchResult, ViolationReport,
};
pub use config::{LedgerConfig, ValidationMode, WriteMode};
pub use error::{LedgerError, LedgerResult};
