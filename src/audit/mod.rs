//! Audit Ledger
//!
//! Tamper-evident, append-only audit trail: every entry carries a content
//! hash of its semantic fields and a chain hash binding it to its
//! predecessor, so any later modification or removal is detectable.

pub mod codec;
pub mod entry;
pub mod event;
pub mod export;
pub mod hasher;
pub mod ledger;
pub mod query;
pub mod report;
pub mod sequencer;
pub mod store;
pub mod validator;
pub mod writer;

pub use codec::{FieldCodec, SensitiveFields};
pub use entry::AuditEntry;
pub use event::{AuditEvent, FieldChange};
pub use export::{
    merkle_root, verify_segment, ChainSegment, SegmentExporter, SegmentVerification,
};
pub use hasher::{EntryHasher, HashAlgorithm};
pub use ledger::{recover_chain_state, AuditLedger, RecoveredState};
pub use query::{QueryEngine, SearchCriteria, SearchResult, SortOrder};
pub use report::{ComplianceReport, ComplianceReporter, ConfigSnapshot, ReportPeriod};
pub use sequencer::{ChainSequencer, Linkage, SequencerGuard};
pub use store::{
    skip_corrupt, AuditStore, BatchError, ChainState, EntryFilter, EntryIter, FileStore, MemoryStore,
};
pub use validator::{IntegrityValidator, Violation, ViolationReport, ViolationType};
pub use writer::{WritePath, WriteStats};
