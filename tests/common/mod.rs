#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use audit_ledger::audit::store::{BatchError, EntryIter};
use audit_ledger::audit::{AuditEntry, AuditEvent, AuditLedger, AuditStore, ChainState, EntryFilter, MemoryStore};
use audit_ledger::config::{LedgerConfig, WriteMode};
use audit_ledger::crypto::StaticKeyProvider;
use audit_ledger::{LedgerError, LedgerResult};
use serde_json::json;

/// Sync-mode configuration rooted at `dir`.
pub fn sync_config(dir: &Path) -> LedgerConfig {
    LedgerConfig {
        ledger_id: "test-ledger".to_string(),
        storage_dir: dir.to_path_buf(),
        write_mode: WriteMode::Sync,
        ..LedgerConfig::default()
    }
}

/// Async-mode configuration with a long interval so tests drive flushes.
pub fn async_config(batch_size: usize) -> LedgerConfig {
    LedgerConfig {
        ledger_id: "test-ledger".to_string(),
        write_mode: WriteMode::Async,
        batch_size,
        flush_interval_ms: 60_000,
        queue_capacity: batch_size * 4,
        ..LedgerConfig::default()
    }
}

pub fn data_change(user: &str, action: &str) -> AuditEvent {
    AuditEvent::new("data_change", "sample", "S-100", user, action)
        .with_detail("instrument", json!("ABI-3730"))
}

pub async fn open_memory(config: LedgerConfig, store: Arc<dyn AuditStore>) -> AuditLedger {
    AuditLedger::open(config, store, &StaticKeyProvider::none())
        .await
        .expect("Failed to open ledger")
}

/// Create, update and delete on one resource by two users.
pub async fn log_lifecycle(ledger: &AuditLedger) -> Vec<String> {
    let mut ids = Vec::new();
    for (user, action) in [("u1", "create"), ("u2", "update"), ("u1", "delete")] {
        ids.push(ledger.log(data_change(user, action)).await.expect("log failed"));
    }
    ids
}

/// Memory store that fails on demand.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_appends: AtomicBool,
    /// Batch writes persist this many entries and then fail, while armed.
    batch_cutoff: AtomicUsize,
    fail_batches: AtomicBool,
    fail_checkpoints: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_batches_after(&self, cutoff: Option<usize>) {
        match cutoff {
            Some(n) => {
                self.batch_cutoff.store(n, Ordering::SeqCst);
                self.fail_batches.store(true, Ordering::SeqCst);
            }
            None => self.fail_batches.store(false, Ordering::SeqCst),
        }
    }

    pub fn fail_checkpoints(&self, fail: bool) {
        self.fail_checkpoints.store(fail, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.snapshot()
    }

    fn injected() -> LedgerError {
        LedgerError::PersistenceError("injected failure".to_string())
    }
}

impl AuditStore for FlakyStore {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.append(entry)
    }

    fn append_batch(&self, entries: &[AuditEntry]) -> Result<(), BatchError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            let cutoff = self.batch_cutoff.load(Ordering::SeqCst).min(entries.len());
            self.inner.append_batch(&entries[..cutoff])?;
            return Err(BatchError {
                persisted: cutoff,
                error: Self::injected(),
            });
        }
        self.inner.append_batch(entries)
    }

    fn checkpoint(&self, state: &ChainState) -> LedgerResult<()> {
        if self.fail_checkpoints.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.checkpoint(state)
    }

    fn load_checkpoint(&self) -> LedgerResult<Option<ChainState>> {
        self.inner.load_checkpoint()
    }

    fn read_range<'a>(&'a self, filter: &EntryFilter) -> LedgerResult<EntryIter<'a>> {
        self.inner.read_range(filter)
    }
}
