//! In-process store, for embedding and tests. Nothing survives the process.

use std::sync::{PoisonError, RwLock};

use super::{AuditStore, BatchError, ChainState, EntryFilter, EntryIter};
use crate::audit::entry::AuditEntry;
use crate::error::LedgerResult;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Vec<AuditEntry>>,
    checkpoint: RwLock<Option<ChainState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with entries exported from elsewhere, e.g. a relocated
    /// archive segment.
    pub fn from_entries(entries: Vec<AuditEntry>, checkpoint: Option<ChainState>) -> Self {
        Self {
            entries: RwLock::new(entries),
            checkpoint: RwLock::new(checkpoint),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored entry in append order.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditStore for MemoryStore {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    fn append_batch(&self, entries: &[AuditEntry]) -> Result<(), BatchError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(entries);
        Ok(())
    }

    fn checkpoint(&self, state: &ChainState) -> LedgerResult<()> {
        *self.checkpoint.write().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }

    fn load_checkpoint(&self) -> LedgerResult<Option<ChainState>> {
        Ok(self
            .checkpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn read_range<'a>(&'a self, filter: &EntryFilter) -> LedgerResult<EntryIter<'a>> {
        let matching: Vec<AuditEntry> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        Ok(Box::new(matching.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::AuditEvent;

    #[test]
    fn test_read_range_is_a_snapshot() {
        let store = MemoryStore::new();
        let entry = AuditEntry::from_event(
            AuditEvent::new("data_access", "sample", "S-1", "u1", "read"),
            true,
        );
        store.append(&entry).unwrap();

        let mut iter = store.read_range(&EntryFilter::all()).unwrap();
        store.append(&entry).unwrap();

        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert_eq!(store.len(), 2);
    }
}
