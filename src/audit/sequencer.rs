//! Chain Sequencer
//!
//! The single authority over chain linkage. Two pieces of state live here:
//!
//! - the cursor: the optimistic `last_hash` handed to the next entry. It
//!   moves forward as soon as linkage is assigned, before anything is
//!   durable, and is guarded by an async mutex that every `log` call holds
//!   while it is sequenced.
//! - the durable [`ChainState`]: advanced by `commit` only after the store
//!   has confirmed a write.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::audit::hasher::EntryHasher;
use crate::audit::store::ChainState;

/// Linkage assigned to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linkage {
    pub previous_hash: String,
    pub chain_hash: String,
}

#[derive(Debug)]
struct Cursor {
    last_hash: String,
    last_timestamp: Option<DateTime<Utc>>,
    sequenced: u64,
}

#[derive(Debug)]
pub struct ChainSequencer {
    hasher: EntryHasher,
    cursor: AsyncMutex<Cursor>,
    durable: Mutex<ChainState>,
}

impl ChainSequencer {
    /// Resume from a durable state. The cursor starts at the durable tip,
    /// discarding anything that was only ever in memory.
    pub fn new(hasher: EntryHasher, state: ChainState, last_timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            hasher,
            cursor: AsyncMutex::new(Cursor {
                last_hash: state.last_hash.clone(),
                last_timestamp,
                sequenced: state.total_entries,
            }),
            durable: Mutex::new(state),
        }
    }

    /// Enter the sequencing critical section.
    pub async fn lock(&self) -> SequencerGuard<'_> {
        SequencerGuard {
            cursor: self.cursor.lock().await,
            hasher: &self.hasher,
        }
    }

    /// Advance the durable state after `persisted` entries ending in
    /// `chain_hash` were confirmed by the store.
    pub fn commit(&self, chain_hash: &str, persisted: u64) -> ChainState {
        let mut durable = self.durable.lock().unwrap_or_else(PoisonError::into_inner);
        durable.last_hash = chain_hash.to_string();
        durable.total_entries += persisted;
        durable.updated_at = Utc::now();
        durable.clone()
    }

    pub fn durable_state(&self) -> ChainState {
        self.durable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn start_hash(&self) -> String {
        self.durable_state().start_hash
    }
}

/// Exclusive access to the cursor. Dropping it lets the next writer in.
pub struct SequencerGuard<'a> {
    cursor: MutexGuard<'a, Cursor>,
    hasher: &'a EntryHasher,
}

impl SequencerGuard<'_> {
    /// Link an entry with the given content hash after the current tip.
    pub fn next_linkage(&mut self, content_hash: &str) -> Linkage {
        let previous_hash = std::mem::take(&mut self.cursor.last_hash);
        let chain_hash = self.hasher.chain_hash(content_hash, &previous_hash);
        self.cursor.last_hash = chain_hash.clone();
        self.cursor.sequenced += 1;

        Linkage {
            previous_hash,
            chain_hash,
        }
    }

    /// Strictly increasing timestamp, so timestamp order equals chain order.
    pub fn next_timestamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let timestamp = match self.cursor.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.cursor.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Undo the most recent linkage after its entry failed to persist.
    pub fn rewind(&mut self, linkage: &Linkage) {
        if self.cursor.last_hash == linkage.chain_hash {
            self.cursor.last_hash = linkage.previous_hash.clone();
            self.cursor.sequenced = self.cursor.sequenced.saturating_sub(1);
        }
    }

    pub fn last_hash(&self) -> &str {
        &self.cursor.last_hash
    }

    /// Entries linked so far, durable or not.
    pub fn sequenced(&self) -> u64 {
        self.cursor.sequenced
    }
}
