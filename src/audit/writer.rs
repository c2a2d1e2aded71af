//! Write Path
//!
//! Persists sequenced entries. In sync mode every `log` call writes and
//! checkpoints before returning. In async mode entries are queued in chain
//! order and a single background loop flushes them in batches, on a timer
//! or as soon as a full batch is waiting.
//!
//! Async callers never see write failures: failed entries go back to the
//! head of the queue and are retried on the next tick. Failures show up in
//! [`WriteStats`] and the logs only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::audit::entry::AuditEntry;
use crate::audit::sequencer::{ChainSequencer, Linkage, SequencerGuard};
use crate::audit::store::{AuditStore, BatchError};
use crate::config::{LedgerConfig, WriteMode};
use crate::error::{LedgerError, LedgerResult};

/// Consecutive failed flushes tolerated while draining on shutdown.
const SHUTDOWN_DRAIN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub flushed_entries: u64,
    pub failed_flushes: u64,
    pub requeued_entries: u64,
    pub queued: usize,
}

struct Flusher {
    store: Arc<dyn AuditStore>,
    sequencer: Arc<ChainSequencer>,
    queue: AsyncMutex<VecDeque<AuditEntry>>,
    wake: Notify,
    flush_lock: AsyncMutex<()>,
    batch_size: usize,
    flushed_entries: AtomicU64,
    failed_flushes: AtomicU64,
    requeued_entries: AtomicU64,
}

impl Flusher {
    async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drain up to one batch into the store. Only one flush runs at a time,
    /// so the store always sees entries in chain order.
    async fn flush_once(&self) -> LedgerResult<usize> {
        let _flushing = self.flush_lock.lock().await;

        let batch: Vec<AuditEntry> = {
            let mut queue = self.queue.lock().await;
            let take = self.batch_size.min(queue.len());
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match self.store.append_batch(&batch) {
            Ok(()) => {
                self.advance(&batch);
                self.flushed_entries
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                debug!("Flushed {} audit entries", batch.len());
                Ok(batch.len())
            }
            Err(BatchError { persisted, error }) => {
                let persisted = persisted.min(batch.len());
                if persisted > 0 {
                    self.advance(&batch[..persisted]);
                    self.flushed_entries
                        .fetch_add(persisted as u64, Ordering::Relaxed);
                }

                let mut remainder = batch;
                let failed = remainder.split_off(persisted);
                let failed_count = failed.len();
                {
                    let mut queue = self.queue.lock().await;
                    for entry in failed.into_iter().rev() {
                        queue.push_front(entry);
                    }
                }

                self.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.requeued_entries
                    .fetch_add(failed_count as u64, Ordering::Relaxed);
                warn!(
                    "Batch flush failed after {} entries, requeued {}: {}",
                    persisted, failed_count, error
                );
                Err(error)
            }
        }
    }

    /// Commit and checkpoint entries the store has confirmed.
    fn advance(&self, persisted: &[AuditEntry]) {
        let Some(last) = persisted.last() else {
            return;
        };
        let state = self
            .sequencer
            .commit(&last.chain_hash, persisted.len() as u64);
        if let Err(e) = self.store.checkpoint(&state) {
            // Entries are durable; recovery re-derives the tip from them.
            error!("Failed to checkpoint chain state: {}", e);
        }
    }
}

pub struct WritePath {
    mode: WriteMode,
    capacity: usize,
    flusher: Arc<Flusher>,
    shutdown_tx: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl WritePath {
    /// Build the write path. In async mode this spawns the flush loop and
    /// must be called from within a tokio runtime.
    pub fn new(
        config: &LedgerConfig,
        store: Arc<dyn AuditStore>,
        sequencer: Arc<ChainSequencer>,
    ) -> Self {
        let flusher = Arc::new(Flusher {
            store,
            sequencer,
            queue: AsyncMutex::new(VecDeque::new()),
            wake: Notify::new(),
            flush_lock: AsyncMutex::new(()),
            batch_size: config.batch_size,
            flushed_entries: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            requeued_entries: AtomicU64::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let flush_task = match config.write_mode {
            WriteMode::Async => {
                info!(
                    "Starting async flush loop (batch size {}, interval {}ms)",
                    config.batch_size, config.flush_interval_ms
                );
                Some(tokio::spawn(run_flush_loop(
                    Arc::clone(&flusher),
                    config.flush_interval(),
                    shutdown_rx,
                )))
            }
            WriteMode::Sync => None,
        };

        Self {
            mode: config.write_mode,
            capacity: config.queue_capacity,
            flusher,
            shutdown_tx,
            flush_task: Mutex::new(flush_task),
        }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Make room for one more entry before linkage is assigned, so a
    /// rejected entry never consumes a link.
    pub async fn reserve(&self) -> LedgerResult<()> {
        if self.mode == WriteMode::Sync || self.flusher.queued().await < self.capacity {
            return Ok(());
        }

        if let Err(e) = self.flusher.flush_once().await {
            warn!("Inline flush on full queue failed: {}", e);
        }

        if self.flusher.queued().await < self.capacity {
            Ok(())
        } else {
            Err(LedgerError::queue_full(self.capacity))
        }
    }

    /// Persist a linked entry. Called while the sequencer guard is held so
    /// durable order matches chain order.
    pub async fn persist(
        &self,
        entry: AuditEntry,
        guard: &mut SequencerGuard<'_>,
        linkage: &Linkage,
    ) -> LedgerResult<()> {
        match self.mode {
            WriteMode::Sync => {
                if let Err(e) = self.flusher.store.append(&entry) {
                    guard.rewind(linkage);
                    return Err(match e {
                        LedgerError::PersistenceError(msg) => LedgerError::PersistenceError(msg),
                        other => LedgerError::PersistenceError(other.to_string()),
                    });
                }

                let state = self.flusher.sequencer.commit(&entry.chain_hash, 1);
                self.flusher
                    .flushed_entries
                    .fetch_add(1, Ordering::Relaxed);
                self.flusher.store.checkpoint(&state).map_err(|e| {
                    LedgerError::PersistenceError(format!(
                        "Entry {} persisted but checkpoint failed: {}",
                        entry.id, e
                    ))
                })
            }
            WriteMode::Async => {
                let queued = {
                    let mut queue = self.flusher.queue.lock().await;
                    queue.push_back(entry);
                    queue.len()
                };
                if queued >= self.flusher.batch_size {
                    self.flusher.wake.notify_one();
                }
                Ok(())
            }
        }
    }

    /// Flush everything queued right now. Returns the number written.
    pub async fn flush(&self) -> LedgerResult<usize> {
        let mut written = 0;
        loop {
            match self.flusher.flush_once().await? {
                0 => return Ok(written),
                n => written += n,
            }
        }
    }

    pub async fn stats(&self) -> WriteStats {
        WriteStats {
            flushed_entries: self.flusher.flushed_entries.load(Ordering::Relaxed),
            failed_flushes: self.flusher.failed_flushes.load(Ordering::Relaxed),
            requeued_entries: self.flusher.requeued_entries.load(Ordering::Relaxed),
            queued: self.flusher.queued().await,
        }
    }

    /// Stop the flush loop and drain the queue best-effort. Returns the
    /// number of entries that could not be persisted.
    pub async fn shutdown(&self) -> usize {
        let _ = self.shutdown_tx.send(true);

        let handle = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Flush loop terminated abnormally: {}", e);
            }
        }

        let mut failures = 0;
        while failures < SHUTDOWN_DRAIN_ATTEMPTS {
            match self.flusher.flush_once().await {
                Ok(0) => break,
                Ok(_) => failures = 0,
                Err(_) => failures += 1,
            }
        }

        let remaining = self.flusher.queued().await;
        if remaining > 0 {
            error!("Shutdown left {} audit entries unpersisted", remaining);
        } else {
            info!("Write path drained");
        }
        remaining
    }
}

async fn run_flush_loop(
    flusher: Arc<Flusher>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = flusher.wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        // Drain batch by batch until the queue is empty or the store fails.
        loop {
            match flusher.flush_once().await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    }

    debug!("Flush loop stopped");
}
