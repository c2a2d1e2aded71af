//! Audit Ledger
//!
//! Ties the components together: events are validated, sealed, sequenced
//! and handed to the write path; reads go through the query engine,
//! validator, reporter and exporter.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::codec::FieldCodec;
use crate::audit::entry::AuditEntry;
use crate::audit::event::AuditEvent;
use crate::audit::export::{ChainSegment, SegmentExporter, SegmentVerification};
use crate::audit::hasher::EntryHasher;
use crate::audit::query::{QueryEngine, SearchCriteria, SearchResult};
use crate::audit::report::{ComplianceReport, ComplianceReporter, ConfigSnapshot, ReportPeriod};
use crate::audit::sequencer::ChainSequencer;
use crate::audit::store::{skip_corrupt, AuditStore, ChainState, EntryFilter, FileStore};
use crate::audit::validator::{IntegrityValidator, ViolationReport};
use crate::audit::writer::{WritePath, WriteStats};
use crate::config::{LedgerConfig, WriteMode};
use crate::crypto::{KeyProvider, StaticKeyProvider};
use crate::error::LedgerResult;

pub struct AuditLedger {
    config: LedgerConfig,
    hasher: EntryHasher,
    codec: Arc<FieldCodec>,
    sequencer: Arc<ChainSequencer>,
    writer: WritePath,
    query: Arc<QueryEngine>,
    validator: Arc<IntegrityValidator>,
    reporter: ComplianceReporter,
    exporter: SegmentExporter,
}

impl AuditLedger {
    /// Open a ledger over `store`, reconciling chain state with what is
    /// actually durable.
    pub async fn open(
        config: LedgerConfig,
        store: Arc<dyn AuditStore>,
        keys: &dyn KeyProvider,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let hasher = EntryHasher::new(config.hash_algorithm()?);
        let codec = Arc::new(FieldCodec::new(keys, config.encryption_enabled));

        let recovered = recover_chain_state(store.as_ref(), &hasher, &config.ledger_id)?;
        let start_hash = recovered.state.start_hash.clone();
        info!(
            "Opened audit ledger {} with {} entries",
            config.ledger_id, recovered.state.total_entries
        );

        let sequencer = Arc::new(ChainSequencer::new(
            hasher,
            recovered.state,
            recovered.last_timestamp,
        ));
        let writer = WritePath::new(&config, Arc::clone(&store), Arc::clone(&sequencer));
        let query = Arc::new(QueryEngine::new(Arc::clone(&store), Arc::clone(&codec)));
        let validator = Arc::new(IntegrityValidator::new(
            Arc::clone(&store),
            Arc::clone(&codec),
            hasher,
            config.validation_mode,
            start_hash.clone(),
        ));
        let reporter = ComplianceReporter::new(
            Arc::clone(&query),
            Arc::clone(&validator),
            ConfigSnapshot::new(&config, codec.encryption_active(), codec.can_sign()),
        );
        let exporter = SegmentExporter::new(store, Arc::clone(&codec), hasher, start_hash);

        Ok(Self {
            config,
            hasher,
            codec,
            sequencer,
            writer,
            query,
            validator,
            reporter,
            exporter,
        })
    }

    /// Open a file-backed ledger at `config.storage_dir` with keys taken
    /// from the configuration.
    pub async fn open_file_backed(config: LedgerConfig) -> LedgerResult<Self> {
        let store: Arc<dyn AuditStore> = Arc::new(FileStore::open(&config.storage_dir)?);
        let keys = StaticKeyProvider::from_config(&config)?;
        Self::open(config, store, &keys).await
    }

    /// Record an event and return its entry id.
    ///
    /// In sync mode the id is returned only once the entry and checkpoint
    /// are durable. In async mode it is returned once the entry is linked
    /// and queued; later write failures are retried in the background and
    /// are not reported back to the caller.
    pub async fn log(&self, event: AuditEvent) -> LedgerResult<String> {
        event.validate()?;

        let mut entry = AuditEntry::from_event(event, self.config.mask_pii);
        let sealed = self.codec.protect(&mut entry)?;

        let mut guard = self.sequencer.lock().await;
        self.writer.reserve().await?;

        entry.timestamp = guard.next_timestamp(Utc::now());
        let details = sealed.as_ref().map_or(&entry.details, |fields| &fields.details);
        let content_hash = self.hasher.content_hash(&entry.content_fields_with(details));
        entry.content_hash = content_hash;

        let linkage = guard.next_linkage(&entry.content_hash);
        entry.previous_hash = linkage.previous_hash.clone();
        entry.chain_hash = linkage.chain_hash.clone();

        let id = entry.id.clone();
        debug!("Sequenced audit entry: {}", entry.summary());
        self.writer.persist(entry, &mut guard, &linkage).await?;
        Ok(id)
    }

    pub fn search(&self, criteria: &SearchCriteria) -> LedgerResult<SearchResult> {
        self.query.search(criteria)
    }

    pub fn validate(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> LedgerResult<ViolationReport> {
        self.validator.validate(start, end)
    }

    pub fn report(&self, period: ReportPeriod) -> LedgerResult<ComplianceReport> {
        self.reporter.report(period)
    }

    pub fn report_at(
        &self,
        period: ReportPeriod,
        reference: DateTime<Utc>,
    ) -> LedgerResult<ComplianceReport> {
        self.reporter.report_at(period, reference)
    }

    pub fn export_segment(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> LedgerResult<ChainSegment> {
        self.exporter.export(start, end)
    }

    pub fn verify_segment(&self, segment: &ChainSegment) -> SegmentVerification {
        self.exporter.verify(segment)
    }

    /// Last durable chain state.
    pub fn chain_state(&self) -> ChainState {
        self.sequencer.durable_state()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn write_mode(&self) -> WriteMode {
        self.writer.mode()
    }

    pub async fn flush(&self) -> LedgerResult<usize> {
        self.writer.flush().await
    }

    pub async fn stats(&self) -> WriteStats {
        self.writer.stats().await
    }

    /// Stop background work, draining queued entries best-effort. Returns
    /// the number of entries that could not be persisted.
    pub async fn shutdown(&self) -> usize {
        self.writer.shutdown().await
    }
}

/// Chain state re-derived from durable storage.
#[derive(Debug, Clone)]
pub struct RecoveredState {
    pub state: ChainState,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Rebuild chain state from the store. The tip always comes from the
/// entries actually on disk; the checkpoint only supplies the genesis hash
/// and is rewritten when it disagrees. Unparseable lines are skipped so a
/// damaged segment never keeps the ledger from opening; `validate` reports
/// them.
pub fn recover_chain_state(
    store: &dyn AuditStore,
    hasher: &EntryHasher,
    ledger_id: &str,
) -> LedgerResult<RecoveredState> {
    let checkpoint = store.load_checkpoint()?;

    let mut count: u64 = 0;
    let mut first: Option<(DateTime<Utc>, String)> = None;
    let mut last: Option<(DateTime<Utc>, String)> = None;

    for item in store.read_range(&EntryFilter::all())?.filter_map(skip_corrupt) {
        let entry = item?;
        count += 1;

        if first.as_ref().map_or(true, |(ts, _)| entry.timestamp < *ts) {
            first = Some((entry.timestamp, entry.previous_hash.clone()));
        }
        if last.as_ref().map_or(true, |(ts, _)| entry.timestamp >= *ts) {
            last = Some((entry.timestamp, entry.chain_hash));
        }
    }

    let start_hash = match (&checkpoint, &first) {
        (Some(checkpoint), _) => checkpoint.start_hash.clone(),
        (None, Some((_, previous_hash))) => {
            warn!("No checkpoint found; taking genesis hash from the first entry");
            previous_hash.clone()
        }
        (None, None) => {
            let start_hash = hasher.genesis_hash(ledger_id, &Utc::now());
            let state = ChainState::genesis(start_hash);
            store.checkpoint(&state)?;
            info!("Initialized new audit ledger {}", ledger_id);
            return Ok(RecoveredState {
                state,
                last_timestamp: None,
            });
        }
    };

    let (last_hash, last_timestamp) = match last {
        Some((ts, hash)) => (hash, Some(ts)),
        None => (start_hash.clone(), None),
    };

    let derived = ChainState {
        start_hash,
        last_hash,
        total_entries: count,
        updated_at: Utc::now(),
    };

    let in_sync = checkpoint.as_ref().map_or(false, |cp| {
        cp.last_hash == derived.last_hash && cp.total_entries == derived.total_entries
    });

    if in_sync {
        if let Some(checkpoint) = checkpoint {
            return Ok(RecoveredState {
                state: checkpoint,
                last_timestamp,
            });
        }
    }

    if let Some(cp) = &checkpoint {
        warn!(
            "Checkpoint out of date (checkpoint: {} entries, tip {}; durable: {} entries, tip {}); rewriting",
            cp.total_entries, cp.last_hash, derived.total_entries, derived.last_hash
        );
    }
    store.checkpoint(&derived)?;

    Ok(RecoveredState {
        state: derived,
        last_timestamp,
    })
}
