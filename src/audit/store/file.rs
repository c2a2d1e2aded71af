//! File-backed store
//!
//! Layout under the root directory:
//!
//! ```text
//! entries/2026-05-01.jsonl   one JSON entry per line, one file per UTC day
//! chain_state.json           latest checkpoint, replaced via temp + rename
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use super::{AuditStore, BatchError, ChainState, EntryFilter, EntryIter};
use crate::audit::entry::AuditEntry;
use crate::error::{LedgerError, LedgerResult};

const ENTRIES_DIR: &str = "entries";
const STATE_FILE: &str = "chain_state.json";
const STATE_TEMP_FILE: &str = "chain_state.json.tmp";
const SEGMENT_EXT: &str = "jsonl";
/// Bytes read per step when scanning back for the last complete line.
const TAIL_SCAN_CHUNK: u64 = 4096;

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    entries_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> LedgerResult<Self> {
        let root = root.as_ref().to_path_buf();
        let entries_dir = root.join(ENTRIES_DIR);
        fs::create_dir_all(&entries_dir).map_err(|e| {
            LedgerError::PersistenceError(format!(
                "Failed to create ledger directory {:?}: {}",
                entries_dir, e
            ))
        })?;

        Ok(Self {
            root,
            entries_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn segment_path(&self, timestamp: &DateTime<Utc>) -> PathBuf {
        self.entries_dir
            .join(format!("{}.{}", timestamp.format("%Y-%m-%d"), SEGMENT_EXT))
    }

    /// Day segments present on disk, oldest first.
    pub fn segments(&self) -> LedgerResult<Vec<(NaiveDate, PathBuf)>> {
        let mut segments = Vec::new();
        for dir_entry in fs::read_dir(&self.entries_dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_EXT) {
                continue;
            }
            let day = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok());
            match day {
                Some(day) => segments.push((day, path)),
                None => warn!("Ignoring unrecognised segment file {:?}", path),
            }
        }
        segments.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(segments)
    }

    /// Append one line, truncating back to the previous length if the write
    /// fails so a torn line never survives.
    fn write_line(&self, entry: &AuditEntry) -> LedgerResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let path = self.segment_path(&entry.timestamp);
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                LedgerError::PersistenceError(format!("Failed to open segment {:?}: {}", path, e))
            })?;
        let previous_len = trim_torn_tail(&mut file, &path)?;

        if let Err(e) = file.write_all(&line).and_then(|_| file.sync_data()) {
            if let Err(truncate_err) = file.set_len(previous_len) {
                warn!(
                    "Failed to truncate torn write in {:?}: {}",
                    path, truncate_err
                );
            }
            return Err(LedgerError::PersistenceError(format!(
                "Failed to write to segment {:?}: {}",
                path, e
            )));
        }

        Ok(())
    }
}

impl AuditStore for FileStore {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_line(entry)?;
        debug!("Appended audit entry: {}", entry.summary());
        Ok(())
    }

    fn append_batch(&self, entries: &[AuditEntry]) -> Result<(), BatchError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        for (persisted, entry) in entries.iter().enumerate() {
            if let Err(error) = self.write_line(entry) {
                return Err(BatchError { persisted, error });
            }
        }
        debug!("Appended batch of {} audit entries", entries.len());
        Ok(())
    }

    fn checkpoint(&self, state: &ChainState) -> LedgerResult<()> {
        let temp_path = self.root.join(STATE_TEMP_FILE);
        let state_path = self.root.join(STATE_FILE);
        let content = serde_json::to_vec_pretty(state)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| {
                LedgerError::PersistenceError(format!("Failed to create temp checkpoint: {}", e))
            })?;
        file.write_all(&content)?;
        file.sync_all()?;

        fs::rename(&temp_path, &state_path).map_err(|e| {
            LedgerError::PersistenceError(format!("Failed to commit checkpoint: {}", e))
        })?;

        // fsync the directory so the rename itself is durable
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    fn load_checkpoint(&self) -> LedgerResult<Option<ChainState>> {
        let state_path = self.root.join(STATE_FILE);
        if !state_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&state_path).map_err(|e| {
            LedgerError::PersistenceError(format!("Failed to read checkpoint: {}", e))
        })?;
        let state = serde_json::from_str(&content).map_err(|e| {
            LedgerError::PersistenceError(format!("Corrupt checkpoint {:?}: {}", state_path, e))
        })?;
        Ok(Some(state))
    }

    fn read_range<'a>(&'a self, filter: &EntryFilter) -> LedgerResult<EntryIter<'a>> {
        let pending = self
            .segments()?
            .into_iter()
            .filter(|(day, _)| filter.covers_day(*day))
            .map(|(_, path)| path)
            .collect();

        Ok(Box::new(SegmentReader {
            pending,
            current: Vec::new().into_iter(),
            filter: filter.clone(),
        }))
    }
}

/// Cut an unterminated trailing line left by an interrupted write, so the
/// next append starts on a fresh line. Returns the resulting length.
fn trim_torn_tail(file: &mut File, path: &Path) -> LedgerResult<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut end = len;
    let keep = loop {
        if end == 0 {
            break 0;
        }
        let start = end.saturating_sub(TAIL_SCAN_CHUNK);
        let mut chunk = vec![0u8; (end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;
        if let Some(pos) = chunk.iter().rposition(|b| *b == b'\n') {
            break start + pos as u64 + 1;
        }
        end = start;
    };

    warn!(
        "Discarding {} bytes of interrupted write at the end of {:?}",
        len - keep,
        path
    );
    file.set_len(keep).map_err(|e| {
        LedgerError::PersistenceError(format!("Failed to repair segment {:?}: {}", path, e))
    })?;
    file.sync_data()?;
    Ok(keep)
}

/// Walks day segments one at a time, yielding matching entries.
struct SegmentReader {
    pending: VecDeque<PathBuf>,
    current: std::vec::IntoIter<LedgerResult<AuditEntry>>,
    filter: EntryFilter,
}

impl Iterator for SegmentReader {
    type Item = LedgerResult<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.current.next() {
                Some(Ok(entry)) if !self.filter.matches(&entry) => continue,
                Some(item) => return Some(item),
                None => {
                    let path = self.pending.pop_front()?;
                    self.current = read_segment(&path).into_iter();
                }
            }
        }
    }
}

/// Parse the newline-terminated lines of a segment. A trailing partial
/// line belongs to a write still in flight and is not yet visible.
fn read_segment(path: &Path) -> Vec<LedgerResult<AuditEntry>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return vec![Err(LedgerError::PersistenceError(format!(
                "Failed to read segment {:?}: {}",
                path, e
            )))]
        }
    };

    let complete = match content.rfind('\n') {
        Some(end) => &content[..=end],
        None => "",
    };

    complete
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_num, line)| {
            serde_json::from_str::<AuditEntry>(line).map_err(|e| LedgerError::CorruptEntry {
                location: format!("{}:{}", path.display(), line_num + 1),
                reason: e.to_string(),
            })
        })
        .collect()
}
