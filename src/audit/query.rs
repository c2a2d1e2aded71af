//! Query Engine
//!
//! Predicate search over persisted entries with transparent decryption.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::audit::codec::FieldCodec;
use crate::audit::entry::AuditEntry;
use crate::audit::store::{skip_corrupt, AuditStore, EntryFilter};
use crate::error::LedgerResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Newest first
    #[default]
    Desc,
    Asc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchCriteria {
    #[serde(flatten)]
    pub filter: EntryFilter,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order: SortOrder,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.filter.user_id = Some(user_id.into());
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.filter.resource_type = Some(resource_type.into());
        self.filter.resource_id = Some(resource_id.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.filter.event_type = Some(event_type.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.filter.action = Some(action.into());
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.filter.outcome = Some(outcome.into());
        self
    }

    pub fn between(
        mut self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Self {
        self.filter.start_date = start;
        self.filter.end_date = end;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.order = SortOrder::Asc;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub results: Vec<AuditEntry>,
    /// Matches before pagination
    pub total: usize,
}

pub struct QueryEngine {
    store: Arc<dyn AuditStore>,
    codec: Arc<FieldCodec>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn AuditStore>, codec: Arc<FieldCodec>) -> Self {
        Self { store, codec }
    }

    pub fn search(&self, criteria: &SearchCriteria) -> LedgerResult<SearchResult> {
        let mut matches = self
            .store
            .read_range(&criteria.filter)?
            .filter_map(skip_corrupt)
            .collect::<LedgerResult<Vec<AuditEntry>>>()?;

        // Stable sort keeps append order for equal timestamps.
        match criteria.order {
            SortOrder::Asc => matches.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
            SortOrder::Desc => matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        }

        let total = matches.len();
        let offset = criteria.offset.unwrap_or(0);
        let limit = criteria.limit.unwrap_or(usize::MAX);

        let results: Vec<AuditEntry> = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|mut entry| {
                self.codec.reveal_entry(&mut entry);
                entry
            })
            .collect();

        debug!("Search matched {} entries, returning {}", total, results.len());
        Ok(SearchResult { results, total })
    }
}
