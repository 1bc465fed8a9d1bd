use bo_sync_core::api::ListOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Per-call knobs shared by every reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(default)]
    pub force_update: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default)]
    pub modified_after: Option<DateTime<Utc>>,
    /// Filters forwarded untouched to source list calls.
    #[serde(default)]
    pub params: ListOptions,
}

fn default_batch_size() -> i64 {
    DEFAULT_BATCH_SIZE
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force_update: false,
            batch_size: DEFAULT_BATCH_SIZE,
            modified_after: None,
            params: ListOptions::new(),
        }
    }
}

impl SyncOptions {
    pub fn forced() -> Self {
        Self::default().force_update(true)
    }

    pub fn force_update(mut self, force: bool) -> Self {
        self.force_update = force;
        self
    }

    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn modified_after(mut self, after: Option<DateTime<Utc>>) -> Self {
        self.modified_after = after;
        self
    }

    /// Splits a flat parameter map into typed options.
    ///
    /// `forceUpdate`, `batchSize` and `modifiedAfter` are consumed; every
    /// other key is kept as a list filter.
    pub fn from_params(mut params: ListOptions) -> Result<Self> {
        let mut options = SyncOptions::default();

        if let Some(force) = params.remove("forceUpdate") {
            options.force_update = force.trim().eq_ignore_ascii_case("true");
        }
        if let Some(batch_size) = params.remove("batchSize") {
            options.batch_size = batch_size.trim().parse().map_err(|_| {
                SyncError::validation(format!("batchSize is not a number: {}", batch_size))
            })?;
        }
        if let Some(after) = params.remove("modifiedAfter") {
            let parsed = DateTime::parse_from_rfc3339(after.trim()).map_err(|e| {
                SyncError::validation(format!("modifiedAfter is not RFC 3339 ({}): {}", e, after))
            })?;
            options.modified_after = Some(parsed.with_timezone(&Utc));
        }

        options.params = params;
        Ok(options)
    }
}

/// Which source objects a reconcile call considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Ids(Vec<String>),
    Folders(Vec<String>),
}

impl Selector {
    /// Entries without a `/` are object IDs; anything else names folders.
    pub fn classify(entries: Option<Vec<String>>) -> Self {
        match entries {
            None => Selector::All,
            Some(entries) if entries.is_empty() => Selector::All,
            Some(entries) if entries.iter().all(|e| !e.contains('/')) => Selector::Ids(entries),
            Some(entries) => Selector::Folders(entries),
        }
    }

    /// Folder scope, for callers that already know the entries are folders.
    pub fn folders(folder_ids: Option<Vec<String>>) -> Self {
        match folder_ids {
            Some(ids) if !ids.is_empty() => Selector::Folders(ids),
            _ => Selector::All,
        }
    }
}
