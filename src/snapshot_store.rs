//! Snapshot files on disk.
//!
//! Layout: `<root>/<category>/<YYYY-MM-DD>/<ISO timestamp>_historical_data_<id>.json`,
//! each file a pretty-printed JSON array of [`EnrichedPoolSnapshot`].

use crate::indexer::{DataIndexer, IndexReport};
use crate::types::conversions::{to_date_segment, to_iso_timestamp};
use crate::types::EnrichedPoolSnapshot;
use crate::utils::QUERY_KEY_PREFIX;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Marker between the timestamp and the id in a snapshot file name.
const KEY_MARKER: &str = "_historical_data_";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileNameError {
    #[error("Not a snapshot file: {0}")]
    NotSnapshot(String),
    #[error("Missing timestamp prefix: {0}")]
    MissingTimestamp(String),
    #[error("Missing query key: {0}")]
    MissingKey(String),
}

/// Parts recovered from a snapshot file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFileName {
    /// Leading timestamp exactly as written: ISO-8601, or epoch millis for legacy files.
    pub timestamp_key: String,
    /// Query key including the `historical_data_` prefix.
    pub query_key: String,
}

impl SnapshotFileName {
    pub fn parse(file_name: &str) -> Result<Self, FileNameError> {
        let stem = file_name
            .strip_suffix(".json")
            .ok_or_else(|| FileNameError::NotSnapshot(file_name.to_string()))?;
        let split = stem
            .find(KEY_MARKER)
            .ok_or_else(|| FileNameError::NotSnapshot(file_name.to_string()))?;

        let timestamp_key = &stem[..split];
        let id = &stem[split + KEY_MARKER.len()..];
        if timestamp_key.is_empty() {
            return Err(FileNameError::MissingTimestamp(file_name.to_string()));
        }
        if id.is_empty() {
            return Err(FileNameError::MissingKey(file_name.to_string()));
        }

        Ok(Self {
            timestamp_key: timestamp_key.to_string(),
            query_key: format!("{}{}", QUERY_KEY_PREFIX, id),
        })
    }

    /// True for the flat `<epochMillis>_historical_data_<id>.json` form.
    pub fn is_legacy_epoch(&self) -> bool {
        self.timestamp_key.chars().all(|c| c.is_ascii_digit())
    }
}

/// `<ISO timestamp>_<query key>.json`
pub fn snapshot_file_name(date: &DateTime<Utc>, query_key: &str) -> String {
    format!("{}_{}.json", to_iso_timestamp(date), query_key)
}

/// Directory holding one day's snapshots.
pub fn date_dir(category_dir: &Path, date: &DateTime<Utc>) -> PathBuf {
    category_dir.join(to_date_segment(date))
}

pub fn is_date_dir_name(name: &str) -> bool {
    name.len() == 10 && NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok()
}

/// Outcome of one `store_snapshot` call. Each half fails independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreOutcome {
    pub path: Option<PathBuf>,
    pub index: Option<IndexReport>,
}

pub struct SnapshotStore {
    root: PathBuf,
    indexer: Arc<DataIndexer>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, indexer: Arc<DataIndexer>) -> Self {
        Self {
            root: root.into(),
            indexer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn indexer(&self) -> &Arc<DataIndexer> {
        &self.indexer
    }

    pub fn snapshot_path(&self, category: &str, query_key: &str, date: &DateTime<Utc>) -> PathBuf {
        date_dir(&self.root.join(category), date).join(snapshot_file_name(date, query_key))
    }

    /// Writes the batch file, then indexes the batch. Neither failure is fatal.
    #[instrument(skip(self, batch), fields(pools = batch.len()))]
    pub async fn store_snapshot(
        &self,
        batch: &[EnrichedPoolSnapshot],
        category: &str,
        query_key: &str,
        date: DateTime<Utc>,
    ) -> StoreOutcome {
        let path = self.snapshot_path(category, query_key, &date);
        let mut outcome = StoreOutcome::default();

        match write_snapshot_file(&path, batch).await {
            Ok(()) => {
                info!("💾 Snapshot saved: {}", path.display());
                outcome.path = Some(path);
            }
            Err(e) => error!("❌ Failed to write snapshot {}: {:#}", path.display(), e),
        }

        match self.indexer.index_batch(batch, date, query_key).await {
            Ok(report) => outcome.index = Some(report),
            Err(e) => error!("❌ Failed to index snapshot {} ({}): {}", query_key, to_iso_timestamp(&date), e),
        }

        outcome
    }
}

pub async fn write_snapshot_file(path: &Path, batch: &[EnrichedPoolSnapshot]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(batch).context("Failed to serialize snapshot")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub async fn read_snapshot_file(path: &Path) -> Result<Vec<EnrichedPoolSnapshot>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}
