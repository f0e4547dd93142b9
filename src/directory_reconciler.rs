use crate::indexer::DataIndexer;
use crate::snapshot_store::{is_date_dir_name, read_snapshot_file, SnapshotFileName};
use crate::types::conversions::parse_timestamp_key;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Totals from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub total_files: usize,
    pub already_indexed: usize,
    pub newly_indexed: usize,
    pub failed: usize,
}

enum FileOutcome {
    AlreadyIndexed,
    NewlyIndexed,
}

/// Indexes every dated snapshot file under `root` that is not yet in the store.
///
/// Only `YYYY-MM-DD` subdirectories are visited. A file that fails to parse or
/// index is counted in `failed` and the pass continues.
#[instrument(skip(indexer))]
pub async fn reconcile(root: &Path, indexer: &DataIndexer) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();

    for (date, dir) in list_date_dirs(root).await? {
        let mut indexed = indexer
            .repository()
            .indexed_query_keys_for_date(&date)
            .await
            .with_context(|| format!("Failed to load indexed keys for {}", date))?;
        debug!("{}: {} query keys already indexed", date, indexed.len());

        for path in list_json_files(&dir).await? {
            summary.total_files += 1;
            match reconcile_file(&path, indexer, &mut indexed).await {
                Ok(FileOutcome::AlreadyIndexed) => summary.already_indexed += 1,
                Ok(FileOutcome::NewlyIndexed) => summary.newly_indexed += 1,
                Err(e) => {
                    warn!("⚠️ Failed to reconcile {}: {:#}", path.display(), e);
                    summary.failed += 1;
                }
            }
        }
    }

    info!(
        "🔁 Reconciliation done: {} files, {} already indexed, {} newly indexed, {} failed",
        summary.total_files, summary.already_indexed, summary.newly_indexed, summary.failed
    );
    Ok(summary)
}

async fn reconcile_file(
    path: &Path,
    indexer: &DataIndexer,
    indexed: &mut HashSet<String>,
) -> Result<FileOutcome> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("File name is not valid UTF-8")?;
    let parsed = SnapshotFileName::parse(file_name)?;

    if indexed.contains(&parsed.query_key) {
        return Ok(FileOutcome::AlreadyIndexed);
    }

    let date = parse_timestamp_key(&parsed.timestamp_key)?;
    let batch = read_snapshot_file(path).await?;

    match indexer.index_batch(&batch, date, &parsed.query_key).await {
        Ok(_) => {
            indexed.insert(parsed.query_key);
            Ok(FileOutcome::NewlyIndexed)
        }
        Err(e) if e.is_unique_violation() => {
            debug!("{} already indexed under another key", file_name);
            indexed.insert(parsed.query_key);
            Ok(FileOutcome::AlreadyIndexed)
        }
        Err(e) => Err(e.into()),
    }
}

/// `(date, path)` of each `YYYY-MM-DD` subdirectory, sorted by date.
async fn list_date_dirs(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .with_context(|| format!("Failed to read {}", root.display()))?;

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if is_date_dir_name(&name) {
            dirs.push((name, entry.path()));
        } else {
            debug!("Skipping non-date directory {}", name);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Sorted `*.json` files directly inside `dir`.
pub(crate) async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some("json")
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
