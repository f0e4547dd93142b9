use crate::directory_reconciler::list_json_files;
use crate::indexer::DataIndexer;
use crate::snapshot_store::{date_dir, read_snapshot_file, snapshot_file_name, SnapshotFileName};
use crate::types::conversions::parse_timestamp_key;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::instrument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefragmentReport {
    pub total_files: usize,
    pub moved: usize,
    pub already_indexed: usize,
    pub newly_indexed: usize,
    pub failed: usize,
}

/// Sorts flat `<epochMillis>_historical_data_<id>.json` files in `root` into
/// dated folders, then indexes any that were never indexed.
#[instrument(skip(indexer))]
pub async fn defragment(root: &Path, indexer: &DataIndexer) -> Result<DefragmentReport> {
    let mut report = DefragmentReport::default();

    for path in list_json_files(root).await? {
        let Some(parsed) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| SnapshotFileName::parse(n).ok())
            .filter(|p| p.is_legacy_epoch())
        else {
            debug!("Skipping {}", path.display());
            continue;
        };

        report.total_files += 1;
        match defragment_file(root, &path, &parsed, indexer, &mut report).await {
            Ok(()) => {}
            Err(e) => {
                warn!("⚠️ Failed to defragment {}: {:#}", path.display(), e);
                report.failed += 1;
            }
        }
    }

    info!(
        "🧹 Defragmentation done: {} legacy files, {} moved, {} already indexed, {} newly indexed, {} failed",
        report.total_files, report.moved, report.already_indexed, report.newly_indexed, report.failed
    );
    Ok(report)
}

async fn defragment_file(
    root: &Path,
    path: &Path,
    parsed: &SnapshotFileName,
    indexer: &DataIndexer,
    report: &mut DefragmentReport,
) -> Result<()> {
    let date = parse_timestamp_key(&parsed.timestamp_key)?;
    let target_dir = date_dir(root, &date);
    tokio::fs::create_dir_all(&target_dir)
        .await
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;

    let target: PathBuf = target_dir.join(snapshot_file_name(&date, &parsed.query_key));
    tokio::fs::rename(path, &target)
        .await
        .with_context(|| format!("Failed to move {} to {}", path.display(), target.display()))?;
    report.moved += 1;
    debug!("Moved {} -> {}", path.display(), target.display());

    // Legacy files were deduplicated on the epoch string
    if indexer.check_if_indexed(&parsed.timestamp_key).await? {
        report.already_indexed += 1;
        return Ok(());
    }

    let batch = read_snapshot_file(&target).await?;
    match indexer.index_batch(&batch, date, &parsed.query_key).await {
        Ok(_) => report.newly_indexed += 1,
        Err(e) if e.is_unique_violation() => report.already_indexed += 1,
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
