//! Relational indexing of enriched snapshots.
//!
//! One capture becomes one `fetch_times` header plus one `pools` row per pool.
//! The indexer does not deduplicate: callers consult [`DataIndexer::check_if_indexed`]
//! first, and the unique `timestamp` constraint rejects anything that slips through.

use crate::database::{SnapshotRepository, StoreError};
use crate::types::conversions::{
    epoch_millis_to_datetime, parse_timestamp_key, to_date_segment, to_iso_timestamp,
};
use crate::types::{
    EnrichedPoolSnapshot, FetchTimeMetadata, NewFetchTime, PoolRow, TxnCounts, WindowMetrics,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::sync::Arc;
use tracing::instrument;

/// Result of indexing one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    pub fetch_time_id: i64,
    pub pool_rows: u64,
}

pub struct DataIndexer {
    repo: Arc<dyn SnapshotRepository>,
    batch_size: usize,
}

impl DataIndexer {
    pub fn new(repo: Arc<dyn SnapshotRepository>, batch_size: usize) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
        }
    }

    pub fn repository(&self) -> &Arc<dyn SnapshotRepository> {
        &self.repo
    }

    /// Writes the header, then the pool rows in `batch_size` chunks.
    ///
    /// If any chunk fails the header is deleted again (cascading to rows
    /// already written), so the capture is not reported as indexed.
    #[instrument(skip(self, batch), fields(pools = batch.len()))]
    pub async fn index_batch(
        &self,
        batch: &[EnrichedPoolSnapshot],
        date: DateTime<Utc>,
        query_key: &str,
    ) -> Result<IndexReport, StoreError> {
        let header = NewFetchTime {
            timestamp: to_iso_timestamp(&date),
            date: to_date_segment(&date),
            query_key: query_key.to_string(),
            meta_data: FetchTimeMetadata::success(),
        };
        let fetch_time_id = self.repo.insert_fetch_time(&header).await?;
        debug!("Inserted fetch time {} for {}", fetch_time_id, header.timestamp);

        let now = Utc::now();
        let rows = match batch
            .iter()
            .map(|snapshot| map_pool_row(snapshot, fetch_time_id, now))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(rows) => rows,
            Err(e) => {
                self.rollback(fetch_time_id).await;
                return Err(e);
            }
        };

        let mut written = 0u64;
        for chunk in rows.chunks(self.batch_size) {
            match self.repo.insert_pool_rows(chunk).await {
                Ok(n) => written += n,
                Err(e) => {
                    error!(
                        "❌ Pool insert failed for fetch time {} ({}): {}",
                        fetch_time_id, header.timestamp, e
                    );
                    self.rollback(fetch_time_id).await;
                    return Err(e);
                }
            }
        }

        info!(
            "✅ Indexed {} pools for {} ({})",
            written, header.timestamp, query_key
        );
        Ok(IndexReport {
            fetch_time_id,
            pool_rows: written,
        })
    }

    async fn rollback(&self, fetch_time_id: i64) {
        if let Err(e) = self.repo.delete_fetch_time(fetch_time_id).await {
            error!("❌ Could not roll back fetch time {}: {}", fetch_time_id, e);
        }
    }

    /// True if a header exists for the key, given as epoch millis or ISO-8601.
    pub async fn check_if_indexed(&self, timestamp_key: &str) -> Result<bool> {
        let date = parse_timestamp_key(timestamp_key)
            .with_context(|| format!("Invalid timestamp key '{}'", timestamp_key))?;
        Ok(self.check_if_indexed_at(&date).await?)
    }

    pub async fn check_if_indexed_at(&self, date: &DateTime<Utc>) -> Result<bool, StoreError> {
        self.repo.fetch_time_exists(&to_iso_timestamp(date)).await
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn window(txns: &TxnCounts, volume: f64, price_change: f64) -> WindowMetrics {
    WindowMetrics {
        txns: txns.total() as i64,
        buys: txns.buys as i64,
        sells: txns.sells as i64,
        volume,
        price_change,
    }
}

/// Maps one snapshot to its `pools` row. Missing numbers become 0; a missing
/// creation time falls back to `now`.
pub fn map_pool_row(
    snapshot: &EnrichedPoolSnapshot,
    fetch_time_id: i64,
    now: DateTime<Utc>,
) -> Result<PoolRow, StoreError> {
    let pair = &snapshot.pair;
    let created_at = pair
        .pair_created_at
        .and_then(|millis| epoch_millis_to_datetime(millis).ok())
        .unwrap_or(now);

    Ok(PoolRow {
        pair_address: pair.pair_address.clone(),
        chain_id: pair.chain_id.clone(),
        dex_id: pair.dex_id.clone(),
        fetch_time_id,
        base_symbol: non_empty(&pair.base_token.symbol),
        quote_symbol: non_empty(&pair.quote_token.symbol),
        base_address: non_empty(&pair.base_token.address),
        quote_address: non_empty(&pair.quote_token.address),
        liquidity_usd: snapshot.liquidity_usd(),
        market_cap: pair.market_cap.unwrap_or(0.0),
        fdv: pair.fdv.unwrap_or(0.0),
        pair_created_at: to_iso_timestamp(&created_at),
        h24: window(&pair.txns.h24, pair.volume.h24, pair.price_change.h24),
        h6: window(&pair.txns.h6, pair.volume.h6, pair.price_change.h6),
        h1: window(&pair.txns.h1, pair.volume.h1, pair.price_change.h1),
        m5: window(&pair.txns.m5, pair.volume.m5, pair.price_change.m5),
        raw_data: serde_json::to_string(snapshot)?,
    })
}
