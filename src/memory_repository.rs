use crate::database::{SnapshotRepository, StoreError};
use crate::types::conversions::to_iso_timestamp;
use crate::types::{FetchTimeRecord, MetricRecord, NewFetchTime, NewMetric, PoolRow};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    next_fetch_time_id: i64,
    next_metric_id: i64,
    fetch_times: Vec<FetchTimeRecord>,
    pools: Vec<PoolRow>,
    metrics: Vec<MetricRecord>,
}

/// In-process repository with the same uniqueness and cascade rules as the
/// Postgres schema. Backs `--dry-run` and the test suite.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fetch_times(&self) -> Vec<FetchTimeRecord> {
        self.tables.lock().await.fetch_times.clone()
    }

    pub async fn pool_rows(&self) -> Vec<PoolRow> {
        self.tables.lock().await.pools.clone()
    }

    pub async fn metrics(&self) -> Vec<MetricRecord> {
        self.tables.lock().await.metrics.clone()
    }
}

#[async_trait]
impl SnapshotRepository for MemoryRepository {
    async fn insert_fetch_time(&self, fetch_time: &NewFetchTime) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables
            .fetch_times
            .iter()
            .any(|f| f.timestamp == fetch_time.timestamp)
        {
            return Err(StoreError::UniqueViolation {
                constraint: "unique_timestamp".to_string(),
            });
        }

        tables.next_fetch_time_id += 1;
        let id = tables.next_fetch_time_id;
        let now = Utc::now();
        tables.fetch_times.push(FetchTimeRecord {
            id,
            timestamp: fetch_time.timestamp.clone(),
            date: fetch_time.date.clone(),
            query_key: fetch_time.query_key.clone(),
            meta_data: fetch_time.meta_data.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn insert_pool_rows(&self, rows: &[PoolRow]) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;

        // Validate the whole batch before touching the table.
        let mut seen: HashSet<(&str, i64)> = tables
            .pools
            .iter()
            .map(|r| (r.pair_address.as_str(), r.fetch_time_id))
            .collect();
        for row in rows {
            if !tables.fetch_times.iter().any(|f| f.id == row.fetch_time_id) {
                return Err(StoreError::Database(format!(
                    "fetch_time_id {} does not exist",
                    row.fetch_time_id
                )));
            }
            if !seen.insert((row.pair_address.as_str(), row.fetch_time_id)) {
                return Err(StoreError::UniqueViolation {
                    constraint: "unique_pair_address_fetch_time".to_string(),
                });
            }
        }
        drop(seen);

        tables.pools.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn delete_fetch_time(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.fetch_times.retain(|f| f.id != id);
        tables.pools.retain(|r| r.fetch_time_id != id);
        Ok(())
    }

    async fn fetch_time_exists(&self, timestamp: &str) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.fetch_times.iter().any(|f| f.timestamp == timestamp))
    }

    async fn indexed_query_keys_for_date(&self, date: &str) -> Result<HashSet<String>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .fetch_times
            .iter()
            .filter(|f| f.date == date)
            .map(|f| f.query_key.clone())
            .collect())
    }

    async fn insert_metric(&self, metric: &NewMetric) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.next_metric_id += 1;
        let id = tables.next_metric_id;
        tables.metrics.push(MetricRecord {
            id,
            start_time: to_iso_timestamp(&metric.start_time),
            end_time: to_iso_timestamp(&metric.end_time),
            key: metric.key.clone(),
            meta_data: metric.meta_data.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchTimeMetadata;

    fn header(timestamp: &str) -> NewFetchTime {
        NewFetchTime {
            timestamp: timestamp.to_string(),
            date: "2025-02-11".to_string(),
            query_key: "historical_data_abc".to_string(),
            meta_data: FetchTimeMetadata::success(),
        }
    }

    fn row(pair: &str, fetch_time_id: i64) -> PoolRow {
        PoolRow {
            pair_address: pair.to_string(),
            chain_id: "solana".to_string(),
            dex_id: "meteora".to_string(),
            fetch_time_id,
            base_symbol: None,
            quote_symbol: None,
            base_address: None,
            quote_address: None,
            liquidity_usd: 0.0,
            market_cap: 0.0,
            fdv: 0.0,
            pair_created_at: "2025-02-11T06:43:50.990Z".to_string(),
            h24: Default::default(),
            h6: Default::default(),
            h1: Default::default(),
            m5: Default::default(),
            raw_data: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_rejected() {
        let repo = MemoryRepository::new();
        repo.insert_fetch_time(&header("2025-02-11T06:43:50.990Z"))
            .await
            .unwrap();
        let err = repo
            .insert_fetch_time(&header("2025-02-11T06:43:50.990Z"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(repo.fetch_times().await.len(), 1);
    }

    #[tokio::test]
    async fn test_pool_batch_is_all_or_nothing() {
        let repo = MemoryRepository::new();
        let id = repo
            .insert_fetch_time(&header("2025-02-11T06:43:50.990Z"))
            .await
            .unwrap();

        let err = repo
            .insert_pool_rows(&[row("P1", id), row("P2", id), row("P1", id)])
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert!(repo.pool_rows().await.is_empty());

        assert_eq!(repo.insert_pool_rows(&[row("P1", id), row("P2", id)]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_pools() {
        let repo = MemoryRepository::new();
        let id = repo
            .insert_fetch_time(&header("2025-02-11T06:43:50.990Z"))
            .await
            .unwrap();
        repo.insert_pool_rows(&[row("P1", id)]).await.unwrap();

        repo.delete_fetch_time(id).await.unwrap();
        assert!(repo.fetch_times().await.is_empty());
        assert!(repo.pool_rows().await.is_empty());
        assert!(!repo.fetch_time_exists("2025-02-11T06:43:50.990Z").await.unwrap());
    }
}
