//! # Data Engine
//!
//! Runs the capture pipeline: token registry and pool listings (fetched
//! concurrently), then pair activity, enrichment, snapshot file + index, and
//! finally one `metrics` row per run.
//!
//! [`DataEngine::execute_at_interval`] repeats the cycle on a fixed period. A
//! tick that fires while a cycle is still running is skipped. Shutdown waits
//! for the in-flight cycle so no header is left without its rows.

use crate::database::SnapshotRepository;
use crate::enrichment::enrich;
use crate::indexer::DataIndexer;
use crate::rate_limited_fetcher::RateLimitedFetcher;
use crate::settings::Settings;
use crate::snapshot_store::SnapshotStore;
use crate::sources::{PairActivityClient, PoolListingClient, TokenRegistry, TokenRegistryClient};
use crate::types::conversions::to_iso_timestamp;
use crate::types::{EnrichedPoolSnapshot, NewMetric};
use crate::utils::new_query_key;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::instrument;

/// What one pipeline run produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub query_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pools: Vec<EnrichedPoolSnapshot>,
    /// Pair addresses dropped for lack of a pool listing.
    pub unmatched: Vec<String>,
    pub snapshot_path: Option<PathBuf>,
    pub indexed_rows: Option<u64>,
}

/// Clears the in-flight flag when a cycle ends, panics included.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct DataEngine {
    settings: Settings,
    registry_client: TokenRegistryClient,
    pool_client: PoolListingClient,
    pair_client: PairActivityClient,
    store: SnapshotStore,
    repo: Arc<dyn SnapshotRepository>,
    in_flight: AtomicBool,
}

impl DataEngine {
    pub fn new(
        settings: Settings,
        fetcher: Arc<RateLimitedFetcher>,
        repo: Arc<dyn SnapshotRepository>,
    ) -> Self {
        let sources = &settings.sources;
        let registry_client =
            TokenRegistryClient::new(Arc::clone(&fetcher), sources.token_registry_url());
        let pool_client = PoolListingClient::new(Arc::clone(&fetcher), &sources.pool_listing_url);
        let pair_client = PairActivityClient::new(
            Arc::clone(&fetcher),
            &sources.pair_activity_url,
            sources.pair_batch_size,
        );
        let indexer = Arc::new(DataIndexer::new(
            Arc::clone(&repo),
            settings.storage.insert_batch_size,
        ));
        let store = SnapshotStore::new(settings.storage.data_dir.clone(), indexer);

        Self {
            settings,
            registry_client,
            pool_client,
            pair_client,
            store,
            repo,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn indexer(&self) -> &Arc<DataIndexer> {
        self.store.indexer()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// One full capture. Source failures degrade to empty inputs; only an
    /// unexpected failure outside the per-source/per-store handling is returned.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started_at = Utc::now();
        let query_key = new_query_key();
        info!("⛏️ Starting capture {}", query_key);

        let (registry, listings) = tokio::join!(
            self.registry_client.fetch_registry(),
            self.pool_client.fetch_pools()
        );
        let registry = registry.unwrap_or_else(|e| {
            warn!("⚠️ Token registry unavailable, no pool will be strict: {}", e);
            TokenRegistry::new()
        });
        let listings = listings.unwrap_or_else(|e| {
            warn!("⚠️ Pool listings unavailable: {}", e);
            Vec::new()
        });

        let addresses: Vec<String> = listings.iter().map(|p| p.pair_address.clone()).collect();
        let activity = self.pair_client.fetch_pairs(&addresses).await;

        let enriched = enrich(&registry, &activity, &listings);
        info!(
            "Compiled {} enriched pools ({} unmatched)",
            enriched.pools.len(),
            enriched.unmatched.len()
        );

        let outcome = self
            .store
            .store_snapshot(
                &enriched.pools,
                &self.settings.storage.category,
                &query_key,
                Utc::now(),
            )
            .await;

        let finished_at = Utc::now();
        let report = CycleReport {
            query_key,
            started_at,
            finished_at,
            pools: enriched.pools,
            unmatched: enriched.unmatched,
            snapshot_path: outcome.path,
            indexed_rows: outcome.index.map(|r| r.pool_rows),
        };
        self.record_metric(&report).await;

        info!(
            "✅ Capture {} finished in {} ms",
            report.query_key,
            (finished_at - started_at).num_milliseconds()
        );
        Ok(report)
    }

    async fn record_metric(&self, report: &CycleReport) {
        let metric = NewMetric {
            start_time: report.started_at,
            end_time: report.finished_at,
            key: report.query_key.clone(),
            meta_data: serde_json::json!({
                "pools": report.pools.len(),
                "unmatched": report.unmatched.len(),
                "fileWritten": report.snapshot_path.is_some(),
                "indexedRows": report.indexed_rows,
            }),
        };
        if let Err(e) = self.repo.insert_metric(&metric).await {
            error!(
                "❌ Failed to record metrics for {} ({}): {}",
                report.query_key,
                to_iso_timestamp(&report.started_at),
                e
            );
        }
    }

    /// Runs a cycle unless one is already in flight. `None` if skipped or failed.
    pub async fn run_guarded(&self) -> Option<CycleReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("⏭️ Previous capture still running, skipping this tick");
            return None;
        }
        let _guard = InFlightGuard(&self.in_flight);

        match self.run_cycle().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("❌ Capture failed: {:#}", e);
                None
            }
        }
    }

    /// Fires a guarded cycle every `scheduler.interval_seconds` until `shutdown` resolves.
    pub async fn execute_at_interval<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let period = self.settings.scheduler.interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.settings.scheduler.run_on_start {
            // First tick completes immediately
            ticker.tick().await;
        }
        info!("Data engine running every {:?}", period);

        let mut cycles = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested, stopping data engine");
                    break;
                }
                _ = ticker.tick() => {
                    let engine = Arc::clone(&self);
                    cycles.spawn(async move {
                        engine.run_guarded().await;
                    });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!("❌ Capture task aborted: {}", e);
                    }
                }
            }
        }

        // A cycle cut between header and rows would read as indexed on the next reconcile
        if !cycles.is_empty() {
            info!("⏳ Waiting for the in-flight capture to finish");
        }
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!("❌ Capture task aborted: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_repository::MemoryRepository;
    use crate::rate_limited_fetcher::{FetchError, HttpTransport};
    use async_trait::async_trait;
    use std::time::Duration;

    const REGISTRY: &str = "https://registry.test/strict";
    const POOLS: &str = "https://pools.test/pair/all";
    const PAIRS: &str = "https://pairs.test/solana";

    struct FakeSources {
        delay: Duration,
    }

    #[async_trait]
    impl HttpTransport for FakeSources {
        async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
            tokio::time::sleep(self.delay).await;
            if url == REGISTRY {
                return Ok(serde_json::json!([
                    {"address": "SOL_MINT", "symbol": "SOL", "name": "Wrapped SOL"},
                    {"address": "USDC_MINT", "symbol": "USDC", "name": "USD Coin"}
                ]));
            }
            if url == POOLS {
                return Ok(serde_json::json!([
                    {"address": "P1", "liquidity": "1000", "bin_step": 10, "base_fee_percentage": "0.1"},
                    {"address": "P2", "liquidity": "2000", "bin_step": 20, "base_fee_percentage": "0.2"}
                ]));
            }
            if url == format!("{}/P1,P2", PAIRS) {
                return Ok(serde_json::json!({"pairs": [
                    {
                        "chainId": "solana", "dexId": "meteora", "pairAddress": "P1",
                        "baseToken": {"address": "SOL_MINT", "name": "Wrapped SOL", "symbol": "SOL"},
                        "quoteToken": {"address": "USDC_MINT", "name": "USD Coin", "symbol": "USDC"},
                        "volume": {"h24": 2400.0, "h6": 600.0, "h1": 100.0, "m5": 10.0},
                        "liquidity": {"usd": 10000.0, "base": 1.0, "quote": 1.0}
                    },
                    {"chainId": "solana", "dexId": "meteora", "pairAddress": "P3"}
                ]}));
            }
            Err(FetchError::Status(404))
        }
    }

    fn test_engine(dir: &std::path::Path, delay: Duration) -> (Arc<DataEngine>, Arc<MemoryRepository>) {
        let mut settings = Settings::default();
        settings.sources.token_registry_strict_url = REGISTRY.to_string();
        settings.sources.pool_listing_url = POOLS.to_string();
        settings.sources.pair_activity_url = PAIRS.to_string();
        settings.storage.data_dir = dir.to_path_buf();
        settings.rate_limit.requests_per_period = 10;

        let fetcher = Arc::new(RateLimitedFetcher::new(
            settings.rate_limit.clone(),
            Arc::new(FakeSources { delay }),
        ));
        let repo = Arc::new(MemoryRepository::new());
        (Arc::new(DataEngine::new(settings, fetcher, repo.clone())), repo)
    }

    #[tokio::test]
    async fn test_run_cycle_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, repo) = test_engine(dir.path(), Duration::ZERO);

        let report = engine.run_cycle().await.unwrap();

        assert!(report.query_key.starts_with("historical_data_"));
        assert_eq!(report.pools.len(), 1);
        assert!(report.pools[0].strict);
        assert_eq!(report.unmatched, vec!["P3".to_string()]);
        assert_eq!(report.indexed_rows, Some(1));

        let path = report.snapshot_path.unwrap();
        assert!(path.starts_with(dir.path().join("enriched_dex_pairs")));
        assert!(path.exists());

        let headers = repo.fetch_times().await;
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].query_key, report.query_key);

        let metrics = repo.metrics().await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].key, report.query_key);
        assert_eq!(metrics[0].meta_data["unmatched"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_run_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _repo) = test_engine(dir.path(), Duration::from_secs(5));

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run_guarded().await })
        };
        // Let the first cycle claim the flag
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(engine.is_running());
        assert!(engine.run_guarded().await.is_none());

        assert!(first.await.unwrap().is_some());
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_snapshot_is_stamped_at_store_time() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, repo) = test_engine(dir.path(), Duration::from_millis(20));

        let report = engine.run_cycle().await.unwrap();

        let headers = repo.fetch_times().await;
        let stamped = chrono::DateTime::parse_from_rfc3339(&headers[0].timestamp)
            .unwrap()
            .with_timezone(&Utc);
        // Registry and listings overlap, then pairs: at least 2 x 20ms before the store step
        assert!(stamped - report.started_at >= chrono::Duration::milliseconds(39));
        assert!(stamped <= report.finished_at);
        let file_name = report.snapshot_path.unwrap();
        let file_name = file_name.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with(&headers[0].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, repo) = test_engine(dir.path(), Duration::from_secs(5));

        Arc::clone(&engine)
            .execute_at_interval(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(!engine.is_running());
        assert_eq!(repo.fetch_times().await.len(), 1);
        assert_eq!(repo.pool_rows().await.len(), 1);
        assert_eq!(repo.metrics().await.len(), 1);
    }
}
