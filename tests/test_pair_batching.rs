//! Integration tests for pair-activity batching through the rate limiter
//!
//! Tests cover:
//! - Request count at and across the per-URL address cap
//! - A failing batch only loses its own pairs
//!
//! Note: runs on paused tokio time, no network

use async_trait::async_trait;
use dlmm_data_miner::rate_limited_fetcher::{FetchError, HttpTransport};
use dlmm_data_miner::settings::RateLimit;
use dlmm_data_miner::sources::PairActivityClient;
use dlmm_data_miner::RateLimitedFetcher;
use std::sync::{Arc, Mutex};

const BASE: &str = "https://api.dexscreener.com/latest/dex/pairs/solana";

/// Echoes one pair per requested address; URLs containing `fail_marker` always 500.
struct EchoTransport {
    requests: Mutex<Vec<String>>,
    fail_marker: Option<String>,
}

impl EchoTransport {
    fn new(fail_marker: Option<&str>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail_marker: fail_marker.map(|s| s.to_string()),
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for EchoTransport {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(marker) = &self.fail_marker {
            if url.contains(marker.as_str()) {
                return Err(FetchError::Status(500));
            }
        }
        let addresses = url.rsplit('/').next().unwrap_or_default();
        let pairs: Vec<serde_json::Value> = addresses
            .split(',')
            .map(|a| serde_json::json!({"chainId": "solana", "dexId": "meteora", "pairAddress": a}))
            .collect();
        Ok(serde_json::json!({ "schemaVersion": "1.0.0", "pairs": pairs }))
    }
}

fn addresses(n: usize) -> Vec<String> {
    // 31-character addresses
    (0..n).map(|i| format!("Pair{:0>27}", i)).collect()
}

fn config() -> RateLimit {
    RateLimit {
        requests_per_period: 4,
        period_ms: 1_000,
        flush_interval_ms: 50,
        initial_backoff_ms: 2_000,
        backoff_multiplier: 1.5,
        max_retries: 2,
        request_timeout_ms: 15_000,
    }
}

fn client(transport: Arc<EchoTransport>) -> PairActivityClient {
    let fetcher = Arc::new(RateLimitedFetcher::new(config(), transport));
    PairActivityClient::new(fetcher, BASE, 30)
}

#[tokio::test(start_paused = true)]
async fn test_two_addresses_one_request() {
    let transport = Arc::new(EchoTransport::new(None));
    let input = addresses(2);
    assert_eq!(input[0].len(), 31);

    let pairs = client(transport.clone()).fetch_pairs(&input).await;

    assert_eq!(transport.requests().len(), 1);
    let got: Vec<&str> = pairs.iter().map(|p| p.pair_address.as_str()).collect();
    assert_eq!(got, vec![input[0].as_str(), input[1].as_str()]);
}

#[tokio::test(start_paused = true)]
async fn test_thirty_one_addresses_two_requests() {
    let transport = Arc::new(EchoTransport::new(None));
    let input = addresses(31);

    let pairs = client(transport.clone()).fetch_pairs(&input).await;

    assert_eq!(transport.requests().len(), 2);
    assert_eq!(pairs.len(), 31);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_loses_only_its_pairs() {
    let input = addresses(65);
    // Third batch holds addresses 60..65
    let transport = Arc::new(EchoTransport::new(Some(&input[60])));

    let pairs = client(transport.clone()).fetch_pairs(&input).await;

    assert_eq!(pairs.len(), 60);
    // 2 good batches + 1 bad batch tried 1 + max_retries times
    assert_eq!(transport.requests().len(), 2 + 3);
}
