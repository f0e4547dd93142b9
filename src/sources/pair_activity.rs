use crate::rate_limited_fetcher::{FetchResponse, RateLimitedFetcher};
use crate::types::RawPairActivity;
use crate::utils::{create_chunks, short_url};
use log::{debug, info, warn};
use std::sync::Arc;

/// Client for the pair-activity source.
///
/// Addresses are packed into as few request URLs as possible, at most
/// `batch_size` per URL: `<base>/<addr1>,<addr2>,...`.
pub struct PairActivityClient {
    fetcher: Arc<RateLimitedFetcher>,
    base_url: String,
    batch_size: usize,
}

impl PairActivityClient {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, base_url: impl Into<String>, batch_size: usize) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn build_urls(&self, addresses: &[String]) -> Vec<String> {
        build_batch_urls(&self.base_url, addresses, self.batch_size)
    }

    /// Fetches activity for every address. A failed batch only loses its own pairs.
    pub async fn fetch_pairs(&self, addresses: &[String]) -> Vec<RawPairActivity> {
        let urls = self.build_urls(addresses);
        info!(
            "Fetching pair activity for {} addresses in {} requests",
            addresses.len(),
            urls.len()
        );
        let responses = self.fetcher.multi_fetch(&urls).await;
        let pairs = flatten_pair_responses(&responses);
        info!("Pair activity fetched: {} pairs", pairs.len());
        pairs
    }
}

pub fn build_batch_urls(base_url: &str, addresses: &[String], batch_size: usize) -> Vec<String> {
    let base = base_url.trim_end_matches('/');
    create_chunks(addresses, batch_size)
        .into_iter()
        .map(|chunk| format!("{}/{}", base, chunk.join(",")))
        .collect()
}

/// Flattens every `pairs` array. Responses without one are logged and skipped.
pub fn flatten_pair_responses(responses: &[FetchResponse]) -> Vec<RawPairActivity> {
    let mut pairs = Vec::new();
    for response in responses {
        let Some(data) = response.data.as_ref() else {
            warn!("⚠️ No data after retries from {}", short_url(&response.url));
            continue;
        };
        let Some(entries) = data.get("pairs").and_then(|p| p.as_array()) else {
            warn!("⚠️ Missing pairs in response from {}", short_url(&response.url));
            continue;
        };
        debug!("Found {} pairs in {}", entries.len(), short_url(&response.url));
        for entry in entries {
            match serde_json::from_value::<RawPairActivity>(entry.clone()) {
                Ok(pair) => pairs.push(pair),
                Err(e) => warn!("⚠️ Skipping undecodable pair from {}: {}", short_url(&response.url), e),
            }
        }
    }
    pairs
}
