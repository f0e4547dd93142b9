use crate::rate_limited_fetcher::{FetchResponse, RateLimitedFetcher};
use crate::sources::SourceError;
use crate::types::RawPoolListing;
use log::{info, warn};
use std::sync::Arc;

/// Client for the DLMM pool listing.
pub struct PoolListingClient {
    fetcher: Arc<RateLimitedFetcher>,
    url: String,
}

impl PoolListingClient {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
        }
    }

    /// Full pool list in source order.
    pub async fn fetch_pools(&self) -> Result<Vec<RawPoolListing>, SourceError> {
        let response = self.fetcher.fetch(&self.url).await;
        let pools = parse_pool_listings(&response)?;
        info!("Pool listings fetched: {} pools", pools.len());
        Ok(pools)
    }
}

pub fn parse_pool_listings(response: &FetchResponse) -> Result<Vec<RawPoolListing>, SourceError> {
    let data = response
        .data
        .as_ref()
        .ok_or_else(|| SourceError::EmptyResponse(response.url.clone()))?;

    let entries = data
        .as_array()
        .ok_or_else(|| SourceError::MalformedResponse {
            url: response.url.clone(),
            reason: "expected a JSON array of pools".to_string(),
        })?;

    let mut pools = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<RawPoolListing>(entry.clone()) {
            Ok(pool) => pools.push(pool),
            Err(e) => warn!("⚠️ Skipping undecodable pool listing: {}", e),
        }
    }
    Ok(pools)
}
