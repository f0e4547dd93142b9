use crate::rate_limited_fetcher::{FetchResponse, RateLimitedFetcher};
use crate::sources::SourceError;
use crate::types::RegistryToken;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry entries keyed by token address.
pub type TokenRegistry = HashMap<String, RegistryToken>;

/// Client for the curated token list. Which list (strict/all) is decided by the URL.
pub struct TokenRegistryClient {
    fetcher: Arc<RateLimitedFetcher>,
    url: String,
}

impl TokenRegistryClient {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
        }
    }

    pub async fn fetch_registry(&self) -> Result<TokenRegistry, SourceError> {
        let response = self.fetcher.fetch(&self.url).await;
        let registry = parse_registry(&response)?;
        info!("Token registry fetched: {} tokens", registry.len());
        Ok(registry)
    }
}

/// Builds the address map. Entries that do not decode are skipped.
pub fn parse_registry(response: &FetchResponse) -> Result<TokenRegistry, SourceError> {
    let data = response
        .data
        .as_ref()
        .ok_or_else(|| SourceError::EmptyResponse(response.url.clone()))?;

    let entries = data
        .as_array()
        .ok_or_else(|| SourceError::MalformedResponse {
            url: response.url.clone(),
            reason: "expected a JSON array of tokens".to_string(),
        })?;

    let mut registry = HashMap::with_capacity(entries.len());
    let mut skipped = 0usize;
    for entry in entries {
        match serde_json::from_value::<RegistryToken>(entry.clone()) {
            Ok(token) => {
                registry.insert(token.address.clone(), token);
            }
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("⚠️ Skipped {} undecodable registry entries", skipped);
    }
    Ok(registry)
}
