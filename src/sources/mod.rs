//! Read-only clients for the three upstream sources.
//!
//! Each client turns governed HTTP responses into typed records and never calls
//! another client. Failures degrade to fewer records, never to a panic.

/// Pair-activity source (DEX Screener pairs endpoint)
pub mod pair_activity;
/// Pool-listing source (Meteora DLMM `/pair/all`)
pub mod pool_listing;
/// Token-registry source (Jupiter token list)
pub mod token_registry;

pub use pair_activity::PairActivityClient;
pub use pool_listing::PoolListingClient;
pub use token_registry::{TokenRegistry, TokenRegistryClient};

/// Source payload was present but not in the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("No data returned from {0}")]
    EmptyResponse(String),
    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },
}
