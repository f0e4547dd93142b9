/// Numeric and timestamp conversions
pub mod conversions;
/// Raw records from the pool-listing, pair-activity and token-registry sources
pub mod dex_data;
/// Relational rows written by the indexer
pub mod records;
/// Enriched snapshot value objects
pub mod snapshot;

pub use dex_data::{
    Liquidity, RawPairActivity, RawPoolListing, RegistryToken, TokenRef, TxnCounts, WindowTxns,
    WindowValues,
};
pub use records::{
    FetchStatus, FetchTimeMetadata, FetchTimeRecord, MetricRecord, NewFetchTime, NewMetric,
    PoolRow, WindowMetrics,
};
pub use snapshot::{EnrichedPoolSnapshot, Trend, WindowRange};
