use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status stored in `fetch_times.meta_data`. Headers are only written for
/// captures that reached the store step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchTimeMetadata {
    #[serde(default)]
    pub query_params: serde_json::Map<String, serde_json::Value>,
    pub status: FetchStatus,
}

impl FetchTimeMetadata {
    pub fn success() -> Self {
        Self {
            query_params: serde_json::Map::new(),
            status: FetchStatus::Success,
        }
    }
}

/// Insertable header for one indexed capture.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFetchTime {
    /// Canonical ISO-8601 timestamp with milliseconds; unique across the store.
    pub timestamp: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub query_key: String,
    pub meta_data: FetchTimeMetadata,
}

/// Persisted fetch-time header.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTimeRecord {
    pub id: i64,
    pub timestamp: String,
    pub date: String,
    pub query_key: String,
    pub meta_data: FetchTimeMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metrics for one activity window as stored in the `pools` table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowMetrics {
    pub txns: i64,
    pub buys: i64,
    pub sells: i64,
    pub volume: f64,
    pub price_change: f64,
}

/// One `pools` row, keyed by `(pair_address, fetch_time_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolRow {
    pub pair_address: String,
    pub chain_id: String,
    pub dex_id: String,
    pub fetch_time_id: i64,
    pub base_symbol: Option<String>,
    pub quote_symbol: Option<String>,
    pub base_address: Option<String>,
    pub quote_address: Option<String>,
    pub liquidity_usd: f64,
    pub market_cap: f64,
    pub fdv: f64,
    /// ISO-8601
    pub pair_created_at: String,
    pub h24: WindowMetrics,
    pub h6: WindowMetrics,
    pub h1: WindowMetrics,
    pub m5: WindowMetrics,
    /// Full serialized snapshot for replay.
    pub raw_data: String,
}

/// Insertable audit row for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub key: String,
    pub meta_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub id: i64,
    pub start_time: String,
    pub end_time: String,
    pub key: String,
    pub meta_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_time_metadata_json() {
        let json = serde_json::to_value(FetchTimeMetadata::success()).unwrap();
        assert_eq!(json, serde_json::json!({"query_params": {}, "status": "success"}));

        let stored: FetchTimeMetadata =
            serde_json::from_str(r#"{"query_params":{},"status":"success"}"#).unwrap();
        assert_eq!(stored, FetchTimeMetadata::success());
    }
}
