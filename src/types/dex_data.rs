use serde::{Deserialize, Serialize};

/// Token identity as reported by the pair-activity source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenRef {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
}

/// Entry of the curated token registry (Jupiter token list).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryToken {
    pub address: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, rename = "logoURI", skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One DLMM pool as listed by the pool-listing source (Meteora `/pair/all`).
///
/// Numeric amounts arrive as strings; they are parsed only when joined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPoolListing {
    #[serde(rename = "address")]
    pub pair_address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mint_x: String,
    #[serde(default)]
    pub mint_y: String,
    /// Liquidity as a decimal string.
    #[serde(default)]
    pub liquidity: String,
    #[serde(default)]
    pub bin_step: u32,
    /// Base fee in percent, as a decimal string ("0.25" == 0.25%).
    #[serde(default)]
    pub base_fee_percentage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_percentage: Option<String>,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_trade_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_volume_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apr: Option<f64>,
    #[serde(default)]
    pub hide: bool,
    #[serde(default)]
    pub is_blacklisted: bool,
}

/// Buy/sell counts for one activity window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TxnCounts {
    #[serde(default)]
    pub buys: u64,
    #[serde(default)]
    pub sells: u64,
}

impl TxnCounts {
    pub fn total(&self) -> u64 {
        self.buys + self.sells
    }
}

/// Per-window transaction counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowTxns {
    #[serde(default)]
    pub m5: TxnCounts,
    #[serde(default)]
    pub h1: TxnCounts,
    #[serde(default)]
    pub h6: TxnCounts,
    #[serde(default)]
    pub h24: TxnCounts,
}

/// Per-window numeric values (volume or price change).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowValues {
    #[serde(default)]
    pub m5: f64,
    #[serde(default)]
    pub h1: f64,
    #[serde(default)]
    pub h6: f64,
    #[serde(default)]
    pub h24: f64,
}

/// Pair liquidity. `pool_native` is attached by the joiner from the pool-listing source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Liquidity {
    #[serde(default)]
    pub usd: f64,
    #[serde(default)]
    pub base: f64,
    #[serde(default)]
    pub quote: f64,
    #[serde(default, alias = "meteora", skip_serializing_if = "Option::is_none")]
    pub pool_native: Option<f64>,
}

/// One trading pair as reported by the pair-activity source (DEX Screener).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPairActivity {
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub dex_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub pair_address: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub base_token: TokenRef,
    #[serde(default)]
    pub quote_token: TokenRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_native: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<String>,
    #[serde(default)]
    pub txns: WindowTxns,
    #[serde(default)]
    pub volume: WindowValues,
    #[serde(default)]
    pub price_change: WindowValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidity: Option<Liquidity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fdv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    /// Creation time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}
