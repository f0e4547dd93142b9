use crate::types::dex_data::{RawPairActivity, RawPoolListing};
use serde::{Deserialize, Deserializer, Serialize};

/// Volume trend across the four activity windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    Up,
    #[default]
    Down,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Up => write!(f, "Up"),
            Trend::Down => write!(f, "Down"),
        }
    }
}

/// Earlier miners wrote non-finite ratios, which JSON carries as `null`.
fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// A per-window figure extended with the min/max across the four windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowRange {
    #[serde(default, deserialize_with = "null_as_zero")]
    pub h24: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub h6: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub h1: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub m5: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub min: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub max: f64,
}

impl WindowRange {
    /// Builds the range from the four windows, computing min/max.
    pub fn from_windows(h24: f64, h6: f64, h1: f64, m5: f64) -> Self {
        let min = h24.min(h6).min(h1).min(m5);
        let max = h24.max(h6).max(h1).max(m5);
        Self {
            h24,
            h6,
            h1,
            m5,
            min,
            max,
        }
    }

    /// Applies `f` to every field, min/max included.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            h24: f(self.h24),
            h6: f(self.h6),
            h1: f(self.h1),
            m5: f(self.m5),
            min: f(self.min),
            max: f(self.max),
        }
    }
}

/// Pair activity joined with its pool listing and derived metrics.
///
/// Serialized form is the snapshot file format. Field aliases accept files
/// written by the earlier miner (`bin_step`, `base_fee`, `volume24h`, `meteoraPair`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPoolSnapshot {
    #[serde(flatten)]
    pub pair: RawPairActivity,
    #[serde(default, alias = "bin_step")]
    pub bin_step: u32,
    /// Fraction, not percent.
    #[serde(default, alias = "base_fee", deserialize_with = "null_as_zero")]
    pub base_fee: f64,
    #[serde(default, alias = "volume24h")]
    pub volume24h_projected: WindowRange,
    #[serde(default)]
    pub fees24h: WindowRange,
    #[serde(default)]
    pub fee_to_tvl: WindowRange,
    #[serde(default)]
    pub trend: Trend,
    #[serde(default)]
    pub strict: bool,
    #[serde(default, alias = "meteoraPair", skip_serializing_if = "Option::is_none")]
    pub pool_meta: Option<RawPoolListing>,
}

impl EnrichedPoolSnapshot {
    pub fn pair_address(&self) -> &str {
        &self.pair.pair_address
    }

    pub fn liquidity_usd(&self) -> f64 {
        self.pair.liquidity.map(|l| l.usd).unwrap_or(0.0)
    }
}
