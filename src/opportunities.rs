use crate::types::{EnrichedPoolSnapshot, Trend, WindowRange};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Summary of one enriched pool, as printed after a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub pair_name: String,
    pub pair_address: String,
    pub bin_step: u32,
    pub base_fee: f64,
    pub liquidity_usd: f64,
    pub fdv: f64,
    pub volume24h: WindowRange,
    pub fees24h: WindowRange,
    pub fee_to_tvl: WindowRange,
    pub trend: Trend,
    pub strict: bool,
    pub bluechip: bool,
}

/// Ranks pools by worst-case fee/TVL (`feeToTvl.min`), best first.
pub fn rank_opportunities(pools: &[EnrichedPoolSnapshot], blue_chips: &[String]) -> Vec<Opportunity> {
    let chips: HashSet<String> = blue_chips.iter().map(|s| s.to_lowercase()).collect();
    let is_chip = |symbol: &str| chips.contains(&symbol.to_lowercase());

    let mut ranked: Vec<Opportunity> = pools
        .iter()
        .map(|pool| {
            let base = &pool.pair.base_token.symbol;
            let quote = &pool.pair.quote_token.symbol;
            Opportunity {
                pair_name: format!("{}-{}", base, quote),
                pair_address: pool.pair_address().to_string(),
                bin_step: pool.bin_step,
                base_fee: pool.base_fee,
                liquidity_usd: pool.liquidity_usd(),
                fdv: pool.pair.fdv.unwrap_or(0.0),
                volume24h: pool.volume24h_projected,
                fees24h: pool.fees24h,
                fee_to_tvl: pool.fee_to_tvl,
                trend: pool.trend,
                strict: pool.strict,
                bluechip: is_chip(base) && is_chip(quote),
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.fee_to_tvl
            .min
            .partial_cmp(&a.fee_to_tvl.min)
            .unwrap_or(Ordering::Equal)
    });
    ranked
}
