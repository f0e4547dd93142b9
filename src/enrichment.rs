//! Pool enrichment: joins pair activity with pool listings and the token registry.
//!
//! Pure and deterministic. Output keeps the order of the activity input; records
//! without a matching pool listing are dropped and reported, never filled in.

use crate::sources::TokenRegistry;
use crate::types::conversions::parse_numeric_or_zero;
use crate::types::{
    EnrichedPoolSnapshot, Liquidity, RawPairActivity, RawPoolListing, Trend, WindowRange,
    WindowValues,
};
use log::warn;
use std::collections::HashMap;

/// Multipliers that scale each window to a 24h equivalent.
pub const H6_TO_24H: f64 = 4.0;
pub const H1_TO_24H: f64 = 24.0;
pub const M5_TO_24H: f64 = 288.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JoinError {
    #[error("No pool listing matches pair {0}")]
    MissingPoolListing(String),
}

/// Enriched batch plus the pair addresses that could not be joined.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentResult {
    pub pools: Vec<EnrichedPoolSnapshot>,
    pub unmatched: Vec<String>,
}

pub fn enrich(
    registry: &TokenRegistry,
    activity: &[RawPairActivity],
    listings: &[RawPoolListing],
) -> EnrichmentResult {
    let mut by_address: HashMap<&str, &RawPoolListing> = HashMap::with_capacity(listings.len());
    for listing in listings {
        by_address
            .entry(listing.pair_address.as_str())
            .or_insert(listing);
    }

    let mut result = EnrichmentResult {
        pools: Vec::with_capacity(activity.len()),
        unmatched: Vec::new(),
    };

    for pair in activity {
        match join_pair(registry, pair, &by_address) {
            Ok(enriched) => result.pools.push(enriched),
            Err(e) => {
                warn!("⚠️ Dropping pair: {}", e);
                result.unmatched.push(pair.pair_address.clone());
            }
        }
    }

    result
}

fn join_pair(
    registry: &TokenRegistry,
    pair: &RawPairActivity,
    by_address: &HashMap<&str, &RawPoolListing>,
) -> Result<EnrichedPoolSnapshot, JoinError> {
    let listing = by_address
        .get(pair.pair_address.as_str())
        .ok_or_else(|| JoinError::MissingPoolListing(pair.pair_address.clone()))?;
    Ok(enrich_pair(registry, pair, listing))
}

/// Derives every enriched field for one matched pair.
pub fn enrich_pair(
    registry: &TokenRegistry,
    pair: &RawPairActivity,
    listing: &RawPoolListing,
) -> EnrichedPoolSnapshot {
    let strict = registry.contains_key(&pair.base_token.address)
        && registry.contains_key(&pair.quote_token.address);

    let mut liquidity = pair.liquidity.unwrap_or(Liquidity {
        usd: 0.0,
        base: 0.0,
        quote: 0.0,
        pool_native: None,
    });
    liquidity.pool_native = Some(parse_numeric_or_zero(&listing.liquidity));

    let base_fee = parse_numeric_or_zero(&listing.base_fee_percentage) / 100.0;
    let projected = project_volume(&pair.volume);
    let fees = estimate_fees(base_fee, &projected);
    let ratio = fee_to_tvl(&fees, liquidity.usd);
    let trend = classify_trend(&projected);

    let mut enriched_pair = pair.clone();
    enriched_pair.liquidity = Some(liquidity);

    EnrichedPoolSnapshot {
        pair: enriched_pair,
        bin_step: listing.bin_step,
        base_fee,
        volume24h_projected: projected,
        fees24h: fees,
        fee_to_tvl: ratio,
        trend,
        strict,
        pool_meta: Some(listing.clone()),
    }
}

/// Linear 24h extrapolation of each window, plus min/max across them.
pub fn project_volume(volume: &WindowValues) -> WindowRange {
    WindowRange::from_windows(
        volume.h24,
        volume.h6 * H6_TO_24H,
        volume.h1 * H1_TO_24H,
        volume.m5 * M5_TO_24H,
    )
}

pub fn estimate_fees(base_fee: f64, projected: &WindowRange) -> WindowRange {
    projected.map(|volume| base_fee * volume)
}

/// Fee/TVL per window. Zero or negative TVL, and non-finite ratios, clamp to 0.
pub fn fee_to_tvl(fees: &WindowRange, liquidity_usd: f64) -> WindowRange {
    if liquidity_usd.is_nan() || liquidity_usd <= 0.0 {
        return WindowRange::default();
    }
    fees.map(|fee| {
        let ratio = fee / liquidity_usd;
        if ratio.is_finite() {
            ratio
        } else {
            0.0
        }
    })
}

/// Three votes (m5≥h1, h1≥h6, h6≥h24) of ±1. A positive sum is `Up`; zero or less is `Down`.
pub fn classify_trend(projected: &WindowRange) -> Trend {
    let vote = |shorter: f64, longer: f64| if shorter >= longer { 1 } else { -1 };
    let total = vote(projected.m5, projected.h1)
        + vote(projected.h1, projected.h6)
        + vote(projected.h6, projected.h24);
    if total > 0 {
        Trend::Up
    } else {
        Trend::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RegistryToken, TokenRef};

    fn token(address: &str, symbol: &str) -> TokenRef {
        TokenRef {
            address: address.to_string(),
            name: symbol.to_string(),
            symbol: symbol.to_string(),
        }
    }

    fn pair(address: &str, volume: WindowValues, liquidity_usd: Option<f64>) -> RawPairActivity {
        RawPairActivity {
            chain_id: "solana".to_string(),
            dex_id: "meteora".to_string(),
            pair_address: address.to_string(),
            base_token: token("SOL_MINT", "SOL"),
            quote_token: token("USDC_MINT", "USDC"),
            volume,
            liquidity: liquidity_usd.map(|usd| Liquidity {
                usd,
                base: 1.0,
                quote: 2.0,
                pool_native: None,
            }),
            ..Default::default()
        }
    }

    fn listing(address: &str, liquidity: &str, fee_pct: &str) -> RawPoolListing {
        RawPoolListing {
            pair_address: address.to_string(),
            liquidity: liquidity.to_string(),
            bin_step: 20,
            base_fee_percentage: fee_pct.to_string(),
            ..Default::default()
        }
    }

    fn registry(addresses: &[&str]) -> TokenRegistry {
        addresses
            .iter()
            .map(|a| {
                (
                    a.to_string(),
                    RegistryToken {
                        address: a.to_string(),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    fn volume(h24: f64, h6: f64, h1: f64, m5: f64) -> WindowValues {
        WindowValues { m5, h1, h6, h24 }
    }

    #[test]
    fn test_enrich_pair_derived_fields() {
        let reg = registry(&["SOL_MINT", "USDC_MINT"]);
        let p = pair("P1", volume(2400.0, 600.0, 100.0, 10.0), Some(10_000.0));
        let l = listing("P1", "12345.5", "0.25");

        let enriched = enrich_pair(&reg, &p, &l);
        assert!(enriched.strict);
        assert_eq!(enriched.bin_step, 20);
        assert!((enriched.base_fee - 0.0025).abs() < 1e-12);
        assert_eq!(enriched.pair.liquidity.unwrap().pool_native, Some(12345.5));

        let v = enriched.volume24h_projected;
        assert_eq!((v.h24, v.h6, v.h1, v.m5), (2400.0, 2400.0, 2400.0, 2880.0));
        assert_eq!((v.min, v.max), (2400.0, 2880.0));

        assert!((enriched.fees24h.max - 7.2).abs() < 1e-9);
        assert!((enriched.fee_to_tvl.h24 - 0.0006).abs() < 1e-12);
        // m5>=h1, h1>=h6, h6>=h24 -> +3
        assert_eq!(enriched.trend, Trend::Up);
        assert_eq!(enriched.pool_meta.as_ref().unwrap().pair_address, "P1");
    }

    #[test]
    fn test_missing_liquidity_is_synthesized() {
        let p = pair("P1", volume(100.0, 10.0, 1.0, 0.1), None);
        let l = listing("P1", "500", "1");
        let enriched = enrich_pair(&registry(&[]), &p, &l);

        let liq = enriched.pair.liquidity.unwrap();
        assert_eq!((liq.usd, liq.base, liq.quote), (0.0, 0.0, 0.0));
        assert_eq!(liq.pool_native, Some(500.0));
        assert!(!enriched.strict);
    }

    #[test]
    fn test_zero_tvl_clamps_fee_to_tvl() {
        let p = pair("P1", volume(1000.0, 300.0, 50.0, 5.0), Some(0.0));
        let l = listing("P1", "1", "2");
        let enriched = enrich_pair(&registry(&[]), &p, &l);

        assert!(enriched.fees24h.h24 > 0.0);
        let r = enriched.fee_to_tvl;
        for value in [r.h24, r.h6, r.h1, r.m5, r.min, r.max] {
            assert_eq!(value, 0.0);
        }
    }

    #[test]
    fn test_trend_boundaries() {
        // All three votes false: -3
        assert_eq!(classify_trend(&project_volume(&volume(2400.0, 300.0, 10.0, 0.1))), Trend::Down);
        // One true, two false: -1
        assert_eq!(
            classify_trend(&WindowRange::from_windows(100.0, 50.0, 40.0, 45.0)),
            Trend::Down
        );
        // Two true, one false: +1
        assert_eq!(
            classify_trend(&WindowRange::from_windows(100.0, 150.0, 160.0, 10.0)),
            Trend::Up
        );
        // Equal projections count as >= on every vote
        assert_eq!(
            classify_trend(&WindowRange::from_windows(24.0, 24.0, 24.0, 24.0)),
            Trend::Up
        );
        // Zero activity everywhere is still +3
        assert_eq!(classify_trend(&WindowRange::default()), Trend::Up);
    }

    #[test]
    fn test_unmatched_pairs_are_dropped_not_fabricated() {
        let activity = vec![
            pair("P1", volume(1.0, 1.0, 1.0, 1.0), Some(1.0)),
            pair("NOPE", volume(1.0, 1.0, 1.0, 1.0), Some(1.0)),
            pair("P2", volume(1.0, 1.0, 1.0, 1.0), Some(1.0)),
        ];
        let listings = vec![listing("P2", "1", "1"), listing("P1", "1", "1")];

        let result = enrich(&registry(&[]), &activity, &listings);
        let order: Vec<&str> = result.pools.iter().map(|p| p.pair_address()).collect();
        assert_eq!(order, vec!["P1", "P2"]);
        assert_eq!(result.unmatched, vec!["NOPE".to_string()]);
    }

    #[test]
    fn test_duplicate_listing_first_wins() {
        let activity = vec![pair("P1", volume(1.0, 1.0, 1.0, 1.0), Some(1.0))];
        let listings = vec![listing("P1", "10", "1"), listing("P1", "99", "1")];
        let result = enrich(&registry(&[]), &activity, &listings);
        assert_eq!(result.pools[0].pair.liquidity.unwrap().pool_native, Some(10.0));
    }
}
