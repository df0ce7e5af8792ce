//! UQ112.112 price arithmetic for the fallback oracle pre-check.
//!
//! Mirrors what the keydonix oracle computes on chain: a time-weighted
//! average from two cumulative price snapshots, and for LP tokens the fair
//! value `2 * sqrt(k * p)`. Integer only.

use alloy::primitives::U256;

use super::pair::Reserves;

/// 2^112
pub const Q112: U256 = U256::from_limbs([0, 1 << 48, 0, 0]);

/// Chainlink ETH/USD decimals (1e8)
pub const ETH_USD_UNIT: U256 = U256::from_limbs([100_000_000, 0, 0, 0]);

/// Integer square root, rounded down (Newton's method).
pub fn sqrt(x: U256) -> U256 {
    if x.is_zero() {
        return U256::ZERO;
    }
    if x <= U256::from(3u8) {
        return U256::from(1u8);
    }
    let mut z = x;
    let mut y = x / U256::from(2u8) + U256::from(1u8);
    while y < z {
        z = y;
        y = (x / y + y) / U256::from(2u8);
    }
    z
}

/// WETH reserve and token reserve of a WETH pool.
#[inline]
fn split_reserves(reserves: &Reserves, weth_is_token0: bool) -> (U256, U256) {
    if weth_is_token0 {
        (reserves.reserve0, reserves.reserve1)
    } else {
        (reserves.reserve1, reserves.reserve0)
    }
}

/// Current token price in WETH, Q112. `None` for an empty pool.
pub fn spot_price_q112(reserves: &Reserves, weth_is_token0: bool) -> Option<U256> {
    let (weth, token) = split_reserves(reserves, weth_is_token0);
    if token.is_zero() {
        return None;
    }
    Some(weth * Q112 / token)
}

/// A cumulative price reading at a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSnapshot {
    /// Cumulative price as of the block timestamp
    pub cumulative: U256,
    pub timestamp: u64,
}

impl PriceSnapshot {
    /// Bring a stored cumulative forward to `block_timestamp`.
    ///
    /// The pool only updates its accumulator on trades, so the stored value is
    /// as of `reserves.timestamp`; the time since then accrues at spot price.
    pub fn at_block(
        cumulative_last: U256,
        reserves: &Reserves,
        weth_is_token0: bool,
        block_timestamp: u64,
    ) -> Self {
        // Pool timestamps are stored modulo 2^32
        let last = reserves.timestamp;
        let now32 = block_timestamp & u64::from(u32::MAX);
        let elapsed = now32.wrapping_sub(last) & u64::from(u32::MAX);

        let cumulative = match spot_price_q112(reserves, weth_is_token0) {
            Some(price) if elapsed > 0 => {
                cumulative_last.wrapping_add(price.wrapping_mul(U256::from(elapsed)))
            }
            _ => cumulative_last,
        };

        Self {
            cumulative,
            timestamp: block_timestamp,
        }
    }
}

/// Average price between two snapshots, Q112. `None` if no time passed.
pub fn twap_q112(then: &PriceSnapshot, now: &PriceSnapshot) -> Option<U256> {
    let elapsed = now.timestamp.checked_sub(then.timestamp)?;
    if elapsed == 0 {
        return None;
    }
    Some(now.cumulative.wrapping_sub(then.cumulative) / U256::from(elapsed))
}

/// LP token price in WETH, Q112.
///
/// `token_price_q112` is the WETH price of the pool's other token.
pub fn lp_price_q112(
    token_reserve: U256,
    weth_reserve: U256,
    token_price_q112: U256,
    total_supply: U256,
) -> Option<U256> {
    if total_supply.is_zero() {
        return None;
    }
    let token_in_weth = token_reserve.checked_mul(token_price_q112)? / Q112;
    let k = token_in_weth.checked_mul(weth_reserve)?;
    let value = sqrt(k).checked_mul(U256::from(2u8))?;
    Some(value.checked_mul(Q112)? / total_supply)
}

/// USD value (18 decimals) of `amount` collateral.
pub fn collateral_usd(amount: U256, price_q112: U256, eth_usd: U256) -> Option<U256> {
    let in_weth = amount.checked_mul(price_q112)? / Q112;
    Some(in_weth.checked_mul(eth_usd)? / ETH_USD_UNIT)
}

/// The vault's check: debt reached `ratio_pct` percent of the collateral value.
pub fn is_liquidatable(collateral_usd: U256, debt: U256, ratio_pct: U256) -> bool {
    if debt.is_zero() {
        return false;
    }
    collateral_usd.saturating_mul(ratio_pct) <= debt.saturating_mul(U256::from(100u8))
}
