//! Gas price sources.
//!
//! Submission uses legacy pricing: a single `gas_price`. Sources are tried in
//! order by the caller; each one reports either a quote or why it could not
//! produce one.

mod legacy;

pub use legacy::RpcGasPrice;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

pub const GWEI: u128 = 1_000_000_000;

/// A gas price and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    /// Gas price in wei.
    pub gas_price: u128,
    pub source: &'static str,
}

impl GasQuote {
    pub fn gwei(&self) -> f64 {
        self.gas_price as f64 / GWEI as f64
    }
}

/// Anything that can quote a gas price.
#[async_trait]
pub trait GasPriceSource: Send + Sync + Debug {
    async fn gas_price(&self) -> Result<GasQuote>;

    /// Source name for logging.
    fn name(&self) -> &'static str;
}

/// Convert a gwei amount to wei, rejecting non-finite and non-positive input.
pub fn gwei_to_wei(gwei: f64) -> Option<u128> {
    if !gwei.is_finite() || gwei <= 0.0 {
        return None;
    }
    Some((gwei * GWEI as f64).round() as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gwei_conversion() {
        assert_eq!(gwei_to_wei(1.0), Some(GWEI));
        assert_eq!(gwei_to_wei(12.5), Some(12_500_000_000));
        assert_eq!(gwei_to_wei(0.0), None);
        assert_eq!(gwei_to_wei(-3.0), None);
        assert_eq!(gwei_to_wei(f64::NAN), None);
    }

    #[test]
    fn test_quote_gwei() {
        let quote = GasQuote {
            gas_price: 25 * GWEI,
            source: "test",
        };
        assert_eq!(quote.gwei(), 25.0);
    }
}
