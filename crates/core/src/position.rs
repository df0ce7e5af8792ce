//! Position identity and the reconstructed position cache entry.

use alloy::primitives::{Address, U256};
use keeper_chain::OracleClass;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Composite `(asset, owner)` key of a CDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub asset: Address,
    pub owner: Address,
}

impl PositionKey {
    pub fn new(asset: Address, owner: Address) -> Self {
        Self { asset, owner }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:#x}", self.asset, self.owner)
    }
}

impl FromStr for PositionKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (asset, owner) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("position key must be asset:owner, got {s}"))?;
        Ok(Self {
            asset: asset.parse()?,
            owner: owner.parse()?,
        })
    }
}

/// A position reconstructed from `Join` logs.
///
/// Informational only: eligibility is always re-read from the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedCdp {
    /// Stablecoin minted by the opening `Join`
    pub usdp: U256,
    /// Trigger of the vault manager that opened the position
    pub liquidation_trigger: Option<Address>,
    /// Auction start block, 0 while none is running
    #[serde(default)]
    pub liquidation_block: u64,
    #[serde(default)]
    pub oracle_class: OracleClass,
}

impl TrackedCdp {
    pub fn new(usdp: U256, liquidation_trigger: Option<Address>) -> Self {
        Self {
            usdp,
            liquidation_trigger,
            liquidation_block: 0,
            oracle_class: OracleClass::OnChain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_round_trip() {
        let key = PositionKey::new(Address::repeat_byte(0xab), Address::with_last_byte(7));
        let text = key.to_string();
        assert_eq!(
            text,
            "0xabababababababababababababababababababab:0x0000000000000000000000000000000000000007"
        );
        assert_eq!(text.parse::<PositionKey>().unwrap(), key);
        assert!("nonsense".parse::<PositionKey>().is_err());
    }
}
