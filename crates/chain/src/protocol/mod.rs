//! Protocol-level reads and the event vocabulary.
//!
//! [`ProtocolReader`] wraps a [`ChainRpc`] with the handful of ledger and
//! registry calls the agent needs. Oracle type ids are mapped onto
//! [`OracleClass`] here so the rest of the agent never sees raw ids.

mod events;

pub use events::{parse_log, ChainEvent, ChainEventKind, JoinExitAmounts, LogMeta};

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use crate::contracts;
use crate::error::RpcError;
use crate::rpc::ChainRpc;

/// Keydonix oracle flavour, i.e. which AMM backs the proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FallbackVariant {
    Uniswap,
    Sushiswap,
    Shibaswap,
    /// LP token of a WETH pool; priced through the underlying token's pool.
    LpToken,
}

/// How a collateral is priced on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OracleClass {
    /// Live on-chain feed; the plain trigger works.
    OnChain,
    /// Keydonix oracle; triggering needs a storage proof.
    Fallback(FallbackVariant),
}

impl OracleClass {
    pub const KEYDONIX_UNI: u64 = 1;
    pub const KEYDONIX_LP: u64 = 2;
    pub const KEYDONIX_SUSHI: u64 = 13;
    pub const KEYDONIX_SHIBA: u64 = 18;

    /// Map an oracle registry type id.
    pub fn from_type_id(id: u64) -> Self {
        match id {
            Self::KEYDONIX_UNI => Self::Fallback(FallbackVariant::Uniswap),
            Self::KEYDONIX_LP => Self::Fallback(FallbackVariant::LpToken),
            Self::KEYDONIX_SUSHI => Self::Fallback(FallbackVariant::Sushiswap),
            Self::KEYDONIX_SHIBA => Self::Fallback(FallbackVariant::Shibaswap),
            _ => Self::OnChain,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

impl Default for OracleClass {
    fn default() -> Self {
        Self::OnChain
    }
}

/// Protocol contract addresses used for reads.
#[derive(Debug, Clone, Default)]
pub struct ProtocolAddresses {
    pub vault: Address,
    pub cdp_registry: Option<Address>,
    pub oracle_registry: Option<Address>,
    pub vault_manager_parameters: Option<Address>,
    pub eth_usd_aggregator: Option<Address>,
}

/// Read-only protocol calls over a [`ChainRpc`].
#[derive(Clone)]
pub struct ProtocolReader {
    rpc: Arc<dyn ChainRpc>,
    addresses: ProtocolAddresses,
}

fn missing(name: &str) -> RpcError {
    RpcError::Decode(format!("{name} address is not configured"))
}

impl ProtocolReader {
    pub fn new(rpc: Arc<dyn ChainRpc>, addresses: ProtocolAddresses) -> Self {
        Self { rpc, addresses }
    }

    pub fn addresses(&self) -> &ProtocolAddresses {
        &self.addresses
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    /// Outstanding debt of a position.
    pub async fn total_debt(&self, asset: Address, owner: Address) -> Result<U256, RpcError> {
        let data = contracts::encode_get_total_debt(asset, owner);
        let out = self.rpc.call(self.addresses.vault, data).await?;
        contracts::decode_get_total_debt(&out)
    }

    /// Block at which an auction started, 0 if none.
    pub async fn liquidation_block(&self, asset: Address, owner: Address) -> Result<u64, RpcError> {
        let data = contracts::encode_liquidation_block(asset, owner);
        let out = self.rpc.call(self.addresses.vault, data).await?;
        let block = contracts::decode_liquidation_block(&out)?;
        Ok(block.saturating_to())
    }

    /// Collateral amount locked by a position.
    pub async fn collateral(&self, asset: Address, owner: Address) -> Result<U256, RpcError> {
        let data = contracts::encode_collaterals(asset, owner);
        let out = self.rpc.call(self.addresses.vault, data).await?;
        contracts::decode_collaterals(&out)
    }

    /// Every open position according to the CDP registry.
    #[instrument(skip(self))]
    pub async fn all_positions(&self) -> Result<Vec<(Address, Address)>, RpcError> {
        let registry = self.addresses.cdp_registry.ok_or_else(|| missing("cdp registry"))?;
        let out = self.rpc.call(registry, contracts::encode_get_all()).await?;
        contracts::decode_get_all(&out)
    }

    /// Oracle class of a collateral. Without a registry everything is on-chain.
    pub async fn oracle_class(&self, asset: Address) -> Result<OracleClass, RpcError> {
        let Some(registry) = self.addresses.oracle_registry else {
            return Ok(OracleClass::OnChain);
        };
        let out = self.rpc.call(registry, contracts::encode_oracle_type(asset)).await?;
        let id = contracts::decode_oracle_type(&out)?;
        Ok(OracleClass::from_type_id(id.saturating_to()))
    }

    /// Liquidation ratio of a collateral, in percent.
    pub async fn liquidation_ratio(&self, asset: Address) -> Result<U256, RpcError> {
        let params = self
            .addresses
            .vault_manager_parameters
            .ok_or_else(|| missing("vault manager parameters"))?;
        let out = self.rpc.call(params, contracts::encode_liquidation_ratio(asset)).await?;
        contracts::decode_liquidation_ratio(&out)
    }

    /// ETH/USD with 8 decimals.
    pub async fn eth_usd_price(&self) -> Result<U256, RpcError> {
        let aggregator = self
            .addresses
            .eth_usd_aggregator
            .ok_or_else(|| missing("eth/usd aggregator"))?;
        let out = self.rpc.call(aggregator, contracts::encode_latest_answer()).await?;
        contracts::decode_latest_answer(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_class_mapping() {
        assert_eq!(OracleClass::from_type_id(0), OracleClass::OnChain);
        assert_eq!(OracleClass::from_type_id(11), OracleClass::OnChain);
        assert_eq!(
            OracleClass::from_type_id(1),
            OracleClass::Fallback(FallbackVariant::Uniswap)
        );
        assert_eq!(
            OracleClass::from_type_id(2),
            OracleClass::Fallback(FallbackVariant::LpToken)
        );
        assert_eq!(
            OracleClass::from_type_id(13),
            OracleClass::Fallback(FallbackVariant::Sushiswap)
        );
        assert_eq!(
            OracleClass::from_type_id(18),
            OracleClass::Fallback(FallbackVariant::Shibaswap)
        );
        assert!(!OracleClass::default().is_fallback());
    }
}
