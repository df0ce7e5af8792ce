//! Contract bindings for the CDP protocol.
//!
//! ABI types come from `sol!`; the free functions below encode calldata and
//! decode return data so that callers never touch raw selectors.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

use crate::error::RpcError;

sol! {
    /// Vault manager: position open/close events
    interface IVaultManager {
        event Join(address indexed asset, address indexed owner, uint main, uint col, uint usdp);
        event Exit(address indexed asset, address indexed owner, uint main, uint col, uint usdp);
    }

    /// Liquidation trigger: auction start event and on-chain-oracle trigger
    interface ILiquidationTrigger {
        event LiquidationTriggered(address indexed asset, address indexed owner);

        function triggerLiquidation(address asset, address owner) external;
    }

    /// Merkle-Patricia proof bundle accepted by the keydonix oracle
    #[derive(Debug, PartialEq, Eq)]
    struct ProofData {
        bytes block;
        bytes accountProofNodesRlp;
        bytes reserveAndTimestampProofNodesRlp;
        bytes priceAccumulatorProofNodesRlp;
    }

    /// Liquidation trigger for fallback-oracle collateral
    interface IKeydonixLiquidationTrigger {
        function triggerLiquidation(address asset, address owner, ProofData calldata proofData) external;
    }

    /// Liquidation auction: completed buyouts
    interface ILiquidationAuction {
        event Buyout(address indexed asset, address indexed owner, address indexed buyer, uint amount, uint price, uint penalty);
    }

    /// Protocol ledger
    interface IVault {
        function getTotalDebt(address asset, address owner) external view returns (uint);
        function liquidationBlock(address asset, address owner) external view returns (uint);
        function collaterals(address asset, address owner) external view returns (uint);
    }

    #[derive(Debug, PartialEq, Eq)]
    struct CDP {
        address asset;
        address owner;
    }

    /// Registry of every open position
    interface ICdpRegistry {
        function getAll() external view returns (CDP[] memory);
    }

    interface IOracleRegistry {
        function oracleTypeByAsset(address asset) external view returns (uint);
    }

    interface IVaultManagerParameters {
        function liquidationRatio(address asset) external view returns (uint);
    }

    /// Chainlink ETH/USD aggregator
    interface IAggregator {
        function latestAnswer() external view returns (int256);
    }
}

/// Topic0 values for log filtering.
pub mod event_signatures {
    use super::*;
    use alloy::primitives::B256;

    /// keccak256("Join(address,address,uint256,uint256,uint256)")
    pub const JOIN: B256 = IVaultManager::Join::SIGNATURE_HASH;

    /// keccak256("Exit(address,address,uint256,uint256,uint256)")
    pub const EXIT: B256 = IVaultManager::Exit::SIGNATURE_HASH;

    /// keccak256("LiquidationTriggered(address,address)")
    pub const LIQUIDATION_TRIGGERED: B256 = ILiquidationTrigger::LiquidationTriggered::SIGNATURE_HASH;

    /// keccak256("Buyout(address,address,address,uint256,uint256,uint256)")
    pub const BUYOUT: B256 = ILiquidationAuction::Buyout::SIGNATURE_HASH;

    /// Topics tracked on a vault manager.
    pub fn vault_manager_topics() -> Vec<B256> {
        vec![JOIN, EXIT]
    }
}

fn decode_err(e: impl std::fmt::Display) -> RpcError {
    RpcError::Decode(e.to_string())
}

/// `triggerLiquidation(asset, owner)` calldata.
pub fn encode_trigger_liquidation(asset: Address, owner: Address) -> Bytes {
    let call = ILiquidationTrigger::triggerLiquidationCall { asset, owner };
    Bytes::from(call.abi_encode())
}

/// `triggerLiquidation(asset, owner, proof)` calldata for the keydonix trigger.
pub fn encode_trigger_liquidation_with_proof(
    asset: Address,
    owner: Address,
    proof: ProofData,
) -> Bytes {
    let call = IKeydonixLiquidationTrigger::triggerLiquidationCall {
        asset,
        owner,
        proofData: proof,
    };
    Bytes::from(call.abi_encode())
}

pub fn encode_get_total_debt(asset: Address, owner: Address) -> Bytes {
    Bytes::from(IVault::getTotalDebtCall { asset, owner }.abi_encode())
}

pub fn decode_get_total_debt(data: &[u8]) -> Result<U256, RpcError> {
    IVault::getTotalDebtCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(decode_err)
}

pub fn encode_liquidation_block(asset: Address, owner: Address) -> Bytes {
    Bytes::from(IVault::liquidationBlockCall { asset, owner }.abi_encode())
}

pub fn decode_liquidation_block(data: &[u8]) -> Result<U256, RpcError> {
    IVault::liquidationBlockCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(decode_err)
}

pub fn encode_collaterals(asset: Address, owner: Address) -> Bytes {
    Bytes::from(IVault::collateralsCall { asset, owner }.abi_encode())
}

pub fn decode_collaterals(data: &[u8]) -> Result<U256, RpcError> {
    IVault::collateralsCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(decode_err)
}

pub fn encode_get_all() -> Bytes {
    Bytes::from(ICdpRegistry::getAllCall {}.abi_encode())
}

/// Decode `getAll()` into `(asset, owner)` pairs.
pub fn decode_get_all(data: &[u8]) -> Result<Vec<(Address, Address)>, RpcError> {
    ICdpRegistry::getAllCall::abi_decode_returns(data, true)
        .map(|r| r._0.into_iter().map(|cdp| (cdp.asset, cdp.owner)).collect())
        .map_err(decode_err)
}

pub fn encode_oracle_type(asset: Address) -> Bytes {
    Bytes::from(IOracleRegistry::oracleTypeByAssetCall { asset }.abi_encode())
}

pub fn decode_oracle_type(data: &[u8]) -> Result<U256, RpcError> {
    IOracleRegistry::oracleTypeByAssetCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(decode_err)
}

pub fn encode_liquidation_ratio(asset: Address) -> Bytes {
    Bytes::from(IVaultManagerParameters::liquidationRatioCall { asset }.abi_encode())
}

pub fn decode_liquidation_ratio(data: &[u8]) -> Result<U256, RpcError> {
    IVaultManagerParameters::liquidationRatioCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(decode_err)
}

pub fn encode_latest_answer() -> Bytes {
    Bytes::from(IAggregator::latestAnswerCall {}.abi_encode())
}

/// Decode `latestAnswer()`; negative answers are rejected.
pub fn decode_latest_answer(data: &[u8]) -> Result<U256, RpcError> {
    let answer = IAggregator::latestAnswerCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(decode_err)?;
    if answer.is_negative() {
        return Err(RpcError::Decode(format!("negative price answer {answer}")));
    }
    Ok(answer.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, keccak256};

    #[test]
    fn test_event_signatures_match_canonical_text() {
        assert_eq!(
            event_signatures::JOIN,
            keccak256("Join(address,address,uint256,uint256,uint256)")
        );
        assert_eq!(
            event_signatures::LIQUIDATION_TRIGGERED,
            keccak256("LiquidationTriggered(address,address)")
        );
        assert_eq!(
            event_signatures::BUYOUT,
            keccak256("Buyout(address,address,address,uint256,uint256,uint256)")
        );
    }

    #[test]
    fn test_trigger_calldata_layout() {
        let asset = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        let owner = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        let data = encode_trigger_liquidation(asset, owner);

        // selector + two padded words
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[..4], &keccak256("triggerLiquidation(address,address)")[..4]);
        assert_eq!(&data[4 + 12..4 + 32], asset.as_slice());
        assert_eq!(&data[36 + 12..36 + 32], owner.as_slice());
    }

    #[test]
    fn test_decode_total_debt() {
        let mut word = [0u8; 32];
        word[31] = 42;
        assert_eq!(decode_get_total_debt(&word).unwrap(), U256::from(42));
        assert!(matches!(decode_get_total_debt(&[1, 2, 3]), Err(RpcError::Decode(_))));
    }
}
