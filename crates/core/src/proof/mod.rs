//! Fallback oracle support: storage proofs and the price pre-check.
//!
//! The keydonix oracle verifies a pool's reserves and price accumulator from
//! a Merkle-Patricia proof against a historical block header. This module
//! builds that proof bundle and reproduces the oracle's price locally so the
//! scanner can decide eligibility without building one.

mod header;
mod pair;
mod price;
mod rlp;

pub use header::{encode_header, encode_verified};
pub use pair::{pair_address, Reserves};
pub use price::{is_liquidatable, sqrt, twap_q112, PriceSnapshot, Q112};
pub use rlp::{encode_proof_nodes, RlpItem};

use alloy::primitives::{Address, Bytes, B256, U256};
use keeper_chain::{contracts, ChainRpc, FallbackVariant, OracleClass, ProofData, ProtocolReader, RpcError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{DexConfig, ProofConfig};
use pair::{
    slot_key, word_to_address, PRICE0_CUMULATIVE_SLOT, PRICE1_CUMULATIVE_SLOT, RESERVES_SLOT,
    TOKEN0_SLOT, TOKEN1_SLOT, TOTAL_SUPPLY_SLOT,
};

#[derive(Debug, Error)]
pub enum ProofError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("rlp: {0}")]
    Rlp(#[from] alloy::rlp::Error),

    #[error("block {block} is younger than the {lookback}-block lookback")]
    InsufficientHistory { block: u64, lookback: u64 },

    #[error("node has no header for block {0}")]
    MissingBlock(u64),

    #[error("header rlp of block {block} hashes to {computed}, expected {expected}")]
    HeaderHashMismatch {
        block: u64,
        expected: B256,
        computed: B256,
    },

    #[error("pool {pool} ({token0}, {token1}) is not a WETH pool")]
    UnsupportedPool {
        pool: Address,
        token0: Address,
        token1: Address,
    },

    #[error("token {token} has oracle {class:?}, which has no pool")]
    UnsupportedOracle { token: Address, class: OracleClass },

    #[error("node returned {got} storage proofs for pool {pool}, expected 2")]
    MissingStorageProof { pool: Address, got: usize },

    #[error("pool {0} has no liquidity")]
    EmptyPool(Address),

    #[error("no time elapsed between price snapshots of pool {0}")]
    NoElapsedTime(Address),

    #[error("price arithmetic overflow for {0}")]
    Overflow(Address),
}

/// A WETH pool and its token order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WethPool {
    address: Address,
    weth_is_token0: bool,
}

impl WethPool {
    /// Accumulator holding the other token's price in WETH.
    fn accumulator_slot(&self) -> u64 {
        if self.weth_is_token0 {
            PRICE1_CUMULATIVE_SLOT
        } else {
            PRICE0_CUMULATIVE_SLOT
        }
    }
}

/// The non-WETH side of an LP token.
#[derive(Debug, Clone, Copy)]
struct LpUnderlying {
    token: Address,
    variant: FallbackVariant,
    weth_is_token0: bool,
}

/// Builds keydonix proofs and prices from archive state.
pub struct ProofBuilder {
    rpc: Arc<dyn ChainRpc>,
    reader: ProtocolReader,
    config: ProofConfig,
}

impl ProofBuilder {
    pub fn new(reader: ProtocolReader, config: ProofConfig) -> Self {
        Self {
            rpc: reader.rpc().clone(),
            reader,
            config,
        }
    }

    pub fn config(&self) -> &ProofConfig {
        &self.config
    }

    fn dex(&self, variant: FallbackVariant) -> Option<&DexConfig> {
        match variant {
            FallbackVariant::Uniswap => Some(&self.config.uniswap),
            FallbackVariant::Sushiswap => Some(&self.config.sushiswap),
            FallbackVariant::Shibaswap => Some(&self.config.shibaswap),
            FallbackVariant::LpToken => None,
        }
    }

    async fn slot(&self, address: Address, slot: u64, block: u64) -> Result<U256, ProofError> {
        Ok(self.rpc.storage_at(address, U256::from(slot), block).await?)
    }

    async fn pool_tokens(&self, pool: Address, block: u64) -> Result<(Address, Address), ProofError> {
        let (token0, token1) = tokio::try_join!(
            self.slot(pool, TOKEN0_SLOT, block),
            self.slot(pool, TOKEN1_SLOT, block),
        )?;
        Ok((word_to_address(token0), word_to_address(token1)))
    }

    async fn timestamp(&self, block: u64) -> Result<u64, ProofError> {
        let header = self
            .rpc
            .get_block(block)
            .await?
            .ok_or(ProofError::MissingBlock(block))?;
        Ok(header.timestamp)
    }

    /// WETH pool of `token` on the AMM of `variant`, checked against storage.
    async fn token_pool(
        &self,
        token: Address,
        variant: FallbackVariant,
        block: u64,
    ) -> Result<WethPool, ProofError> {
        let dex = self.dex(variant).ok_or(ProofError::UnsupportedOracle {
            token,
            class: OracleClass::Fallback(variant),
        })?;
        let address = pair_address(dex, token, self.config.weth);
        let (token0, token1) = self.pool_tokens(address, block).await?;

        let weth_is_token0 = if token0 == self.config.weth {
            true
        } else if token1 == self.config.weth {
            false
        } else {
            return Err(ProofError::UnsupportedPool {
                pool: address,
                token0,
                token1,
            });
        };

        Ok(WethPool {
            address,
            weth_is_token0,
        })
    }

    /// Underlying token of a WETH LP token and the oracle that prices it.
    async fn lp_underlying(&self, lp: Address, block: u64) -> Result<LpUnderlying, ProofError> {
        let (token0, token1) = self.pool_tokens(lp, block).await?;
        let (token, weth_is_token0) = if token0 == self.config.weth {
            (token1, true)
        } else if token1 == self.config.weth {
            (token0, false)
        } else {
            return Err(ProofError::UnsupportedPool {
                pool: lp,
                token0,
                token1,
            });
        };

        match self.reader.oracle_class(token).await? {
            OracleClass::Fallback(variant) if variant != FallbackVariant::LpToken => {
                Ok(LpUnderlying {
                    token,
                    variant,
                    weth_is_token0,
                })
            }
            class => Err(ProofError::UnsupportedOracle { token, class }),
        }
    }

    /// Pool whose accumulator prices `asset`.
    async fn price_pool(
        &self,
        asset: Address,
        variant: FallbackVariant,
        block: u64,
    ) -> Result<WethPool, ProofError> {
        match variant {
            FallbackVariant::LpToken => {
                let underlying = self.lp_underlying(asset, block).await?;
                self.token_pool(underlying.token, underlying.variant, block).await
            }
            _ => self.token_pool(asset, variant, block).await,
        }
    }

    /// Proof bundle for `asset` against `target_block - lookback`.
    #[instrument(skip(self), fields(proof_block = tracing::field::Empty))]
    pub async fn build(
        &self,
        asset: Address,
        variant: FallbackVariant,
        target_block: u64,
    ) -> Result<ProofData, ProofError> {
        let lookback = self.config.lookback_blocks;
        let proof_block = target_block
            .checked_sub(lookback)
            .ok_or(ProofError::InsufficientHistory {
                block: target_block,
                lookback,
            })?;
        tracing::Span::current().record("proof_block", proof_block);

        let pool = self.price_pool(asset, variant, proof_block).await?;
        let slots = vec![slot_key(RESERVES_SLOT), slot_key(pool.accumulator_slot())];

        let (header, account) = tokio::try_join!(
            async {
                self.rpc
                    .get_block(proof_block)
                    .await?
                    .ok_or(ProofError::MissingBlock(proof_block))
            },
            async { Ok::<_, ProofError>(self.rpc.get_proof(pool.address, slots, proof_block).await?) },
        )?;

        let block_rlp = encode_verified(&header)?;
        let [reserves, accumulator] = account.storage_proofs.as_slice() else {
            return Err(ProofError::MissingStorageProof {
                pool: pool.address,
                got: account.storage_proofs.len(),
            });
        };

        let proof = ProofData {
            block: Bytes::from(block_rlp),
            accountProofNodesRlp: Bytes::from(encode_proof_nodes(&account.account_proof)?),
            reserveAndTimestampProofNodesRlp: Bytes::from(encode_proof_nodes(&reserves.proof)?),
            priceAccumulatorProofNodesRlp: Bytes::from(encode_proof_nodes(&accumulator.proof)?),
        };

        debug!(
            pool = %pool.address,
            header_len = proof.block.len(),
            account_nodes = account.account_proof.len(),
            "Proof built"
        );
        Ok(proof)
    }

    async fn snapshot(&self, pool: WethPool, block: u64) -> Result<(PriceSnapshot, Reserves), ProofError> {
        let (reserves, cumulative, timestamp) = tokio::try_join!(
            self.slot(pool.address, RESERVES_SLOT, block),
            self.slot(pool.address, pool.accumulator_slot(), block),
            self.timestamp(block),
        )?;
        let reserves = Reserves::from_word(reserves);
        let snapshot = PriceSnapshot::at_block(cumulative, &reserves, pool.weth_is_token0, timestamp);
        Ok((snapshot, reserves))
    }

    /// Time-weighted price of `token` in WETH over the lookback window, Q112.
    async fn token_twap(
        &self,
        token: Address,
        variant: FallbackVariant,
        head: u64,
    ) -> Result<U256, ProofError> {
        let lookback = self.config.lookback_blocks;
        let then_block = head
            .checked_sub(lookback)
            .ok_or(ProofError::InsufficientHistory { block: head, lookback })?;

        let pool = self.token_pool(token, variant, head).await?;
        let ((then, _), (now, reserves)) =
            tokio::try_join!(self.snapshot(pool, then_block), self.snapshot(pool, head))?;

        if reserves.reserve0.is_zero() || reserves.reserve1.is_zero() {
            return Err(ProofError::EmptyPool(pool.address));
        }
        twap_q112(&then, &now).ok_or(ProofError::NoElapsedTime(pool.address))
    }

    /// Oracle price of one unit of `asset` in WETH, Q112.
    #[instrument(skip(self))]
    pub async fn collateral_price(
        &self,
        asset: Address,
        variant: FallbackVariant,
        head: u64,
    ) -> Result<U256, ProofError> {
        if variant != FallbackVariant::LpToken {
            return self.token_twap(asset, variant, head).await;
        }

        let underlying = self.lp_underlying(asset, head).await?;
        let (token_price, reserves, supply) = tokio::try_join!(
            self.token_twap(underlying.token, underlying.variant, head),
            self.slot(asset, RESERVES_SLOT, head),
            self.slot(asset, TOTAL_SUPPLY_SLOT, head),
        )?;

        let reserves = Reserves::from_word(reserves);
        let (weth_reserve, token_reserve) = if underlying.weth_is_token0 {
            (reserves.reserve0, reserves.reserve1)
        } else {
            (reserves.reserve1, reserves.reserve0)
        };
        if supply.is_zero() {
            return Err(ProofError::EmptyPool(asset));
        }
        price::lp_price_q112(token_reserve, weth_reserve, token_price, supply)
            .ok_or(ProofError::Overflow(asset))
    }

    /// Whether the vault would accept a liquidation of this position now.
    #[instrument(skip(self, debt))]
    pub async fn is_position_liquidatable(
        &self,
        asset: Address,
        owner: Address,
        variant: FallbackVariant,
        debt: U256,
        head: u64,
    ) -> Result<bool, ProofError> {
        let (price, amount, ratio, eth_usd) = tokio::try_join!(
            self.collateral_price(asset, variant, head),
            async { Ok::<_, ProofError>(self.reader.collateral(asset, owner).await?) },
            async { Ok::<_, ProofError>(self.reader.liquidation_ratio(asset).await?) },
            async { Ok::<_, ProofError>(self.reader.eth_usd_price().await?) },
        )?;

        let usd = price::collateral_usd(amount, price, eth_usd).ok_or(ProofError::Overflow(asset))?;
        let liquidatable = is_liquidatable(usd, debt, ratio);
        debug!(%usd, %debt, %ratio, liquidatable, "Fallback price check");
        Ok(liquidatable)
    }
}

impl std::fmt::Debug for ProofBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofBuilder")
            .field("lookback_blocks", &self.config.lookback_blocks)
            .finish_non_exhaustive()
    }
}

/// Proof construction postponed until the transaction is built.
///
/// Proofs are tied to a block, so the scanner hands this to the submitter
/// instead of a finished proof.
#[derive(Clone)]
pub struct DeferredProof {
    builder: Arc<ProofBuilder>,
    pub asset: Address,
    pub owner: Address,
    pub variant: FallbackVariant,
}

impl DeferredProof {
    pub fn new(builder: Arc<ProofBuilder>, asset: Address, owner: Address, variant: FallbackVariant) -> Self {
        Self {
            builder,
            asset,
            owner,
            variant,
        }
    }

    /// Trigger calldata carrying a proof for `target_block`.
    pub async fn calldata(&self, target_block: u64) -> Result<Bytes, ProofError> {
        let proof = self.builder.build(self.asset, self.variant, target_block).await?;
        Ok(contracts::encode_trigger_liquidation_with_proof(
            self.asset, self.owner, proof,
        ))
    }
}

impl std::fmt::Debug for DeferredProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredProof")
            .field("asset", &self.asset)
            .field("owner", &self.owner)
            .field("variant", &self.variant)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::testing::MockRpc;
    use keeper_chain::ProtocolAddresses;

    fn builder(rpc: Arc<MockRpc>) -> ProofBuilder {
        let reader = ProtocolReader::new(rpc, ProtocolAddresses::default());
        ProofBuilder::new(reader, ProofConfig::default())
    }

    #[tokio::test]
    async fn test_build_proof_bundle() {
        let config = ProofConfig::default();
        let rpc = Arc::new(MockRpc::new());
        let target = 1_000;
        let proof_block = target - config.lookback_blocks;
        seed_usdc_pool(&rpc, proof_block);

        let proof = builder(rpc.clone())
            .build(USDC, FallbackVariant::Uniswap, target)
            .await
            .unwrap();

        assert_eq!(
            keccak(&proof.block),
            header(proof_block, 1_700_000_000).hash
        );
        let accumulator = RlpItem::decode_exact(&proof.priceAccumulatorProofNodesRlp).unwrap();
        assert!(matches!(accumulator, RlpItem::List(ref nodes) if nodes.len() == 2));
        assert_eq!(
            rpc.proof_requests(),
            vec![(USDC_WETH, vec![slot_key(RESERVES_SLOT), slot_key(PRICE0_CUMULATIVE_SLOT)], proof_block)]
        );
    }

    fn keccak(data: &[u8]) -> B256 {
        alloy::primitives::keccak256(data)
    }

    #[tokio::test]
    async fn test_build_rejects_non_weth_pool() {
        let rpc = Arc::new(MockRpc::new());
        // Nothing stored: both token slots read as zero
        let err = builder(rpc)
            .build(USDC, FallbackVariant::Uniswap, 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, ProofError::UnsupportedPool { pool, .. } if pool == USDC_WETH));
    }

    #[tokio::test]
    async fn test_build_needs_history() {
        let rpc = Arc::new(MockRpc::new());
        let err = builder(rpc)
            .build(USDC, FallbackVariant::Uniswap, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, ProofError::InsufficientHistory { block: 50, lookback: 119 }));
    }

    #[tokio::test]
    async fn test_token_twap_from_storage() {
        let config = ProofConfig::default();
        let rpc = Arc::new(MockRpc::new());
        let head = 2_000;
        let then = head - config.lookback_blocks;

        for block in [then, head] {
            rpc.set_storage(USDC_WETH, TOKEN0_SLOT, block, word(USDC));
            rpc.set_storage(USDC_WETH, TOKEN1_SLOT, block, word(config.weth));
        }
        // 2_000 USDC (6 decimals) per WETH, last trade at t=1_000
        let reserves = (U256::from(1_000u64) << 224usize)
            | (U256::from(10u64).pow(U256::from(18u8)) << 112usize)
            | U256::from(2_000_000_000u64);
        rpc.set_storage(USDC_WETH, RESERVES_SLOT, then, reserves);
        rpc.set_storage(USDC_WETH, RESERVES_SLOT, head, reserves);
        rpc.set_block(header(then, 1_000));
        rpc.set_block(header(head, 2_428));

        let price = builder(rpc)
            .collateral_price(USDC, FallbackVariant::Uniswap, head)
            .await
            .unwrap();

        let spot = U256::from(10u64).pow(U256::from(18u8)) * Q112 / U256::from(2_000_000_000u64);
        assert_eq!(price, spot);
    }
}
