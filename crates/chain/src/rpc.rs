//! Chain RPC capability set.
//!
//! The core depends only on this trait. [`AlloyRpc`](crate::AlloyRpc) is the
//! production implementation; tests substitute an in-memory one.

use alloy::primitives::{Address, Bloom, Bytes, B256, B64, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

use crate::error::RpcError;

/// Stream of new head block numbers.
pub type BlockStream = Pin<Box<dyn Stream<Item = u64> + Send>>;

/// Log range query for a single contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    /// Accepted topic0 values (any of).
    pub topics: Vec<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogQuery {
    pub fn new(address: Address, topics: Vec<B256>, from_block: u64, to_block: u64) -> Self {
        Self {
            address,
            topics,
            from_block,
            to_block,
        }
    }

    /// Whether a log falls inside this query.
    pub fn matches(&self, log: &Log) -> bool {
        let block = log.block_number.unwrap_or(0);
        log.address() == self.address
            && block >= self.from_block
            && block <= self.to_block
            && log
                .topics()
                .first()
                .map(|t| self.topics.is_empty() || self.topics.contains(t))
                .unwrap_or(false)
    }
}

/// Raw block header fields, in the shape needed for RLP re-encoding.
///
/// Optional fields are the post-fork additions; each one is present only on
/// blocks produced after its fork.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub hash: B256,
    pub parent_hash: B256,
    pub ommers_hash: B256,
    pub beneficiary: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_hash: Option<B256>,
    pub nonce: Option<B64>,
    pub base_fee_per_gas: Option<u64>,
    pub withdrawals_root: Option<B256>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_block_root: Option<B256>,
    pub requests_hash: Option<B256>,
}

/// Merkle-Patricia proof for one storage slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageProof {
    pub key: B256,
    pub value: U256,
    pub proof: Vec<Bytes>,
}

/// EIP-1186 account proof with the requested storage proofs, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountProof {
    pub address: Address,
    pub account_proof: Vec<Bytes>,
    pub storage_proofs: Vec<StorageProof>,
}

/// Everything the agent needs from a chain node.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current head block number.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Historical logs for one contract over an inclusive block range.
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RpcError>;

    /// Read-only contract call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// Gas estimate for a call from `from`.
    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes) -> Result<u64, RpcError>;

    /// Confirmed transaction count of an account (the next usable nonce).
    async fn transaction_count(&self, account: Address) -> Result<u64, RpcError>;

    /// Node's gas price suggestion in wei.
    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// Raw storage slot value at a historical block.
    async fn storage_at(&self, address: Address, slot: U256, block: u64) -> Result<U256, RpcError>;

    /// EIP-1186 proof of `slots` of `address` at `block`.
    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<B256>,
        block: u64,
    ) -> Result<AccountProof, RpcError>;

    /// Header of a block, `None` if the node does not know it.
    async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>, RpcError>;

    /// Broadcast a signed transaction.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError>;

    /// Subscribe to new block headers.
    async fn subscribe_blocks(&self) -> Result<BlockStream, RpcError>;
}
