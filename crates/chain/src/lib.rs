//! Keeper chain interaction layer.
//!
//! This crate provides:
//! - The [`ChainRpc`] capability trait and its alloy-backed implementation
//! - Contract bindings for the vault, registries, and liquidation triggers
//! - Parsing of protocol logs into typed chain events
//! - Protocol reads (debt, auction status, oracle class)
//! - Offline transaction signing and nonce tracking
//! - Gas price sources

pub mod contracts;
mod error;
pub mod gas;
pub mod protocol;
mod provider;
mod rpc;
mod signer;

pub use contracts::{event_signatures, ProofData};
pub use error::RpcError;
pub use gas::{GasPriceSource, GasQuote, RpcGasPrice};
pub use protocol::{
    parse_log, ChainEvent, ChainEventKind, FallbackVariant, JoinExitAmounts, LogMeta,
    OracleClass, ProtocolAddresses, ProtocolReader,
};
pub use provider::AlloyRpc;
pub use rpc::{AccountProof, BlockHeader, BlockStream, ChainRpc, LogQuery, StorageProof};
pub use signer::{LegacyTx, NonceManager, SignedTx, TxSigner};
