//! Configuration for the liquidation agent.
//!
//! This module provides:
//! - Agent runtime configuration (sync, scanner, submitter parameters)
//! - Protocol contract addresses with the mainnet preset
//! - Fallback oracle proof parameters (AMM factories, lookback)

mod agent;
mod protocol;

pub use agent::{
    AgentConfig, ChainSection, DenylistEntry, ScannerConfig, SubmitterConfig, SyncConfig,
};
pub use protocol::{ContractsConfig, DexConfig, ProofConfig, TrackedContract, VaultManagerConfig};
