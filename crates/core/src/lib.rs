//! Keeper core logic.
//!
//! This crate provides the liquidation agent for a CDP stablecoin protocol:
//! - Log synchronization that rebuilds the position set from chain events
//! - Per-block liquidation scanning with on-chain and fallback oracle paths
//! - Fallback price proofs (RLP headers, Merkle storage proofs, TWAP)
//! - Confirmation gating, nonce tracking and resubmission of trigger txs
//! - Event routing and JSON state persistence
//! - The block-driven main loop tying these together

mod broker;
pub mod config;
mod confirmations;
mod events;
mod gas;
mod machine;
mod position;
pub mod proof;
mod scanner;
mod state;
mod submitter;
mod sync;

#[cfg(test)]
mod testing;

pub use broker::{EventBroker, LogNotifier, Notifier};
pub use config::{
    AgentConfig, ContractsConfig, ProofConfig, ScannerConfig, SubmitterConfig, SyncConfig,
};
pub use confirmations::{ConfirmationTracker, Observation};
pub use events::{Alert, DomainEvent, EventSink, LiquidationRequest, TriggerCall, TxSent};
pub use gas::GasPricer;
pub use machine::Agent;
pub use position::{PositionKey, TrackedCdp};
pub use proof::{DeferredProof, ProofBuilder, ProofError};
pub use scanner::{PositionSource, Scanner};
pub use state::{AppState, JsonFileStore, LogRecord, StateStore, SyncCheckpoint, SyncState};
pub use submitter::{Outcome, SubmitterCommand, SubmitterHandle, TxSubmitter};
pub use sync::{BootstrapReport, ChainEventSync, SyncReport};
