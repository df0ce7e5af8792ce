//! Domain events exchanged between components.

use alloy::primitives::{Address, Bytes, B256};
use keeper_chain::{ChainEvent, ChainEventKind, OracleClass};
use tokio::sync::mpsc;
use tracing::debug;

use crate::position::PositionKey;
use crate::proof::DeferredProof;
use crate::state::AppState;

/// Calldata of a liquidation trigger.
#[derive(Debug, Clone)]
pub enum TriggerCall {
    /// Final calldata, gas already estimated
    Ready { calldata: Bytes, gas_estimate: u64 },
    /// Needs a proof against the block it is sent in
    Deferred(DeferredProof),
}

/// A position the scanner found liquidatable.
#[derive(Debug, Clone)]
pub struct LiquidationRequest {
    pub key: PositionKey,
    /// Trigger contract to call
    pub trigger: Address,
    pub oracle: OracleClass,
    pub call: TriggerCall,
    /// Head block the eligibility was decided at
    pub block: u64,
}

/// A liquidation transaction handed to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSent {
    pub key: PositionKey,
    pub tx_hash: B256,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub block: u64,
    /// Same nonce as an earlier, stuck transaction
    pub replacement: bool,
}

/// Something an operator should look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub source: &'static str,
    pub key: Option<PositionKey>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum DomainEvent {
    Join(ChainEvent),
    Exit(ChainEvent),
    LiquidationTriggered(ChainEvent),
    Liquidated(ChainEvent),
    LiquidationRequested(LiquidationRequest),
    LiquidationTxSent(TxSent),
    SaveRequested(AppState),
    Alert(Alert),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "Join",
            Self::Exit(_) => "Exit",
            Self::LiquidationTriggered(_) => "LiquidationTriggered",
            Self::Liquidated(_) => "Liquidated",
            Self::LiquidationRequested(_) => "LiquidationRequested",
            Self::LiquidationTxSent(_) => "LiquidationTxSent",
            Self::SaveRequested(_) => "SaveRequested",
            Self::Alert(_) => "Alert",
        }
    }
}

impl From<ChainEvent> for DomainEvent {
    fn from(event: ChainEvent) -> Self {
        match event.kind {
            ChainEventKind::Join(_) => Self::Join(event),
            ChainEventKind::Exit(_) => Self::Exit(event),
            ChainEventKind::LiquidationTriggered => Self::LiquidationTriggered(event),
            ChainEventKind::Liquidated { .. } => Self::Liquidated(event),
        }
    }
}

/// Publishing handle. Never blocks; events are dropped once the broker is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(event = e.0.name(), "Broker closed, event dropped");
        }
    }

    pub fn request_save(&self, state: AppState) {
        self.emit(DomainEvent::SaveRequested(state));
    }

    pub fn alert(&self, source: &'static str, key: Option<PositionKey>, message: impl Into<String>) {
        self.emit(DomainEvent::Alert(Alert {
            source,
            key,
            message: message.into(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_chain::LogMeta;

    #[test]
    fn test_chain_event_mapping() {
        let event = ChainEvent {
            meta: LogMeta {
                address: Address::ZERO,
                block_number: 1,
                block_hash: B256::ZERO,
                tx_hash: B256::ZERO,
                tx_index: 0,
                log_index: 0,
            },
            asset: Address::ZERO,
            owner: Address::ZERO,
            kind: ChainEventKind::LiquidationTriggered,
        };
        assert_eq!(DomainEvent::from(event).name(), "LiquidationTriggered");
    }

    #[tokio::test]
    async fn test_sink_after_close() {
        let (sink, mut rx) = EventSink::channel();
        sink.alert("test", None, "first");
        match rx.recv().await {
            Some(DomainEvent::Alert(alert)) => assert_eq!(alert.message, "first"),
            other => panic!("unexpected {other:?}"),
        }
        drop(rx);
        // Does not panic
        sink.alert("test", None, "second");
    }
}
