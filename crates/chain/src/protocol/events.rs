//! Typed chain events parsed from raw protocol logs.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::contracts::event_signatures;

/// Where a log sits in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMeta {
    pub address: Address,
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub log_index: u64,
}

impl LogMeta {
    /// Ordering key: (block, log index).
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Amounts carried by `Join` and `Exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinExitAmounts {
    pub main: U256,
    pub col: U256,
    pub usdp: U256,
}

/// Protocol event kinds the agent tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEventKind {
    Join(JoinExitAmounts),
    Exit(JoinExitAmounts),
    LiquidationTriggered,
    /// Auction buyout, i.e. the position was liquidated.
    Liquidated {
        buyer: Address,
        amount: U256,
        price: U256,
        penalty: U256,
    },
}

impl ChainEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChainEventKind::Join(_) => "Join",
            ChainEventKind::Exit(_) => "Exit",
            ChainEventKind::LiquidationTriggered => "LiquidationTriggered",
            ChainEventKind::Liquidated { .. } => "Liquidated",
        }
    }
}

/// A parsed protocol event about one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub meta: LogMeta,
    pub asset: Address,
    pub owner: Address,
    pub kind: ChainEventKind,
}

fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

fn word(data: &[u8], index: usize) -> Option<U256> {
    data.get(index * 32..(index + 1) * 32).map(U256::from_be_slice)
}

/// Parse a log into a [`ChainEvent`].
///
/// Returns `None` for unknown topics, malformed payloads, and pending logs
/// (no block number or hash).
pub fn parse_log(log: &Log) -> Option<ChainEvent> {
    let meta = LogMeta {
        address: log.address(),
        block_number: log.block_number?,
        block_hash: log.block_hash?,
        tx_hash: log.transaction_hash?,
        tx_index: log.transaction_index.unwrap_or(0),
        log_index: log.log_index.unwrap_or(0),
    };

    let topics = log.topics();
    if topics.len() < 3 {
        trace!(tx_hash = %meta.tx_hash, "Skipping log without position topics");
        return None;
    }

    let sig = topics[0];
    let asset = topic_address(&topics[1]);
    let owner = topic_address(&topics[2]);
    let data = log.data().data.as_ref();

    let kind = if sig == event_signatures::JOIN || sig == event_signatures::EXIT {
        let amounts = JoinExitAmounts {
            main: word(data, 0)?,
            col: word(data, 1)?,
            usdp: word(data, 2)?,
        };
        if sig == event_signatures::JOIN {
            ChainEventKind::Join(amounts)
        } else {
            ChainEventKind::Exit(amounts)
        }
    } else if sig == event_signatures::LIQUIDATION_TRIGGERED {
        ChainEventKind::LiquidationTriggered
    } else if sig == event_signatures::BUYOUT {
        // Buyout(asset, owner, buyer) are all indexed
        let buyer = topic_address(topics.get(3)?);
        ChainEventKind::Liquidated {
            buyer,
            amount: word(data, 0)?,
            price: word(data, 1)?,
            penalty: word(data, 2)?,
        }
    } else {
        return None;
    };

    Some(ChainEvent {
        meta,
        asset,
        owner,
        kind,
    })
}
