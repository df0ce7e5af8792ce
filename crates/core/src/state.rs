//! Sync checkpoint, notification dedupe, and the persisted state document.
//!
//! The core never writes to disk itself: components publish a
//! `SaveRequested` snapshot and the broker hands it to a [`StateStore`].

use alloy::primitives::B256;
use dashmap::DashMap;
use keeper_chain::LogMeta;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::position::{PositionKey, TrackedCdp};

/// Where a transaction's logs were seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub block_hash: B256,
    pub block_number: u64,
    pub tx_index: u64,
    pub log_indexes: Vec<u64>,
}

/// The persisted state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub last_processed_block: u64,
    #[serde(default)]
    pub last_liquidation_check: u64,
    /// Dedupe table keyed by transaction hash
    #[serde(default)]
    pub logs: BTreeMap<String, LogRecord>,
    /// Reconstructed positions keyed by `asset:owner`
    #[serde(default)]
    pub positions: BTreeMap<String, TrackedCdp>,
}

/// Ingestion progress. Both values only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCheckpoint {
    pub last_processed_block: u64,
    pub last_liquidation_check_block: u64,
}

impl SyncCheckpoint {
    /// Returns true if the value increased.
    pub fn advance_processed(&mut self, block: u64) -> bool {
        if block > self.last_processed_block {
            self.last_processed_block = block;
            true
        } else {
            false
        }
    }

    /// Returns true if the value increased.
    pub fn advance_liquidation_check(&mut self, block: u64) -> bool {
        if block > self.last_liquidation_check_block {
            self.last_liquidation_check_block = block;
            true
        } else {
            false
        }
    }
}

/// Suppresses logs that were already emitted, including reorg replays.
#[derive(Debug, Default)]
pub struct NotificationDedupe {
    entries: HashMap<B256, LogRecord>,
}

impl NotificationDedupe {
    /// Record a log. Returns true if it has not been seen before.
    ///
    /// A log replayed in a different block after a reorg counts as seen; its
    /// record moves to the new block.
    pub fn observe(&mut self, meta: &LogMeta) -> bool {
        match self.entries.get_mut(&meta.tx_hash) {
            Some(record) => {
                let seen = record.log_indexes.contains(&meta.log_index);
                if record.block_hash != meta.block_hash {
                    debug!(
                        tx_hash = %meta.tx_hash,
                        old_block = record.block_number,
                        new_block = meta.block_number,
                        "Log moved by reorg"
                    );
                    record.block_hash = meta.block_hash;
                    record.block_number = meta.block_number;
                    record.tx_index = meta.tx_index;
                }
                if !seen {
                    record.log_indexes.push(meta.log_index);
                }
                !seen
            }
            None => {
                self.entries.insert(
                    meta.tx_hash,
                    LogRecord {
                        block_hash: meta.block_hash,
                        block_number: meta.block_number,
                        tx_index: meta.tx_index,
                        log_indexes: vec![meta.log_index],
                    },
                );
                true
            }
        }
    }

    /// Drop entries older than `retention` blocks. Returns how many went.
    pub fn prune(&mut self, current_block: u64, retention: u64) -> usize {
        let cutoff = current_block.saturating_sub(retention);
        let before = self.entries.len();
        self.entries.retain(|_, r| r.block_number >= cutoff);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_records(&self) -> BTreeMap<String, LogRecord> {
        self.entries
            .iter()
            .map(|(hash, record)| (format!("{hash:#x}"), record.clone()))
            .collect()
    }

    fn from_records(records: &BTreeMap<String, LogRecord>) -> Self {
        let entries = records
            .iter()
            .filter_map(|(hash, record)| match hash.parse::<B256>() {
                Ok(hash) => Some((hash, record.clone())),
                Err(e) => {
                    warn!(hash = %hash, error = %e, "Dropping malformed dedupe entry");
                    None
                }
            })
            .collect();
        Self { entries }
    }
}

/// State shared between the sync engine and the scanner.
#[derive(Debug, Default)]
pub struct SyncState {
    checkpoint: Mutex<SyncCheckpoint>,
    dedupe: Mutex<NotificationDedupe>,
    positions: DashMap<PositionKey, TrackedCdp>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted document.
    pub fn from_app_state(state: &AppState) -> Self {
        let positions = DashMap::new();
        for (key, cdp) in &state.positions {
            match key.parse::<PositionKey>() {
                Ok(parsed) => {
                    positions.insert(parsed, cdp.clone());
                }
                Err(e) => warn!(key = %key, error = %e, "Dropping malformed position entry"),
            }
        }

        Self {
            checkpoint: Mutex::new(SyncCheckpoint {
                last_processed_block: state.last_processed_block,
                last_liquidation_check_block: state.last_liquidation_check,
            }),
            dedupe: Mutex::new(NotificationDedupe::from_records(&state.logs)),
            positions,
        }
    }

    /// Serializable snapshot of everything persisted.
    pub fn snapshot(&self) -> AppState {
        let checkpoint = *self.checkpoint.lock();
        let logs = self.dedupe.lock().to_records();
        let positions = self
            .positions
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().clone()))
            .collect();

        AppState {
            last_processed_block: checkpoint.last_processed_block,
            last_liquidation_check: checkpoint.last_liquidation_check_block,
            logs,
            positions,
        }
    }

    pub fn checkpoint(&self) -> SyncCheckpoint {
        *self.checkpoint.lock()
    }

    pub fn advance_processed(&self, block: u64) -> bool {
        self.checkpoint.lock().advance_processed(block)
    }

    pub fn advance_liquidation_check(&self, block: u64) -> bool {
        self.checkpoint.lock().advance_liquidation_check(block)
    }

    /// See [`NotificationDedupe::observe`].
    pub fn observe(&self, meta: &LogMeta) -> bool {
        self.dedupe.lock().observe(meta)
    }

    pub fn prune_dedupe(&self, current_block: u64, retention: u64) -> usize {
        self.dedupe.lock().prune(current_block, retention)
    }

    pub fn dedupe_len(&self) -> usize {
        self.dedupe.lock().len()
    }

    pub fn positions(&self) -> &DashMap<PositionKey, TrackedCdp> {
        &self.positions
    }
}

/// Durable storage for [`AppState`].
pub trait StateStore: Send + Sync {
    /// Previously saved state, `None` if there is none usable.
    fn load(&self) -> Option<AppState>;

    /// Persist a snapshot. Failures are logged, not returned.
    fn save(&self, state: &AppState);
}

/// JSON document on the local filesystem, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write(&self, state: &AppState) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        std::fs::write(&temp, body)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Option<AppState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No saved state, starting fresh");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read state file");
                return None;
            }
        };

        match serde_json::from_str::<AppState>(&content) {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    last_processed_block = state.last_processed_block,
                    last_liquidation_check = state.last_liquidation_check,
                    positions = state.positions.len(),
                    "Loaded saved state"
                );
                Some(state)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unparsable state file, ignoring");
                None
            }
        }
    }

    fn save(&self, state: &AppState) {
        match self.write(state) {
            Ok(()) => debug!(
                path = %self.path.display(),
                last_processed_block = state.last_processed_block,
                "State saved"
            ),
            Err(e) => error!(path = %self.path.display(), error = %e, "Failed to save state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    fn meta(tx: u8, block: u64, block_hash: u8, log_index: u64) -> LogMeta {
        LogMeta {
            address: Address::ZERO,
            block_number: block,
            block_hash: B256::repeat_byte(block_hash),
            tx_hash: B256::repeat_byte(tx),
            tx_index: 0,
            log_index,
        }
    }

    #[test]
    fn test_checkpoint_is_monotonic() {
        let mut cp = SyncCheckpoint::default();
        assert!(cp.advance_processed(10));
        assert!(!cp.advance_processed(10));
        assert!(!cp.advance_processed(5));
        assert_eq!(cp.last_processed_block, 10);

        assert!(cp.advance_liquidation_check(3));
        assert!(!cp.advance_liquidation_check(2));
        assert_eq!(cp.last_liquidation_check_block, 3);
    }

    #[test]
    fn test_dedupe_suppresses_replays() {
        let mut dedupe = NotificationDedupe::default();
        assert!(dedupe.observe(&meta(1, 100, 0xa, 0)));
        assert!(!dedupe.observe(&meta(1, 100, 0xa, 0)));

        // Second log of the same transaction is new
        assert!(dedupe.observe(&meta(1, 100, 0xa, 1)));

        // Reorg moves the tx to another block: still a replay
        assert!(!dedupe.observe(&meta(1, 101, 0xb, 0)));
        assert_eq!(dedupe.len(), 1);
    }

    #[test]
    fn test_dedupe_prune() {
        let mut dedupe = NotificationDedupe::default();
        dedupe.observe(&meta(1, 100, 1, 0));
        dedupe.observe(&meta(2, 500, 2, 0));
        assert_eq!(dedupe.prune(1_200, 1_000), 1);
        assert_eq!(dedupe.len(), 1);
        // Pruned entries may be emitted again
        assert!(dedupe.observe(&meta(1, 100, 1, 0)));
    }

    #[test]
    fn test_state_round_trip() {
        let state = SyncState::new();
        state.advance_processed(1_234);
        state.advance_liquidation_check(1_230);
        state.observe(&meta(7, 1_200, 3, 2));
        state.positions().insert(
            PositionKey::new(Address::repeat_byte(1), Address::repeat_byte(2)),
            TrackedCdp::new(U256::from(500u64), Some(Address::repeat_byte(9))),
        );

        let snapshot = state.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"lastProcessedBlock\":1234"));
        assert!(json.contains("\"lastLiquidationCheck\":1230"));

        let parsed: AppState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);

        let restored = SyncState::from_app_state(&parsed);
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.checkpoint().last_processed_block, 1_234);
    }

    #[test]
    fn test_json_file_store() {
        let dir = std::env::temp_dir().join(format!("keeper-state-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(dir.join("state.json"));

        assert!(store.load().is_none());

        let state = AppState {
            last_processed_block: 42,
            last_liquidation_check: 40,
            ..Default::default()
        };
        store.save(&state);
        assert_eq!(store.load(), Some(state));
        assert!(!store.temp_path().exists());

        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
