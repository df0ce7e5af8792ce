//! Agent runtime configuration.
//!
//! Every field has a serde default, so a TOML file only needs the values it
//! overrides. Secrets and endpoints are not part of this struct; they come
//! from the environment in the binary.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::protocol::{ContractsConfig, ProofConfig};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub chain: ChainSection,

    #[serde(default)]
    pub contracts: ContractsConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub submitter: SubmitterConfig,

    #[serde(default)]
    pub proof: ProofConfig,
}

fn default_profile_name() -> String {
    "mainnet".to_string()
}

/// Chain and RPC behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSection {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Deadline for every RPC call
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Deadline for the first head-block fetch; expiry is fatal
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

fn default_chain_id() -> u64 {
    1
}
fn default_rpc_timeout_ms() -> u64 {
    15_000
}
fn default_startup_timeout_ms() -> u64 {
    5_000
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

impl ChainSection {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Log synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Block window per bootstrap log request
    #[serde(default = "default_batch_size")]
    pub batch_size_blocks: u64,

    /// Bootstrap log requests in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Attempts per bootstrap range before it is given up
    #[serde(default = "default_range_attempts")]
    pub range_attempts: u32,

    /// Trailing blocks re-scanned on every new head
    #[serde(default = "default_reorg_window")]
    pub reorg_window_blocks: u64,

    /// Blocks a dedupe entry is kept for
    #[serde(default = "default_dedupe_retention")]
    pub dedupe_retention_blocks: u64,
}

fn default_batch_size() -> u64 {
    10_000
}
fn default_max_concurrent() -> usize {
    4
}
fn default_range_attempts() -> u32 {
    3
}
fn default_reorg_window() -> u64 {
    12
}
fn default_dedupe_retention() -> u64 {
    1_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size_blocks: default_batch_size(),
            max_concurrent_requests: default_max_concurrent(),
            range_attempts: default_range_attempts(),
            reorg_window_blocks: default_reorg_window(),
            dedupe_retention_blocks: default_dedupe_retention(),
        }
    }
}

/// Liquidation scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Scan at most once per this many blocks
    #[serde(default = "default_check_interval")]
    pub check_interval_blocks: u64,

    /// Gas estimates at or below this are treated as bogus
    #[serde(default = "default_min_gas_estimate")]
    pub min_gas_estimate: u64,

    /// Minimum debt (whole stablecoin units) for on-chain oracle positions
    #[serde(default = "default_min_debt_onchain")]
    pub min_debt_onchain: u64,

    /// Minimum debt (whole stablecoin units) for fallback oracle positions
    #[serde(default = "default_min_debt_fallback")]
    pub min_debt_fallback: u64,

    /// Fallback oracle positions are considered at all
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// Positions never liquidated by this agent, as (asset, owner)
    #[serde(default)]
    pub denylist: Vec<DenylistEntry>,
}

/// Operational override for one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenylistEntry {
    pub asset: Address,
    pub owner: Address,
}

fn default_check_interval() -> u64 {
    1
}
fn default_min_gas_estimate() -> u64 {
    30_000
}
fn default_min_debt_onchain() -> u64 {
    1
}
fn default_min_debt_fallback() -> u64 {
    100
}
fn default_fallback_enabled() -> bool {
    true
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            check_interval_blocks: default_check_interval(),
            min_gas_estimate: default_min_gas_estimate(),
            min_debt_onchain: default_min_debt_onchain(),
            min_debt_fallback: default_min_debt_fallback(),
            fallback_enabled: default_fallback_enabled(),
            denylist: Vec::new(),
        }
    }
}

const STABLECOIN_UNIT: u64 = 1_000_000_000_000_000_000;

impl ScannerConfig {
    /// Debt threshold in base units (18 decimals).
    pub fn min_debt(&self, fallback: bool) -> U256 {
        let whole = if fallback {
            self.min_debt_fallback
        } else {
            self.min_debt_onchain
        };
        U256::from(whole) * U256::from(STABLECOIN_UNIT)
    }

    pub fn is_denylisted(&self, asset: Address, owner: Address) -> bool {
        self.denylist
            .iter()
            .any(|e| e.asset == asset && e.owner == owner)
    }
}

/// Confirmation, nonce, and gas handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitterConfig {
    /// Consecutive observations required before sending
    #[serde(default = "default_confirmations")]
    pub confirmations: u32,

    /// Gap (blocks) after which a candidate restarts from one observation.
    /// Defaults to 1.5 x the scan interval.
    #[serde(default)]
    pub reset_gap_blocks: Option<u64>,

    /// Blocks after submission before the in-flight record is dropped
    #[serde(default = "default_removal_horizon")]
    pub removal_horizon_blocks: u64,

    /// Minimum age of an in-flight transaction before it may be replaced
    #[serde(default = "default_resubmit_cooldown")]
    pub resubmit_cooldown_secs: u64,

    /// Added to the gas estimate
    #[serde(default = "default_gas_limit_margin")]
    pub gas_limit_margin: u64,

    /// Applied to the node's gas price when the oracle is unavailable
    #[serde(default = "default_rpc_gas_multiplier")]
    pub rpc_gas_multiplier_pct: u64,

    #[serde(default)]
    pub max_gas_price_gwei: Option<f64>,

    #[serde(default = "default_gas_oracle_timeout_ms")]
    pub gas_oracle_timeout_ms: u64,
}

fn default_confirmations() -> u32 {
    3
}
fn default_removal_horizon() -> u64 {
    10
}
fn default_resubmit_cooldown() -> u64 {
    60
}
fn default_gas_limit_margin() -> u64 {
    200_000
}
fn default_rpc_gas_multiplier() -> u64 {
    110
}
fn default_gas_oracle_timeout_ms() -> u64 {
    2_000
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            reset_gap_blocks: None,
            removal_horizon_blocks: default_removal_horizon(),
            resubmit_cooldown_secs: default_resubmit_cooldown(),
            gas_limit_margin: default_gas_limit_margin(),
            rpc_gas_multiplier_pct: default_rpc_gas_multiplier(),
            max_gas_price_gwei: None,
            gas_oracle_timeout_ms: default_gas_oracle_timeout_ms(),
        }
    }
}

impl SubmitterConfig {
    /// Largest gap that still continues a candidacy.
    pub fn reset_gap(&self, check_interval_blocks: u64) -> u64 {
        self.reset_gap_blocks
            .unwrap_or(check_interval_blocks.saturating_mul(3) / 2)
    }

    pub fn resubmit_cooldown(&self) -> Duration {
        Duration::from_secs(self.resubmit_cooldown_secs)
    }

    pub fn gas_oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.gas_oracle_timeout_ms)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            chain: ChainSection::default(),
            contracts: ContractsConfig::default(),
            sync: SyncConfig::default(),
            scanner: ScannerConfig::default(),
            submitter: SubmitterConfig::default(),
            proof: ProofConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the file named by `KEEPER_CONFIG`, or the mainnet preset.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var("KEEPER_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(
            profile = %self.profile,
            chain_id = self.chain.chain_id,
            "Agent configuration loaded"
        );
        tracing::info!(
            vault = %self.contracts.vault,
            vault_managers = self.contracts.vault_managers.len(),
            cdp_registry = ?self.contracts.cdp_registry,
            oracle_registry = ?self.contracts.oracle_registry,
            "Protocol contracts"
        );
        tracing::info!(
            batch_size = self.sync.batch_size_blocks,
            max_concurrent = self.sync.max_concurrent_requests,
            reorg_window = self.sync.reorg_window_blocks,
            "Sync parameters"
        );
        tracing::info!(
            check_interval = self.scanner.check_interval_blocks,
            min_gas_estimate = self.scanner.min_gas_estimate,
            min_debt_onchain = self.scanner.min_debt_onchain,
            min_debt_fallback = self.scanner.min_debt_fallback,
            denylisted = self.scanner.denylist.len(),
            "Scanner parameters"
        );
        tracing::info!(
            confirmations = self.submitter.confirmations,
            reset_gap = self.submitter.reset_gap(self.scanner.check_interval_blocks),
            removal_horizon = self.submitter.removal_horizon_blocks,
            cooldown_secs = self.submitter.resubmit_cooldown_secs,
            gas_margin = self.submitter.gas_limit_margin,
            "Submitter parameters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.profile, "mainnet");
        assert_eq!(config.submitter.confirmations, 3);
        assert_eq!(config.submitter.gas_limit_margin, 200_000);
        assert_eq!(config.proof.lookback_blocks, 119);
        assert_eq!(config.sync.reorg_window_blocks, 12);
    }

    #[test]
    fn test_reset_gap_default_is_one_and_a_half_intervals() {
        let submitter = SubmitterConfig::default();
        assert_eq!(submitter.reset_gap(1), 1);
        assert_eq!(submitter.reset_gap(2), 3);
        assert_eq!(submitter.reset_gap(4), 6);

        let overridden = SubmitterConfig {
            reset_gap_blocks: Some(9),
            ..Default::default()
        };
        assert_eq!(overridden.reset_gap(4), 9);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: AgentConfig = toml::from_str(
            r#"
            profile = "staging"

            [scanner]
            check_interval_blocks = 5
            denylist = [{ asset = "0x0000000000000000000000000000000000000001", owner = "0x0000000000000000000000000000000000000002" }]

            [submitter]
            confirmations = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.profile, "staging");
        assert_eq!(config.scanner.check_interval_blocks, 5);
        assert_eq!(config.scanner.min_gas_estimate, 30_000);
        assert_eq!(config.submitter.confirmations, 2);
        assert!(config
            .scanner
            .is_denylisted(Address::with_last_byte(1), Address::with_last_byte(2)));
        // Untouched sections keep the preset
        assert_eq!(config.contracts.vault_managers.len(), 7);
    }

    #[test]
    fn test_min_debt_units() {
        let scanner = ScannerConfig::default();
        assert_eq!(scanner.min_debt(false), U256::from(10u64).pow(U256::from(18)));
        assert_eq!(
            scanner.min_debt(true),
            U256::from(100u64) * U256::from(10u64).pow(U256::from(18))
        );
    }

    #[test]
    fn test_serialization() {
        let config = AgentConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"mainnet\""));

        let parsed: AgentConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.contracts.vault, config.contracts.vault);
        assert_eq!(parsed.submitter.resubmit_cooldown_secs, 60);
    }
}
