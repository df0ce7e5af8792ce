//! Liquidation scanner.
//!
//! Runs at most once per `check_interval_blocks`. Every position is re-read
//! from the chain (debt, auction status, oracle class) and the eligible ones
//! are published as [`LiquidationRequest`]s. On-chain oracle positions are
//! checked with a gas estimate of the trigger call; fallback oracle positions
//! with a local price check, their proof being built only at send time.

use alloy::primitives::{Address, U256};
use anyhow::Result;
use futures::future::join_all;
use keeper_chain::{contracts, FallbackVariant, OracleClass, ProtocolReader, RpcError};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{ContractsConfig, ScannerConfig};
use crate::events::{DomainEvent, EventSink, LiquidationRequest, TriggerCall};
use crate::position::PositionKey;
use crate::proof::{DeferredProof, ProofBuilder};
use crate::state::SyncState;

/// Revert reasons meaning "not liquidatable right now".
const BENIGN_REVERTS: [&str; 2] = ["SAFE_POSITION", "LIQUIDATING_POSITION"];

const SOURCE: &str = "scanner";

/// Where the position list comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSource {
    /// `CdpRegistry.getAll()`
    Registry,
    /// Positions reconstructed from `Join` logs
    Tracked,
}

/// Why a position produced no request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    ReadFailed,
    AuctionActive,
    Denylisted,
    DebtTooLow,
    NoTrigger,
    FallbackDisabled,
    Safe,
    BogusEstimate,
    EstimateFailed,
    PriceCheckFailed,
}

pub struct Scanner {
    reader: ProtocolReader,
    proofs: Arc<ProofBuilder>,
    state: Arc<SyncState>,
    contracts: ContractsConfig,
    config: ScannerConfig,
    source: PositionSource,
    /// Account the trigger calls are estimated from
    sender: Address,
    sink: EventSink,
}

impl Scanner {
    pub fn new(
        reader: ProtocolReader,
        proofs: Arc<ProofBuilder>,
        state: Arc<SyncState>,
        contracts: ContractsConfig,
        config: ScannerConfig,
        sender: Address,
        sink: EventSink,
    ) -> Self {
        let source = if contracts.cdp_registry.is_some() {
            PositionSource::Registry
        } else {
            PositionSource::Tracked
        };
        Self {
            reader,
            proofs,
            state,
            contracts,
            config,
            source,
            sender,
            sink,
        }
    }

    pub fn source(&self) -> PositionSource {
        self.source
    }

    /// Scan at `head` if the throttle allows. Returns the number of requests.
    #[instrument(skip(self))]
    pub async fn check(&self, head: u64) -> usize {
        let last = self.state.checkpoint().last_liquidation_check_block;
        if head < last.saturating_add(self.config.check_interval_blocks) {
            trace!(last, "Scan throttled");
            return 0;
        }
        // Recorded before scanning so a crash mid-scan moves on
        if self.state.advance_liquidation_check(head) {
            self.sink.request_save(self.state.snapshot());
        }

        let positions = match self.positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, source = ?self.source, "Failed to load positions");
                self.sink.alert(SOURCE, None, format!("position list unavailable: {e:#}"));
                return 0;
            }
        };

        let total = positions.len();
        let results = join_all(
            positions
                .into_iter()
                .map(|(key, trigger)| self.evaluate(key, trigger, head)),
        )
        .await;

        let mut requested = 0;
        let mut skipped = [0usize; 2];
        for result in results {
            match result {
                Ok(request) => {
                    requested += 1;
                    self.sink.emit(DomainEvent::LiquidationRequested(request));
                }
                Err(Skip::Safe | Skip::DebtTooLow | Skip::AuctionActive) => skipped[0] += 1,
                Err(_) => skipped[1] += 1,
            }
        }

        if requested > 0 {
            info!(total, requested, "Liquidatable positions found");
        } else {
            debug!(total, ineligible = skipped[0], other = skipped[1], "Scan complete");
        }
        requested
    }

    /// Current positions with the trigger recorded at open, if known.
    async fn positions(&self) -> Result<Vec<(PositionKey, Option<Address>)>> {
        match self.source {
            PositionSource::Registry => Ok(self
                .reader
                .all_positions()
                .await?
                .into_iter()
                .map(|(asset, owner)| (PositionKey::new(asset, owner), None))
                .collect()),
            PositionSource::Tracked => {
                let mut positions: Vec<_> = self
                    .state
                    .positions()
                    .iter()
                    .map(|e| (*e.key(), e.value().liquidation_trigger))
                    .collect();
                positions.sort_by_key(|(key, _)| *key);
                Ok(positions)
            }
        }
    }

    async fn evaluate(
        &self,
        key: PositionKey,
        trigger: Option<Address>,
        head: u64,
    ) -> Result<LiquidationRequest, Skip> {
        let (debt, liquidation_block, oracle) = tokio::join!(
            self.reader.total_debt(key.asset, key.owner),
            self.reader.liquidation_block(key.asset, key.owner),
            self.reader.oracle_class(key.asset),
        );
        let (debt, liquidation_block, oracle) = match (debt, liquidation_block, oracle) {
            (Ok(d), Ok(l), Ok(o)) => (d, l, o),
            (d, l, o) => {
                let error = [d.err(), l.err(), o.err()].into_iter().flatten().next();
                warn!(position = %key, error = ?error, "Failed to read position");
                return Err(Skip::ReadFailed);
            }
        };

        self.refresh_tracked(&key, debt, liquidation_block, oracle);

        if liquidation_block != 0 {
            trace!(position = %key, liquidation_block, "Auction already running");
            return Err(Skip::AuctionActive);
        }
        if self.config.is_denylisted(key.asset, key.owner) {
            debug!(position = %key, "Denylisted");
            return Err(Skip::Denylisted);
        }
        if debt <= self.config.min_debt(oracle.is_fallback()) {
            return Err(Skip::DebtTooLow);
        }

        match oracle {
            OracleClass::OnChain => self.evaluate_onchain(key, trigger, head).await,
            OracleClass::Fallback(variant) => self.evaluate_fallback(key, variant, debt, head).await,
        }
    }

    /// Keep the reconstructed cache in line with what was just read.
    fn refresh_tracked(&self, key: &PositionKey, debt: U256, liquidation_block: u64, oracle: OracleClass) {
        if self.source != PositionSource::Tracked {
            return;
        }
        if debt.is_zero() {
            if self.state.positions().remove(key).is_some() {
                debug!(position = %key, "Dropped repaid position");
            }
            return;
        }
        if let Some(mut cdp) = self.state.positions().get_mut(key) {
            cdp.liquidation_block = liquidation_block;
            cdp.oracle_class = oracle;
        }
    }

    async fn evaluate_onchain(
        &self,
        key: PositionKey,
        trigger: Option<Address>,
        head: u64,
    ) -> Result<LiquidationRequest, Skip> {
        let Some(trigger) = trigger.or_else(|| self.contracts.default_trigger()) else {
            warn!(position = %key, "No liquidation trigger configured");
            return Err(Skip::NoTrigger);
        };

        let calldata = contracts::encode_trigger_liquidation(key.asset, key.owner);
        match self
            .reader
            .rpc()
            .estimate_gas(self.sender, trigger, calldata.clone())
            .await
        {
            Ok(gas) if gas <= self.config.min_gas_estimate => {
                // Nodes mid-resync answer calls to missing code with ~21k
                warn!(position = %key, gas, floor = self.config.min_gas_estimate, "Gas estimate below floor, ignoring");
                Err(Skip::BogusEstimate)
            }
            Ok(gas_estimate) => {
                debug!(position = %key, gas_estimate, "Position liquidatable");
                Ok(LiquidationRequest {
                    key,
                    trigger,
                    oracle: OracleClass::OnChain,
                    call: TriggerCall::Ready {
                        calldata,
                        gas_estimate,
                    },
                    block: head,
                })
            }
            Err(e) if is_benign(&e) => {
                trace!(position = %key, reason = ?e.revert_reason(), "Position safe");
                Err(Skip::Safe)
            }
            Err(e) => {
                warn!(position = %key, error = %e, "Unexpected gas estimation failure");
                self.sink
                    .alert(SOURCE, Some(key), format!("estimateGas failed: {e}"));
                Err(Skip::EstimateFailed)
            }
        }
    }

    async fn evaluate_fallback(
        &self,
        key: PositionKey,
        variant: FallbackVariant,
        debt: U256,
        head: u64,
    ) -> Result<LiquidationRequest, Skip> {
        if !self.config.fallback_enabled {
            return Err(Skip::FallbackDisabled);
        }
        let trigger = match variant {
            FallbackVariant::LpToken => self.contracts.keydonix_lp_trigger,
            _ => self.contracts.keydonix_trigger,
        };
        let Some(trigger) = trigger else {
            debug!(position = %key, ?variant, "No keydonix trigger configured");
            return Err(Skip::NoTrigger);
        };

        match self
            .proofs
            .is_position_liquidatable(key.asset, key.owner, variant, debt, head)
            .await
        {
            Ok(true) => {
                debug!(position = %key, ?variant, "Fallback position liquidatable");
                Ok(LiquidationRequest {
                    key,
                    trigger,
                    oracle: OracleClass::Fallback(variant),
                    call: TriggerCall::Deferred(DeferredProof::new(
                        self.proofs.clone(),
                        key.asset,
                        key.owner,
                        variant,
                    )),
                    block: head,
                })
            }
            Ok(false) => Err(Skip::Safe),
            Err(e) => {
                warn!(position = %key, error = %e, "Fallback price check failed");
                self.sink
                    .alert(SOURCE, Some(key), format!("fallback price check failed: {e}"));
                Err(Skip::PriceCheckFailed)
            }
        }
    }
}

pub(crate) fn is_benign(error: &RpcError) -> bool {
    error
        .revert_reason()
        .map(|reason| BENIGN_REVERTS.iter().any(|b| reason.contains(b)))
        .unwrap_or(false)
}
