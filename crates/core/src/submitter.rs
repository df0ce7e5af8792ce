//! Liquidation transaction submission.
//!
//! A single task owns the confirmation counts, the account nonce and the
//! in-flight map; requests and new heads reach it through one inbox, so none
//! of that state is ever touched concurrently.
//!
//! Per position: requests are counted until the confirmation threshold, then
//! the transaction is built (proofs against the current head), priced,
//! signed and sent. A sent transaction blocks further sends for the position
//! until the resubmit cooldown has passed, after which the same nonce is
//! reused as a replacement. The in-flight record is dropped a fixed number of
//! blocks after sending.

use alloy::primitives::{Bytes, B256};
use anyhow::Result;
use keeper_chain::{ChainRpc, LegacyTx, NonceManager, RpcError, TxSigner};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{ScannerConfig, SubmitterConfig};
use crate::confirmations::{ConfirmationTracker, Observation};
use crate::events::{DomainEvent, EventSink, LiquidationRequest, TriggerCall, TxSent};
use crate::gas::GasPricer;
use crate::position::PositionKey;
use crate::scanner::is_benign;

const SOURCE: &str = "submitter";

#[derive(Debug)]
pub enum SubmitterCommand {
    Request(LiquidationRequest),
    NewBlock(u64),
}

/// What happened to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Same or older block than the previous request for the position
    Duplicate,
    Collecting(u32),
    /// A transaction for the position is still fresh
    Cooldown,
    Sent(TxSent),
    /// The fresh estimate says there is nothing to liquidate
    NotLiquidatable,
    BuildFailed,
    NonceReset,
    SendFailed,
}

/// Sending side of the submitter inbox.
#[derive(Debug, Clone)]
pub struct SubmitterHandle {
    tx: mpsc::UnboundedSender<SubmitterCommand>,
}

impl SubmitterHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SubmitterCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn request(&self, request: LiquidationRequest) {
        self.send(SubmitterCommand::Request(request));
    }

    pub fn new_block(&self, block: u64) {
        self.send(SubmitterCommand::NewBlock(block));
    }

    fn send(&self, command: SubmitterCommand) {
        if self.tx.send(command).is_err() {
            debug!("Submitter stopped, command dropped");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    tx_hash: B256,
    nonce: u64,
    sent_at: Instant,
}

pub struct TxSubmitter {
    rpc: Arc<dyn ChainRpc>,
    signer: TxSigner,
    gas: GasPricer,
    nonces: NonceManager,
    tracker: ConfirmationTracker,
    in_flight: HashMap<PositionKey, InFlight>,
    /// Due block -> positions whose in-flight record expires then
    removals: BTreeMap<u64, Vec<(PositionKey, B256)>>,
    head: u64,
    /// Estimates at or below this are bogus, same floor the scanner applies
    min_gas_estimate: u64,
    config: SubmitterConfig,
    sink: EventSink,
}

impl TxSubmitter {
    /// Seed the nonce from the account's transaction count.
    pub async fn new(
        rpc: Arc<dyn ChainRpc>,
        signer: TxSigner,
        gas: GasPricer,
        config: SubmitterConfig,
        scanner: &ScannerConfig,
        sink: EventSink,
    ) -> Result<Self> {
        let nonce = rpc.transaction_count(signer.address()).await?;
        let reset_gap = config.reset_gap(scanner.check_interval_blocks);
        info!(
            account = %signer.address(),
            nonce,
            confirmations = config.confirmations,
            reset_gap,
            "Submitter initialized"
        );

        Ok(Self {
            rpc,
            tracker: ConfirmationTracker::new(config.confirmations, reset_gap),
            signer,
            gas,
            nonces: NonceManager::new(nonce),
            in_flight: HashMap::new(),
            removals: BTreeMap::new(),
            head: 0,
            min_gas_estimate: scanner.min_gas_estimate,
            config,
            sink,
        })
    }

    /// Nonce the next fresh transaction will use.
    pub fn pending_nonce(&self) -> u64 {
        self.nonces.current()
    }

    pub fn is_in_flight(&self, key: &PositionKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn confirmations(&self, key: &PositionKey) -> Option<u32> {
        self.tracker.confirmations(key)
    }

    /// Move onto a task. The task ends when every handle is dropped.
    pub fn spawn(self) -> (SubmitterHandle, JoinHandle<()>) {
        let (handle, rx) = SubmitterHandle::channel();
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SubmitterCommand>) {
        while let Some(command) = inbox.recv().await {
            match command {
                SubmitterCommand::Request(request) => {
                    self.handle_request(request).await;
                }
                SubmitterCommand::NewBlock(block) => self.on_block(block),
            }
        }
        debug!("Submitter inbox closed");
    }

    /// Expire stale candidates and due in-flight records.
    pub fn on_block(&mut self, block: u64) {
        self.head = self.head.max(block);

        let evicted = self.tracker.evict_stale(block);
        if evicted > 0 {
            trace!(evicted, block, "Stale candidates evicted");
        }

        let due: Vec<u64> = self.removals.range(..=block).map(|(b, _)| *b).collect();
        for due_block in due {
            for (key, tx_hash) in self.removals.remove(&due_block).unwrap_or_default() {
                // A replacement has its own, later removal
                if self.in_flight.get(&key).is_some_and(|f| f.tx_hash == tx_hash) {
                    self.in_flight.remove(&key);
                    self.tracker.remove(&key);
                    debug!(position = %key, %tx_hash, "In-flight record expired");
                }
            }
        }
    }

    #[instrument(skip_all, fields(position = %request.key, block = request.block))]
    pub async fn handle_request(&mut self, request: LiquidationRequest) -> Outcome {
        self.head = self.head.max(request.block);
        let key = request.key;

        match self.tracker.observe(key, request.block) {
            Observation::Duplicate => return Outcome::Duplicate,
            Observation::Collecting(n) => {
                debug!(confirmations = n, required = self.tracker.required(), "Collecting confirmations");
                return Outcome::Collecting(n);
            }
            Observation::Ready(n) => trace!(confirmations = n, "Candidate ready"),
        }

        let replacing = match self.in_flight.get(&key) {
            Some(f) if f.sent_at.elapsed() < self.config.resubmit_cooldown() => {
                trace!(tx_hash = %f.tx_hash, "Transaction in flight, skipping");
                return Outcome::Cooldown;
            }
            Some(f) => Some(f.nonce),
            None => None,
        };

        let (calldata, gas_estimate) = match self.build(&request).await {
            Ok(Some(built)) => built,
            Ok(None) => return Outcome::NotLiquidatable,
            Err(e) => {
                warn!(error = ?e, "Failed to build liquidation transaction");
                self.sink
                    .alert(SOURCE, Some(key), format!("build failed: {e:#}"));
                return Outcome::BuildFailed;
            }
        };

        let quote = match self.gas.quote().await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(error = %e, "No gas price available");
                self.sink
                    .alert(SOURCE, Some(key), format!("gas price unavailable: {e:#}"));
                return Outcome::BuildFailed;
            }
        };

        let tx = LegacyTx {
            to: request.trigger,
            input: calldata,
            nonce: replacing.unwrap_or_else(|| self.nonces.current()),
            gas_limit: gas_estimate.saturating_add(self.config.gas_limit_margin),
            gas_price: quote.gas_price,
        };

        let signed = match self.signer.sign(&tx).await {
            Ok(signed) => signed,
            Err(e) => {
                warn!(error = %e, "Signing failed");
                self.sink.alert(SOURCE, Some(key), format!("signing failed: {e:#}"));
                return Outcome::BuildFailed;
            }
        };

        match self.rpc.send_raw_transaction(signed.raw).await {
            Ok(tx_hash) => {
                if replacing.is_none() {
                    self.nonces.next();
                }
                self.in_flight.insert(
                    key,
                    InFlight {
                        tx_hash,
                        nonce: tx.nonce,
                        sent_at: Instant::now(),
                    },
                );
                let due = self.head.saturating_add(self.config.removal_horizon_blocks);
                self.removals.entry(due).or_default().push((key, tx_hash));

                let sent = TxSent {
                    key,
                    tx_hash,
                    nonce: tx.nonce,
                    gas_price: tx.gas_price,
                    gas_limit: tx.gas_limit,
                    block: self.head,
                    replacement: replacing.is_some(),
                };
                info!(
                    %tx_hash,
                    nonce = tx.nonce,
                    gas_limit = tx.gas_limit,
                    gas_price_gwei = quote.gwei(),
                    gas_source = quote.source,
                    replacement = sent.replacement,
                    "Liquidation transaction sent"
                );
                self.sink.emit(DomainEvent::LiquidationTxSent(sent.clone()));
                Outcome::Sent(sent)
            }
            Err(RpcError::NonceTooLow(message)) => {
                warn!(nonce = tx.nonce, %message, "Nonce too low, resyncing");
                self.resync_nonce().await;
                self.in_flight.remove(&key);
                Outcome::NonceReset
            }
            Err(e) => {
                warn!(nonce = tx.nonce, error = %e, "Failed to send liquidation transaction");
                self.sink.alert(SOURCE, Some(key), format!("send failed: {e}"));
                Outcome::SendFailed
            }
        }
    }

    /// Calldata and gas estimate, or `None` when the position turns out not
    /// to be liquidatable at the current head.
    async fn build(&self, request: &LiquidationRequest) -> Result<Option<(Bytes, u64)>> {
        let proof = match &request.call {
            TriggerCall::Ready {
                calldata,
                gas_estimate,
            } => return Ok(Some((calldata.clone(), *gas_estimate))),
            TriggerCall::Deferred(proof) => proof,
        };

        let calldata = proof.calldata(self.head).await?;
        let gas = match self
            .rpc
            .estimate_gas(self.signer.address(), request.trigger, calldata.clone())
            .await
        {
            Ok(gas) => gas,
            Err(e) if is_benign(&e) => {
                debug!(reason = ?e.revert_reason(), "Position not liquidatable with proof");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if gas <= self.min_gas_estimate {
            warn!(gas, floor = self.min_gas_estimate, "Gas estimate below floor, ignoring");
            return Ok(None);
        }

        debug!(gas, calldata_len = calldata.len(), "Proof calldata built");
        Ok(Some((calldata, gas)))
    }

    async fn resync_nonce(&self) {
        match self.rpc.transaction_count(self.signer.address()).await {
            Ok(count) => self.nonces.reset(count),
            Err(e) => warn!(error = %e, "Nonce resync failed, keeping local nonce"),
        }
    }
}

impl std::fmt::Debug for TxSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSubmitter")
            .field("account", &self.signer.address())
            .field("nonce", &self.nonces.current())
            .field("candidates", &self.tracker.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}
