//! Chain event synchronization.
//!
//! Without a checkpoint, every tracked contract is replayed from its first
//! active block in bounded, concurrent batches and the position set is
//! rebuilt silently. Afterwards each new head re-reads everything since the
//! checkpoint plus a trailing reorg window; logs already emitted are
//! suppressed by the dedupe table, so a replayed range produces nothing new.

use alloy::primitives::U256;
use alloy::rpc::types::Log;
use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use keeper_chain::{parse_log, ChainEvent, ChainEventKind, ChainRpc, LogQuery, ProtocolReader, RpcError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{ContractsConfig, SyncConfig, TrackedContract};
use crate::events::{DomainEvent, EventSink};
use crate::position::{PositionKey, TrackedCdp};
use crate::state::SyncState;

const SOURCE: &str = "sync";

/// Base delay between attempts of one log range; grows linearly.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// `getTotalDebt` reads in flight while pruning after bootstrap.
const DEBT_READ_CONCURRENCY: usize = 32;

/// Summary of one incremental pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub from: u64,
    pub to: u64,
    pub fetched: usize,
    pub emitted: usize,
}

/// Summary of a bootstrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub ranges: usize,
    pub failed_ranges: usize,
    pub events: usize,
    pub positions: usize,
    pub pruned: usize,
}

pub struct ChainEventSync {
    rpc: Arc<dyn ChainRpc>,
    reader: ProtocolReader,
    state: Arc<SyncState>,
    contracts: ContractsConfig,
    tracked: Vec<TrackedContract>,
    config: SyncConfig,
    sink: EventSink,
}

impl ChainEventSync {
    pub fn new(
        reader: ProtocolReader,
        state: Arc<SyncState>,
        contracts: ContractsConfig,
        config: SyncConfig,
        sink: EventSink,
    ) -> Self {
        let tracked = contracts.tracked_contracts();
        Self {
            rpc: reader.rpc().clone(),
            reader,
            state,
            contracts,
            tracked,
            config,
            sink,
        }
    }

    pub fn tracked(&self) -> &[TrackedContract] {
        &self.tracked
    }

    /// Fetch the head and bring the state up to it.
    ///
    /// Only the head fetch can fail; there is nothing sensible to resume from
    /// without it. A failed catch-up is retried from the checkpoint on the
    /// next head.
    #[instrument(skip(self))]
    pub async fn start(&self, startup_timeout: Duration) -> Result<u64> {
        let head = tokio::time::timeout(startup_timeout, self.rpc.block_number())
            .await
            .map_err(|_| anyhow!("head block not received within {startup_timeout:?}"))?
            .context("failed to fetch head block")?;

        let last = self.state.checkpoint().last_processed_block;
        if last == 0 {
            info!(head, contracts = self.tracked.len(), "No checkpoint, bootstrapping");
            self.bootstrap(head).await;
        } else if last < head {
            info!(from = last + 1, head, "Catching up from checkpoint");
            if let Err(e) = self.sync_range(last + 1, head).await {
                warn!(error = %e, "Catch-up failed, will retry on next block");
            }
        } else {
            info!(head, last, "Checkpoint is current");
        }
        Ok(head)
    }

    /// Rebuild the position set from the full log history up to `head`.
    ///
    /// Nothing is emitted and the checkpoint is written once, at the end.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self, head: u64) -> BootstrapReport {
        let queries: Vec<LogQuery> = self
            .tracked
            .iter()
            .filter_map(|c| c.clamp(0, head).map(|(from, to)| (c, from, to)))
            .flat_map(|(c, from, to)| {
                batches(from, to, self.config.batch_size_blocks)
                    .into_iter()
                    .map(move |(f, t)| LogQuery::new(c.address, c.topics.clone(), f, t))
            })
            .collect();

        let mut report = BootstrapReport {
            ranges: queries.len(),
            ..Default::default()
        };

        let results: Vec<(LogQuery, Result<Vec<Log>, RpcError>)> = stream::iter(queries)
            .map(|query| async move {
                let result = self.fetch_logs(&query).await;
                (query, result)
            })
            .buffer_unordered(self.config.max_concurrent_requests.max(1))
            .collect()
            .await;

        let mut events = Vec::new();
        for (query, result) in results {
            match result {
                Ok(logs) => events.extend(logs.iter().filter_map(parse_log)),
                Err(e) => {
                    report.failed_ranges += 1;
                    warn!(
                        address = %query.address,
                        from = query.from_block,
                        to = query.to_block,
                        error = %e,
                        "Giving up on log range"
                    );
                    self.sink.alert(
                        SOURCE,
                        None,
                        format!(
                            "bootstrap range {}..={} of {} failed: {e}",
                            query.from_block, query.to_block, query.address
                        ),
                    );
                }
            }
        }

        sort_events(&mut events);
        report.events = events.len();
        for event in &events {
            self.state.observe(&event.meta);
            self.apply(event);
        }
        self.state
            .prune_dedupe(head, self.config.dedupe_retention_blocks);

        report.pruned = self.prune_repaid().await;
        report.positions = self.state.positions().len();

        self.state.advance_processed(head);
        self.sink.request_save(self.state.snapshot());

        info!(
            head,
            ranges = report.ranges,
            failed_ranges = report.failed_ranges,
            events = report.events,
            positions = report.positions,
            pruned = report.pruned,
            "Bootstrap complete"
        );
        report
    }

    /// Incremental pass for a new head: everything since the checkpoint, and
    /// at least the trailing reorg window.
    #[instrument(skip(self))]
    pub async fn on_block(&self, head: u64) -> Result<SyncReport, RpcError> {
        let last = self.state.checkpoint().last_processed_block;
        let from = last
            .saturating_add(1)
            .min(head.saturating_sub(self.config.reorg_window_blocks));
        self.sync_range(from, head).await
    }

    /// Fetch `[from, to]` from every tracked contract, emit unseen events in
    /// chain order, and advance the checkpoint to `to`.
    ///
    /// All contracts must answer; on any failure nothing is emitted and the
    /// checkpoint stays put.
    pub async fn sync_range(&self, from: u64, to: u64) -> Result<SyncReport, RpcError> {
        let queries: Vec<LogQuery> = self
            .tracked
            .iter()
            .filter_map(|c| {
                c.clamp(from, to)
                    .map(|(f, t)| LogQuery::new(c.address, c.topics.clone(), f, t))
            })
            .collect();

        let results = join_all(queries.iter().map(|q| self.fetch_logs(q))).await;

        let mut events = Vec::new();
        for (query, result) in queries.iter().zip(results) {
            let logs = match result {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(address = %query.address, from, to, error = %e, "Log query failed");
                    return Err(e);
                }
            };
            events.extend(logs.iter().filter_map(parse_log));
        }
        sort_events(&mut events);

        let fetched = events.len();
        let mut emitted = 0;
        for event in events {
            if !self.state.observe(&event.meta) {
                trace!(tx_hash = %event.meta.tx_hash, log_index = event.meta.log_index, "Already emitted");
                continue;
            }
            self.apply(&event);
            debug!(
                event = event.kind.name(),
                block = event.meta.block_number,
                asset = %event.asset,
                owner = %event.owner,
                "Chain event"
            );
            self.sink.emit(DomainEvent::from(event));
            emitted += 1;
        }

        if self.state.advance_processed(to) {
            self.sink.request_save(self.state.snapshot());
        }
        let pruned = self
            .state
            .prune_dedupe(to, self.config.dedupe_retention_blocks);
        if pruned > 0 {
            trace!(pruned, "Pruned dedupe entries");
        }

        Ok(SyncReport {
            from,
            to,
            fetched,
            emitted,
        })
    }

    async fn fetch_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RpcError> {
        let attempts = self.config.range_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.rpc.get_logs(query).await {
                Ok(logs) => return Ok(logs),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    debug!(
                        address = %query.address,
                        from = query.from_block,
                        to = query.to_block,
                        attempt,
                        error = %e,
                        "Log query failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Position bookkeeping for one event.
    fn apply(&self, event: &ChainEvent) {
        let key = PositionKey::new(event.asset, event.owner);
        let positions = self.state.positions();
        match &event.kind {
            ChainEventKind::Join(amounts) if !amounts.usdp.is_zero() => {
                positions.entry(key).or_insert_with(|| {
                    TrackedCdp::new(
                        amounts.usdp,
                        self.contracts.trigger_for_manager(event.meta.address),
                    )
                });
            }
            // Repayment is only visible as debt; the scanner drops it
            ChainEventKind::Join(_) | ChainEventKind::Exit(_) => {}
            ChainEventKind::LiquidationTriggered => {
                if let Some(mut cdp) = positions.get_mut(&key) {
                    cdp.liquidation_block = event.meta.block_number;
                }
            }
            ChainEventKind::Liquidated { .. } => {
                positions.remove(&key);
            }
        }
    }

    /// Drop reconstructed positions whose debt is already zero.
    async fn prune_repaid(&self) -> usize {
        let keys: Vec<PositionKey> = self.state.positions().iter().map(|e| *e.key()).collect();
        let reads: Vec<(PositionKey, Result<U256, RpcError>)> = stream::iter(keys)
            .map(|key| async move { (key, self.reader.total_debt(key.asset, key.owner).await) })
            .buffer_unordered(DEBT_READ_CONCURRENCY)
            .collect()
            .await;

        let mut removed = 0;
        for (key, debt) in reads {
            match debt {
                Ok(debt) if debt.is_zero() => {
                    self.state.positions().remove(&key);
                    removed += 1;
                }
                Ok(_) => {}
                // Kept; the scanner re-reads debt anyway
                Err(e) => debug!(position = %key, error = %e, "Debt read failed during prune"),
            }
        }
        removed
    }
}

/// Chain order: block, then position in block.
fn sort_events(events: &mut [ChainEvent]) {
    events.sort_by_key(|e| e.meta.position());
}

/// Split `[from, to]` into windows of at most `size` blocks.
fn batches(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}
