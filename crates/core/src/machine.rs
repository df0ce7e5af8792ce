//! The agent's block-driven main loop.
//!
//! A background task follows new heads and queues them, so a slow pass never
//! stalls the subscription. The loop takes the newest queued head, then runs
//! sync, scan and submitter housekeeping for it in that order.

use anyhow::Result;
use futures::StreamExt;
use keeper_chain::ChainRpc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::scanner::Scanner;
use crate::submitter::SubmitterHandle;
use crate::sync::ChainEventSync;

/// Pause before resubscribing after the head stream ends or fails.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

pub struct Agent {
    rpc: Arc<dyn ChainRpc>,
    sync: ChainEventSync,
    scanner: Scanner,
    submitter: SubmitterHandle,
    startup_timeout: Duration,
}

impl Agent {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        sync: ChainEventSync,
        scanner: Scanner,
        submitter: SubmitterHandle,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            sync,
            scanner,
            submitter,
            startup_timeout,
        }
    }

    /// Start up, then process heads until the subscription task stops.
    ///
    /// Fails only if the initial head fetch does.
    pub async fn run(self) -> Result<()> {
        let head = self.sync.start(self.startup_timeout).await?;
        self.submitter.new_block(head);
        info!(head, "Agent started");

        let (tx, mut heads) = mpsc::unbounded_channel();
        let follower = tokio::spawn(follow_heads(self.rpc.clone(), tx));

        while let Some(mut head) = heads.recv().await {
            let mut skipped = 0;
            while let Ok(next) = heads.try_recv() {
                head = head.max(next);
                skipped += 1;
            }
            if skipped > 0 {
                debug!(head, skipped, "Coalesced queued heads");
            }
            self.on_head(head).await;
        }

        follower.await?;
        Ok(())
    }

    /// One pass for a new head.
    #[instrument(skip(self))]
    pub async fn on_head(&self, head: u64) {
        match self.sync.on_block(head).await {
            Ok(report) if report.emitted > 0 => {
                debug!(from = report.from, emitted = report.emitted, "Synced")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Sync failed, retrying on next block"),
        }
        self.scanner.check(head).await;
        self.submitter.new_block(head);
    }
}

/// Forward new heads into `tx`, resubscribing whenever the stream ends.
async fn follow_heads(rpc: Arc<dyn ChainRpc>, tx: mpsc::UnboundedSender<u64>) {
    loop {
        match rpc.subscribe_blocks().await {
            Ok(mut stream) => {
                info!("Subscribed to new heads");
                while let Some(block) = stream.next().await {
                    if tx.send(block).is_err() {
                        return;
                    }
                }
                warn!("Head subscription ended");
            }
            Err(e) => warn!(error = %e, "Head subscription failed"),
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}
