//! Routes domain events to their consumers.
//!
//! Chain events, sent transactions and alerts go to the [`Notifier`], save
//! requests to the [`StateStore`], liquidation requests to the submitter.

use keeper_chain::{ChainEvent, ChainEventKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{Alert, DomainEvent, TxSent};
use crate::state::{AppState, StateStore};
use crate::submitter::SubmitterHandle;

/// Operator-facing delivery of events.
pub trait Notifier: Send + Sync {
    fn chain_event(&self, event: &ChainEvent);
    fn tx_sent(&self, sent: &TxSent);
    fn alert(&self, alert: &Alert);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn chain_event(&self, event: &ChainEvent) {
        let meta = &event.meta;
        match &event.kind {
            ChainEventKind::Join(amounts) | ChainEventKind::Exit(amounts) => info!(
                event = event.kind.name(),
                asset = %event.asset,
                owner = %event.owner,
                main = %amounts.main,
                col = %amounts.col,
                usdp = %amounts.usdp,
                block = meta.block_number,
                tx_hash = %meta.tx_hash,
                "Position update"
            ),
            ChainEventKind::LiquidationTriggered => info!(
                asset = %event.asset,
                owner = %event.owner,
                block = meta.block_number,
                tx_hash = %meta.tx_hash,
                "Liquidation triggered"
            ),
            ChainEventKind::Liquidated {
                buyer,
                amount,
                price,
                penalty,
            } => info!(
                asset = %event.asset,
                owner = %event.owner,
                %buyer,
                %amount,
                %price,
                %penalty,
                block = meta.block_number,
                tx_hash = %meta.tx_hash,
                "Position liquidated"
            ),
        }
    }

    fn tx_sent(&self, sent: &TxSent) {
        info!(
            position = %sent.key,
            tx_hash = %sent.tx_hash,
            nonce = sent.nonce,
            replacement = sent.replacement,
            "Liquidation submitted"
        );
    }

    fn alert(&self, alert: &Alert) {
        match &alert.key {
            Some(key) => warn!(source = alert.source, position = %key, "ALERT: {}", alert.message),
            None => warn!(source = alert.source, "ALERT: {}", alert.message),
        }
    }
}

pub struct EventBroker {
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn StateStore>,
    submitter: Option<SubmitterHandle>,
}

impl EventBroker {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn StateStore>,
        submitter: Option<SubmitterHandle>,
    ) -> Self {
        Self {
            notifier,
            store,
            submitter,
        }
    }

    pub async fn dispatch(&self, event: DomainEvent) {
        match event {
            DomainEvent::Join(e)
            | DomainEvent::Exit(e)
            | DomainEvent::LiquidationTriggered(e)
            | DomainEvent::Liquidated(e) => self.notifier.chain_event(&e),
            DomainEvent::LiquidationRequested(request) => match &self.submitter {
                Some(submitter) => submitter.request(request),
                None => debug!(position = %request.key, "No submitter, request dropped"),
            },
            DomainEvent::LiquidationTxSent(sent) => self.notifier.tx_sent(&sent),
            DomainEvent::SaveRequested(state) => self.save(state).await,
            DomainEvent::Alert(alert) => self.notifier.alert(&alert),
        }
    }

    /// Store writes run on the blocking pool. Awaited, so saves land in order.
    async fn save(&self, state: AppState) {
        let store = self.store.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.save(&state)).await {
            error!(error = %e, "State save task failed");
        }
    }

    /// Dispatch until every sink is dropped.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<DomainEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        debug!("Event channel closed, broker stopping");
    }

    pub fn spawn(self, events: mpsc::UnboundedReceiver<DomainEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSink, LiquidationRequest, TriggerCall};
    use crate::position::PositionKey;
    use crate::submitter::SubmitterCommand;
    use alloy::primitives::{Address, Bytes, B256, U256};
    use keeper_chain::{JoinExitAmounts, LogMeta, OracleClass};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        chain: Mutex<Vec<&'static str>>,
        sent: Mutex<Vec<TxSent>>,
        alerts: Mutex<Vec<Alert>>,
        saved: Mutex<Vec<AppState>>,
    }

    impl Notifier for Recorder {
        fn chain_event(&self, event: &ChainEvent) {
            self.chain.lock().push(event.kind.name());
        }
        fn tx_sent(&self, sent: &TxSent) {
            self.sent.lock().push(sent.clone());
        }
        fn alert(&self, alert: &Alert) {
            self.alerts.lock().push(alert.clone());
        }
    }

    impl StateStore for Recorder {
        fn load(&self) -> Option<AppState> {
            self.saved.lock().last().cloned()
        }
        fn save(&self, state: &AppState) {
            self.saved.lock().push(state.clone());
        }
    }

    fn chain_event(kind: ChainEventKind) -> ChainEvent {
        ChainEvent {
            meta: LogMeta {
                address: Address::ZERO,
                block_number: 7,
                block_hash: B256::ZERO,
                tx_hash: B256::repeat_byte(1),
                tx_index: 0,
                log_index: 0,
            },
            asset: Address::repeat_byte(2),
            owner: Address::repeat_byte(3),
            kind,
        }
    }

    #[tokio::test]
    async fn test_routes_every_variant() {
        let recorder = Arc::new(Recorder::default());
        let (submitter, mut inbox) = SubmitterHandle::channel();
        let broker = EventBroker::new(recorder.clone(), recorder.clone(), Some(submitter));
        let (sink, rx) = EventSink::channel();
        let task = broker.spawn(rx);

        let amounts = JoinExitAmounts {
            main: U256::from(1u8),
            col: U256::ZERO,
            usdp: U256::from(5u8),
        };
        let key = PositionKey::new(Address::repeat_byte(2), Address::repeat_byte(3));
        sink.emit(chain_event(ChainEventKind::Join(amounts)).into());
        sink.emit(chain_event(ChainEventKind::LiquidationTriggered).into());
        sink.emit(DomainEvent::LiquidationRequested(LiquidationRequest {
            key,
            trigger: Address::repeat_byte(9),
            oracle: OracleClass::OnChain,
            call: TriggerCall::Ready {
                calldata: Bytes::new(),
                gas_estimate: 100_000,
            },
            block: 7,
        }));
        sink.emit(DomainEvent::LiquidationTxSent(TxSent {
            key,
            tx_hash: B256::repeat_byte(4),
            nonce: 1,
            gas_price: 1,
            gas_limit: 1,
            block: 7,
            replacement: false,
        }));
        sink.request_save(AppState {
            last_processed_block: 7,
            ..Default::default()
        });
        sink.alert("test", Some(key), "look at this");
        drop(sink);
        task.await.unwrap();

        assert_eq!(*recorder.chain.lock(), vec!["Join", "LiquidationTriggered"]);
        assert_eq!(recorder.sent.lock().len(), 1);
        assert_eq!(recorder.alerts.lock()[0].message, "look at this");
        assert_eq!(recorder.load().map(|s| s.last_processed_block), Some(7));
        match inbox.try_recv() {
            Ok(SubmitterCommand::Request(request)) => assert_eq!(request.key, key),
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Saved blocks with the thread each write ran on.
    #[derive(Default)]
    struct ThreadRecorder {
        saves: Mutex<Vec<(u64, std::thread::ThreadId)>>,
    }

    impl StateStore for ThreadRecorder {
        fn load(&self) -> Option<AppState> {
            None
        }
        fn save(&self, state: &AppState) {
            self.saves
                .lock()
                .push((state.last_processed_block, std::thread::current().id()));
        }
    }

    #[tokio::test]
    async fn test_saves_leave_the_event_loop_in_order() {
        let store = Arc::new(ThreadRecorder::default());
        let broker = EventBroker::new(Arc::new(LogNotifier), store.clone(), None);
        let (sink, rx) = EventSink::channel();
        let task = broker.spawn(rx);

        for block in 1..=5 {
            sink.request_save(AppState {
                last_processed_block: block,
                ..Default::default()
            });
        }
        drop(sink);
        task.await.unwrap();

        // Single-threaded test runtime: the broker loop shares this thread
        let event_loop = std::thread::current().id();
        let saves = store.saves.lock();
        assert_eq!(saves.iter().map(|(b, _)| *b).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert!(saves.iter().all(|(_, thread)| *thread != event_loop));
    }

    #[test]
    fn test_log_notifier_handles_all_kinds() {
        let notifier = LogNotifier;
        notifier.chain_event(&chain_event(ChainEventKind::LiquidationTriggered));
        notifier.chain_event(&chain_event(ChainEventKind::Liquidated {
            buyer: Address::ZERO,
            amount: U256::from(1u8),
            price: U256::from(2u8),
            penalty: U256::from(3u8),
        }));
        notifier.alert(&Alert {
            source: "test",
            key: None,
            message: "no key".into(),
        });
    }
}
