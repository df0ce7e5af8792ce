//! In-memory [`ChainRpc`] for component tests.

use alloy::primitives::{keccak256, Address, Bytes, LogData, B256, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use keeper_chain::{
    event_signatures, AccountProof, BlockHeader, BlockStream, ChainRpc, LogQuery, RpcError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    logs: Vec<Log>,
    log_delays: HashMap<Address, Duration>,
    log_failures: HashMap<Address, usize>,
    log_queries: Vec<LogQuery>,
    calls: HashMap<(Address, Bytes), Result<Bytes, RpcError>>,
    estimates: HashMap<(Address, Bytes), Result<u64, RpcError>>,
    estimate_requests: Vec<(Address, Bytes)>,
    storage: HashMap<(Address, U256, u64), U256>,
    proofs: HashMap<(Address, u64), AccountProof>,
    proof_requests: Vec<(Address, Vec<B256>, u64)>,
    blocks: HashMap<u64, BlockHeader>,
    send_results: VecDeque<Result<(), RpcError>>,
    sent: Vec<Bytes>,
    block_feed: Option<mpsc::UnboundedReceiver<u64>>,
}

pub struct MockRpc {
    head: AtomicU64,
    tx_count: AtomicU64,
    tx_count_calls: AtomicUsize,
    gas_price: AtomicU64,
    inner: Mutex<Inner>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self {
            head: AtomicU64::new(0),
            tx_count: AtomicU64::new(0),
            tx_count_calls: AtomicUsize::new(0),
            gas_price: AtomicU64::new(20_000_000_000),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn set_head(&self, block: u64) {
        self.head.store(block, Ordering::SeqCst);
    }

    pub fn set_tx_count(&self, count: u64) {
        self.tx_count.store(count, Ordering::SeqCst);
    }

    pub fn tx_count_calls(&self) -> usize {
        self.tx_count_calls.load(Ordering::SeqCst)
    }

    pub fn set_gas_price(&self, wei: u64) {
        self.gas_price.store(wei, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Log) {
        self.inner.lock().logs.push(log);
    }

    pub fn set_log_delay(&self, address: Address, delay: Duration) {
        self.inner.lock().log_delays.insert(address, delay);
    }

    /// Fail the next `times` log queries for `address`.
    pub fn fail_logs(&self, address: Address, times: usize) {
        self.inner.lock().log_failures.insert(address, times);
    }

    pub fn log_queries(&self) -> Vec<LogQuery> {
        self.inner.lock().log_queries.clone()
    }

    pub fn set_call(&self, to: Address, data: Bytes, result: Result<Bytes, RpcError>) {
        self.inner.lock().calls.insert((to, data), result);
    }

    pub fn remove_call(&self, to: Address, data: Bytes) {
        self.inner.lock().calls.remove(&(to, data));
    }

    pub fn set_estimate(&self, to: Address, data: Bytes, result: Result<u64, RpcError>) {
        self.inner.lock().estimates.insert((to, data), result);
    }

    pub fn estimate_requests(&self) -> Vec<(Address, Bytes)> {
        self.inner.lock().estimate_requests.clone()
    }

    pub fn set_storage(&self, address: Address, slot: u64, block: u64, value: U256) {
        self.inner
            .lock()
            .storage
            .insert((address, U256::from(slot), block), value);
    }

    pub fn set_proof(&self, address: Address, block: u64, proof: AccountProof) {
        self.inner.lock().proofs.insert((address, block), proof);
    }

    pub fn proof_requests(&self) -> Vec<(Address, Vec<B256>, u64)> {
        self.inner.lock().proof_requests.clone()
    }

    pub fn set_block(&self, header: BlockHeader) {
        self.inner.lock().blocks.insert(header.number, header);
    }

    /// Outcome of the next `send_raw_transaction`; success when the queue is empty.
    pub fn push_send_result(&self, result: Result<(), RpcError>) {
        self.inner.lock().send_results.push_back(result);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.inner.lock().sent.clone()
    }

    /// Sender feeding the next `subscribe_blocks` stream.
    pub fn block_feed(&self) -> mpsc::UnboundedSender<u64> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().block_feed = Some(rx);
        tx
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RpcError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.log_queries.push(query.clone());
            if let Some(left) = inner.log_failures.get_mut(&query.address) {
                if *left > 0 {
                    *left -= 1;
                    return Err(RpcError::Transport("injected log failure".into()));
                }
            }
            inner.log_delays.get(&query.address).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.lock();
        Ok(inner.logs.iter().filter(|l| query.matches(l)).cloned().collect())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.inner
            .lock()
            .calls
            .get(&(to, data))
            .cloned()
            .unwrap_or_else(|| Err(RpcError::Transport(format!("unmocked call to {to}"))))
    }

    async fn estimate_gas(&self, _from: Address, to: Address, data: Bytes) -> Result<u64, RpcError> {
        let mut inner = self.inner.lock();
        inner.estimate_requests.push((to, data.clone()));
        inner
            .estimates
            .get(&(to, data))
            .cloned()
            .unwrap_or_else(|| Err(RpcError::Transport(format!("unmocked estimate to {to}"))))
    }

    async fn transaction_count(&self, _account: Address) -> Result<u64, RpcError> {
        self.tx_count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tx_count.load(Ordering::SeqCst))
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        Ok(self.gas_price.load(Ordering::SeqCst) as u128)
    }

    async fn storage_at(&self, address: Address, slot: U256, block: u64) -> Result<U256, RpcError> {
        Ok(self
            .inner
            .lock()
            .storage
            .get(&(address, slot, block))
            .copied()
            .unwrap_or_default())
    }

    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<B256>,
        block: u64,
    ) -> Result<AccountProof, RpcError> {
        let mut inner = self.inner.lock();
        inner.proof_requests.push((address, slots, block));
        inner
            .proofs
            .get(&(address, block))
            .cloned()
            .ok_or_else(|| RpcError::Transport(format!("no proof for {address} at {block}")))
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>, RpcError> {
        Ok(self.inner.lock().blocks.get(&number).cloned())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
        let mut inner = self.inner.lock();
        match inner.send_results.pop_front().unwrap_or(Ok(())) {
            Ok(()) => {
                let hash = keccak256(&raw);
                inner.sent.push(raw);
                Ok(hash)
            }
            Err(e) => Err(e),
        }
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, RpcError> {
        let rx = self
            .inner
            .lock()
            .block_feed
            .take()
            .ok_or_else(|| RpcError::Transport("no block feed".into()))?;
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|block| (block, rx))
        });
        Ok(Box::pin(stream))
    }
}

/// An rpc log as a node returns it.
pub fn log(
    address: Address,
    topics: Vec<B256>,
    data: Vec<u8>,
    block: u64,
    tx_hash: B256,
    log_index: u64,
) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: LogData::new_unchecked(topics, Bytes::from(data)),
        },
        block_hash: Some(B256::from(U256::from(block))),
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(tx_hash),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

fn words(values: &[U256]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| v.to_be_bytes::<32>())
        .collect()
}

pub fn join_log(
    manager: Address,
    asset: Address,
    owner: Address,
    usdp: u64,
    block: u64,
    tx_hash: B256,
) -> Log {
    log(
        manager,
        vec![event_signatures::JOIN, asset.into_word(), owner.into_word()],
        words(&[U256::from(1u8), U256::ZERO, U256::from(usdp)]),
        block,
        tx_hash,
        0,
    )
}

pub fn exit_log(manager: Address, asset: Address, owner: Address, block: u64, tx_hash: B256) -> Log {
    log(
        manager,
        vec![event_signatures::EXIT, asset.into_word(), owner.into_word()],
        words(&[U256::from(1u8), U256::ZERO, U256::ZERO]),
        block,
        tx_hash,
        0,
    )
}

pub fn triggered_log(trigger: Address, asset: Address, owner: Address, block: u64, tx_hash: B256) -> Log {
    log(
        trigger,
        vec![event_signatures::LIQUIDATION_TRIGGERED, asset.into_word(), owner.into_word()],
        Vec::new(),
        block,
        tx_hash,
        0,
    )
}

pub fn buyout_log(auction: Address, asset: Address, owner: Address, block: u64, tx_hash: B256) -> Log {
    log(
        auction,
        vec![
            event_signatures::BUYOUT,
            asset.into_word(),
            owner.into_word(),
            Address::repeat_byte(0xbb).into_word(),
        ],
        words(&[U256::from(1u8), U256::from(2u8), U256::from(3u8)]),
        block,
        tx_hash,
        0,
    )
}

/// Encoded single-word return value.
pub fn ret(value: U256) -> Bytes {
    Bytes::from(value.to_be_bytes::<32>().to_vec())
}
