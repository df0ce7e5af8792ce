//! Alloy-backed [`ChainRpc`] implementation.
//!
//! Reads and sends go to the HTTP endpoint, historical storage and proofs to
//! the archive endpoint, and the head subscription to the WebSocket endpoint.
//! Every call carries a deadline; expiry surfaces as [`RpcError::Timeout`].

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::RpcError;
use crate::rpc::{AccountProof, BlockHeader, BlockStream, ChainRpc, LogQuery, StorageProof};

fn rpc_err(e: impl std::fmt::Display) -> RpcError {
    RpcError::from_message(e.to_string())
}

/// Chain RPC over alloy providers.
#[derive(Debug, Clone)]
pub struct AlloyRpc {
    /// HTTP URL (reads, estimates, sends)
    http_url: String,
    /// Archive URL (historical storage, proofs, headers)
    archive_url: String,
    /// WebSocket URL for subscriptions
    ws_url: String,
    /// Per-call deadline
    timeout: Duration,
}

impl AlloyRpc {
    /// Create a new RPC client. The archive endpoint defaults to the HTTP one.
    pub fn new(
        http_url: &str,
        archive_url: Option<&str>,
        ws_url: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        // Fail early on malformed endpoints rather than on the first call
        let _: Url = http_url.parse()?;
        let archive_url = archive_url.unwrap_or(http_url);
        let _: Url = archive_url.parse()?;

        info!(
            http = http_url,
            archive = archive_url,
            ws = ws_url,
            timeout_ms = timeout.as_millis() as u64,
            "Initializing chain RPC"
        );

        Ok(Self {
            http_url: http_url.to_string(),
            archive_url: archive_url.to_string(),
            ws_url: ws_url.to_string(),
            timeout,
        })
    }

    fn http(&self) -> Result<impl Provider, RpcError> {
        let url: Url = self.http_url.parse().map_err(rpc_err)?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    fn archive(&self) -> Result<impl Provider, RpcError> {
        let url: Url = self.archive_url.parse().map_err(rpc_err)?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, RpcError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl ChainRpc for AlloyRpc {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let provider = self.http()?;
        self.timed(async { provider.get_block_number().await.map_err(rpc_err) })
            .await
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RpcError> {
        let provider = self.archive()?;
        let filter = Filter::new()
            .address(query.address)
            .event_signature(query.topics.clone())
            .from_block(query.from_block)
            .to_block(query.to_block);

        debug!(
            address = %query.address,
            from = query.from_block,
            to = query.to_block,
            "Fetching logs"
        );

        self.timed(async { provider.get_logs(&filter).await.map_err(rpc_err) })
            .await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let provider = self.http()?;
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.timed(async { provider.call(tx).await.map_err(rpc_err) })
            .await
    }

    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes) -> Result<u64, RpcError> {
        let provider = self.http()?;
        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(data);
        self.timed(async { provider.estimate_gas(tx).await.map_err(rpc_err) })
            .await
    }

    async fn transaction_count(&self, account: Address) -> Result<u64, RpcError> {
        let provider = self.http()?;
        self.timed(async { provider.get_transaction_count(account).await.map_err(rpc_err) })
            .await
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        let provider = self.http()?;
        self.timed(async { provider.get_gas_price().await.map_err(rpc_err) })
            .await
    }

    async fn storage_at(&self, address: Address, slot: U256, block: u64) -> Result<U256, RpcError> {
        let provider = self.archive()?;
        self.timed(async {
            provider
                .get_storage_at(address, slot)
                .block_id(BlockId::number(block))
                .await
                .map_err(rpc_err)
        })
        .await
    }

    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<B256>,
        block: u64,
    ) -> Result<AccountProof, RpcError> {
        let provider = self.archive()?;
        let response = self
            .timed(async {
                provider
                    .get_proof(address, slots.clone())
                    .block_id(BlockId::number(block))
                    .await
                    .map_err(rpc_err)
            })
            .await?;

        if response.storage_proof.len() != slots.len() {
            return Err(RpcError::Decode(format!(
                "expected {} storage proofs, node returned {}",
                slots.len(),
                response.storage_proof.len()
            )));
        }

        // Keys are reported back in request order
        let storage_proofs = response
            .storage_proof
            .into_iter()
            .zip(slots)
            .map(|(entry, key)| StorageProof {
                key,
                value: entry.value,
                proof: entry.proof,
            })
            .collect();

        Ok(AccountProof {
            address,
            account_proof: response.account_proof,
            storage_proofs,
        })
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>, RpcError> {
        let provider = self.archive()?;
        let block = self
            .timed(async {
                provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .await
                    .map_err(rpc_err)
            })
            .await?;

        Ok(block.map(|block| {
            let header = &block.header;
            BlockHeader {
                hash: header.hash,
                parent_hash: header.parent_hash,
                ommers_hash: header.ommers_hash,
                beneficiary: header.beneficiary,
                state_root: header.state_root,
                transactions_root: header.transactions_root,
                receipts_root: header.receipts_root,
                logs_bloom: header.logs_bloom,
                difficulty: header.difficulty,
                number: header.number,
                gas_limit: header.gas_limit,
                gas_used: header.gas_used,
                timestamp: header.timestamp,
                extra_data: header.extra_data.clone(),
                mix_hash: Some(header.mix_hash),
                nonce: Some(header.nonce),
                base_fee_per_gas: header.base_fee_per_gas,
                withdrawals_root: header.withdrawals_root,
                blob_gas_used: header.blob_gas_used,
                excess_blob_gas: header.excess_blob_gas,
                parent_beacon_block_root: header.parent_beacon_block_root,
                requests_hash: header.requests_hash,
            }
        }))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
        let provider = self.http()?;
        self.timed(async {
            let pending = provider.send_raw_transaction(&raw).await.map_err(rpc_err)?;
            Ok(*pending.tx_hash())
        })
        .await
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, RpcError> {
        info!(ws_url = %self.ws_url, "Subscribing to new block headers");

        let ws = WsConnect::new(&self.ws_url);
        let provider = self
            .timed(async { ProviderBuilder::new().on_ws(ws).await.map_err(rpc_err) })
            .await?;
        let sub = provider.subscribe_blocks().await.map_err(rpc_err)?;
        let inner_stream = sub.into_stream();

        // The provider must live in the stream's state to keep the socket open
        let block_stream = futures::stream::unfold(
            (provider, inner_stream),
            |(provider, mut stream)| async move {
                stream
                    .next()
                    .await
                    .map(|header| (header.number, (provider, stream)))
            },
        );

        Ok(Box::pin(block_stream))
    }
}
