//! Local transaction signing and nonce bookkeeping.
//!
//! Transactions are signed offline so the hash is known before broadcast;
//! the raw bytes are then handed to [`ChainRpc::send_raw_transaction`].
//!
//! [`ChainRpc::send_raw_transaction`]: crate::ChainRpc::send_raw_transaction

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Locally tracked account nonce.
///
/// Seeded from the on-chain transaction count; only its single owner
/// (the submitter) advances it.
#[derive(Debug)]
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    /// Current nonce without incrementing.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Reset to the chain's transaction count.
    pub fn reset(&self, chain_nonce: u64) {
        let previous = self.current.swap(chain_nonce, Ordering::SeqCst);
        debug!(previous, nonce = chain_nonce, "Nonce reset from chain");
    }
}

/// Fields of a legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub to: Address,
    pub input: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

/// A signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub hash: B256,
    pub raw: Bytes,
}

/// Offline signer for legacy transactions.
pub struct TxSigner {
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
}

impl TxSigner {
    /// Create from a private key (with or without 0x prefix).
    pub fn new(private_key: &str, chain_id: u64) -> Result<Self> {
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str.parse()?;
        let address = signer.address();

        info!(address = %address, chain_id, "Transaction signer initialized");

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Sign a legacy transaction.
    pub async fn sign(&self, tx: &LegacyTx) -> Result<SignedTx> {
        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(tx.to)
            .with_input(tx.input.clone())
            .with_nonce(tx.nonce)
            .with_gas_limit(tx.gas_limit)
            .with_gas_price(tx.gas_price)
            .with_chain_id(self.chain_id);

        let envelope = request.build(&self.wallet).await?;
        let hash = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());

        debug!(
            tx_hash = %hash,
            nonce = tx.nonce,
            gas_limit = tx.gas_limit,
            gas_price = tx.gas_price,
            "Transaction signed"
        );

        Ok(SignedTx { hash, raw })
    }
}

impl std::fmt::Debug for TxSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSigner")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}
