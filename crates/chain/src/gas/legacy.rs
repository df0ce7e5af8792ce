//! Node gas price with a safety multiplier.

use super::{GasPriceSource, GasQuote};
use crate::rpc::ChainRpc;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `eth_gasPrice` scaled by `multiplier_pct / 100`.
pub struct RpcGasPrice {
    rpc: Arc<dyn ChainRpc>,
    multiplier_pct: u64,
}

impl RpcGasPrice {
    pub fn new(rpc: Arc<dyn ChainRpc>, multiplier_pct: u64) -> Self {
        Self {
            rpc,
            multiplier_pct,
        }
    }

    pub fn apply_multiplier(&self, gas_price: u128) -> u128 {
        gas_price.saturating_mul(self.multiplier_pct as u128) / 100
    }
}

impl std::fmt::Debug for RpcGasPrice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcGasPrice")
            .field("multiplier_pct", &self.multiplier_pct)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GasPriceSource for RpcGasPrice {
    async fn gas_price(&self) -> Result<GasQuote> {
        let node_price = self.rpc.gas_price().await?;
        let gas_price = self.apply_multiplier(node_price);

        debug!(
            node_price,
            gas_price,
            multiplier_pct = self.multiplier_pct,
            "RPC gas price"
        );

        Ok(GasQuote {
            gas_price,
            source: self.name(),
        })
    }

    fn name(&self) -> &'static str {
        "rpc"
    }
}
