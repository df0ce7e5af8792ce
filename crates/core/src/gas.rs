//! Gas price selection for liquidation transactions.

use anyhow::Result;
use keeper_chain::gas::gwei_to_wei;
use keeper_chain::{GasPriceSource, GasQuote};
use std::sync::Arc;
use tracing::{debug, warn};

/// Oracle first, node price second, optionally capped.
#[derive(Debug, Clone)]
pub struct GasPricer {
    primary: Option<Arc<dyn GasPriceSource>>,
    fallback: Arc<dyn GasPriceSource>,
    max_gas_price: Option<u128>,
}

impl GasPricer {
    pub fn new(
        primary: Option<Arc<dyn GasPriceSource>>,
        fallback: Arc<dyn GasPriceSource>,
        max_gas_price_gwei: Option<f64>,
    ) -> Self {
        Self {
            primary,
            fallback,
            max_gas_price: max_gas_price_gwei.and_then(gwei_to_wei),
        }
    }

    pub async fn quote(&self) -> Result<GasQuote> {
        let quote = match &self.primary {
            Some(primary) => match primary.gas_price().await {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(
                        source = primary.name(),
                        fallback = self.fallback.name(),
                        error = %e,
                        "Gas oracle unavailable, using fallback"
                    );
                    self.fallback.gas_price().await?
                }
            },
            None => self.fallback.gas_price().await?,
        };

        Ok(self.clamp(quote))
    }

    fn clamp(&self, quote: GasQuote) -> GasQuote {
        match self.max_gas_price {
            Some(max) if quote.gas_price > max => {
                debug!(quoted = quote.gas_price, max, "Gas price capped");
                GasQuote {
                    gas_price: max,
                    source: quote.source,
                }
            }
            _ => quote,
        }
    }
}
