//! Low-latency gas price oracle client.
//!
//! Speaks the POA gas-price-oracle format:
//! `{"health": true, "fast": 42.0, "standard": 30.0, ...}` with prices in gwei.

use anyhow::{bail, Result};
use async_trait::async_trait;
use keeper_chain::gas::gwei_to_wei;
use keeper_chain::{GasPriceSource, GasQuote};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Oracle response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasOracleResponse {
    #[serde(default = "default_health")]
    pub health: bool,
    pub fast: Option<f64>,
    #[serde(default)]
    pub standard: Option<f64>,
    #[serde(default)]
    pub instant: Option<f64>,
}

fn default_health() -> bool {
    true
}

impl GasOracleResponse {
    /// Fast price in wei, or why it cannot be used.
    pub fn fast_price_wei(&self) -> Result<u128> {
        if !self.health {
            bail!("gas oracle reports unhealthy");
        }
        match self.fast.and_then(gwei_to_wei) {
            Some(price) => Ok(price),
            None => bail!("gas oracle returned no usable fast price: {:?}", self.fast),
        }
    }
}

/// HTTP client for the external gas price oracle.
#[derive(Debug, Clone)]
pub struct GasOracleClient {
    client: reqwest::Client,
    url: String,
}

impl GasOracleClient {
    /// Create a client for `url` with a request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the raw oracle document.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch(&self) -> Result<GasOracleResponse> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body: GasOracleResponse = response.json().await?;
        debug!(
            health = body.health,
            fast = ?body.fast,
            standard = ?body.standard,
            "Gas oracle response"
        );
        Ok(body)
    }
}

#[async_trait]
impl GasPriceSource for GasOracleClient {
    async fn gas_price(&self) -> Result<GasQuote> {
        let body = self.fetch().await?;
        match body.fast_price_wei() {
            Ok(gas_price) => Ok(GasQuote {
                gas_price,
                source: self.name(),
            }),
            Err(e) => {
                warn!(error = %e, "Gas oracle unavailable");
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "gas-oracle"
    }
}
