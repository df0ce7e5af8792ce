//! Keeper API clients for external services.
//!
//! This crate provides HTTP clients for:
//! - The low-latency gas price oracle used ahead of the node's own estimate

mod gas_oracle;

pub use gas_oracle::{GasOracleClient, GasOracleResponse};
