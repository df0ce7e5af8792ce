//! CDP Keeper
//!
//! Liquidation agent for a CDP stablecoin protocol.
//! Features:
//! - Position set rebuilt from vault manager logs, persisted across restarts
//! - Per-block scan with on-chain and proof-based fallback oracle paths
//! - Confirmation-gated trigger submission with nonce tracking and resubmission

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_api::GasOracleClient;
use keeper_chain::{AlloyRpc, ChainRpc, GasPriceSource, ProtocolReader, RpcGasPrice, TxSigner};
use keeper_core::{
    Agent, AgentConfig, ChainEventSync, EventBroker, EventSink, GasPricer, JsonFileStore,
    LogNotifier, ProofBuilder, Scanner, StateStore, SyncState, TxSubmitter,
};

/// Environment variable names.
mod env {
    pub const RPC_HTTP_URL: &str = "RPC_HTTP_URL";
    pub const ARCHIVE_RPC_URL: &str = "ARCHIVE_RPC_URL";
    pub const RPC_WS_URL: &str = "RPC_WS_URL";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const GAS_ORACLE_URL: &str = "GAS_ORACLE_URL";
    pub const STATE_PATH: &str = "STATE_PATH";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

const DEFAULT_STATE_PATH: &str = "keeper-state.json";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        error!("Keeper stopped: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let json = std::env::var(env::LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,keeper_core=debug,keeper_chain=debug")),
        )
        .init();
}

/// Secrets and endpoints loaded from environment.
struct Endpoints {
    http_url: String,
    archive_url: Option<String>,
    ws_url: String,
    private_key: String,
    gas_oracle_url: Option<String>,
    state_path: String,
}

fn load_endpoints() -> Result<Endpoints> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };
    let optional = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

    Ok(Endpoints {
        http_url: get_env(env::RPC_HTTP_URL)?,
        archive_url: optional(env::ARCHIVE_RPC_URL),
        ws_url: get_env(env::RPC_WS_URL)?,
        private_key: get_env(env::PRIVATE_KEY)?,
        gas_oracle_url: optional(env::GAS_ORACLE_URL),
        state_path: optional(env::STATE_PATH).unwrap_or_else(|| DEFAULT_STATE_PATH.to_string()),
    })
}

async fn run() -> Result<()> {
    let config = AgentConfig::from_env().context("failed to load agent config")?;
    config.log_config();
    let endpoints = load_endpoints()?;

    info!(profile = %config.profile, "Starting CDP keeper");

    let rpc: Arc<dyn ChainRpc> = Arc::new(AlloyRpc::new(
        &endpoints.http_url,
        endpoints.archive_url.as_deref(),
        &endpoints.ws_url,
        config.chain.rpc_timeout(),
    )?);
    let reader = ProtocolReader::new(rpc.clone(), config.contracts.protocol_addresses());

    // Persisted state
    let store = Arc::new(JsonFileStore::new(&endpoints.state_path));
    let state = Arc::new(match store.load() {
        Some(saved) => SyncState::from_app_state(&saved),
        None => SyncState::new(),
    });

    let (sink, events) = EventSink::channel();

    // Gas pricing: external oracle first, node price as fallback
    let oracle = match &endpoints.gas_oracle_url {
        Some(url) => {
            let timeout = Duration::from_millis(config.submitter.gas_oracle_timeout_ms);
            let client: Arc<dyn GasPriceSource> = Arc::new(GasOracleClient::new(url, timeout)?);
            Some(client)
        }
        None => None,
    };
    let gas = GasPricer::new(
        oracle,
        Arc::new(RpcGasPrice::new(rpc.clone(), config.submitter.rpc_gas_multiplier_pct)),
        config.submitter.max_gas_price_gwei,
    );

    // Submitter
    let signer = TxSigner::new(&endpoints.private_key, config.chain.chain_id)?;
    let sender = signer.address();
    let submitter = TxSubmitter::new(
        rpc.clone(),
        signer,
        gas,
        config.submitter.clone(),
        &config.scanner,
        sink.clone(),
    )
    .await
    .context("failed to initialize submitter")?;
    let (submitter, _submitter_task) = submitter.spawn();
    info!(account = %sender, "Transaction submitter started");

    // Event routing
    let broker = EventBroker::new(Arc::new(LogNotifier), store.clone(), Some(submitter.clone()));
    let _broker_task = broker.spawn(events);

    let sync = ChainEventSync::new(
        reader.clone(),
        state.clone(),
        config.contracts.clone(),
        config.sync.clone(),
        sink.clone(),
    );
    let proofs = Arc::new(ProofBuilder::new(reader.clone(), config.proof.clone()));
    let scanner = Scanner::new(
        reader,
        proofs,
        state.clone(),
        config.contracts.clone(),
        config.scanner.clone(),
        sender,
        sink,
    );
    info!(source = ?scanner.source(), "Scanner configured");

    let agent = Agent::new(rpc, sync, scanner, submitter, config.chain.startup_timeout());

    tokio::select! {
        result = agent.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }

    let snapshot = state.snapshot();
    tokio::task::spawn_blocking(move || store.save(&snapshot))
        .await
        .context("final state save panicked")?;
    info!("State saved, exiting");
    Ok(())
}
